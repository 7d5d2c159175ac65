//! Build dependency planning.
//!
//! The pre-check runs unprivileged and has no side effects beyond a scratch
//! source file: it asks the package database, looks binaries up on `PATH`,
//! and compiles a trivial program against the kernel UAPI headers. Only when
//! it fails is a privileged install planned.

use crate::command::{shell_quote, CommandChain, CommandSpec};
use crate::environment::{DistroFamily, EnvironmentInfo};
use crate::runner::{running_release, CommandRunner, ToolLookup};
use tracing::{debug, info};

const HEADER_CHECK_SOURCE: &str = "#include <linux/limits.h>\n#include <sys/types.h>\nint main() { return 0; }\n";

const DEBIAN_BUILD_DEPS: &[&str] = &[
    "build-essential", "libncurses-dev", "bison", "flex", "libssl-dev", "libelf-dev", "bc",
    "wget", "tar", "xz-utils", "gettext", "libc6-dev", "fakeroot", "curl", "git", "debhelper",
    "libdw-dev", "rsync", "locales", "dracut", "dracut-core", "dracut-network",
    "linux-libc-dev", "libudev-dev", "libbpf-dev", "pkg-config", "zlib1g-dev", "libzstd-dev",
    "dwarves", "kmod", "cpio", "pahole", "liblz4-dev", "liblzma-dev",
];

const FEDORA_BUILD_DEPS: &[&str] = &[
    "gcc", "make", "ncurses-devel", "bison", "flex", "openssl-devel", "elfutils-libelf-devel",
    "elfutils-devel", "rpm-build", "bc", "rsync", "wget", "tar", "xz", "dwarves", "git-core",
    "rubygem-asciidoctor", "xmlto", "zlib-devel", "libzstd-devel", "perl",
];

const ARCH_BUILD_DEPS: &[&str] = &[
    "base-devel", "bc", "rsync", "wget", "tar", "xz", "libelf", "pahole", "kmod", "cpio",
    "openssl", "ncurses", "perl", "python",
];

const MANDRIVA_BUILD_DEPS: &[&str] = &[
    "gcc", "gcc-c++", "make", "binutils", "bison", "flex", "bc", "rsync", "wget", "tar", "xz",
    "curl", "git", "gettext", "kmod", "cpio", "dwarves", "fakeroot", "openssl-devel",
    "elfutils-devel", "rpm-build", "ncurses-devel", "newt-devel", "kernel-desktop-devel", "perl",
];

const ARCH_ESSENTIAL_BINS: &[&str] = &["gcc", "make", "pahole", "tar", "bc"];
const MANDRIVA_ESSENTIAL_BINS: &[&str] = &["gcc", "make", "tar", "xz", "perl"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyPlan {
    /// Everything needed is present; nothing to elevate for.
    Satisfied,
    /// Run this chain as one privileged invocation.
    Install(CommandChain),
    /// No package list is known for this distribution.
    Unsupported,
}

pub fn dependency_plan(
    env: &EnvironmentInfo,
    runner: &dyn CommandRunner,
    tools: &dyn ToolLookup,
) -> DependencyPlan {
    let plan = match env.distro_family {
        DistroFamily::Debian | DistroFamily::Ubuntu => debian_plan(env, runner),
        DistroFamily::Fedora => fedora_plan(runner, tools),
        DistroFamily::Arch => arch_plan(runner, tools),
        DistroFamily::Mandriva => mandriva_plan(runner, tools),
        DistroFamily::Unknown => DependencyPlan::Unsupported,
    };
    match &plan {
        DependencyPlan::Satisfied => info!("build dependencies already satisfied"),
        DependencyPlan::Install(chain) => debug!("dependency install: {}", chain.render()),
        DependencyPlan::Unsupported => {
            info!("no dependency list for {}", env.distro_family);
        }
    }
    plan
}

fn debian_plan(env: &EnvironmentInfo, runner: &dyn CommandRunner) -> DependencyPlan {
    let mut packages: Vec<String> = DEBIAN_BUILD_DEPS.iter().map(|p| (*p).to_owned()).collect();
    let uname = running_release(runner);
    if uname != "Unknown" {
        packages.push(format!("linux-headers-{uname}"));
    }
    if env.distro_family == DistroFamily::Ubuntu {
        packages.push("linux-headers-generic".to_owned());
    }

    if dpkg_all_installed(runner, &packages) && headers_compile(runner) {
        return DependencyPlan::Satisfied;
    }
    DependencyPlan::Install(
        CommandChain::new()
            .then(CommandSpec::new("apt").arg("update"))
            .then(
                CommandSpec::new("apt")
                    .args(["install", "--reinstall", "-y"])
                    .args(packages),
            ),
    )
}

fn dpkg_all_installed(runner: &dyn CommandRunner, packages: &[String]) -> bool {
    let query = CommandSpec::new("dpkg-query")
        .args(["-W", "-f=${Status}\\n"])
        .args(packages.iter().cloned());
    match runner.run(&query) {
        Ok(out) if out.success() => out
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .all(|l| l.trim() == "install ok installed"),
        _ => false,
    }
}

fn fedora_plan(runner: &dyn CommandRunner, tools: &dyn ToolLookup) -> DependencyPlan {
    let query = CommandSpec::new("rpm")
        .arg("-q")
        .args(FEDORA_BUILD_DEPS.iter().copied())
        .arg("--quiet");
    if runner.run(&query).is_ok_and(|out| out.success()) {
        return DependencyPlan::Satisfied;
    }
    let manager = if tools.has("dnf") { "dnf" } else { "yum" };
    DependencyPlan::Install(CommandChain::from(
        CommandSpec::new(manager)
            .args(["install", "-y"])
            .args(FEDORA_BUILD_DEPS.iter().copied()),
    ))
}

fn arch_plan(runner: &dyn CommandRunner, tools: &dyn ToolLookup) -> DependencyPlan {
    if ARCH_ESSENTIAL_BINS.iter().all(|b| tools.has(b)) && headers_compile(runner) {
        // `base-devel` is a group, which `pacman -T` cannot test.
        let query = CommandSpec::new("pacman")
            .arg("-T")
            .args(ARCH_BUILD_DEPS.iter().copied().filter(|p| *p != "base-devel"));
        if runner.run(&query).is_ok_and(|out| out.success()) {
            return DependencyPlan::Satisfied;
        }
    }
    DependencyPlan::Install(CommandChain::from(
        CommandSpec::new("pacman")
            .args(["-S", "--needed", "--noconfirm"])
            .args(ARCH_BUILD_DEPS.iter().copied()),
    ))
}

fn mandriva_plan(runner: &dyn CommandRunner, tools: &dyn ToolLookup) -> DependencyPlan {
    if MANDRIVA_ESSENTIAL_BINS.iter().all(|b| tools.has(b)) && headers_compile(runner) {
        return DependencyPlan::Satisfied;
    }
    DependencyPlan::Install(CommandChain::from(
        CommandSpec::new("dnf")
            .args(["install", "-y"])
            .args(MANDRIVA_BUILD_DEPS.iter().copied()),
    ))
}

/// Compile a trivial program that includes `<linux/limits.h>`. Broken or
/// missing UAPI headers are the most common reason a kernel build dies early.
/// The source is piped to the compiler and the object discarded, so nothing
/// is written to disk.
fn headers_compile(runner: &dyn CommandRunner) -> bool {
    runner
        .run(&header_check_command())
        .is_ok_and(|out| out.success())
}

fn header_check_command() -> CommandSpec {
    let script = format!(
        "printf '%s' {} | gcc -x c -c - -o /dev/null",
        shell_quote(HEADER_CHECK_SOURCE)
    );
    CommandSpec::new("sh").arg("-c").arg(script)
}
