use crate::environment::{DistroFamily, EnvironmentInfo};
use crate::runner::ToolLookup;
use std::fmt;

/// A missing build tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: String,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

const BUILD_TOOLS: &[(&str, &str)] = &[
    ("make", "drives the kernel build"),
    ("gcc", "C compiler"),
    ("flex", "Kconfig lexer"),
    ("bison", "Kconfig parser"),
    ("bc", "timeconst generation"),
    ("tar", "source archive extraction"),
    ("perl", "kernel build scripts"),
    ("openssl", "module signing keys"),
    ("pahole", "BTF type information"),
    ("cpio", "initramfs packing"),
];

fn package_for(tool: &'static str, family: DistroFamily) -> &'static str {
    match (tool, family) {
        ("make" | "gcc", DistroFamily::Debian | DistroFamily::Ubuntu | DistroFamily::Unknown) => {
            "build-essential"
        }
        ("make" | "gcc", DistroFamily::Arch) => "base-devel",
        ("pahole", f) if f != DistroFamily::Arch => "dwarves",
        _ => tool,
    }
}

/// Build tools missing from `PATH` on this host. Empty means the build can
/// at least start; `kforge deps` installs the full package set.
pub fn check_build_tools(env: &EnvironmentInfo, tools: &dyn ToolLookup) -> Vec<MissingPrereq> {
    let manager = env.distro_family.package_manager();
    let install = match env.distro_family {
        DistroFamily::Arch => "-S",
        _ => "install",
    };
    BUILD_TOOLS
        .iter()
        .filter(|(name, _)| !tools.has(name))
        .map(|&(name, purpose)| MissingPrereq {
            name,
            purpose,
            install_hint: format!(
                "{manager} {install} {}",
                package_for(name, env.distro_family)
            ),
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing build tools:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nRun `kforge deps` to install the complete build dependency set.");
    msg
}
