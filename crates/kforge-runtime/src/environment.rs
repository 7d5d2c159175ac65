//! Distribution, bootloader and initramfs detection.
//!
//! Detection happens once per process through [`EnvironmentProbe::detect`].
//! The resulting [`EnvironmentInfo`] is plain data; every command generator
//! on it is a pure function of its fields. Ambiguous hosts never fail
//! detection: they degrade to the most common choice whose tool is present,
//! or to `Unknown`, and log why. Generators only name tools that were
//! detected; for an `Unknown` bootloader or initramfs tool they return `None`
//! and the caller skips that step.

use crate::command::{CommandChain, CommandSpec};
use crate::runner::{CommandRunner, ToolLookup};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    Debian,
    /// Ubuntu and derivatives. Separate from Debian for Secure Boot handling.
    Ubuntu,
    /// Fedora, RHEL and rebuilds.
    Fedora,
    Arch,
    /// Mageia, OpenMandriva, ROSA, PCLinuxOS.
    Mandriva,
    Unknown,
}

const DISTRO_IDS: &[(&str, DistroFamily)] = &[
    ("debian", DistroFamily::Debian),
    ("devuan", DistroFamily::Debian),
    ("mx", DistroFamily::Debian),
    ("antix", DistroFamily::Debian),
    ("goldendoglinux", DistroFamily::Debian),
    ("soplos", DistroFamily::Debian),
    ("quirinux", DistroFamily::Debian),
    ("etertics", DistroFamily::Debian),
    ("goblin", DistroFamily::Debian),
    ("gobmis", DistroFamily::Debian),
    ("huayra", DistroFamily::Debian),
    ("lmde", DistroFamily::Debian),
    ("ubuntu", DistroFamily::Ubuntu),
    ("linuxmint", DistroFamily::Ubuntu),
    ("elementary", DistroFamily::Ubuntu),
    ("pop", DistroFamily::Ubuntu),
    ("zorin", DistroFamily::Ubuntu),
    ("neon", DistroFamily::Ubuntu),
    ("fedora", DistroFamily::Fedora),
    ("rhel", DistroFamily::Fedora),
    ("centos", DistroFamily::Fedora),
    ("rocky", DistroFamily::Fedora),
    ("almalinux", DistroFamily::Fedora),
    ("oracle", DistroFamily::Fedora),
    ("arch", DistroFamily::Arch),
    ("manjaro", DistroFamily::Arch),
    ("endeavouros", DistroFamily::Arch),
    ("garuda", DistroFamily::Arch),
    ("cachyos", DistroFamily::Arch),
    ("mageia", DistroFamily::Mandriva),
    ("openmandriva", DistroFamily::Mandriva),
    ("rosa", DistroFamily::Mandriva),
    ("pclinuxos", DistroFamily::Mandriva),
];

impl DistroFamily {
    pub fn from_id(id: &str) -> Option<Self> {
        DISTRO_IDS
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, family)| *family)
    }

    pub fn is_debian_like(self) -> bool {
        matches!(self, DistroFamily::Debian | DistroFamily::Ubuntu)
    }

    pub fn is_rpm_based(self) -> bool {
        matches!(self, DistroFamily::Fedora | DistroFamily::Mandriva)
    }

    pub fn package_manager(self) -> &'static str {
        match self {
            DistroFamily::Debian | DistroFamily::Ubuntu | DistroFamily::Unknown => "apt",
            DistroFamily::Fedora | DistroFamily::Mandriva => "dnf",
            DistroFamily::Arch => "pacman",
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DistroFamily::Debian => "Debian",
            DistroFamily::Ubuntu => "Ubuntu",
            DistroFamily::Fedora => "Fedora/RHEL",
            DistroFamily::Arch => "Arch",
            DistroFamily::Mandriva => "Mandriva",
            DistroFamily::Unknown => "Unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    Grub,
    SystemdBoot,
    Refind,
    Lilo,
    Syslinux,
    /// No marker matched and no GRUB tool is installed.
    Unknown,
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bootloader::Grub => "GRUB2",
            Bootloader::SystemdBoot => "systemd-boot",
            Bootloader::Refind => "rEFInd",
            Bootloader::Lilo => "LILO",
            Bootloader::Syslinux => "Syslinux",
            Bootloader::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitramfsTool {
    InitramfsTools,
    Dracut,
    Mkinitcpio,
    Unknown,
}

impl fmt::Display for InitramfsTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitramfsTool::InitramfsTools => "initramfs-tools",
            InitramfsTool::Dracut => "dracut",
            InitramfsTool::Mkinitcpio => "mkinitcpio",
            InitramfsTool::Unknown => "unknown",
        })
    }
}

/// How GRUB's configuration is regenerated on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrubSetup {
    pub program: String,
    /// `-o` target for the `*-mkconfig` tools; `update-grub` takes none.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub distro_family: DistroFamily,
    pub distro_id: String,
    pub distro_name: String,
    pub distro_version: String,
    pub bootloader: Bootloader,
    pub initramfs_tool: InitramfsTool,
    pub grub: Option<GrubSetup>,
}

impl EnvironmentInfo {
    pub fn is_supported(&self) -> bool {
        self.distro_family != DistroFamily::Unknown
    }

    /// Ubuntu-family kernels need MOK enrolment when Secure Boot is on.
    pub fn needs_secure_boot_handling(&self) -> bool {
        self.distro_family == DistroFamily::Ubuntu
    }

    /// Refresh the boot menu. `None` when no bootloader tool was detected.
    pub fn bootloader_update_command(&self) -> Option<CommandSpec> {
        let cmd = match self.bootloader {
            Bootloader::SystemdBoot => CommandSpec::new("bootctl").arg("update"),
            Bootloader::Refind => CommandSpec::new("refind-mkconfig"),
            Bootloader::Lilo => CommandSpec::new("lilo"),
            Bootloader::Syslinux => CommandSpec::new("extlinux-update"),
            Bootloader::Grub => {
                let Some(grub) = &self.grub else {
                    warn!("GRUB detected but neither update-grub nor grub-mkconfig is installed");
                    return None;
                };
                match &grub.output {
                    Some(out) => CommandSpec::new(&grub.program)
                        .arg("-o")
                        .arg(out.to_string_lossy()),
                    None => CommandSpec::new(&grub.program),
                }
            }
            Bootloader::Unknown => return None,
        };
        Some(cmd)
    }

    /// Regenerate the initramfs for `release`, or for every installed kernel.
    /// Images for a single release are written into `boot_dir`, next to the
    /// kernel. `None` when no initramfs tool was detected.
    pub fn initramfs_update_command(
        &self,
        release: Option<&str>,
        boot_dir: &Path,
    ) -> Option<CommandSpec> {
        let image = |v: &str| boot_dir.join(format!("initramfs-{v}.img")).display().to_string();
        let cmd = match (self.initramfs_tool, release) {
            (InitramfsTool::Dracut, release) => {
                let mut cmd = CommandSpec::new("dracut");
                if release.is_none() {
                    cmd = cmd.arg("--regenerate-all");
                }
                cmd = cmd.arg("--force");
                if self.distro_id == "soplos" {
                    cmd = cmd.args(["--hostonly", "--hostonly-cmdline"]);
                }
                match release {
                    Some(v) => cmd.arg(image(v)).arg(v),
                    None => cmd,
                }
            }
            (InitramfsTool::Mkinitcpio, Some(v)) => CommandSpec::new("mkinitcpio")
                .args(["-k", v, "-g"])
                .arg(image(v)),
            (InitramfsTool::Mkinitcpio, None) => CommandSpec::new("mkinitcpio").arg("-P"),
            (InitramfsTool::InitramfsTools, Some(v)) => {
                CommandSpec::new("update-initramfs").args(["-c", "-k", v])
            }
            (InitramfsTool::InitramfsTools, None) => {
                CommandSpec::new("update-initramfs").args(["-u", "-k", "all"])
            }
            (InitramfsTool::Unknown, _) => return None,
        };
        Some(cmd)
    }

    /// Uninstall a kernel previously installed by kforge. `release` must
    /// already be validated; `boot_dir` is where direct installs copied it.
    pub fn kernel_remove_command(&self, release: &str, boot_dir: &Path) -> CommandChain {
        let boot = |name: String| boot_dir.join(name).display().to_string();
        match self.distro_family {
            DistroFamily::Debian | DistroFamily::Ubuntu => CommandChain::from(
                CommandSpec::new("apt")
                    .args(["purge", "-y"])
                    .arg(format!("linux-image-{release}"))
                    .arg(format!("linux-headers-{release}")),
            ),
            DistroFamily::Fedora | DistroFamily::Mandriva => CommandChain::from(
                CommandSpec::new("dnf")
                    .args(["remove", "-y"])
                    .arg(format!("kernel-{release}")),
            ),
            // Arch-family and unrecognized hosts get kernels copied straight
            // into the boot directory, so they are removed the same way.
            DistroFamily::Arch | DistroFamily::Unknown => CommandChain::new()
                .then(CommandSpec::new("rm").arg("-f").args([
                    boot(format!("vmlinuz-{release}")),
                    boot(format!("initramfs-{release}.img")),
                    boot(format!("initramfs-{release}-fallback.img")),
                    boot(format!("System.map-{release}")),
                    boot(format!("config-{release}")),
                ]))
                .then(
                    CommandSpec::new("rm")
                        .arg("-rf")
                        .arg(format!("/usr/lib/modules/{release}")),
                ),
        }
    }

    /// Packages needed to build a kernel on this family.
    pub fn required_packages(&self) -> &'static [&'static str] {
        match self.distro_family {
            DistroFamily::Debian | DistroFamily::Unknown => &[
                "build-essential", "libncurses-dev", "pkg-config", "libncursesw5-dev", "bison",
                "flex", "libssl-dev", "libelf-dev", "bc", "wget", "tar", "xz-utils", "gettext",
                "libc6-dev", "fakeroot", "curl", "git", "debhelper", "libdw-dev", "rsync",
                "locales", "dwarves", "kmod", "cpio",
            ],
            DistroFamily::Ubuntu => &[
                "build-essential", "libncurses-dev", "pkg-config", "libncursesw5-dev", "bison",
                "flex", "libssl-dev", "libelf-dev", "bc", "wget", "tar", "xz-utils", "gettext",
                "fakeroot", "curl", "git", "debhelper", "libdw-dev", "rsync", "locales",
                "dwarves", "kmod", "cpio", "mokutil", "openssl",
            ],
            DistroFamily::Fedora => &[
                "gcc", "make", "ncurses-devel", "bison", "flex", "openssl-devel",
                "elfutils-libelf-devel", "elfutils-devel", "rpm-build", "newt-devel", "curl",
                "git", "wget", "tar", "xz", "dwarves", "pkgconfig", "bc", "rsync", "kmod",
                "cpio", "perl",
            ],
            DistroFamily::Arch => &[
                "base-devel", "bc", "rsync", "wget", "tar", "xz", "libelf", "pahole", "kmod",
                "cpio", "openssl", "ncurses", "perl", "python",
            ],
            DistroFamily::Mandriva => &[
                "gcc", "gcc-c++", "make", "binutils", "bison", "flex", "bc", "rsync", "wget",
                "tar", "xz", "curl", "git", "gettext", "kmod", "cpio", "dwarves", "fakeroot",
                "openssl-devel", "elfutils-devel", "rpm-build", "ncurses-devel", "newt-devel",
                "kernel-desktop-devel", "perl",
            ],
        }
    }
}

/// Reads `/etc/os-release`, looks for bootloader and initramfs markers and
/// queries tools on `PATH`. Paths are resolved under `root` so tests can
/// point the probe at a fixture tree.
pub struct EnvironmentProbe<'a> {
    root: PathBuf,
    tools: &'a dyn ToolLookup,
    runner: &'a dyn CommandRunner,
}

impl<'a> EnvironmentProbe<'a> {
    pub fn new(tools: &'a dyn ToolLookup, runner: &'a dyn CommandRunner) -> Self {
        Self {
            root: PathBuf::from("/"),
            tools,
            runner,
        }
    }

    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn host(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn exists(&self, path: &str) -> bool {
        self.host(path).exists()
    }

    pub fn detect(&self) -> EnvironmentInfo {
        let os_release = self.read_os_release();
        let distro_id = os_release
            .get("ID")
            .map_or_else(|| "unknown".to_owned(), |id| id.to_ascii_lowercase());
        let distro_family = family_for(&distro_id, os_release.get("ID_LIKE").map(String::as_str));
        let distro_name = os_release
            .get("PRETTY_NAME")
            .or_else(|| os_release.get("NAME"))
            .cloned()
            .unwrap_or_else(|| "Unknown".to_owned());
        let distro_version = os_release.get("VERSION_ID").cloned().unwrap_or_default();
        if distro_family == DistroFamily::Unknown {
            warn!("unrecognized distribution '{distro_id}', using Debian-style defaults");
        }

        let bootloader = self.detect_bootloader();
        let grub = if bootloader == Bootloader::Grub {
            self.detect_grub()
        } else {
            None
        };
        let initramfs_tool = self.detect_initramfs(distro_family);
        debug!("detected {distro_family} ({distro_id}), {bootloader}, {initramfs_tool}");

        EnvironmentInfo {
            distro_family,
            distro_id,
            distro_name,
            distro_version,
            bootloader,
            initramfs_tool,
            grub,
        }
    }

    fn read_os_release(&self) -> HashMap<String, String> {
        for candidate in ["/etc/os-release", "/usr/lib/os-release"] {
            match std::fs::read_to_string(self.host(candidate)) {
                Ok(text) => return parse_os_release(&text),
                Err(e) => debug!("cannot read {candidate}: {e}"),
            }
        }
        HashMap::new()
    }

    fn detect_bootloader(&self) -> Bootloader {
        if self.exists("/boot/efi/EFI/systemd/systemd-bootx64.efi")
            || (self.exists("/boot/efi/EFI/BOOT/BOOTX64.EFI")
                && self.exists("/boot/loader/loader.conf"))
        {
            return Bootloader::SystemdBoot;
        }
        if self.exists("/boot/efi/EFI/refind")
            || (self.tools.has("refind-install") && self.exists("/boot/refind_linux.conf"))
        {
            return Bootloader::Refind;
        }
        if self.exists("/boot/grub/grub.cfg")
            || self.exists("/boot/grub2/grub.cfg")
            || self.exists("/etc/default/grub")
        {
            return Bootloader::Grub;
        }
        if self.exists("/boot/syslinux") || self.exists("/boot/extlinux") {
            return Bootloader::Syslinux;
        }
        if self.exists("/etc/lilo.conf") {
            return Bootloader::Lilo;
        }
        if self.detect_grub().is_some() {
            warn!("no bootloader markers found, assuming GRUB");
            Bootloader::Grub
        } else {
            warn!("no bootloader markers or GRUB tools found, boot menu updates will be skipped");
            Bootloader::Unknown
        }
    }

    fn detect_grub(&self) -> Option<GrubSetup> {
        if self.tools.has("update-grub") {
            return Some(GrubSetup {
                program: "update-grub".to_owned(),
                output: None,
            });
        }
        let output = if self.host("/boot/grub2").is_dir() {
            PathBuf::from("/boot/grub2/grub.cfg")
        } else {
            PathBuf::from("/boot/grub/grub.cfg")
        };
        ["grub2-mkconfig", "grub-mkconfig"]
            .into_iter()
            .find(|tool| self.tools.has(tool))
            .map(|tool| GrubSetup {
                program: tool.to_owned(),
                output: Some(output),
            })
    }

    fn detect_initramfs(&self, family: DistroFamily) -> InitramfsTool {
        if self.tools.has("dracut")
            && (self.exists("/etc/dracut.conf")
                || self.exists("/etc/dracut.conf.d")
                || self.dracut_images_present())
        {
            return InitramfsTool::Dracut;
        }
        if self.tools.has("mkinitcpio") && self.exists("/etc/mkinitcpio.conf") {
            return InitramfsTool::Mkinitcpio;
        }
        if self.tools.has("update-initramfs") && self.exists("/etc/initramfs-tools") {
            return InitramfsTool::InitramfsTools;
        }
        let (fallback, program) = match family {
            DistroFamily::Arch => (InitramfsTool::Mkinitcpio, "mkinitcpio"),
            DistroFamily::Fedora | DistroFamily::Mandriva => (InitramfsTool::Dracut, "dracut"),
            _ => (InitramfsTool::InitramfsTools, "update-initramfs"),
        };
        if self.tools.has(program) {
            debug!("no initramfs tool markers found, using {fallback} for {family}");
            fallback
        } else {
            warn!("no initramfs tool found, initramfs regeneration will be skipped");
            InitramfsTool::Unknown
        }
    }

    fn dracut_images_present(&self) -> bool {
        self.runner
            .run(&CommandSpec::new("lsinitrd").arg("--list-modules"))
            .is_ok_and(|out| out.success())
    }
}

fn family_for(id: &str, id_like: Option<&str>) -> DistroFamily {
    DistroFamily::from_id(id)
        .or_else(|| {
            id_like?
                .to_ascii_lowercase()
                .split_whitespace()
                .find_map(DistroFamily::from_id)
        })
        .unwrap_or(DistroFamily::Unknown)
}

fn parse_os_release(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().trim_matches(['"', '\'']).to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockRunner};
    use std::path::Path;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(p, "").unwrap();
    }

    struct Tools(Vec<&'static str>);

    impl ToolLookup for Tools {
        fn has(&self, name: &str) -> bool {
            self.0.contains(&name)
        }
    }

    fn info(family: DistroFamily, bootloader: Bootloader, tool: InitramfsTool) -> EnvironmentInfo {
        EnvironmentInfo {
            distro_family: family,
            distro_id: "test".to_owned(),
            distro_name: "Test".to_owned(),
            distro_version: String::new(),
            bootloader,
            initramfs_tool: tool,
            grub: None,
        }
    }

    fn os_release(root: &Path, body: &str) {
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/os-release"), body).unwrap();
    }

    #[test]
    fn parse_os_release_strips_quotes_and_comments() {
        let map = parse_os_release("# comment\nID=\"ubuntu\"\nNAME='Ubuntu'\nVERSION_ID=24.04\n");
        assert_eq!(map["ID"], "ubuntu");
        assert_eq!(map["NAME"], "Ubuntu");
        assert_eq!(map["VERSION_ID"], "24.04");
    }

    #[test]
    fn family_falls_back_to_id_like() {
        assert_eq!(family_for("linuxmint", None), DistroFamily::Ubuntu);
        assert_eq!(family_for("tuxedo", Some("ubuntu debian")), DistroFamily::Ubuntu);
        assert_eq!(family_for("nobara", Some("fedora")), DistroFamily::Fedora);
        assert_eq!(family_for("gentoo", None), DistroFamily::Unknown);
    }

    #[test]
    fn detect_fedora_with_grub2_mkconfig() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=fedora\nPRETTY_NAME=\"Fedora Linux 41\"\nVERSION_ID=41\n");
        touch(dir.path(), "boot/grub2/grub.cfg");
        touch(dir.path(), "etc/dracut.conf");
        let tools = Tools(vec!["grub2-mkconfig", "dracut"]);
        let runner = MockRunner::new();

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();

        assert_eq!(env.distro_family, DistroFamily::Fedora);
        assert_eq!(env.distro_name, "Fedora Linux 41");
        assert_eq!(env.bootloader, Bootloader::Grub);
        assert_eq!(env.initramfs_tool, InitramfsTool::Dracut);
        assert_eq!(
            env.bootloader_update_command().unwrap().render(),
            "grub2-mkconfig -o /boot/grub2/grub.cfg"
        );
    }

    #[test]
    fn detect_systemd_boot_with_mkinitcpio() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=endeavouros\nID_LIKE=arch\n");
        touch(dir.path(), "boot/efi/EFI/systemd/systemd-bootx64.efi");
        touch(dir.path(), "etc/mkinitcpio.conf");
        let tools = Tools(vec!["mkinitcpio"]);
        let runner = MockRunner::new();

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();

        assert_eq!(env.distro_family, DistroFamily::Arch);
        assert_eq!(env.bootloader, Bootloader::SystemdBoot);
        assert!(env.grub.is_none());
        assert_eq!(env.initramfs_tool, InitramfsTool::Mkinitcpio);
        assert_eq!(env.bootloader_update_command().unwrap().render(), "bootctl update");
    }

    #[test]
    fn refind_install_without_config_keeps_probing() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=debian\n");
        touch(dir.path(), "etc/default/grub");
        let tools = Tools(vec!["refind-install", "update-grub"]);
        let runner = MockRunner::new();

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();
        assert_eq!(env.bootloader, Bootloader::Grub);
        assert_eq!(env.bootloader_update_command().unwrap().render(), "update-grub");
    }

    #[test]
    fn dracut_detected_from_existing_images() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=debian\n");
        let tools = Tools(vec!["dracut"]);
        let runner = MockRunner::new().on("lsinitrd", MockResponse::ok());

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();
        assert_eq!(env.initramfs_tool, InitramfsTool::Dracut);
    }

    #[test]
    fn empty_host_degrades_to_unknown_without_commands() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Tools(Vec::new());
        let runner = MockRunner::new().on("lsinitrd", MockResponse::exit(1));

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();
        assert_eq!(env.distro_family, DistroFamily::Unknown);
        assert_eq!(env.distro_id, "unknown");
        assert!(!env.is_supported());
        assert_eq!(env.bootloader, Bootloader::Unknown);
        assert_eq!(env.initramfs_tool, InitramfsTool::Unknown);
        assert!(env.bootloader_update_command().is_none());
        assert!(env.initramfs_update_command(Some("6.1.0"), Path::new("/boot")).is_none());
    }

    #[test]
    fn unmarked_host_with_tools_falls_back_to_family_defaults() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=fedora\n");
        let tools = Tools(vec!["grub2-mkconfig", "dracut"]);
        let runner = MockRunner::new().on("lsinitrd", MockResponse::exit(1));

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();
        assert_eq!(env.bootloader, Bootloader::Grub);
        assert_eq!(env.initramfs_tool, InitramfsTool::Dracut);
        assert_eq!(
            env.bootloader_update_command().unwrap().render(),
            "grub2-mkconfig -o /boot/grub/grub.cfg"
        );
    }

    #[test]
    fn grub_config_without_grub_tools_skips_boot_refresh() {
        let dir = tempfile::tempdir().unwrap();
        os_release(dir.path(), "ID=debian\n");
        touch(dir.path(), "boot/grub/grub.cfg");
        let tools = Tools(vec!["update-initramfs"]);
        let runner = MockRunner::new();

        let env = EnvironmentProbe::new(&tools, &runner)
            .with_root(dir.path())
            .detect();
        assert_eq!(env.bootloader, Bootloader::Grub);
        assert!(env.grub.is_none());
        assert!(env.bootloader_update_command().is_none());
    }

    #[test]
    fn initramfs_commands_per_tool() {
        let boot = Path::new("/boot");
        let render = |env: &EnvironmentInfo, release| {
            env.initramfs_update_command(release, boot).unwrap().render()
        };
        let dracut = info(DistroFamily::Fedora, Bootloader::Grub, InitramfsTool::Dracut);
        assert_eq!(
            render(&dracut, Some("6.12.4-custom-gaming")),
            "dracut --force /boot/initramfs-6.12.4-custom-gaming.img 6.12.4-custom-gaming"
        );
        assert_eq!(render(&dracut, None), "dracut --regenerate-all --force");

        let mut soplos = dracut.clone();
        soplos.distro_id = "soplos".to_owned();
        assert_eq!(
            render(&soplos, Some("6.1.0")),
            "dracut --force --hostonly --hostonly-cmdline /boot/initramfs-6.1.0.img 6.1.0"
        );

        let arch = info(DistroFamily::Arch, Bootloader::Grub, InitramfsTool::Mkinitcpio);
        assert_eq!(
            render(&arch, Some("6.1.0")),
            "mkinitcpio -k 6.1.0 -g /boot/initramfs-6.1.0.img"
        );
        assert_eq!(render(&arch, None), "mkinitcpio -P");

        let deb = info(DistroFamily::Debian, Bootloader::Grub, InitramfsTool::InitramfsTools);
        assert_eq!(render(&deb, Some("6.1.0")), "update-initramfs -c -k 6.1.0");
        assert_eq!(render(&deb, None), "update-initramfs -u -k all");
    }

    #[test]
    fn initramfs_images_follow_the_boot_dir() {
        let boot = Path::new("/mnt/sysroot/boot");
        let dracut = info(DistroFamily::Fedora, Bootloader::Grub, InitramfsTool::Dracut);
        assert_eq!(
            dracut.initramfs_update_command(Some("6.1.0"), boot).unwrap().render(),
            "dracut --force /mnt/sysroot/boot/initramfs-6.1.0.img 6.1.0"
        );
        let arch = info(DistroFamily::Arch, Bootloader::SystemdBoot, InitramfsTool::Mkinitcpio);
        assert_eq!(
            arch.initramfs_update_command(Some("6.1.0"), boot).unwrap().render(),
            "mkinitcpio -k 6.1.0 -g /mnt/sysroot/boot/initramfs-6.1.0.img"
        );
        let removal = arch.kernel_remove_command("6.1.0", boot).render();
        assert!(removal.contains("/mnt/sysroot/boot/vmlinuz-6.1.0"));
        assert!(!removal.contains(" /boot/"));
    }

    #[test]
    fn bootloader_commands_for_non_grub() {
        for (bl, expected) in [
            (Bootloader::Refind, "refind-mkconfig"),
            (Bootloader::Lilo, "lilo"),
            (Bootloader::Syslinux, "extlinux-update"),
        ] {
            let env = info(DistroFamily::Debian, bl, InitramfsTool::InitramfsTools);
            assert_eq!(env.bootloader_update_command().unwrap().render(), expected);
        }
    }

    #[test]
    fn remove_commands_per_family() {
        let release = "6.12.4-custom-gaming";
        let deb = info(DistroFamily::Ubuntu, Bootloader::Grub, InitramfsTool::InitramfsTools);
        assert_eq!(
            deb.kernel_remove_command(release, Path::new("/boot")).render(),
            "apt purge -y linux-image-6.12.4-custom-gaming linux-headers-6.12.4-custom-gaming"
        );
        let fedora = info(DistroFamily::Fedora, Bootloader::Grub, InitramfsTool::Dracut);
        assert_eq!(
            fedora.kernel_remove_command(release, Path::new("/boot")).render(),
            "dnf remove -y kernel-6.12.4-custom-gaming"
        );
        let arch = info(DistroFamily::Arch, Bootloader::Grub, InitramfsTool::Mkinitcpio);
        let chain = arch.kernel_remove_command(release, Path::new("/boot"));
        assert_eq!(chain.len(), 2);
        let text = chain.render();
        assert!(text.contains("/boot/initramfs-6.12.4-custom-gaming-fallback.img"));
        assert!(text.ends_with("&& rm -rf /usr/lib/modules/6.12.4-custom-gaming"));
    }

    const FAMILIES: [DistroFamily; 6] = [
        DistroFamily::Debian,
        DistroFamily::Ubuntu,
        DistroFamily::Fedora,
        DistroFamily::Arch,
        DistroFamily::Mandriva,
        DistroFamily::Unknown,
    ];
    const BOOTLOADERS: [Bootloader; 6] = [
        Bootloader::Grub,
        Bootloader::SystemdBoot,
        Bootloader::Refind,
        Bootloader::Lilo,
        Bootloader::Syslinux,
        Bootloader::Unknown,
    ];
    const INITRAMFS_TOOLS: [InitramfsTool; 4] = [
        InitramfsTool::InitramfsTools,
        InitramfsTool::Dracut,
        InitramfsTool::Mkinitcpio,
        InitramfsTool::Unknown,
    ];

    /// The program a detected bootloader is refreshed with, `None` when
    /// nothing usable was detected.
    fn detected_bootloader_tool(env: &EnvironmentInfo) -> Option<String> {
        match env.bootloader {
            Bootloader::Grub => env.grub.as_ref().map(|g| g.program.clone()),
            Bootloader::SystemdBoot => Some("bootctl".to_owned()),
            Bootloader::Refind => Some("refind-mkconfig".to_owned()),
            Bootloader::Lilo => Some("lilo".to_owned()),
            Bootloader::Syslinux => Some("extlinux-update".to_owned()),
            Bootloader::Unknown => None,
        }
    }

    fn detected_initramfs_tool(tool: InitramfsTool) -> Option<&'static str> {
        match tool {
            InitramfsTool::InitramfsTools => Some("update-initramfs"),
            InitramfsTool::Dracut => Some("dracut"),
            InitramfsTool::Mkinitcpio => Some("mkinitcpio"),
            InitramfsTool::Unknown => None,
        }
    }

    #[test]
    fn generated_commands_only_name_detected_tools() {
        let grub_setups = [
            None,
            Some(GrubSetup {
                program: "update-grub".to_owned(),
                output: None,
            }),
            Some(GrubSetup {
                program: "grub2-mkconfig".to_owned(),
                output: Some(PathBuf::from("/boot/grub2/grub.cfg")),
            }),
        ];
        let boot = Path::new("/srv/boot");
        let mut combinations = 0;
        for family in FAMILIES {
            for bootloader in BOOTLOADERS {
                for tool in INITRAMFS_TOOLS {
                    for grub in &grub_setups {
                        let mut env = info(family, bootloader, tool);
                        env.grub.clone_from(grub);
                        combinations += 1;
                        let case = format!("{family:?}/{bootloader:?}/{tool:?}/{grub:?}");

                        let refresh = env.bootloader_update_command();
                        assert_eq!(
                            refresh.as_ref().map(|c| c.program.clone()),
                            detected_bootloader_tool(&env),
                            "{case}"
                        );

                        for release in [Some("6.1.0"), None] {
                            let regen = env.initramfs_update_command(release, boot);
                            assert_eq!(
                                regen.as_ref().map(|c| c.program.as_str()),
                                detected_initramfs_tool(tool),
                                "{case}"
                            );
                            if let (Some(cmd), Some(_)) = (&regen, release) {
                                let text = cmd.render();
                                assert!(!text.contains(" /boot/"), "{case}: {text}");
                            }
                        }
                        if let Some(cmd) = &refresh {
                            assert!(!cmd.render().trim().is_empty(), "{case}");
                        }

                        let removal = env.kernel_remove_command("6.1.0", boot);
                        assert!(!removal.is_empty(), "{case}");
                        let program = &removal.steps()[0].program;
                        let expected = match family {
                            DistroFamily::Debian | DistroFamily::Ubuntu => "apt",
                            DistroFamily::Fedora | DistroFamily::Mandriva => "dnf",
                            DistroFamily::Arch | DistroFamily::Unknown => "rm",
                        };
                        assert_eq!(program, expected, "{case}");
                    }
                }
            }
        }
        assert_eq!(combinations, 6 * 6 * 4 * 3);
    }

    #[test]
    fn secure_boot_only_for_ubuntu_family() {
        let ubuntu = info(DistroFamily::Ubuntu, Bootloader::Grub, InitramfsTool::InitramfsTools);
        let debian = info(DistroFamily::Debian, Bootloader::Grub, InitramfsTool::InitramfsTools);
        assert!(ubuntu.needs_secure_boot_handling());
        assert!(!debian.needs_secure_boot_handling());
        assert!(ubuntu.required_packages().contains(&"mokutil"));
    }

    #[test]
    fn display_names() {
        assert_eq!(Bootloader::SystemdBoot.to_string(), "systemd-boot");
        assert_eq!(Bootloader::Grub.to_string(), "GRUB2");
        assert_eq!(InitramfsTool::InitramfsTools.to_string(), "initramfs-tools");
        assert_eq!(DistroFamily::Fedora.to_string(), "Fedora/RHEL");
    }
}
