//! Install-stage command assembly.
//!
//! Built artifacts are located by scanning directories rather than through
//! shell globs, so a missing package is reported before elevation is
//! requested. The package install, initramfs regeneration and bootloader
//! update are chained into one privileged invocation.

use crate::PipelineError;
use kforge_runtime::{CommandChain, CommandRunner, CommandSpec, DistroFamily, EnvironmentInfo};
use kforge_schema::validate_release;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where the built tree and its outputs are.
#[derive(Debug, Clone, Copy)]
pub struct InstallTarget<'a> {
    /// Directory `bindeb-pkg` writes `.deb` files into.
    pub workspace: &'a Path,
    pub source_dir: &'a Path,
    /// Authoritative release from [`query_release`].
    pub release: &'a str,
    pub boot_dir: &'a Path,
    /// Home directory of the invoking user; older kernels put `rpmbuild/` there.
    pub home: Option<&'a Path>,
}

/// Ask the build system for the release string of the configured tree. The
/// requested version plus tag is not used: release candidates are
/// normalized by the kernel's Makefile.
pub fn query_release(runner: &dyn CommandRunner, source_dir: &Path) -> Result<String, PipelineError> {
    let query = CommandSpec::new("make")
        .args(["-s", "kernelrelease"])
        .current_dir(source_dir)
        .env("LC_ALL", "C");
    let out = runner
        .run(&query)
        .map_err(|e| PipelineError::ReleaseQueryFailed(e.to_string()))?;
    if !out.success() {
        return Err(PipelineError::ReleaseQueryFailed(format!(
            "make kernelrelease exited with {}",
            out.outcome.code()
        )));
    }
    let release = out
        .stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or_default()
        .to_owned();
    validate_release(&release).map_err(|e| PipelineError::ReleaseQueryFailed(e.to_string()))?;
    Ok(release)
}

/// The single privileged chain that installs the build and refreshes boot.
pub fn install_chain(
    env: &EnvironmentInfo,
    runner: &dyn CommandRunner,
    target: &InstallTarget<'_>,
) -> Result<CommandChain, PipelineError> {
    let mut chain = match env.distro_family {
        DistroFamily::Debian | DistroFamily::Ubuntu => debian_install(target)?,
        DistroFamily::Fedora | DistroFamily::Mandriva => rpm_install(target)?,
        DistroFamily::Arch | DistroFamily::Unknown => direct_install(runner, target)?,
    };
    match env.initramfs_update_command(Some(target.release), target.boot_dir) {
        Some(regen) => chain.push(regen),
        None => warn!("no initramfs tool detected, not generating an initramfs for {}", target.release),
    }
    match env.bootloader_update_command() {
        Some(refresh) => chain.push(refresh),
        None => warn!("no bootloader tool detected, the boot menu must be updated manually"),
    }
    debug!("install chain: {}", chain.render());
    Ok(chain)
}

fn debian_install(target: &InstallTarget<'_>) -> Result<CommandChain, PipelineError> {
    let image_prefix = format!("linux-image-{}_", target.release);
    let image = find_files(target.workspace, &image_prefix, ".deb")
        .pop()
        .ok_or_else(|| {
            PipelineError::ArtifactMissing(format!(
                "{image_prefix}*.deb in {}",
                target.workspace.display()
            ))
        })?;
    let mut chain = CommandChain::from(
        CommandSpec::new("dpkg")
            .arg("-i")
            .arg(image.to_string_lossy()),
    );
    let headers_prefix = format!("linux-headers-{}_", target.release);
    if let Some(headers) = find_files(target.workspace, &headers_prefix, ".deb").pop() {
        chain.push(
            CommandSpec::new("dpkg")
                .arg("-i")
                .arg(headers.to_string_lossy())
                .tolerate_failure(),
        );
    }
    Ok(chain)
}

fn rpm_install(target: &InstallTarget<'_>) -> Result<CommandChain, PipelineError> {
    let prefix = format!("kernel-{}", target.release.replace('-', "_"));
    let mut roots = vec![target.source_dir.join("rpmbuild/RPMS")];
    if let Some(home) = target.home {
        roots.push(home.join("rpmbuild/RPMS"));
    }

    let packages: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| subdirs(root))
        .flat_map(|arch_dir| find_files(&arch_dir, &prefix, ".rpm"))
        .collect();
    if packages.is_empty() {
        return Err(PipelineError::ArtifactMissing(format!(
            "{prefix}*.rpm under {}",
            roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(" or ")
        )));
    }
    Ok(CommandChain::from(
        CommandSpec::new("rpm")
            .arg("-ivh")
            .args(packages.iter().map(|p| p.to_string_lossy().into_owned())),
    ))
}

fn direct_install(
    runner: &dyn CommandRunner,
    target: &InstallTarget<'_>,
) -> Result<CommandChain, PipelineError> {
    let image_name = runner
        .capture(
            &CommandSpec::new("make")
                .args(["-s", "image_name"])
                .current_dir(target.source_dir),
        )
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PipelineError::ArtifactMissing("make image_name reported nothing".to_owned()))?;
    let image = target.source_dir.join(image_name.trim());
    if !image.is_file() {
        return Err(PipelineError::ArtifactMissing(image.display().to_string()));
    }

    let release = target.release;
    let copy = |from: PathBuf, name: String| {
        CommandSpec::new("install")
            .arg("-Dm644")
            .arg(from.to_string_lossy())
            .arg(target.boot_dir.join(name).to_string_lossy())
    };
    Ok(CommandChain::new()
        .then(
            CommandSpec::new("make")
                .arg("modules_install")
                .current_dir(target.source_dir),
        )
        .then(copy(image, format!("vmlinuz-{release}")))
        .then(copy(
            target.source_dir.join("System.map"),
            format!("System.map-{release}"),
        ))
        .then(copy(target.source_dir.join(".config"), format!("config-{release}"))))
}

/// Regular files in `dir` named `{prefix}*{suffix}`, sorted by name.
fn find_files(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(suffix)
        })
        .map(|e| e.path())
        .collect();
    found.sort();
    found
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use kforge_runtime::mock::{MockResponse, MockRunner};
    use kforge_runtime::{Bootloader, GrubSetup, InitramfsTool};

    fn env(family: DistroFamily, tool: InitramfsTool) -> EnvironmentInfo {
        EnvironmentInfo {
            distro_family: family,
            distro_id: "test".to_owned(),
            distro_name: "Test".to_owned(),
            distro_version: String::new(),
            bootloader: Bootloader::Grub,
            initramfs_tool: tool,
            grub: Some(GrubSetup {
                program: "update-grub".to_owned(),
                output: None,
            }),
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    fn target<'a>(workspace: &'a Path, source: &'a Path, home: Option<&'a Path>) -> InstallTarget<'a> {
        InstallTarget {
            workspace,
            source_dir: source,
            release: "6.12.4-custom-gaming",
            boot_dir: Path::new("/boot"),
            home,
        }
    }

    #[test]
    fn release_comes_from_build_system() {
        let runner = MockRunner::new().on(
            "kernelrelease",
            MockResponse::ok().stdout("make[1]: noise\n6.19.0-rc7-custom-gaming\n"),
        );
        let release = query_release(&runner, Path::new("/w/linux-6.19-rc7")).unwrap();
        assert_eq!(release, "6.19.0-rc7-custom-gaming");
    }

    #[test]
    fn release_query_rejects_failure_and_garbage() {
        let failing = MockRunner::new().on("kernelrelease", MockResponse::exit(2));
        assert!(matches!(
            query_release(&failing, Path::new("/w")),
            Err(PipelineError::ReleaseQueryFailed(_))
        ));
        let garbage = MockRunner::new().on("kernelrelease", MockResponse::ok().stdout("../../etc\n"));
        assert!(query_release(&garbage, Path::new("/w")).is_err());
    }

    #[test]
    fn debian_chain_installs_image_headers_then_boot_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path();
        touch(&ws.join("linux-image-6.12.4-custom-gaming_6.12.4-1_amd64.deb"));
        touch(&ws.join("linux-image-6.12.4-custom-gaming-dbg_6.12.4-1_amd64.deb"));
        touch(&ws.join("linux-headers-6.12.4-custom-gaming_6.12.4-1_amd64.deb"));
        touch(&ws.join("linux-libc-dev_6.12.4-1_amd64.deb"));
        let source = ws.join("linux-6.12.4");

        let chain = install_chain(
            &env(DistroFamily::Ubuntu, InitramfsTool::InitramfsTools),
            &MockRunner::new(),
            &target(ws, &source, None),
        )
        .unwrap();

        let steps = chain.steps();
        assert_eq!(steps.len(), 4);
        assert!(steps[0].args[1].ends_with("linux-image-6.12.4-custom-gaming_6.12.4-1_amd64.deb"));
        assert!(steps[1].args[1].contains("linux-headers-"));
        assert!(steps[1].allow_failure);
        assert_eq!(steps[2].render(), "update-initramfs -c -k 6.12.4-custom-gaming");
        assert_eq!(steps[3].render(), "update-grub");
    }

    #[test]
    fn undetected_boot_tools_are_left_out_of_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path();
        touch(&ws.join("linux-image-6.12.4-custom-gaming_6.12.4-1_amd64.deb"));
        let mut host = env(DistroFamily::Debian, InitramfsTool::Unknown);
        host.grub = None;

        let chain = install_chain(&host, &MockRunner::new(), &target(ws, ws, None)).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.steps()[0].program, "dpkg");
    }

    #[test]
    fn initramfs_lands_in_the_configured_boot_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("linux-6.12.4");
        let home = dir.path().join("home");
        touch(&home.join("rpmbuild/RPMS/x86_64/kernel-6.12.4_custom_gaming-1.x86_64.rpm"));
        let boot = dir.path().join("boot");
        let mut target = target(dir.path(), &source, Some(&home));
        target.boot_dir = &boot;

        let chain = install_chain(&env(DistroFamily::Fedora, InitramfsTool::Dracut), &MockRunner::new(), &target)
            .unwrap();
        let dracut = chain.steps()[1].render();
        assert!(
            dracut.contains(&format!("{}/initramfs-6.12.4-custom-gaming.img", boot.display())),
            "{dracut}"
        );
    }

    #[test]
    fn debian_without_image_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = install_chain(
            &env(DistroFamily::Debian, InitramfsTool::InitramfsTools),
            &MockRunner::new(),
            &target(dir.path(), dir.path(), None),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing(_)));
    }

    #[test]
    fn rpm_chain_finds_packages_in_tree_or_home() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("linux-6.12.4");
        let home = dir.path().join("home");
        touch(&home.join("rpmbuild/RPMS/x86_64/kernel-6.12.4_custom_gaming-1.x86_64.rpm"));
        touch(&home.join("rpmbuild/RPMS/x86_64/kernel-headers-6.12.4_custom_gaming-1.x86_64.rpm"));

        let chain = install_chain(
            &env(DistroFamily::Fedora, InitramfsTool::Dracut),
            &MockRunner::new(),
            &target(dir.path(), &source, Some(&home)),
        )
        .unwrap();
        let rpm = &chain.steps()[0];
        assert_eq!(rpm.program, "rpm");
        assert_eq!(rpm.args.len(), 2);
        assert!(rpm.args[1].ends_with("kernel-6.12.4_custom_gaming-1.x86_64.rpm"));
        assert_eq!(chain.steps()[1].program, "dracut");

        let err = install_chain(
            &env(DistroFamily::Fedora, InitramfsTool::Dracut),
            &MockRunner::new(),
            &target(dir.path(), &source, None),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing(_)));
    }

    #[test]
    fn direct_install_copies_image_map_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("linux-6.12.4");
        touch(&source.join("arch/x86/boot/bzImage"));
        let runner = MockRunner::new().on(
            "image_name",
            MockResponse::ok().stdout("arch/x86/boot/bzImage\n"),
        );

        let chain = install_chain(
            &env(DistroFamily::Arch, InitramfsTool::Mkinitcpio),
            &runner,
            &target(dir.path(), &source, None),
        )
        .unwrap();
        let rendered: Vec<String> = chain.steps().iter().map(CommandSpec::render).collect();
        assert!(rendered[0].ends_with("&& make modules_install"));
        assert!(rendered[1].ends_with("arch/x86/boot/bzImage /boot/vmlinuz-6.12.4-custom-gaming"));
        assert!(rendered[2].ends_with("System.map /boot/System.map-6.12.4-custom-gaming"));
        assert!(rendered[3].ends_with(".config /boot/config-6.12.4-custom-gaming"));
        assert!(rendered[4].starts_with("mkinitcpio -k 6.12.4-custom-gaming"));
        assert_eq!(rendered.len(), 6);
    }

    #[test]
    fn direct_install_without_image_fails_before_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on("image_name", MockResponse::ok().stdout("arch/x86/boot/bzImage"));
        let err = install_chain(
            &env(DistroFamily::Unknown, InitramfsTool::InitramfsTools),
            &runner,
            &target(dir.path(), dir.path(), None),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing(_)));
        assert!(runner.privileged_calls().is_empty());
    }
}
