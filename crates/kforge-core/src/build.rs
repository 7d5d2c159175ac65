//! Compile-stage commands and the progress heuristic.
//!
//! Progress is an estimate: the `.c` files in the tree, discounted by a
//! fixed ratio, against the number of `CC`/`LD`/`AR` lines seen so far. It
//! only drives the percentage and is allowed to be wrong.

use kforge_runtime::{CommandSpec, DistroFamily};
use std::io;
use std::path::Path;

/// Share of `.c` files, in percent, that a typical distribution config builds.
const COMPILED_PERCENT: u64 = 85;
const FALLBACK_ESTIMATE: u64 = 20_000;

const COMPILE_START: u8 = 30;
const COMPILE_END: u8 = 90;

/// The build invocations for `family`, run in order in `source_dir`.
/// Debian-family hosts build `.deb` packages, RPM-based hosts build `.rpm`
/// packages without debuginfo, everything else builds the tree and then the
/// modules for a direct install.
pub fn build_commands(family: DistroFamily, source_dir: &Path, jobs: usize) -> Vec<CommandSpec> {
    let make = || {
        CommandSpec::new("make")
            .arg(format!("-j{}", jobs.max(1)))
            .current_dir(source_dir)
            .env("LC_ALL", "C")
    };
    match family {
        DistroFamily::Debian | DistroFamily::Ubuntu => vec![make().arg("bindeb-pkg")],
        DistroFamily::Fedora | DistroFamily::Mandriva => vec![make()
            .arg("rpm-pkg")
            .arg("RPMOPTS=--define 'debug_package %{nil}'")],
        DistroFamily::Arch | DistroFamily::Unknown => vec![make(), make().arg("modules")],
    }
}

/// Human-readable description of what the build command produces.
pub fn build_phase(family: DistroFamily) -> &'static str {
    match family {
        DistroFamily::Debian | DistroFamily::Ubuntu => "Generating .deb packages...",
        DistroFamily::Fedora | DistroFamily::Mandriva => "Generating RPM packages...",
        DistroFamily::Arch | DistroFamily::Unknown => "Compiling for direct installation...",
    }
}

/// Number of `.c` files under `dir`, recursively. Symlinks are not followed.
/// Only an unreadable `dir` is an error; unreadable entries below it are
/// skipped.
pub fn count_sources(dir: &Path) -> io::Result<u64> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let listing = match std::fs::read_dir(&current) {
            Ok(listing) => listing,
            Err(e) if current == dir => return Err(e),
            Err(e) => {
                tracing::debug!("skipping {}: {e}", current.display());
                continue;
            }
        };
        for entry in listing.flatten() {
            let Ok(kind) = entry.file_type() else {
                continue;
            };
            if kind.is_dir() {
                pending.push(entry.path());
            } else if kind.is_file() && entry.path().extension().is_some_and(|e| e == "c") {
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Maps compiler and packager output lines onto the 30-95% band.
#[derive(Debug, Clone)]
pub struct BuildProgress {
    estimate: u64,
    compiled: u64,
    last: u8,
}

impl BuildProgress {
    pub fn new(estimate: u64) -> Self {
        Self {
            estimate: estimate.max(1),
            compiled: 0,
            last: COMPILE_START,
        }
    }

    /// Estimate from the source tree, falling back to a fixed guess when the
    /// tree cannot be walked.
    pub fn for_tree(source_dir: &Path) -> Self {
        let estimate = match count_sources(source_dir) {
            Ok(n) if n > 0 => n * COMPILED_PERCENT / 100,
            Ok(_) => FALLBACK_ESTIMATE,
            Err(e) => {
                tracing::debug!("cannot count sources in {}: {e}", source_dir.display());
                FALLBACK_ESTIMATE
            }
        };
        Self::new(estimate)
    }

    pub fn estimate(&self) -> u64 {
        self.estimate
    }

    pub fn compiled(&self) -> u64 {
        self.compiled
    }

    /// The message and percentage to report for `line`, if it is a line
    /// worth reporting. Percentages never go backwards.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn observe(&mut self, line: &str) -> Option<(String, u8)> {
        let (message, percent) = if let Some(pkg) = line
            .trim_start()
            .strip_prefix("dpkg-deb: building package")
        {
            let name = pkg.split('\'').nth(1).unwrap_or("").trim();
            (format!("Building package {name}"), 92)
        } else if line.trim_start().starts_with("Processing files:") {
            ("Packaging RPM...".to_owned(), 91)
        } else if let Some(file) = line.trim_start().strip_prefix("Wrote:") {
            let name = Path::new(file.trim())
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            (format!("Wrote {name}"), 94)
        } else if is_tool_line(line) {
            self.compiled += 1;
            let span = f64::from(COMPILE_END - COMPILE_START);
            let done = (self.compiled as f64 / self.estimate as f64).min(1.0);
            let percent = COMPILE_START + (done * span) as u8;
            (truncate(line.trim(), 80), percent.min(COMPILE_END))
        } else {
            return None;
        };
        self.last = self.last.max(percent);
        Some((message, self.last))
    }

    pub fn last_percent(&self) -> u8 {
        self.last
    }
}

fn is_tool_line(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("CC" | "LD" | "AR"))
        || line.contains(" CC ")
        || line.contains(" LD ")
        || line.contains(" AR ")
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_owned(),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debian_builds_packages_in_c_locale() {
        let cmds = build_commands(DistroFamily::Ubuntu, Path::new("/w/linux-6.12.4"), 8);
        assert_eq!(cmds.len(), 1);
        assert_eq!(
            cmds[0].render(),
            "cd /w/linux-6.12.4 && LC_ALL=C make -j8 bindeb-pkg"
        );
    }

    #[test]
    fn rpm_build_suppresses_debuginfo() {
        let cmds = build_commands(DistroFamily::Mandriva, Path::new("/w/src"), 4);
        assert_eq!(cmds[0].args[1], "rpm-pkg");
        assert_eq!(cmds[0].args[2], "RPMOPTS=--define 'debug_package %{nil}'");
    }

    #[test]
    fn arch_and_unknown_build_then_modules() {
        for family in [DistroFamily::Arch, DistroFamily::Unknown] {
            let cmds = build_commands(family, Path::new("/w/src"), 0);
            assert_eq!(cmds.len(), 2);
            assert_eq!(cmds[0].args, vec!["-j1"]);
            assert_eq!(cmds[1].args, vec!["-j1", "modules"]);
        }
    }

    #[test]
    fn compile_lines_map_into_band() {
        let mut progress = BuildProgress::new(4);
        assert_eq!(progress.observe("make[1]: Entering directory"), None);
        let (msg, pct) = progress.observe("  CC      kernel/fork.o").unwrap();
        assert_eq!(msg, "CC      kernel/fork.o");
        assert_eq!(pct, 45);
        progress.observe("  LD      vmlinux.o");
        progress.observe("  AR      lib/lib.a");
        assert_eq!(progress.observe("  CC [M]  drivers/x.o").unwrap().1, 90);
        // Estimate exceeded: stays capped.
        assert_eq!(progress.observe("  CC      extra.o").unwrap().1, 90);
        assert_eq!(progress.compiled(), 5);
    }

    #[test]
    fn packaging_lines_advance_past_compile_band() {
        let mut progress = BuildProgress::new(1_000);
        let (msg, pct) = progress
            .observe("dpkg-deb: building package 'linux-image-6.12.4-custom-gaming' in '../x.deb'.")
            .unwrap();
        assert_eq!(msg, "Building package linux-image-6.12.4-custom-gaming");
        assert_eq!(pct, 92);
        // A later compile line cannot move the bar backwards.
        assert_eq!(progress.observe("  CC      late.o").unwrap().1, 92);

        let mut rpm = BuildProgress::new(1_000);
        assert_eq!(rpm.observe("Processing files: kernel-6.12.4").unwrap().1, 91);
        let (msg, pct) = rpm
            .observe("Wrote: /w/src/rpmbuild/RPMS/x86_64/kernel-6.12.4_custom-1.x86_64.rpm")
            .unwrap();
        assert_eq!(msg, "Wrote kernel-6.12.4_custom-1.x86_64.rpm");
        assert_eq!(pct, 94);
    }

    #[test]
    fn long_lines_are_truncated() {
        let mut progress = BuildProgress::new(10);
        let long = format!("  CC      {}", "a".repeat(200));
        assert_eq!(progress.observe(&long).unwrap().0.chars().count(), 80);
    }

    #[test]
    fn estimate_counts_c_files_with_ratio() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("kernel/sched")).unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("kernel/sched/f{i}.c")), "").unwrap();
        }
        std::fs::write(dir.path().join("kernel/sched/core.h"), "").unwrap();
        assert_eq!(count_sources(dir.path()).unwrap(), 20);
        assert_eq!(BuildProgress::for_tree(dir.path()).estimate(), 17);
    }

    #[test]
    fn unreadable_subdirectory_does_not_abort_the_count() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("kernel")).unwrap();
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("kernel/f{i}.c")), "").unwrap();
        }
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("hidden.c"), "").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let counted = count_sources(dir.path());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Root can still read the locked directory.
        let counted = counted.unwrap();
        assert!((20..=21).contains(&counted), "{counted}");
        assert!(BuildProgress::for_tree(dir.path()).estimate() < FALLBACK_ESTIMATE);
    }

    #[test]
    fn unreadable_tree_falls_back() {
        let progress = BuildProgress::for_tree(Path::new("/nonexistent/kforge/tree"));
        assert_eq!(progress.estimate(), FALLBACK_ESTIMATE);
    }
}
