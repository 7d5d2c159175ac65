use crate::command::CommandSpec;
use crate::runner::CommandRunner;
use kforge_schema::HardwareSignals;
use std::path::Path;
use tracing::debug;

/// Collect the markers the hardware-optimized profile keys on. Every source is
/// optional; an unreadable one contributes nothing.
pub fn probe_hardware(runner: &dyn CommandRunner, root: &Path) -> HardwareSignals {
    let cpuinfo = std::fs::read_to_string(root.join("proc/cpuinfo")).unwrap_or_else(|e| {
        debug!("cannot read /proc/cpuinfo: {e}");
        String::new()
    });
    let pci = runner
        .capture(&CommandSpec::new("lspci"))
        .unwrap_or_default();
    let nvme = root.join("dev/nvme0").exists();
    HardwareSignals::new(&cpuinfo, &pci, nvme)
}
