use crate::progress::{ProgressEvent, ProgressSink, ProgressValue};
use crate::{CoreError, PipelineError};
use kforge_runtime::{CommandChain, CommandRunner, EnvironmentInfo, ExitOutcome};
use kforge_schema::validate_release;
use kforge_store::InstallHistoryStore;
use std::path::Path;
use tracing::{info, warn};

/// What happened after the kernel itself was uninstalled. Both steps are
/// best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReport {
    pub bootloader_updated: bool,
    pub history_updated: bool,
}

/// A kernel to uninstall and where its direct-install files live.
#[derive(Debug, Clone, Copy)]
pub struct RemovalTarget<'a> {
    pub release: &'a str,
    pub running: &'a str,
    pub boot_dir: &'a Path,
}

/// Uninstall `target.release` and refresh the bootloader.
///
/// The release is validated before any command is built and the running
/// kernel is refused. The uninstall and the bootloader refresh are two
/// separate privileged invocations; only the first one can fail the call.
pub fn remove_kernel(
    env: &EnvironmentInfo,
    runner: &dyn CommandRunner,
    history: &InstallHistoryStore,
    target: &RemovalTarget<'_>,
    sink: &dyn ProgressSink,
) -> Result<RemovalReport, CoreError> {
    let result = remove(env, runner, history, target, sink);
    if let Err(e) = &result {
        sink.report(ProgressEvent::new(e.to_string(), ProgressValue::Error));
    }
    result
}

fn remove(
    env: &EnvironmentInfo,
    runner: &dyn CommandRunner,
    history: &InstallHistoryStore,
    target: &RemovalTarget<'_>,
    sink: &dyn ProgressSink,
) -> Result<RemovalReport, CoreError> {
    let release = target.release.trim();
    validate_release(release)?;
    if release == target.running.trim() {
        return Err(PipelineError::RunningKernel(release.to_owned()).into());
    }

    let step = |message: String, percent: u8| {
        sink.report(ProgressEvent::new(message, ProgressValue::percent(percent)));
    };
    step(format!("Removing kernel {release}..."), 0);

    step("Uninstalling packages/files...".to_owned(), 20);
    let output = runner.run_privileged(&env.kernel_remove_command(release, target.boot_dir))?;
    match output.outcome {
        ExitOutcome::Exited(0) => info!("removed kernel {release}"),
        ExitOutcome::ElevationDeclined => return Err(PipelineError::ElevationDeclined.into()),
        other => {
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output")
                .trim()
                .to_owned();
            return Err(PipelineError::RemovalFailed {
                code: other.code(),
                detail,
            }
            .into());
        }
    }

    step("Updating bootloader...".to_owned(), 60);
    let bootloader_updated = match env.bootloader_update_command().map(CommandChain::from) {
        None => {
            warn!("no bootloader tool detected, not refreshing the boot menu");
            step(
                "Warning: no bootloader tool found, update the boot menu manually".to_owned(),
                60,
            );
            false
        }
        Some(bootloader) => refresh_bootloader(runner, &bootloader, release, &step),
    };

    step("Updating history...".to_owned(), 90);
    let history_updated = match history.remove(release) {
        Ok(found) => found,
        Err(e) => {
            warn!("could not update {}: {e}", history.path().display());
            false
        }
    };

    step("Kernel removed successfully.".to_owned(), 100);
    Ok(RemovalReport {
        bootloader_updated,
        history_updated,
    })
}

fn refresh_bootloader(
    runner: &dyn CommandRunner,
    bootloader: &CommandChain,
    release: &str,
    step: &dyn Fn(String, u8),
) -> bool {
    match runner.run_privileged(bootloader) {
        Ok(out) if out.success() => true,
        Ok(out) => {
            warn!(
                "bootloader update after removing {release} exited with {}",
                out.outcome.code()
            );
            step(
                "Warning: bootloader update failed, run it manually before rebooting".to_owned(),
                60,
            );
            false
        }
        Err(e) => {
            warn!("bootloader update after removing {release} failed: {e}");
            false
        }
    }
}
