use super::{percent_bar, Host, EXIT_CANCELLED, EXIT_SUCCESS};
use indicatif::ProgressBar;
use kforge_core::{
    install_signal_handler, BuildJob, BuildPipeline, JobOutcome, ProgressEvent, ProgressValue,
    WorkspaceLock,
};
use kforge_remote::{latest_stable, HttpFetcher};
use kforge_schema::ProfileId;
use std::sync::{mpsc, Arc};

pub struct InstallArgs<'a> {
    pub version: &'a str,
    pub profile: ProfileId,
    pub name_tag: Option<&'a str>,
    pub cleanup: bool,
}

/// Download, configure, build and install one kernel.
pub fn run(host: &Host, args: &InstallArgs<'_>, json: bool) -> Result<u8, String> {
    let layout = host.settings.layout();
    let _lock = WorkspaceLock::claim(&layout.lock_file()).map_err(|e| e.to_string())?;

    let version = resolve_version(host, args.version, json)?;
    let catalog = host.catalog();
    let profile = catalog.get(args.profile).clone();
    let job = BuildJob::new(&version, profile, args.name_tag)
        .map_err(|e| e.to_string())?
        .cleanup_after_success(args.cleanup || host.settings.cleanup_after_install);
    tracing::info!(
        "installing Linux {} ({} profile, release suffix {})",
        job.version(),
        job.profile().name,
        job.local_version()
    );

    let (tx, rx) = mpsc::channel();
    let pipeline = BuildPipeline::new(
        host.env.clone(),
        host.build_runner(),
        Arc::new(HttpFetcher::new()),
        layout,
        host.history(&catalog),
    )
    .with_sources(host.settings.sources())
    .with_boot_dir(&host.settings.boot_dir)
    .with_jobs(host.settings.jobs())
    .with_notifier(host.notifier())
    .with_progress(tx);

    let handle = job.spawn(pipeline).map_err(|e| e.to_string())?;
    install_signal_handler(handle.cancel_token());

    let bar = (!json).then(percent_bar);
    for event in rx {
        match &bar {
            Some(bar) => render(bar, &event),
            None => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::debug!("cannot serialize progress event: {e}"),
            },
        }
    }

    match handle.join() {
        JobOutcome::Succeeded(summary) => {
            if let Some(bar) = &bar {
                bar.finish_with_message("Installation complete!");
            }
            if json {
                let out = serde_json::json!({
                    "status": "installed",
                    "version": summary.version,
                    "release": summary.release,
                    "profile": summary.profile,
                    "history_recorded": summary.history_recorded,
                });
                println!("{out}");
            } else {
                println!(
                    "installed {} ({} profile); reboot and pick it in the boot menu",
                    summary.release, summary.profile
                );
                if host.env.needs_secure_boot_handling() {
                    println!(
                        "note: with Secure Boot enabled, sign the kernel and enroll the key with mokutil before rebooting"
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }
        JobOutcome::Cancelled => {
            if let Some(bar) = &bar {
                bar.abandon_with_message("Build cancelled by user.");
            }
            Ok(EXIT_CANCELLED)
        }
        JobOutcome::Failed(e) => {
            if let Some(bar) = &bar {
                bar.abandon();
            }
            Err(e.to_string())
        }
    }
}

fn render(bar: &ProgressBar, event: &ProgressEvent) {
    match event.value {
        ProgressValue::Percent(p) => {
            bar.set_position(u64::from(p));
            bar.set_message(event.message.clone());
        }
        ProgressValue::Indeterminate | ProgressValue::Cancelled => {
            bar.set_message(event.message.clone());
        }
        // Printed once more by the caller as the command's error.
        ProgressValue::Error => bar.set_message("failed"),
    }
}

/// `latest` means the newest stable release on kernel.org.
fn resolve_version(host: &Host, requested: &str, json: bool) -> Result<String, String> {
    if !requested.trim().eq_ignore_ascii_case("latest") {
        return Ok(requested.trim().to_owned());
    }
    let versions = super::versions::fetch(&host.settings.remote_config(), json)?;
    latest_stable(&versions)
        .map(|v| v.version.clone())
        .ok_or_else(|| "kernel.org lists no stable release".to_owned())
}
