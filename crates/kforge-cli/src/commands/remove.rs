use super::{confirm, json_pretty, Host, EXIT_SUCCESS};
use kforge_core::{remove_kernel, FnSink, ProgressEvent, ProgressValue, RemovalTarget};
use kforge_schema::validate_release;

pub fn run(host: &Host, release: &str, assume_yes: bool, json: bool) -> Result<u8, String> {
    let release = release.trim();
    validate_release(release).map_err(|e| e.to_string())?;
    let running = host.running_release();
    if !confirm(&format!("Remove kernel {release}?"), assume_yes)? {
        return Err("removal aborted".to_owned());
    }

    let catalog = host.catalog();
    let history = host.history(&catalog);
    let sink = FnSink(move |event: ProgressEvent| {
        if json {
            return;
        }
        match event.value {
            ProgressValue::Percent(p) => println!("[{p:>3}%] {}", event.message),
            // Errors come back as the command result.
            ProgressValue::Error => {}
            _ => println!("       {}", event.message),
        }
    });

    let target = RemovalTarget {
        release,
        running: &running,
        boot_dir: &host.settings.boot_dir,
    };
    let report = remove_kernel(&host.env, host.runner(), &history, &target, &sink)
        .map_err(|e| e.to_string())?;
    if json {
        let out = serde_json::json!({
            "status": "removed",
            "release": release,
            "bootloader_updated": report.bootloader_updated,
            "history_updated": report.history_updated,
        });
        println!("{}", json_pretty(&out)?);
    } else if !report.bootloader_updated {
        println!("warning: the boot menu may still list {release}; update the bootloader manually");
    }
    Ok(EXIT_SUCCESS)
}
