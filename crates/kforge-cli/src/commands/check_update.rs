use super::{json_pretty, EXIT_SUCCESS};
use kforge_core::{check_for_update, Notifier};
use kforge_remote::RemoteConfig;

pub fn run(
    config: &RemoteConfig,
    running: &str,
    notifier: &dyn Notifier,
    json: bool,
) -> Result<u8, String> {
    let versions = super::versions::fetch(config, json)?;
    let update = check_for_update(running, &versions, notifier);
    if json {
        let out = serde_json::json!({
            "running": running,
            "update_available": update.is_some(),
            "latest": update.as_ref().map(|v| v.version.as_str()),
        });
        println!("{}", json_pretty(&out)?);
    } else if let Some(v) = update {
        println!("Linux {} is available (running {running})", v.version);
        println!("install it with: kforge install {}", v.version);
    } else {
        println!("running kernel {running} is up to date");
    }
    Ok(EXIT_SUCCESS)
}
