use super::{colorize_channel, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use kforge_core::base_version;
use kforge_remote::{fetch_versions, RemoteConfig};
use kforge_schema::KernelVersion;
use serde::Serialize;

#[derive(Serialize)]
struct VersionRow<'a> {
    #[serde(flatten)]
    version: &'a KernelVersion,
    channel: String,
    running: bool,
}

/// Fetch the upstream listing, failing with a printable message.
pub fn fetch(config: &RemoteConfig, json: bool) -> Result<Vec<KernelVersion>, String> {
    let pb = (!json).then(|| spinner("fetching kernel.org release listing..."));
    match fetch_versions(config) {
        Ok(versions) => {
            if let Some(pb) = &pb {
                spin_ok(pb, &format!("{} releases available", versions.len()));
            }
            Ok(versions)
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "release listing unavailable");
            }
            Err(format!("failed to fetch kernel versions: {e}"))
        }
    }
}

pub fn run(config: &RemoteConfig, running: &str, json: bool) -> Result<u8, String> {
    let versions = fetch(config, json)?;
    let current = base_version(running);
    let rows: Vec<VersionRow<'_>> = versions
        .iter()
        .map(|v| VersionRow {
            version: v,
            channel: v.channel().to_string(),
            running: current.as_deref() == Some(v.version.as_str()),
        })
        .collect();

    if json {
        println!("{}", json_pretty(&rows)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<14} {:<10} {:<7} URL", "VERSION", "CHANNEL", "LATEST");
    for row in &rows {
        let marker = if row.running { " (running)" } else { "" };
        println!(
            "{:<14} {:<10} {:<7} {}{marker}",
            row.version.version,
            colorize_channel(&row.channel),
            if row.version.is_latest { "yes" } else { "" },
            row.version.download_url
        );
    }
    Ok(EXIT_SUCCESS)
}
