use super::{json_pretty, EXIT_SUCCESS};
use kforge_store::InstallHistoryStore;

pub fn run(history: &InstallHistoryStore, running: &str, json: bool) -> Result<u8, String> {
    let records = history.list(running);
    if json {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "version": r.version,
                    "profile": r.profile,
                    "installed_date": r.installed_date,
                    "is_current": r.is_current,
                })
            })
            .collect();
        println!("{}", json_pretty(&rows)?);
    } else if records.is_empty() {
        println!("no kernels installed by kforge");
    } else {
        println!("{:<32} {:<20} {:<20} CURRENT", "RELEASE", "PROFILE", "INSTALLED");
        for r in &records {
            let date = r.installed_at().map_or_else(
                || r.installed_date.clone(),
                |d| d.format("%Y-%m-%d %H:%M").to_string(),
            );
            println!(
                "{:<32} {:<20} {:<20} {}",
                r.version,
                r.profile,
                date,
                if r.is_current { "*" } else { "" }
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
