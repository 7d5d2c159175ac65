//! Install history compatibility with files written by other tools.

use kforge_store::{InstallHistoryStore, InstalledKernelRecord, MAX_HISTORY_ENTRIES};
use std::fs;
use std::path::Path;

fn write_legacy_history(path: &Path, count: usize) {
    let records: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "version": format!("6.{i}.0-custom-gaming"),
                "profile": "Gaming",
                "installed_date": format!("2024-03-{:02}T10:00:00.000000", i % 28 + 1),
            })
        })
        .collect();
    fs::write(path, serde_json::to_string_pretty(&records).unwrap()).unwrap();
}

#[test]
fn legacy_history_without_zone_is_listed_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    write_legacy_history(&path, 3);

    let store = InstallHistoryStore::new(&path, dir.path().join("no-boot"));
    let listed = store.list("6.1.0-custom-gaming");

    let versions: Vec<&str> = listed.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(
        versions,
        vec!["6.2.0-custom-gaming", "6.1.0-custom-gaming", "6.0.0-custom-gaming"]
    );
    assert!(listed[1].is_current);
}

#[test]
fn appending_to_oversized_legacy_file_trims_to_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    write_legacy_history(&path, 30);

    let store = InstallHistoryStore::new(&path, dir.path().join("boot"));
    store
        .append(InstalledKernelRecord::new("6.12.4-desk-minimal", "Minimal / Office"))
        .unwrap();

    let stored = store.load().unwrap();
    assert_eq!(stored.len(), MAX_HISTORY_ENTRIES);
    assert_eq!(stored[0].version, "6.12.4-desk-minimal");
    assert!(stored[0].installed_at().is_some());
}

#[test]
fn history_parent_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/state/history.json");
    let store = InstallHistoryStore::new(&path, dir.path().join("boot"));

    store
        .append(InstalledKernelRecord::new("6.12.4-custom-gaming", "Gaming"))
        .unwrap();
    assert!(path.exists());
    assert!(store.remove("6.12.4-custom-gaming").unwrap());
    assert!(store.list("").is_empty());
}
