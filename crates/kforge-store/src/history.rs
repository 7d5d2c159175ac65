use crate::{fsync_dir, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const MAX_HISTORY_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledKernelRecord {
    /// Full kernel release, e.g. `6.12.4-custom-gaming`.
    pub version: String,
    pub profile: String,
    pub installed_date: String,
    #[serde(skip)]
    pub is_current: bool,
}

impl InstalledKernelRecord {
    pub fn new(version: &str, profile: &str) -> Self {
        Self {
            version: version.to_owned(),
            profile: profile.to_owned(),
            installed_date: Utc::now().to_rfc3339(),
            is_current: false,
        }
    }

    /// Accepts RFC 3339 and the zone-less ISO form written by older tools.
    pub fn installed_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&self.installed_date) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.installed_date, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    fn same_version(&self, other: &str) -> bool {
        self.version.eq_ignore_ascii_case(other)
    }
}

/// JSON-backed history of kernels installed by kforge, most recent first.
///
/// Every mutation is a full read-modify-write; concurrent writers are not
/// supported. Callers treat failures as bookkeeping warnings.
#[derive(Debug, Clone)]
pub struct InstallHistoryStore {
    path: PathBuf,
    boot_dir: PathBuf,
    /// `(release suffix, profile display name)` pairs used by the boot scan.
    known_profiles: Vec<(String, String)>,
}

impl InstallHistoryStore {
    pub fn new(path: impl Into<PathBuf>, boot_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            boot_dir: boot_dir.into(),
            known_profiles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_known_profiles<I, S, N>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = (S, N)>,
        S: Into<String>,
        N: Into<String>,
    {
        self.known_profiles = profiles
            .into_iter()
            .map(|(s, n)| (s.into(), n.into()))
            .collect();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored records exactly as persisted. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<InstalledKernelRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn load_or_empty(&self) -> Vec<InstalledKernelRecord> {
        match self.load() {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "ignoring unreadable install history {}: {e}",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }

    /// Prepend `record`, dropping any earlier record for the same version
    /// (case-insensitive), and keep the newest [`MAX_HISTORY_ENTRIES`].
    pub fn append(&self, record: InstalledKernelRecord) -> Result<(), StoreError> {
        let mut records = self.load_or_empty();
        records.retain(|r| !r.same_version(&record.version));
        records.insert(0, record);
        records.truncate(MAX_HISTORY_ENTRIES);
        self.persist(&records)
    }

    /// Drop the record whose version matches exactly. Returns whether one was removed.
    pub fn remove(&self, version: &str) -> Result<bool, StoreError> {
        let mut records = self.load_or_empty();
        let before = records.len();
        records.retain(|r| r.version != version);
        if records.len() == before {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }

    /// Stored records merged with kforge-built kernels found in the boot
    /// directory, deduplicated by case-insensitive version, the running
    /// kernel marked current, newest first.
    pub fn list(&self, running_release: &str) -> Vec<InstalledKernelRecord> {
        let mut merged: Vec<InstalledKernelRecord> = Vec::new();
        for record in self.load_or_empty().into_iter().chain(self.scan_boot_dir()) {
            if !merged.iter().any(|r| r.same_version(&record.version)) {
                merged.push(record);
            }
        }
        for record in &mut merged {
            record.is_current = record.same_version(running_release);
        }
        // Stable sort: records with unparseable dates keep their relative order at the end.
        merged.sort_by(|a, b| match (a.installed_at(), b.installed_at()) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        merged
    }

    fn scan_boot_dir(&self) -> Vec<InstalledKernelRecord> {
        let entries = match fs::read_dir(&self.boot_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("cannot scan {}: {e}", self.boot_dir.display());
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(release) = name.to_str().and_then(|n| n.strip_prefix("vmlinuz-")) else {
                continue;
            };
            let Some((_, profile)) = self
                .known_profiles
                .iter()
                .find(|(suffix, _)| release.ends_with(&format!("-{suffix}")))
            else {
                continue;
            };
            let installed_date = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            found.push(InstalledKernelRecord {
                version: release.to_owned(),
                profile: profile.clone(),
                installed_date,
                is_current: false,
            });
        }
        found
    }

    fn persist(&self, records: &[InstalledKernelRecord]) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> InstallHistoryStore {
        InstallHistoryStore::new(dir.join("history.json"), dir.join("boot")).with_known_profiles([
            ("gaming", "Gaming"),
            ("minimal", "Minimal / Office"),
        ])
    }

    fn record(version: &str, date: &str) -> InstalledKernelRecord {
        InstalledKernelRecord {
            version: version.to_owned(),
            profile: "Gaming".to_owned(),
            installed_date: date.to_owned(),
            is_current: false,
        }
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn append_replaces_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append(record("6.12.4-custom-gaming", "2025-01-01T00:00:00+00:00"))
            .unwrap();
        s.append(record("6.6.70-custom-minimal", "2025-01-02T00:00:00+00:00"))
            .unwrap();
        s.append(record("6.12.4-CUSTOM-gaming", "2025-01-03T00:00:00+00:00"))
            .unwrap();

        let listed = s.list("5.10.0");
        let hits = listed
            .iter()
            .filter(|r| r.version.eq_ignore_ascii_case("6.12.4-custom-gaming"))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].version, "6.12.4-CUSTOM-gaming");
    }

    #[test]
    fn append_caps_at_twenty_keeping_newest() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        for i in 0..25 {
            s.append(InstalledKernelRecord::new(&format!("6.1.{i}-custom-gaming"), "Gaming"))
                .unwrap();
        }
        let stored = s.load().unwrap();
        assert_eq!(stored.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(stored[0].version, "6.1.24-custom-gaming");
        assert_eq!(stored[19].version, "6.1.5-custom-gaming");
    }

    #[test]
    fn persisted_json_has_wire_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append(record("6.12.4-custom-gaming", "2025-01-01T00:00:00+00:00"))
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(s.path()).unwrap()).unwrap();
        let obj = raw[0].as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["installed_date", "profile", "version"]);
    }

    #[test]
    fn list_marks_exactly_the_running_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append(record("6.6.70-custom-minimal", "2025-01-01T00:00:00+00:00"))
            .unwrap();
        s.append(record("6.12.4-custom-gaming", "2025-01-02T00:00:00+00:00"))
            .unwrap();

        let listed = s.list("6.6.70-custom-minimal");
        let current: Vec<_> = listed.iter().filter(|r| r.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].version, "6.6.70-custom-minimal");
    }

    #[test]
    fn list_merges_boot_images_with_known_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let boot = dir.path().join("boot");
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("vmlinuz-6.12.4-custom-gaming"), b"").unwrap();
        fs::write(boot.join("vmlinuz-6.9.1-desk-minimal"), b"").unwrap();
        fs::write(boot.join("vmlinuz-6.8.0-45-generic"), b"").unwrap();
        fs::write(boot.join("initramfs-6.9.1-desk-minimal.img"), b"").unwrap();
        s.append(record("6.12.4-custom-gaming", "2020-01-01T00:00:00+00:00"))
            .unwrap();

        let listed = s.list("6.8.0-45-generic");
        let versions: Vec<&str> = listed.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains(&"6.9.1-desk-minimal"));
        assert!(versions.contains(&"6.12.4-custom-gaming"));
        let scanned = listed
            .iter()
            .find(|r| r.version == "6.9.1-desk-minimal")
            .unwrap();
        assert_eq!(scanned.profile, "Minimal / Office");
        // The scanned image was just written, so it is newer than the stored record.
        assert_eq!(listed[0].version, "6.9.1-desk-minimal");
        assert!(listed.iter().all(|r| !r.is_current));
    }

    #[test]
    fn remove_filters_exact_version() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.append(record("6.12.4-custom-gaming", "2025-01-01T00:00:00+00:00"))
            .unwrap();
        assert!(!s.remove("6.12.4-CUSTOM-GAMING").unwrap());
        assert!(s.remove("6.12.4-custom-gaming").unwrap());
        assert!(s.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_history_is_replaced_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        fs::write(s.path(), "{not json").unwrap();
        assert!(s.load().is_err());
        assert!(s.list("x").is_empty());
        s.append(record("6.1.1-custom-gaming", "2025-01-01T00:00:00+00:00"))
            .unwrap();
        assert_eq!(s.load().unwrap().len(), 1);
    }

    #[test]
    fn installed_at_parses_legacy_naive_timestamps() {
        let r = record("x", "2024-05-06T07:08:09.123456");
        assert!(r.installed_at().is_some());
        assert!(record("x", "yesterday").installed_at().is_none());
    }
}
