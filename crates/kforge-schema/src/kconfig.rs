//! Kernel `.config` text transforms.
//!
//! The transform is purely textual: keys are never validated against a
//! Kconfig tree, so options unknown to this crate pass through untouched.
//! Lines other than `CONFIG_X=value` and `# CONFIG_X is not set` are dropped;
//! the kernel's own `olddefconfig` regenerates them afterwards.

use crate::profile::KernelProfile;
use crate::SchemaError;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const DISABLED: &str = "n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelConfig {
    entries: BTreeMap<String, String>,
}

impl KernelConfig {
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines().map(str::trim) {
            if line.starts_with("CONFIG_") {
                if let Some((key, value)) = line.split_once('=') {
                    entries.insert(key.to_owned(), value.to_owned());
                }
            } else if let Some(key) = line
                .strip_prefix("# ")
                .and_then(|rest| rest.strip_suffix(" is not set"))
            {
                if key.starts_with("CONFIG_") {
                    entries.insert(key.to_owned(), DISABLED.to_owned());
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_owned(), value.to_owned());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay the profile's overrides, then mark its modules disabled.
    pub fn apply(&mut self, profile: &KernelProfile) {
        for (key, value) in profile.overrides.iter() {
            self.set(key, value);
        }
        for module in &profile.modules_to_disable {
            self.set(&format!("CONFIG_{module}"), DISABLED);
        }
    }

    /// Sorted by key; `n` renders in the `# KEY is not set` form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            if value == DISABLED {
                let _ = writeln!(out, "# {key} is not set");
            } else {
                let _ = writeln!(out, "{key}={value}");
            }
        }
        out
    }

    /// Replace `path` with the rendered config via a temp file and rename.
    pub fn write(&self, path: &Path) -> Result<(), SchemaError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SchemaError::Io(e.error))?;
        Ok(())
    }
}

/// Rewrite `config_path` with `profile` applied. Idempotent: a second
/// application yields byte-identical output.
pub fn apply_profile(profile: &KernelProfile, config_path: &Path) -> Result<(), SchemaError> {
    let text = std::fs::read_to_string(config_path)?;
    let mut config = KernelConfig::parse(&text);
    config.apply(profile);
    config.write(config_path)
}
