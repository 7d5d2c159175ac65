use crate::CoreError;
use kforge_remote::{RemoteConfig, DEFAULT_RELEASE_INDEX};
use kforge_runtime::Elevation;
use kforge_schema::version::{DEFAULT_MAINLINE_SNAPSHOT, DEFAULT_STABLE_CDN};
use kforge_schema::{DownloadSources, ProfileCatalog};
use kforge_store::{InstallHistoryStore, WorkspaceLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-user settings from `~/.config/kforge/config.toml`. Every key is
/// optional; paths may start with `~/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub build_dir: PathBuf,
    pub history_file: PathBuf,
    pub boot_dir: PathBuf,
    pub release_index_url: String,
    pub stable_cdn_url: String,
    pub mainline_snapshot_url: String,
    /// Parallel compile jobs; all available CPUs when unset.
    pub jobs: Option<usize>,
    pub elevation: Elevation,
    pub notifications: bool,
    /// Delete the build workspace after a successful install.
    pub cleanup_after_install: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_home(&home_dir())
    }
}

impl Settings {
    /// Defaults with user paths rooted at `home`.
    pub fn for_home(home: &Path) -> Self {
        Self {
            build_dir: home.join("kernel_build"),
            history_file: home.join(".kernel_installer_history.json"),
            boot_dir: PathBuf::from("/boot"),
            release_index_url: DEFAULT_RELEASE_INDEX.to_owned(),
            stable_cdn_url: DEFAULT_STABLE_CDN.to_owned(),
            mainline_snapshot_url: DEFAULT_MAINLINE_SNAPSHOT.to_owned(),
            jobs: None,
            elevation: Elevation::Auto,
            notifications: true,
            cleanup_after_install: false,
        }
    }

    /// `$XDG_CONFIG_HOME/kforge/config.toml`, else `~/.config/kforge/config.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map_or_else(|| home_dir().join(".config"), PathBuf::from)
            .join("kforge")
            .join("config.toml")
    }

    /// Load `path`, or the default location when `None`. A missing file
    /// yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let home = home_dir();
        if !path.exists() {
            debug!("no settings file at {}, using defaults", path.display());
            return Ok(Self::for_home(&home));
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text, &home).map_err(|source| CoreError::Settings {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(text: &str, home: &Path) -> Result<Self, toml::de::Error> {
        let mut settings: Self = toml::from_str(text)?;
        settings.build_dir = expand_home(&settings.build_dir, home);
        settings.history_file = expand_home(&settings.history_file, home);
        settings.boot_dir = expand_home(&settings.boot_dir, home);
        Ok(settings)
    }

    pub fn jobs(&self) -> usize {
        self.jobs
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.build_dir)
    }

    pub fn sources(&self) -> DownloadSources {
        DownloadSources::new(&self.stable_cdn_url, &self.mainline_snapshot_url)
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig::new(&self.release_index_url).with_sources(self.sources())
    }

    /// History store that recognizes kernels built with any profile in `catalog`.
    pub fn history_store(&self, catalog: &ProfileCatalog) -> InstallHistoryStore {
        InstallHistoryStore::new(&self.history_file, &self.boot_dir).with_known_profiles(
            catalog
                .all()
                .iter()
                .map(|p| (p.suffix.clone(), p.name.clone())),
        )
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from)
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
