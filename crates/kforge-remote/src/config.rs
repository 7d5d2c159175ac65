use kforge_schema::DownloadSources;

pub const DEFAULT_RELEASE_INDEX: &str = "https://www.kernel.org/";

/// Where release information and archives come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub index_url: String,
    pub sources: DownloadSources,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_RELEASE_INDEX.to_owned(),
            sources: DownloadSources::default(),
        }
    }
}

impl RemoteConfig {
    pub fn new(index_url: &str) -> Self {
        Self {
            index_url: index_url.trim().to_owned(),
            sources: DownloadSources::default(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: DownloadSources) -> Self {
        self.sources = sources;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_kernel_org() {
        let config = RemoteConfig::default();
        assert_eq!(config.index_url, "https://www.kernel.org/");
        assert!(config.sources.stable_cdn.starts_with("https://cdn.kernel.org/"));
    }

    #[test]
    fn custom_mirror_sources() {
        let config = RemoteConfig::new(" http://mirror.local/ ")
            .with_sources(DownloadSources::new("http://mirror.local/pub/", "http://mirror.local/snap"));
        assert_eq!(config.index_url, "http://mirror.local/");
        assert_eq!(config.sources.stable_cdn, "http://mirror.local/pub");
    }
}
