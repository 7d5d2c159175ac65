use crate::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_STABLE_CDN: &str = "https://cdn.kernel.org/pub/linux/kernel";
pub const DEFAULT_MAINLINE_SNAPSHOT: &str =
    "https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/snapshot";

// One row of the kernel.org releases table: `<td>stable:</td><td><strong>6.12.4</strong>`.
static RELEASE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<tr[^>]*>\s*<td[^>]*>\s*(\w+):?</td>\s*<td[^>]*>\s*<strong>([0-9]+\.[0-9]+(?:\.[0-9]+)?(?:-rc\d+)?)</strong>",
    )
    .expect("release row pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Mainline,
    Stable,
    Longterm,
}

impl ReleaseChannel {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "mainline" => Some(Self::Mainline),
            "stable" => Some(Self::Stable),
            "longterm" => Some(Self::Longterm),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseChannel::Mainline => write!(f, "mainline"),
            ReleaseChannel::Stable => write!(f, "stable"),
            ReleaseChannel::Longterm => write!(f, "longterm"),
        }
    }
}

/// A kernel release offered upstream.
///
/// At most one entry of a parsed listing carries `is_latest`, and the three
/// flags are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelVersion {
    pub version: String,
    pub download_url: String,
    pub is_latest: bool,
    pub is_longterm: bool,
    pub is_mainline: bool,
}

impl KernelVersion {
    pub fn channel(&self) -> ReleaseChannel {
        if self.is_mainline {
            ReleaseChannel::Mainline
        } else if self.is_longterm {
            ReleaseChannel::Longterm
        } else {
            ReleaseChannel::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarXz => "tar.xz",
        }
    }
}

/// Where to fetch a source archive and what it will be called locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub url: String,
    pub file_name: String,
    pub format: ArchiveFormat,
    /// Directory the archive unpacks into, e.g. `linux-6.12.4`.
    pub unpacked_dir: String,
}

/// Base URLs for the two upstream artifact sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSources {
    pub stable_cdn: String,
    pub mainline_snapshot: String,
}

impl Default for DownloadSources {
    fn default() -> Self {
        Self {
            stable_cdn: DEFAULT_STABLE_CDN.to_owned(),
            mainline_snapshot: DEFAULT_MAINLINE_SNAPSHOT.to_owned(),
        }
    }
}

impl DownloadSources {
    pub fn new(stable_cdn: &str, mainline_snapshot: &str) -> Self {
        Self {
            stable_cdn: stable_cdn.trim_end_matches('/').to_owned(),
            mainline_snapshot: mainline_snapshot.trim_end_matches('/').to_owned(),
        }
    }

    /// Route a version to its archive. Release candidates come from the
    /// mainline git snapshot as `.tar.gz`; numbered releases from the CDN as
    /// `.tar.xz` under `v{major}.x/`.
    pub fn resolve(&self, version: &str) -> Result<ArchiveSource, SchemaError> {
        validate_version(version)?;
        Ok(self.route(version, is_release_candidate(version)))
    }

    fn route(&self, version: &str, mainline: bool) -> ArchiveSource {
        let unpacked_dir = format!("linux-{version}");
        if mainline {
            let file_name = format!("{unpacked_dir}.{}", ArchiveFormat::TarGz.extension());
            ArchiveSource {
                url: format!("{}/{file_name}", self.mainline_snapshot),
                file_name,
                format: ArchiveFormat::TarGz,
                unpacked_dir,
            }
        } else {
            let major = version.split('.').next().unwrap_or(version);
            let file_name = format!("{unpacked_dir}.{}", ArchiveFormat::TarXz.extension());
            ArchiveSource {
                url: format!("{}/v{major}.x/{file_name}", self.stable_cdn),
                file_name,
                format: ArchiveFormat::TarXz,
                unpacked_dir,
            }
        }
    }
}

pub fn is_release_candidate(version: &str) -> bool {
    version.contains("-rc")
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts `MAJOR.MINOR`, `MAJOR.MINOR.PATCH`, optionally followed by `-rcN`.
pub fn validate_version(version: &str) -> Result<(), SchemaError> {
    let invalid = || SchemaError::InvalidVersion(version.to_owned());
    let (base, rc) = match version.split_once("-rc") {
        Some((base, rc)) => (base, Some(rc)),
        None => (version, None),
    };
    if rc.is_some_and(|n| !all_digits(n)) {
        return Err(invalid());
    }
    let parts: Vec<&str> = base.split('.').collect();
    if !(2..=3).contains(&parts.len()) || !parts.iter().all(|p| all_digits(p)) {
        return Err(invalid());
    }
    Ok(())
}

fn version_key(version: &str) -> ([u64; 3], Option<u64>) {
    let (base, rc) = match version.split_once("-rc") {
        Some((base, rc)) => (base, rc.parse().ok()),
        None => (version, None),
    };
    let mut nums = [0u64; 3];
    for (slot, part) in nums.iter_mut().zip(base.split('.')) {
        *slot = part.parse().unwrap_or(0);
    }
    (nums, rc)
}

/// Numeric ordering of kernel versions; a release sorts above its own
/// release candidates (`6.19-rc7 < 6.19`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_nums, a_rc) = version_key(a);
    let (b_nums, b_rc) = version_key(b);
    a_nums.cmp(&b_nums).then_with(|| match (a_rc, b_rc) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    })
}

/// Parse the kernel.org front page into a sorted list of releases.
///
/// Duplicate versions keep their first row, only the first stable row is
/// `is_latest`, and rows with other labels (e.g. `linux-next`) are skipped.
/// Ordering: mainline, latest stable, longterm, remaining stable, each group
/// newest first.
pub fn parse_release_listing(html: &str, sources: &DownloadSources) -> Vec<KernelVersion> {
    let mut versions: Vec<KernelVersion> = Vec::new();
    let mut first_stable = true;

    for caps in RELEASE_ROW.captures_iter(html) {
        let Some(channel) = ReleaseChannel::from_label(&caps[1]) else {
            continue;
        };
        let version = caps[2].to_owned();
        if versions.iter().any(|v| v.version == version) {
            continue;
        }

        let mainline = channel == ReleaseChannel::Mainline || is_release_candidate(&version);
        let download_url = sources.route(&version, mainline).url;
        let is_latest = channel == ReleaseChannel::Stable && first_stable;
        if channel == ReleaseChannel::Stable {
            first_stable = false;
        }

        versions.push(KernelVersion {
            version,
            download_url,
            is_latest,
            is_longterm: channel == ReleaseChannel::Longterm,
            is_mainline: channel == ReleaseChannel::Mainline,
        });
    }

    versions.sort_by(|a, b| {
        (!a.is_mainline, !a.is_latest, !a.is_longterm)
            .cmp(&(!b.is_mainline, !b.is_latest, !b.is_longterm))
            .then_with(|| compare_versions(&b.version, &a.version))
    });
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
<table id="releases">
  <tr align="left">
    <td>mainline:</td>
    <td><strong>6.19-rc3</strong></td>
    <td>2025-12-28</td>
  </tr>
  <tr align="left">
    <td>stable:</td>
    <td><strong>6.12.4</strong></td>
    <td>2025-12-19</td>
  </tr>
  <tr align="left">
    <td>longterm:</td>
    <td><strong>6.6.70</strong></td>
    <td>2025-12-19</td>
  </tr>
</table>
"#;

    #[test]
    fn listing_fixture_yields_three_ordered_entries() {
        let versions = parse_release_listing(LISTING, &DownloadSources::default());
        assert_eq!(versions.len(), 3);

        assert_eq!(versions[0].version, "6.19-rc3");
        assert!(versions[0].is_mainline);
        assert!(!versions[0].is_latest);

        assert_eq!(versions[1].version, "6.12.4");
        assert!(versions[1].is_latest);
        assert!(!versions[1].is_longterm);

        assert_eq!(versions[2].version, "6.6.70");
        assert!(versions[2].is_longterm);
        assert!(!versions[2].is_latest);

        assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 1);
    }

    #[test]
    fn listing_urls_follow_channel() {
        let versions = parse_release_listing(LISTING, &DownloadSources::default());
        assert_eq!(
            versions[0].download_url,
            "https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/snapshot/linux-6.19-rc3.tar.gz"
        );
        assert_eq!(
            versions[2].download_url,
            "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.6.70.tar.xz"
        );
    }

    #[test]
    fn listing_skips_duplicates_and_unknown_labels() {
        let html = r"
<tr><td>stable:</td><td><strong>6.12.4</strong></td></tr>
<tr><td>stable:</td><td><strong>6.11.11</strong></td></tr>
<tr><td>stable:</td><td><strong>6.12.4</strong></td></tr>
<tr><td>linux-next:</td><td><strong>6.13</strong></td></tr>
<tr><td>longterm:</td><td><strong>5.15.175</strong></td></tr>
<tr><td>longterm:</td><td><strong>6.6.70</strong></td></tr>
";
        let versions = parse_release_listing(html, &DownloadSources::default());
        let names: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(names, vec!["6.12.4", "6.6.70", "5.15.175", "6.11.11"]);
        assert!(versions[0].is_latest);
        assert!(!versions[3].is_latest);
    }

    #[test]
    fn listing_empty_page_yields_nothing() {
        assert!(parse_release_listing("<html></html>", &DownloadSources::default()).is_empty());
    }

    #[test]
    fn resolve_routes_release_candidate_to_snapshot() {
        let src = DownloadSources::default().resolve("6.19-rc7").unwrap();
        assert_eq!(
            src.url,
            "https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/snapshot/linux-6.19-rc7.tar.gz"
        );
        assert_eq!(src.format, ArchiveFormat::TarGz);
        assert_eq!(src.file_name, "linux-6.19-rc7.tar.gz");
        assert_eq!(src.unpacked_dir, "linux-6.19-rc7");
    }

    #[test]
    fn resolve_routes_stable_to_cdn() {
        let src = DownloadSources::default().resolve("6.12.4").unwrap();
        assert_eq!(
            src.url,
            "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.12.4.tar.xz"
        );
        assert_eq!(src.format, ArchiveFormat::TarXz);
        assert_eq!(src.unpacked_dir, "linux-6.12.4");
    }

    #[test]
    fn resolve_honors_custom_mirrors() {
        let sources = DownloadSources::new("http://mirror.local/kernel/", "http://git.local/snap/");
        assert_eq!(
            sources.resolve("6.1").unwrap().url,
            "http://mirror.local/kernel/v6.x/linux-6.1.tar.xz"
        );
        assert_eq!(
            sources.resolve("6.2-rc1").unwrap().url,
            "http://git.local/snap/linux-6.2-rc1.tar.gz"
        );
    }

    #[test]
    fn resolve_rejects_malformed_versions() {
        let sources = DownloadSources::default();
        for bad in ["", "6", "6.x", "6.12.4; rm -rf ~", "6.12-rc", "6.12.4.1", "../6.1"] {
            assert!(sources.resolve(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn validate_version_accepts_known_shapes() {
        for good in ["6.1", "6.12.4", "6.19-rc7", "5.15.175"] {
            assert!(validate_version(good).is_ok(), "rejected {good:?}");
        }
    }

    #[test]
    fn compare_versions_orders_numerically() {
        assert_eq!(compare_versions("6.12.4", "6.9.12"), Ordering::Greater);
        assert_eq!(compare_versions("6.6", "6.6.0"), Ordering::Equal);
        assert_eq!(compare_versions("6.19-rc7", "6.19"), Ordering::Less);
        assert_eq!(compare_versions("6.19-rc2", "6.19-rc10"), Ordering::Less);
    }
}
