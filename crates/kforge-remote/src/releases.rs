use crate::{RemoteConfig, RemoteError, USER_AGENT};
use kforge_schema::{parse_release_listing, KernelVersion};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// GET the release index page as text.
pub fn fetch_release_page(url: &str) -> Result<String, RemoteError> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(INDEX_TIMEOUT))
        .build();
    let agent = ureq::Agent::new_with_config(config);
    debug!("GET {url}");
    let resp = match agent.get(url).header("User-Agent", USER_AGENT).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(404)) => return Err(RemoteError::NotFound(url.to_owned())),
        Err(ureq::Error::StatusCode(code)) => {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(RemoteError::Http(e.to_string())),
    };

    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| RemoteError::Http(e.to_string()))?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Fetch and parse the release table. An empty table is an error: it means
/// the page layout changed or the URL is not a kernel.org front page.
pub fn fetch_versions(config: &RemoteConfig) -> Result<Vec<KernelVersion>, RemoteError> {
    let html = fetch_release_page(&config.index_url)?;
    let versions = parse_release_listing(&html, &config.sources);
    if versions.is_empty() {
        return Err(RemoteError::EmptyListing(config.index_url.clone()));
    }
    debug!("{} releases listed", versions.len());
    Ok(versions)
}

/// The release flagged latest, falling back to the first listed entry.
pub fn latest_stable(versions: &[KernelVersion]) -> Option<&KernelVersion> {
    versions
        .iter()
        .find(|v| v.is_latest)
        .or_else(|| versions.first())
}
