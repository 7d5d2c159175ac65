//! Network access for kforge.
//!
//! Fetches the kernel.org front page and parses its release table, and
//! downloads source archives with a streaming, cancellable transfer behind
//! the `ArchiveFetcher` trait.

pub mod config;
pub mod http;
pub mod releases;

pub use config::{RemoteConfig, DEFAULT_RELEASE_INDEX};
pub use http::HttpFetcher;
pub use releases::{fetch_release_page, fetch_versions, latest_stable};

use std::path::Path;
use thiserror::Error;

/// Sent as `User-Agent` on every request.
pub const USER_AGENT: &str = concat!("kforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no kernel releases found at {0}")]
    EmptyListing(String),
}

/// Bytes received so far and the announced length, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.received as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed { bytes: u64 },
    Cancelled,
}

/// Downloads an archive to a local path.
pub trait ArchiveFetcher: Send + Sync {
    /// Stream `url` into `dest`. `cancel` is polled between chunks; a
    /// cancelled or failed transfer leaves nothing at `dest`.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn FnMut(TransferProgress),
        cancel: &dyn Fn() -> bool,
    ) -> Result<FetchOutcome, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_requires_known_total() {
        let p = TransferProgress {
            received: 50,
            total: Some(200),
        };
        assert_eq!(p.fraction(), Some(0.25));
        let unknown = TransferProgress {
            received: 50,
            total: None,
        };
        assert_eq!(unknown.fraction(), None);
    }

    #[test]
    fn user_agent_names_crate_version() {
        assert!(USER_AGENT.starts_with("kforge/"));
    }
}
