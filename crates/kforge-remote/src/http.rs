use crate::{ArchiveFetcher, FetchOutcome, RemoteError, TransferProgress, USER_AGENT};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming HTTP download into a temp file beside the destination.
///
/// Only the connection phase is bounded; a multi-hundred-megabyte archive on
/// a slow link is expected to take a while and is stopped through `cancel`.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut dyn FnMut(TransferProgress),
        cancel: &dyn Fn() -> bool,
    ) -> Result<FetchOutcome, RemoteError> {
        debug!("GET {url} -> {}", dest.display());
        let resp = match self.agent.get(url).header("User-Agent", USER_AGENT).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(RemoteError::Http(e.to_string())),
        };

        let total = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

        let mut reader = resp.into_body().into_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;
        progress(TransferProgress { received, total });

        loop {
            if cancel() {
                info!("download of {url} cancelled after {received} bytes");
                return Ok(FetchOutcome::Cancelled);
            }
            let n = reader
                .read(&mut buf)
                .map_err(|e| RemoteError::Http(e.to_string()))?;
            if n == 0 {
                break;
            }
            tmp.write_all(&buf[..n])?;
            received += n as u64;
            progress(TransferProgress { received, total });
        }

        if let Some(expected) = total {
            if received < expected {
                return Err(RemoteError::Http(format!(
                    "transfer truncated: {received} of {expected} bytes from {url}"
                )));
            }
        }

        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| RemoteError::Io(e.error))?;
        debug!("saved {received} bytes to {}", dest.display());
        Ok(FetchOutcome::Completed { bytes: received })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tiny_http::{Response, Server, StatusCode};

    fn serve(payload: Vec<u8>) -> (String, Arc<Server>) {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let srv = Arc::clone(&server);
        std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                let response = if request.url().ends_with(".tar.xz") {
                    Response::from_data(payload.clone())
                } else {
                    Response::from_data(b"no such file".to_vec()).with_status_code(StatusCode(404))
                };
                let _ = request.respond(response);
            }
        });
        (format!("http://127.0.0.1:{port}"), server)
    }

    #[test]
    fn download_reports_progress_and_persists() {
        let payload = vec![7u8; 3 * CHUNK_SIZE + 11];
        let (base, _server) = serve(payload.clone());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/linux-6.12.4.tar.xz");

        let mut reports = Vec::new();
        let outcome = HttpFetcher::new()
            .fetch(
                &format!("{base}/linux-6.12.4.tar.xz"),
                &dest,
                &mut |p| reports.push(p),
                &|| false,
            )
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Completed {
                bytes: payload.len() as u64
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        let last = reports.last().unwrap();
        assert_eq!(last.received, payload.len() as u64);
        assert_eq!(last.total, Some(payload.len() as u64));
        assert_eq!(last.fraction(), Some(1.0));
        assert!(reports.windows(2).all(|w| w[0].received <= w[1].received));
    }

    #[test]
    fn missing_archive_is_not_found() {
        let (base, _server) = serve(Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("linux-9.9.tar.gz");
        let err = HttpFetcher::new()
            .fetch(&format!("{base}/linux-9.9.tar.gz"), &dest, &mut |_| {}, &|| false)
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn cancelled_download_leaves_nothing_behind() {
        let (base, _server) = serve(vec![1u8; 8 * CHUNK_SIZE]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("linux-6.12.4.tar.xz");
        let stop = AtomicBool::new(false);

        let outcome = HttpFetcher::new()
            .fetch(
                &format!("{base}/linux-6.12.4.tar.xz"),
                &dest,
                &mut |p| {
                    if p.received > 0 {
                        stop.store(true, Ordering::SeqCst);
                    }
                },
                &|| stop.load(Ordering::SeqCst),
            )
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unreachable_host_is_http_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HttpFetcher::new()
            .fetch(
                "http://127.0.0.1:1/linux-6.1.tar.xz",
                &dir.path().join("a.tar.xz"),
                &mut |_| {},
                &|| false,
            )
            .unwrap_err();
        assert!(matches!(err, RemoteError::Http(_)));
    }
}
