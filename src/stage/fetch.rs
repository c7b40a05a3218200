//! Download layer
//!
//! The stager only needs "put the bytes at this URL into this file"; the
//! [`Fetcher`] trait is that seam. [`HttpFetcher`] is the real implementation
//! on top of `ureq`, with an indicatif progress bar.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::output;

/// A resource could not be retrieved.
#[derive(Error, Debug)]
#[error("cannot fetch {url}: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Retrieves a URL into a local file.
pub trait Fetcher {
    /// Write the content at `url` to `dest`, returning the number of bytes.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Blocking HTTP(S) fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let filename = dest
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        let pb = output::spinner(&format!("downloading {}", filename));

        let response = match ureq::get(url).timeout(self.timeout).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                output::progress_fail(pb, "download failed");
                return Err(FetchError::new(url, format!("HTTP status {}", code)));
            }
            Err(e) => {
                output::progress_fail(pb, "download failed");
                return Err(FetchError::new(url, e.to_string()));
            }
        };

        if let Some(len) = response
            .header("content-length")
            .and_then(|s| s.parse().ok())
        {
            output::upgrade_to_bytes(&pb, len);
        }

        let mut file = std::fs::File::create(dest)
            .map_err(|e| FetchError::new(url, format!("cannot create {}: {}", dest.display(), e)))?;

        let mut reader = response.into_reader();
        let mut buffer = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| FetchError::new(url, format!("read error: {}", e)))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .map_err(|e| FetchError::new(url, format!("write error: {}", e)))?;
            total += n as u64;
            pb.set_position(total);
        }

        output::progress_done(pb);
        output::detail(&format!("downloaded {} ({} bytes)", filename, total));
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/git-manpages.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("git-manpages.tar.gz");
        let url = format!("{}/git-manpages.tar.gz", server.uri());

        let written = HttpFetcher::default().fetch(&url, &dest).unwrap();
        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn test_fetch_404_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.tar.gz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/missing.tar.gz", server.uri());
        let err = HttpFetcher::default()
            .fetch(&url, &dir.path().join("missing.tar.gz"))
            .unwrap_err();
        assert_eq!(err.url, url);
        assert!(err.reason.contains("404"));
    }

    #[test]
    fn test_unreachable_host_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HttpFetcher::new(Duration::from_secs(5))
            .fetch("http://127.0.0.1:1/nothing.tar.gz", &dir.path().join("x"))
            .unwrap_err();
        assert!(err.to_string().contains("cannot fetch"));
    }
}
