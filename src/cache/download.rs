use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reelforge_common::CacheError;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::entry::SharedEntry;

/// Streams a resolved URL into a cache file, publishing progress on the
/// entry as each piece lands.
#[derive(Clone)]
pub(crate) struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("reelforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::DownloadFailed(e.to_string()))?;
        Ok(Self { client })
    }

    /// Download `url` to `path`. The partial file is removed on failure.
    pub async fn fetch(&self, url: &str, path: &Path, entry: &SharedEntry) -> Result<u64, CacheError> {
        let result = self.fetch_inner(url, path, entry).await;
        if let Err(e) = &result {
            warn!(url = %url, path = %path.display(), error = %e, "Download failed");
            if let Err(rm) = tokio::fs::remove_file(path).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %rm, "Failed to remove partial download");
                }
            }
        }
        result
    }

    async fn fetch_inner(&self, url: &str, path: &Path, entry: &SharedEntry) -> Result<u64, CacheError> {
        let failed = |e: &dyn std::fmt::Display| CacheError::DownloadFailed(format!("{url}: {e}"));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(&e))?
            .error_for_status()
            .map_err(|e| failed(&e))?;

        let expected = response.content_length();
        entry.write().expected_size = expected;
        debug!(url = %url, expected = ?expected, "Download started");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| failed(&e))?;
        }
        let mut file = File::create(path).await.map_err(|e| failed(&e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| failed(&e))?;
            file.write_all(&chunk).await.map_err(|e| failed(&e))?;
            // Readers go by observed_size, so the bytes must be on disk first.
            file.flush().await.map_err(|e| failed(&e))?;
            written += chunk.len() as u64;
            entry.write().observed_size = written;
        }

        if let Some(expected) = expected {
            if written != expected {
                return Err(failed(&format!(
                    "body ended after {written} of {expected} bytes"
                )));
            }
        }
        Ok(written)
    }
}
