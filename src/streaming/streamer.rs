//! Byte-range responses over local or chunked backings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use reelforge_common::{CacheError, StreamError};
use reelforge_store::{ChunkStore, DownloadManifest};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::range::ByteRange;
use super::wait::wait_until;
use crate::config::StreamingConfig;

/// Upper bound on a single read from a local backing.
const READ_CHUNK: u64 = 256 * 1024;

/// How far a local file has been written.
pub trait Progress: Send + Sync {
    /// Bytes currently readable from the start of the file.
    fn available(&self) -> u64;

    /// Final size, when the source announced one.
    fn expected(&self) -> Option<u64>;

    /// No more bytes will arrive.
    fn finished(&self) -> bool;

    /// Why the writer stopped, when it stopped on an error.
    fn failure(&self) -> Option<CacheError> {
        None
    }
}

/// Where the bytes of a response come from.
pub enum StreamSource {
    /// A file on local disk, possibly still being written.
    Local {
        path: PathBuf,
        progress: Arc<dyn Progress>,
    },
    /// A completed upload in the chunk store.
    Chunked {
        store: ChunkStore,
        manifest: Arc<DownloadManifest>,
    },
}

/// Serves single byte ranges with `206 Partial Content`.
#[derive(Debug, Clone)]
pub struct RangeStreamer {
    poll_interval: Duration,
    max_wait: Duration,
    content_type: String,
}

impl RangeStreamer {
    pub fn new(config: &StreamingConfig) -> Self {
        Self::with_timing(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.max_wait_ms),
            config.content_type.clone(),
        )
    }

    pub fn with_timing(
        poll_interval: Duration,
        max_wait: Duration,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            poll_interval,
            max_wait,
            content_type: content_type.into(),
        }
    }

    /// Answer `range_header` from `source`.
    ///
    /// The returned body owns a drop guard on `cancel`: dropping the body
    /// cancels the token, and no further reads or chunk fetches start.
    pub async fn serve(
        &self,
        range_header: Option<&str>,
        source: StreamSource,
        cancel: CancellationToken,
    ) -> Result<Response, StreamError> {
        match source {
            StreamSource::Local { path, progress } => {
                self.serve_local(range_header, path, progress, cancel).await
            }
            StreamSource::Chunked { store, manifest } => {
                self.serve_chunked(range_header, store, manifest, cancel)
            }
        }
    }

    async fn serve_local(
        &self,
        range_header: Option<&str>,
        path: PathBuf,
        progress: Arc<dyn Progress>,
        cancel: CancellationToken,
    ) -> Result<Response, StreamError> {
        let known_total = |p: &dyn Progress| p.expected().or_else(|| p.finished().then(|| p.available()));

        let range = ByteRange::parse(range_header).ok_or_else(|| {
            StreamError::RangeNotSatisfiable {
                total: known_total(progress.as_ref()),
            }
        })?;

        // A suffix needs the final size before it has a start.
        let start = match range.start() {
            Some(start) => start,
            None => {
                let sized = wait_until(self.poll_interval, self.max_wait, || {
                    known_total(progress.as_ref()).is_some()
                })
                .await;
                if let Some(error) = progress.failure() {
                    return Err(StreamError::SourceFailed(error));
                }
                match known_total(progress.as_ref()) {
                    Some(total) if sized => range
                        .resolve(total)
                        .map(|(start, _)| start)
                        .ok_or(StreamError::RangeNotSatisfiable { total: Some(total) })?,
                    _ => return Err(StreamError::RangeNotSatisfiable { total: None }),
                }
            }
        };

        let arrived = wait_until(self.poll_interval, self.max_wait, || {
            progress.available() > start || progress.finished()
        })
        .await;
        if let Some(error) = progress.failure() {
            debug!(path = %path.display(), start, error = %error, "Source failed before range start");
            return Err(StreamError::SourceFailed(error));
        }

        let available = progress.available();
        let total = progress.expected().unwrap_or(available);
        let unsatisfiable = || StreamError::RangeNotSatisfiable {
            total: (total > 0).then_some(total),
        };
        if !arrived || available <= start {
            debug!(path = %path.display(), start, available, "Range start never arrived");
            return Err(unsatisfiable());
        }
        let (start, end) = range.resolve(total).ok_or_else(unsatisfiable)?;

        let mut file = File::open(&path)
            .await
            .map_err(|e| StreamError::BackingUnavailable(format!("{}: {e}", path.display())))?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| StreamError::BackingUnavailable(e.to_string()))?;

        let guard = cancel.clone().drop_guard();
        let (poll_interval, max_wait) = (self.poll_interval, self.max_wait);

        let body = async_stream::stream! {
            let _guard = guard;
            let mut pos = start;

            while pos <= end {
                if cancel.is_cancelled() {
                    break;
                }

                let available = progress.available();
                if available <= pos {
                    if let Some(error) = progress.failure() {
                        yield Err(StreamError::SourceFailed(error));
                        break;
                    }
                    if progress.finished() {
                        yield Err(StreamError::BackingUnavailable(format!(
                            "source ended at {available} bytes, before offset {pos}"
                        )));
                        break;
                    }
                    let grew = wait_until(poll_interval, max_wait, || {
                        progress.available() > pos || progress.finished()
                    })
                    .await;
                    if !grew {
                        warn!(path = %path.display(), pos, "Source stalled, ending response");
                        yield Err(StreamError::BackingUnavailable(format!(
                            "no new bytes at offset {pos} within {max_wait:?}"
                        )));
                        break;
                    }
                    continue;
                }

                let want = (end + 1 - pos).min(available - pos).min(READ_CHUNK) as usize;
                let mut buf = vec![0u8; want];
                match file.read(&mut buf).await {
                    Ok(0) => {
                        yield Err(StreamError::BackingUnavailable(format!(
                            "unexpected end of {} at offset {pos}",
                            path.display()
                        )));
                        break;
                    }
                    Ok(n) => {
                        buf.truncate(n);
                        pos += n as u64;
                        yield Ok(Bytes::from(buf));
                    }
                    Err(e) => {
                        yield Err(StreamError::BackingUnavailable(e.to_string()));
                        break;
                    }
                }
            }
        };

        self.partial(start, end, total, Body::from_stream(body))
    }

    fn serve_chunked(
        &self,
        range_header: Option<&str>,
        store: ChunkStore,
        manifest: Arc<DownloadManifest>,
        cancel: CancellationToken,
    ) -> Result<Response, StreamError> {
        let total = manifest.total_size;
        let (start, end) = ByteRange::parse(range_header)
            .and_then(|r| r.resolve(total))
            .ok_or(StreamError::RangeNotSatisfiable { total: Some(total) })?;

        let mut chunks = store.read_range(manifest, start, end, cancel.clone());
        let guard = cancel.drop_guard();

        let body = async_stream::stream! {
            let _guard = guard;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(data) => yield Ok(data),
                    Err(e) => {
                        warn!(error = %e, "Chunk read failed, ending response");
                        yield Err(StreamError::BackingUnavailable(e.to_string()));
                        break;
                    }
                }
            }
        };

        self.partial(start, end, total, Body::from_stream(body))
    }

    fn partial(&self, start: u64, end: u64, total: u64, body: Body) -> Result<Response, StreamError> {
        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, self.content_type.as_str())
            .header(header::CONTENT_LENGTH, (end - start + 1).to_string())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end, total),
            )
            .header(header::ACCEPT_RANGES, "bytes")
            .body(body)
            .map_err(|e| StreamError::BackingUnavailable(e.to_string()))
    }
}
