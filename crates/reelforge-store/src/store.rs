//! Chunked durable storage on top of a [`BlobStore`].
//!
//! A file is split into fixed-size chunks, each stored as its own blob under
//! `chunks/{sha256}`. Two well-known blobs describe the result:
//! `manifest.json` (the [`DownloadManifest`]) and `metadata.json`
//! (a [`StoreMetadata`]). Uploads are strictly sequential and never resumed;
//! a failed upload removes the whole container.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reelforge_common::{SourceKey, StoreError};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStore;
use crate::manifest::{ChunkSpan, DownloadManifest, ManifestChunk, StoreMetadata};

/// Blob name of the manifest inside a container.
pub const MANIFEST_BLOB: &str = "manifest.json";

/// Blob name of the metadata record inside a container.
pub const METADATA_BLOB: &str = "metadata.json";

/// Default chunk size (2 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Stream of chunk payloads in sequence order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>;

/// Tunables for [`ChunkStore`].
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Size of every chunk except the last.
    pub chunk_size: usize,
    /// Upper bound for each individual blob call.
    pub request_timeout: Duration,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Durable chunked file storage.
#[derive(Clone)]
pub struct ChunkStore {
    blobs: Arc<dyn BlobStore>,
    config: ChunkStoreConfig,
}

impl ChunkStore {
    pub fn new(blobs: Arc<dyn BlobStore>, config: ChunkStoreConfig) -> Self {
        Self { blobs, config }
    }

    pub fn config(&self) -> &ChunkStoreConfig {
        &self.config
    }

    /// Upload `path` as a sequence of chunks and write its manifest.
    ///
    /// On any failure the container is deleted and [`StoreError::UploadFailed`]
    /// is returned. A retry starts over from the first chunk.
    pub async fn put_file(
        &self,
        key: &SourceKey,
        path: &Path,
    ) -> Result<DownloadManifest, StoreError> {
        let container = key.container_name();
        info!(
            source_key = %key,
            container = %container,
            path = %path.display(),
            chunk_size = self.config.chunk_size,
            "Uploading file to chunk store"
        );

        match self.upload(key, &container, path).await {
            Ok(manifest) => {
                info!(
                    container = %container,
                    chunks = manifest.chunks.len(),
                    total_size = manifest.total_size,
                    "Upload complete"
                );
                Ok(manifest)
            }
            Err(message) => {
                warn!(container = %container, error = %message, "Upload failed, removing container");
                if let Err(e) = self.blobs.delete_container(&container).await {
                    error!(container = %container, error = %e, "Failed to remove partial container");
                }
                Err(StoreError::UploadFailed { container, message })
            }
        }
    }

    async fn upload(
        &self,
        key: &SourceKey,
        container: &str,
        path: &Path,
    ) -> Result<DownloadManifest, String> {
        if self.config.chunk_size == 0 {
            return Err("chunk size must be greater than zero".to_string());
        }

        let mut file = File::open(path)
            .await
            .map_err(|e| format!("open {}: {e}", path.display()))?;

        let mut buf = vec![0u8; self.config.chunk_size];
        let mut chunks: Vec<ManifestChunk> = Vec::new();
        let mut total = 0u64;

        loop {
            let n = read_full(&mut file, &mut buf)
                .await
                .map_err(|e| format!("read {}: {e}", path.display()))?;
            if n == 0 {
                break;
            }

            let data = Bytes::copy_from_slice(&buf[..n]);
            let id = chunk_id(&data);
            let index = chunks.len();
            self.timed(self.blobs.put(container, &chunk_blob_name(&id), data))
                .await
                .map_err(|e| format!("chunk {index}: {e}"))?;

            total += n as u64;
            chunks.push(ManifestChunk { id, offset: total });
            debug!(container = %container, chunk = index, bytes = n, offset = total, "Chunk uploaded");

            if n < buf.len() {
                break;
            }
        }

        let manifest = DownloadManifest {
            source_key: key.clone(),
            chunks,
            total_size: total,
        };

        let manifest_json = serde_json::to_vec(&manifest).map_err(|e| format!("manifest: {e}"))?;
        self.timed(self.blobs.put(container, MANIFEST_BLOB, Bytes::from(manifest_json)))
            .await
            .map_err(|e| format!("manifest: {e}"))?;

        let metadata_json =
            serde_json::to_vec(&manifest.metadata()).map_err(|e| format!("metadata: {e}"))?;
        self.timed(self.blobs.put(container, METADATA_BLOB, Bytes::from(metadata_json)))
            .await
            .map_err(|e| format!("metadata: {e}"))?;

        Ok(manifest)
    }

    /// Fetch and validate the manifest for `key`.
    pub async fn get_manifest(&self, key: &SourceKey) -> Result<DownloadManifest, StoreError> {
        let container = key.container_name();
        let corrupt = |reason: String| StoreError::ManifestCorrupt {
            container: container.clone(),
            reason,
        };

        let (manifest_raw, metadata_raw) = tokio::try_join!(
            self.timed(self.blobs.get(&container, MANIFEST_BLOB)),
            self.timed(self.blobs.get(&container, METADATA_BLOB)),
        )?;

        let manifest_raw = manifest_raw.ok_or_else(|| corrupt("manifest blob missing".into()))?;
        let metadata_raw = metadata_raw.ok_or_else(|| corrupt("metadata blob missing".into()))?;

        let manifest: DownloadManifest = serde_json::from_slice(&manifest_raw)
            .map_err(|e| corrupt(format!("unparsable manifest: {e}")))?;
        let metadata: StoreMetadata = serde_json::from_slice(&metadata_raw)
            .map_err(|e| corrupt(format!("unparsable metadata: {e}")))?;

        manifest.validate().map_err(corrupt)?;
        if !manifest.matches(&metadata) {
            return Err(corrupt(format!(
                "metadata ({} chunks, {} bytes) disagrees with manifest ({} chunks, {} bytes)",
                metadata.chunk_count,
                metadata.total_size,
                manifest.chunks.len(),
                manifest.total_size
            )));
        }
        if manifest.source_key != *key {
            return Err(corrupt(format!(
                "manifest belongs to {}",
                manifest.source_key
            )));
        }

        Ok(manifest)
    }

    /// Whether a valid manifest exists for `key`.
    pub async fn exists(&self, key: &SourceKey) -> bool {
        match self.get_manifest(key).await {
            Ok(_) => true,
            Err(e) => {
                debug!(source_key = %key, error = %e, "No usable manifest");
                false
            }
        }
    }

    /// Remove everything stored for `key`.
    pub async fn delete(&self, key: &SourceKey) -> Result<(), StoreError> {
        self.blobs.delete_container(&key.container_name()).await
    }

    /// Untrimmed chunks intersecting `[first, last]` for `key`.
    pub async fn stream_range(
        &self,
        key: &SourceKey,
        first: u64,
        last: u64,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, StoreError> {
        let manifest = Arc::new(self.get_manifest(key).await?);
        Ok(self.stream_manifest_range(manifest, first, last, cancel))
    }

    /// Untrimmed chunks intersecting `[first, last]`, in sequence order.
    ///
    /// Chunks entirely before `first` are never fetched. Once `cancel` fires
    /// no further fetch is started.
    pub fn stream_manifest_range(
        &self,
        manifest: Arc<DownloadManifest>,
        first: u64,
        last: u64,
        cancel: CancellationToken,
    ) -> ChunkStream {
        self.chunk_stream(&manifest, first, last, cancel, false)
    }

    /// Exactly the bytes of `[first, last]`, trimming the boundary chunks.
    pub fn read_range(
        &self,
        manifest: Arc<DownloadManifest>,
        first: u64,
        last: u64,
        cancel: CancellationToken,
    ) -> ChunkStream {
        self.chunk_stream(&manifest, first, last, cancel, true)
    }

    fn chunk_stream(
        &self,
        manifest: &DownloadManifest,
        first: u64,
        last: u64,
        cancel: CancellationToken,
        trim: bool,
    ) -> ChunkStream {
        let store = self.clone();
        let container = manifest.source_key.container_name();
        let spans = manifest.spans(first, last);

        Box::pin(async_stream::stream! {
            for span in spans {
                if cancel.is_cancelled() {
                    debug!(container = %container, chunk = span.index, "Reader detached, stopping chunk fetches");
                    break;
                }

                match store.fetch_chunk(&container, &span).await {
                    Ok(data) if trim => {
                        let lo = first.saturating_sub(span.start) as usize;
                        let hi = ((last + 1).min(span.end) - span.start) as usize;
                        yield Ok(data.slice(lo..hi));
                    }
                    Ok(data) => yield Ok(data),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    async fn fetch_chunk(&self, container: &str, span: &ChunkSpan) -> Result<Bytes, StoreError> {
        let data = self
            .timed(self.blobs.get(container, &chunk_blob_name(&span.id)))
            .await?
            .ok_or_else(|| StoreError::ChunkMissing {
                container: container.to_string(),
                chunk_id: span.id.clone(),
            })?;

        let expected = span.end - span.start;
        if data.len() as u64 != expected {
            return Err(StoreError::backend(format!(
                "chunk {} in {container} has {} bytes, expected {expected}",
                span.id,
                data.len()
            )));
        }
        if chunk_id(&data) != span.id {
            return Err(StoreError::backend(format!(
                "chunk {} in {container} failed digest check",
                span.id
            )));
        }
        Ok(data)
    }

    /// Reassemble the whole file for `key` into `out`. Returns the byte count.
    pub async fn download_to(&self, key: &SourceKey, out: &Path) -> Result<u64, StoreError> {
        let manifest = Arc::new(self.get_manifest(key).await?);
        let io_err = |e: std::io::Error| StoreError::backend(format!("write {}: {e}", out.display()));

        let total = manifest.total_size;
        let mut file = File::create(out).await.map_err(io_err)?;
        if total > 0 {
            let mut stream =
                self.read_range(manifest, 0, total - 1, CancellationToken::new());
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await.map_err(io_err)?;
            }
        }
        file.flush().await.map_err(io_err)?;

        info!(source_key = %key, path = %out.display(), "Reassembled file from chunk store");
        Ok(total)
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::backend(format!(
                "blob request timed out after {:?}",
                self.config.request_timeout
            ))),
        }
    }
}

fn chunk_blob_name(id: &str) -> String {
    format!("chunks/{id}")
}

fn chunk_id(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
