//! Reelforge-Store: durable chunked file storage on an opaque blob host.
//!
//! A file is persisted as an ordered sequence of fixed-size chunk blobs plus a
//! [`DownloadManifest`] describing how to reassemble it. Byte ranges are
//! reconstructed on demand by fetching only the chunks that intersect the
//! requested window.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use reelforge_common::SourceKey;
//! use reelforge_store::{ChunkStore, ChunkStoreConfig, FsBlobStore};
//!
//! # async fn demo() -> Result<(), reelforge_common::StoreError> {
//! let store = ChunkStore::new(
//!     Arc::new(FsBlobStore::new("/var/lib/reelforge/blobs")),
//!     ChunkStoreConfig::default(),
//! );
//! let key = SourceKey::new("movie-42/1080p");
//! let manifest = store.put_file(&key, "/tmp/movie.mkv".as_ref()).await?;
//! assert_eq!(store.get_manifest(&key).await?, manifest);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod manifest;
pub mod store;

pub use blob::{BlobStore, FsBlobStore, HttpBlobStore};
pub use manifest::{ChunkRecord, ChunkSpan, DownloadManifest, ManifestChunk, StoreMetadata};
pub use store::{
    ChunkStore, ChunkStoreConfig, ChunkStream, DEFAULT_CHUNK_SIZE, MANIFEST_BLOB, METADATA_BLOB,
};
