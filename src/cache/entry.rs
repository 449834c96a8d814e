use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reelforge_common::{CacheError, EntryRef, SourceKey};
use reelforge_store::DownloadManifest;
use serde::{Deserialize, Serialize};

use crate::streaming::Progress;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Acquisition in progress; bytes may already be readable.
    Pending,
    Ready,
    Failed,
}

/// Where an entry's bytes live.
#[derive(Debug, Clone)]
pub enum Backing {
    Local(PathBuf),
    Chunked(Arc<DownloadManifest>),
}

/// One prepared (or preparing) source.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source_key: SourceKey,
    pub entry_ref: EntryRef,
    pub backing: Backing,
    pub status: EntryStatus,
    /// Bytes written so far.
    pub observed_size: u64,
    /// Size announced by the source, if any.
    pub expected_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub error: Option<CacheError>,
}

impl CacheEntry {
    pub(crate) fn pending(source_key: SourceKey, entry_ref: EntryRef, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            source_key,
            entry_ref,
            backing: Backing::Local(path),
            status: EntryStatus::Pending,
            observed_size: 0,
            expected_size: None,
            created_at: now,
            last_accessed_at: now,
            error: None,
        }
    }

    /// The error a failed entry reports to readers.
    pub fn failure(&self) -> Option<CacheError> {
        (self.status == EntryStatus::Failed).then(|| {
            self.error
                .clone()
                .unwrap_or_else(|| CacheError::DownloadFailed("acquisition failed".to_string()))
        })
    }

    pub fn view(&self) -> EntryView {
        let (backing, chunks) = match &self.backing {
            Backing::Local(_) => ("local", None),
            Backing::Chunked(manifest) => ("chunked", Some(manifest.chunks.len())),
        };
        EntryView {
            entry_ref: self.entry_ref,
            source_key: self.source_key.clone(),
            status: self.status,
            backing,
            chunks,
            observed_size: self.observed_size,
            expected_size: self.expected_size,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

/// JSON shape of an entry for API clients.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    pub entry_ref: EntryRef,
    pub source_key: SourceKey,
    pub status: EntryStatus,
    pub backing: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    pub observed_size: u64,
    pub expected_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub(crate) type SharedEntry = Arc<RwLock<CacheEntry>>;

/// Growth of an entry's local file as seen by the streamer.
pub(crate) struct EntryProgress(pub SharedEntry);

impl Progress for EntryProgress {
    fn available(&self) -> u64 {
        self.0.read().observed_size
    }

    fn expected(&self) -> Option<u64> {
        let entry = self.0.read();
        match entry.status {
            EntryStatus::Ready => Some(entry.observed_size),
            _ => entry.expected_size,
        }
    }

    fn finished(&self) -> bool {
        self.0.read().status != EntryStatus::Pending
    }

    fn failure(&self) -> Option<CacheError> {
        self.0.read().failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_entry_view() {
        let entry = CacheEntry::pending(
            SourceKey::new("movie-1"),
            EntryRef::new(),
            PathBuf::from("/tmp/x.bin"),
        );
        let json = serde_json::to_value(entry.view()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["backing"], "local");
        assert_eq!(json["source_key"], "movie-1");
        assert!(json.get("chunks").is_none());
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_progress_reports_growth_and_completion() {
        let shared: SharedEntry = Arc::new(RwLock::new(CacheEntry::pending(
            SourceKey::new("k"),
            EntryRef::new(),
            PathBuf::from("/tmp/k.bin"),
        )));
        let progress = EntryProgress(shared.clone());
        assert_eq!(progress.available(), 0);
        assert!(!progress.finished());

        {
            let mut e = shared.write();
            e.observed_size = 10;
            e.expected_size = Some(20);
        }
        assert_eq!(progress.available(), 10);
        assert_eq!(progress.expected(), Some(20));

        {
            let mut e = shared.write();
            e.observed_size = 20;
            e.status = EntryStatus::Ready;
        }
        assert!(progress.finished());
        assert_eq!(progress.expected(), Some(20));
        assert_eq!(progress.failure(), None);
    }

    #[test]
    fn test_progress_reports_failure() {
        let shared: SharedEntry = Arc::new(RwLock::new(CacheEntry::pending(
            SourceKey::new("k"),
            EntryRef::new(),
            PathBuf::from("/tmp/k.bin"),
        )));
        let progress = EntryProgress(shared.clone());
        assert_eq!(progress.failure(), None);

        {
            let mut e = shared.write();
            e.status = EntryStatus::Failed;
            e.error = Some(CacheError::SourceUnavailable("link expired".into()));
        }
        assert!(progress.finished());
        assert_eq!(
            progress.failure(),
            Some(CacheError::SourceUnavailable("link expired".into()))
        );

        shared.write().error = None;
        assert!(matches!(progress.failure(), Some(CacheError::DownloadFailed(_))));
    }
}
