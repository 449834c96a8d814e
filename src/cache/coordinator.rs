//! One acquisition per source key, shared by every reader.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::response::Response;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use reelforge_common::{CacheError, EntryRef, Error, SourceKey, StreamError};
use reelforge_resolver::LinkResolver;
use reelforge_store::ChunkStore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::download::Downloader;
use super::entry::{Backing, CacheEntry, EntryProgress, EntryStatus, SharedEntry};
use crate::config::Config;
use crate::streaming::{RangeStreamer, StreamSource};

/// A request to make a source playable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub source_key: SourceKey,
    /// Candidate mirror links for the source.
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub cache_dir: PathBuf,
    /// Links must contain this substring; `None` accepts the first link.
    pub link_filter: Option<String>,
    pub persist_to_store: bool,
    pub keep_local: bool,
    pub connect_timeout: Duration,
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_dir: config.cache.cache_dir.clone(),
            link_filter: config.resolver.link_filter.clone(),
            persist_to_store: config.cache.persist_to_store,
            keep_local: config.cache.keep_local,
            connect_timeout: Duration::from_secs(config.cache.connect_timeout_secs),
        }
    }
}

/// Tracks cache entries and drives their acquisition.
#[derive(Clone)]
pub struct CacheCoordinator {
    entries: Arc<DashMap<SourceKey, SharedEntry>>,
    refs: Arc<DashMap<EntryRef, SourceKey>>,
    resolver: Arc<dyn LinkResolver>,
    downloader: Downloader,
    store: ChunkStore,
    streamer: RangeStreamer,
    options: Arc<CoordinatorOptions>,
}

impl CacheCoordinator {
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        store: ChunkStore,
        streamer: RangeStreamer,
        options: CoordinatorOptions,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            entries: Arc::new(DashMap::new()),
            refs: Arc::new(DashMap::new()),
            resolver,
            downloader: Downloader::new(options.connect_timeout)?,
            store,
            streamer,
            options: Arc::new(options),
        })
    }

    /// Local download path for `key`.
    pub fn local_path(&self, key: &SourceKey) -> PathBuf {
        self.options.cache_dir.join(format!("{}.bin", key.digest()))
    }

    /// Return a usable entry for the request, starting acquisition if needed.
    ///
    /// A pending entry is returned as is. A ready entry is re-validated
    /// against its backing. Anything else is replaced by a fresh pending
    /// entry that keeps the old entry reference.
    pub async fn prepare(&self, request: PrepareRequest) -> Result<CacheEntry, CacheError> {
        let key = request.source_key;

        let stale = match self.entries.get(&key).map(|e| e.value().clone()) {
            Some(shared) => {
                let snapshot = shared.read().clone();
                match snapshot.status {
                    EntryStatus::Pending => return Ok(touch(&shared)),
                    EntryStatus::Ready if self.backing_valid(&snapshot).await => {
                        debug!(source_key = %key, "Serving prepared entry");
                        return Ok(touch(&shared));
                    }
                    EntryStatus::Ready => {
                        info!(source_key = %key, "Prepared entry lost its backing, re-acquiring");
                        Some(shared)
                    }
                    EntryStatus::Failed => Some(shared),
                }
            }
            None => None,
        };

        let link = self.choose_link(&request.links).ok_or_else(|| {
            CacheError::SourceUnavailable(format!("no usable link for {key}"))
        })?;

        let fresh = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                // Someone else replaced the entry while we validated it.
                if !stale.as_ref().is_some_and(|s| Arc::ptr_eq(s, slot.get())) {
                    return Ok(touch(slot.get()));
                }
                let entry_ref = slot.get().read().entry_ref;
                let fresh = Arc::new(RwLock::new(CacheEntry::pending(
                    key.clone(),
                    entry_ref,
                    self.local_path(&key),
                )));
                slot.insert(fresh.clone());
                fresh
            }
            Entry::Vacant(slot) => {
                let fresh = Arc::new(RwLock::new(CacheEntry::pending(
                    key.clone(),
                    EntryRef::new(),
                    self.local_path(&key),
                )));
                slot.insert(fresh.clone());
                fresh
            }
        };

        let snapshot = fresh.read().clone();
        self.refs.insert(snapshot.entry_ref, key.clone());
        info!(source_key = %key, entry_ref = %snapshot.entry_ref, link = %link, "Starting acquisition");

        tokio::spawn(self.clone().acquire(fresh, link));
        Ok(snapshot)
    }

    /// Current state of an entry.
    pub fn get(&self, entry_ref: EntryRef) -> Result<CacheEntry, CacheError> {
        Ok(self.lookup(entry_ref)?.read().clone())
    }

    /// Serve `range_header` from the entry's current backing.
    pub async fn stream(
        &self,
        entry_ref: EntryRef,
        range_header: Option<&str>,
        cancel: CancellationToken,
    ) -> reelforge_common::Result<Response> {
        let shared = self.lookup(entry_ref)?;
        let snapshot = touch(&shared);

        if let Some(error) = snapshot.failure() {
            return Err(error.into());
        }

        let source = match snapshot.backing {
            Backing::Local(path) => StreamSource::Local {
                path,
                progress: Arc::new(EntryProgress(shared)),
            },
            Backing::Chunked(manifest) => StreamSource::Chunked {
                store: self.store.clone(),
                manifest,
            },
        };
        self.streamer
            .serve(range_header, source, cancel)
            .await
            .map_err(|e| match e {
                StreamError::SourceFailed(error) => Error::Cache(error),
                other => Error::Stream(other),
            })
    }

    /// Drop entries idle for longer than `max_idle`, removing their local
    /// files. Pending entries are never evicted. Returns the number dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut evicted = Vec::new();

        self.entries.retain(|key, shared| {
            let entry = shared.read();
            let idle = entry.status != EntryStatus::Pending
                && (now - entry.last_accessed_at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > max_idle);
            if idle {
                // Unlinked while the shard lock is held: a prepare for this
                // key cannot start writing the same path until we return.
                let path = self.local_path(key);
                report_removal(&path, std::fs::remove_file(&path));
                evicted.push((entry.source_key.clone(), entry.entry_ref));
            }
            !idle
        });

        for (key, entry_ref) in &evicted {
            self.refs.remove(entry_ref);
            info!(source_key = %key, entry_ref = %entry_ref, "Evicted idle cache entry");
        }

        if !evicted.is_empty() {
            debug!(removed = evicted.len(), "Cleaned up idle cache entries");
        }
        evicted.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, entry_ref: EntryRef) -> Result<SharedEntry, CacheError> {
        let not_found = || CacheError::EntryNotFound(entry_ref.to_string());
        let key = self.refs.get(&entry_ref).ok_or_else(not_found)?.value().clone();
        let shared = self.entries.get(&key).ok_or_else(not_found)?.value().clone();
        Ok(shared)
    }

    fn choose_link(&self, links: &[String]) -> Option<String> {
        match &self.options.link_filter {
            Some(filter) => links.iter().find(|l| l.contains(filter.as_str())),
            None => links.first(),
        }
        .cloned()
    }

    async fn backing_valid(&self, entry: &CacheEntry) -> bool {
        match &entry.backing {
            Backing::Local(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len() > 0)
                .unwrap_or(false),
            Backing::Chunked(_) => self.store.exists(&entry.source_key).await,
        }
    }

    async fn acquire(self, entry: SharedEntry, link: String) {
        let key = entry.read().source_key.clone();
        let path = self.local_path(&key);

        let url = match self.resolver.resolve(&link).await {
            Ok(url) => url,
            Err(e) => {
                fail(&entry, CacheError::SourceUnavailable(e.to_string()));
                return;
            }
        };

        match self.downloader.fetch(&url, &path, &entry).await {
            Ok(size) => {
                entry.write().status = EntryStatus::Ready;
                info!(source_key = %key, bytes = size, path = %path.display(), "Download complete");
            }
            Err(e) => {
                fail(&entry, e);
                return;
            }
        }

        if self.options.persist_to_store {
            self.persist(&entry, &key, &path).await;
        }
    }

    async fn persist(&self, entry: &SharedEntry, key: &SourceKey, path: &Path) {
        match self.store.put_file(key, path).await {
            Ok(manifest) => {
                info!(
                    source_key = %key,
                    chunks = manifest.chunks.len(),
                    bytes = manifest.total_size,
                    "Persisted download to chunk store"
                );
                entry.write().backing = Backing::Chunked(Arc::new(manifest));
                if !self.options.keep_local {
                    remove_local(path).await;
                }
            }
            Err(e) => {
                warn!(source_key = %key, error = %e, "Chunk store upload failed, keeping local copy");
            }
        }
    }
}

fn touch(shared: &SharedEntry) -> CacheEntry {
    let mut entry = shared.write();
    entry.last_accessed_at = Utc::now();
    entry.clone()
}

fn fail(entry: &SharedEntry, error: CacheError) {
    let mut e = entry.write();
    warn!(source_key = %e.source_key, error = %error, "Acquisition failed");
    e.status = EntryStatus::Failed;
    e.error = Some(error);
}

async fn remove_local(path: &Path) {
    report_removal(path, tokio::fs::remove_file(path).await);
}

fn report_removal(path: &Path, result: std::io::Result<()>) {
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove cached file");
        }
    }
}

/// Start a background task that periodically evicts idle entries.
pub fn start_cleanup_task(
    coordinator: CacheCoordinator,
    interval: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            coordinator.evict_idle(max_idle).await;
        }
    })
}
