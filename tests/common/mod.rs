//! Shared test harness for integration tests.
//!
//! [`TestHarness`] wires a [`CacheCoordinator`] to a temp directory, an
//! on-disk chunk store and a [`CountingResolver`] that skips the page hops
//! and hands back a fixed download URL. [`TestHarness::with_server`] also
//! starts Axum on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelforge::cache::{CacheCoordinator, CacheEntry, CoordinatorOptions, EntryStatus};
use reelforge::config::Config;
use reelforge::server::{create_router, AppContext};
use reelforge::streaming::RangeStreamer;
use reelforge_common::{EntryRef, ResolutionError};
use reelforge_resolver::LinkResolver;
use reelforge_store::{ChunkStore, ChunkStoreConfig, FsBlobStore};
use tempfile::TempDir;

/// Mirror link accepted by the default link filter.
pub const MIRROR_LINK: &str = "https://hubcloud.example/drive/abc123";

/// Resolves every link to one URL and counts how often it was asked.
pub struct CountingResolver {
    url: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn returning(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            url: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkResolver for CountingResolver {
    async fn resolve(&self, _link: &str) -> Result<String, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.url.clone().ok_or_else(|| ResolutionError::RedirectNotFound {
            step: 0,
            pattern: "var url".to_string(),
        })
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub coordinator: CacheCoordinator,
    pub resolver: Arc<CountingResolver>,
    pub store: ChunkStore,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new(resolver: CountingResolver) -> Self {
        Self::with_options(resolver, false)
    }

    /// Harness whose downloads are uploaded to the chunk store once complete.
    pub fn persisting(resolver: CountingResolver) -> Self {
        Self::with_options(resolver, true)
    }

    fn with_options(resolver: CountingResolver, persist_to_store: bool) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let resolver = Arc::new(resolver);

        let store = ChunkStore::new(
            Arc::new(FsBlobStore::new(dir.path().join("store"))),
            ChunkStoreConfig {
                chunk_size: 16,
                request_timeout: Duration::from_secs(5),
            },
        );
        let streamer = RangeStreamer::with_timing(
            Duration::from_millis(10),
            Duration::from_millis(300),
            "video/mp4",
        );
        let options = CoordinatorOptions {
            cache_dir: dir.path().join("cache"),
            link_filter: Some("hubcloud".to_string()),
            persist_to_store,
            keep_local: false,
            connect_timeout: Duration::from_secs(5),
        };

        let coordinator = CacheCoordinator::new(resolver.clone(), store.clone(), streamer, options)
            .expect("failed to build coordinator");
        let ctx = AppContext::new(coordinator.clone(), Config::default());

        Self {
            ctx,
            coordinator,
            resolver,
            store,
            dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.ctx.clone())
    }

    /// Start an Axum server on a random port and return the bound address.
    pub async fn serve(&self) -> SocketAddr {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Poll until `done` holds for the entry, or panic after two seconds.
    pub async fn wait_for<F>(&self, entry_ref: EntryRef, done: F) -> CacheEntry
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let entry = self.coordinator.get(entry_ref).expect("entry vanished");
            if done(&entry) {
                return entry;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("entry never reached expected state: {:?}", entry.view());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_status(&self, entry_ref: EntryRef, status: EntryStatus) -> CacheEntry {
        self.wait_for(entry_ref, |e| e.status == status).await
    }
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
