//! Construction of the runtime components from configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reelforge_resolver::{
    CommandRenderer, HttpRenderer, Renderer, ResolverOptions, SourceResolver,
};
use reelforge_store::{BlobStore, ChunkStore, ChunkStoreConfig, FsBlobStore, HttpBlobStore};

use crate::cache::{CacheCoordinator, CoordinatorOptions};
use crate::config::{Config, Engine, ResolverConfig, StoreBackend, StoreConfig};
use crate::streaming::RangeStreamer;

pub fn build_renderer(config: &ResolverConfig) -> Result<Arc<dyn Renderer>> {
    let timeout = Duration::from_secs(config.navigation_timeout_secs);
    Ok(match config.engine {
        Engine::Http => Arc::new(HttpRenderer::new(&config.user_agent, timeout)),
        Engine::Command => Arc::new(
            CommandRenderer::new(&config.command, timeout)
                .map_err(anyhow::Error::msg)
                .context("Invalid resolver command")?,
        ),
    })
}

pub fn build_resolver(config: &ResolverConfig) -> Result<SourceResolver> {
    let options = ResolverOptions {
        navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
    };
    let resolver =
        SourceResolver::from_config(build_renderer(config)?, &config.steps, &config.bands, options)
            .context("Invalid resolver pipeline")?;
    tracing::debug!(
        engine = resolver.engine(),
        steps = resolver.steps().len(),
        "Resolver ready"
    );
    Ok(resolver)
}

pub fn build_store(config: &StoreConfig) -> Result<ChunkStore> {
    let blobs: Arc<dyn BlobStore> = match config.backend {
        StoreBackend::Fs => Arc::new(FsBlobStore::new(
            shellexpand::tilde(&config.root.to_string_lossy()).into_owned(),
        )),
        StoreBackend::Http => {
            let base_url = config
                .base_url
                .as_deref()
                .context("Store backend 'http' requires base_url")?;
            Arc::new(HttpBlobStore::new(base_url, config.token.clone())?)
        }
    };
    Ok(ChunkStore::new(
        blobs,
        ChunkStoreConfig {
            chunk_size: config.chunk_size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        },
    ))
}

pub fn build_coordinator(config: &Config) -> Result<CacheCoordinator> {
    let resolver = Arc::new(build_resolver(&config.resolver)?);
    let store = build_store(&config.store)?;
    let mut options = CoordinatorOptions::from_config(config);
    options.cache_dir =
        PathBuf::from(shellexpand::tilde(&options.cache_dir.to_string_lossy()).into_owned());

    CacheCoordinator::new(
        resolver,
        store,
        RangeStreamer::new(&config.streaming),
        options,
    )
    .context("Failed to create cache coordinator")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_resolver() {
        let resolver = build_resolver(&ResolverConfig::default()).unwrap();
        assert_eq!(resolver.engine(), "http");
        assert_eq!(resolver.steps().len(), 3);
    }

    #[test]
    fn test_build_command_renderer() {
        let config = ResolverConfig {
            engine: Engine::Command,
            ..Default::default()
        };
        assert_eq!(build_renderer(&config).unwrap().name(), "command");

        let empty = ResolverConfig {
            engine: Engine::Command,
            command: vec![],
            ..Default::default()
        };
        assert!(build_renderer(&empty).is_err());
    }

    #[test]
    fn test_build_http_store_requires_url() {
        let config = StoreConfig {
            backend: StoreBackend::Http,
            ..Default::default()
        };
        assert!(build_store(&config).is_err());
    }

    #[tokio::test]
    async fn test_build_coordinator_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.cache_dir = dir.path().join("cache");
        config.store.root = dir.path().join("store");
        let coordinator = build_coordinator(&config).unwrap();
        assert!(coordinator.is_empty());
    }
}
