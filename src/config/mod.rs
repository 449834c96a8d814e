mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./reelforge.toml",
        "~/.config/reelforge/config.toml",
        "/etc/reelforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.cache.cleanup_interval_secs == 0 {
        anyhow::bail!("Cache cleanup interval cannot be 0");
    }

    if config.store.chunk_size == 0 {
        anyhow::bail!("Store chunk size cannot be 0");
    }
    if config.store.backend == StoreBackend::Http && config.store.base_url.is_none() {
        anyhow::bail!("Store backend 'http' requires base_url");
    }

    if config.streaming.poll_interval_ms == 0 {
        anyhow::bail!("Streaming poll interval cannot be 0");
    }
    if config.resolver.poll_interval_ms == 0 {
        anyhow::bail!("Resolver poll interval cannot be 0");
    }

    if config.resolver.engine == Engine::Command && config.resolver.command.is_empty() {
        anyhow::bail!("Resolver engine 'command' requires a command");
    }
    if let Some(unit) = config.resolver.bands.inverted().first() {
        anyhow::bail!("Size band for {} has min greater than max", unit);
    }
    if config.resolver.steps.is_empty() {
        anyhow::bail!("Resolver pipeline has no steps");
    }
    for (i, step) in config.resolver.steps.iter().enumerate() {
        step.compile(i, &config.resolver.bands)
            .with_context(|| format!("Invalid resolver step {}", i))?;
    }

    Ok(())
}
