mod cli;

use reelforge::{config, server, services};
use reelforge_common::SourceKey;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting reelforge server");
    tracing::info!(
        cache_dir = %config.cache.cache_dir.display(),
        store = ?config.store.backend,
        engine = ?config.resolver.engine,
        persist = config.cache.persist_to_store,
        "Cache configuration"
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,reelforge_resolver=trace,reelforge_store=trace,tower_http=debug"
                .to_string()
        } else {
            "reelforge=debug,reelforge_resolver=info,reelforge_store=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Resolve { link } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(resolve_link(&link, cli.config.as_deref()))
        }
        Commands::Upload { source_key, file } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(upload_file(&source_key, &file, cli.config.as_deref()))
        }
        Commands::Fetch { source_key, out } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(fetch_file(&source_key, &out, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn resolve_link(link: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let resolver = services::build_resolver(&config.resolver)?;

    tracing::info!(link = %link, engine = resolver.engine(), "Resolving link");
    let url = resolver
        .resolve(link)
        .await
        .with_context(|| format!("Failed to resolve {link}"))?;

    println!("{}", url);
    Ok(())
}

async fn upload_file(source_key: &str, file: &Path, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Input file does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let store = services::build_store(&config.store)?;
    let key = SourceKey::new(source_key);

    let manifest = store
        .put_file(&key, file)
        .await
        .with_context(|| format!("Failed to upload {:?}", file))?;

    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

async fn fetch_file(source_key: &str, out: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = services::build_store(&config.store)?;
    let key = SourceKey::new(source_key);

    let bytes = store
        .download_to(&key, out)
        .await
        .with_context(|| format!("Failed to fetch {}", key))?;

    println!("Wrote {} bytes to {}", bytes, out.display());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Cache dir: {}", config.cache.cache_dir.display());
    println!("  Store backend: {:?}", config.store.backend);
    println!("  Chunk size: {} bytes", config.store.chunk_size);
    println!("  Resolver engine: {:?}", config.resolver.engine);
    println!("  Resolver steps: {}", config.resolver.steps.len());
    for (i, step) in config.resolver.steps.iter().enumerate() {
        println!("    {}. {:?}", i + 1, step);
    }

    Ok(())
}
