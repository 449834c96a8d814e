use reelforge_resolver::{default_pipeline, SizeBand, SizeBands, StepConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding `<sha256(source_key)>.bin` downloads
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Upload completed downloads into the chunk store
    #[serde(default)]
    pub persist_to_store: bool,

    /// Keep the local file after a successful upload
    #[serde(default)]
    pub keep_local: bool,

    /// Entries untouched for this long are evicted
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Connect timeout for the source download
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}
fn default_idle_ttl() -> u64 {
    6 * 60 * 60
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            persist_to_store: false,
            keep_local: false,
            idle_ttl_secs: default_idle_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Directory tree on local disk
    #[default]
    Fs,
    /// Remote blob host over HTTP
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory for the `fs` backend
    #[serde(default = "default_store_root")]
    pub root: PathBuf,

    /// Base URL for the `http` backend
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token for the `http` backend
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./store")
}
fn default_chunk_size() -> usize {
    reelforge_store::DEFAULT_CHUNK_SIZE
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root: default_store_root(),
            base_url: None,
            token: None,
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// How often to re-check a growing file
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up waiting for bytes after this long
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_poll_interval() -> u64 {
    250
}
fn default_max_wait() -> u64 {
    30_000
}
fn default_content_type() -> String {
    "video/mp4".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_wait_ms: default_max_wait(),
            content_type: default_content_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Plain HTTP with a per-session cookie jar
    #[default]
    Http,
    /// External fetch tool; stdout is the page. Use a headless browser
    /// (see [`reelforge_resolver::HEADLESS_BROWSER_COMMAND`]) for hosts that
    /// build their download section with scripts.
    Command,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub engine: Engine,

    /// argv for the `command` engine; `{url}` is replaced by the page URL.
    ///
    /// The default `wget` only fetches markup. For script-driven pages:
    ///
    /// ```toml
    /// command = ["chromium", "--headless", "--disable-gpu",
    ///            "--virtual-time-budget=10000", "--dump-dom", "{url}"]
    /// ```
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Only links containing this substring are resolved
    #[serde(default = "default_link_filter")]
    pub link_filter: Option<String>,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Delay between re-renders while a step waits for an element
    #[serde(default = "default_resolver_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_pipeline")]
    pub steps: Vec<StepConfig>,

    /// Default size bands for `select_candidate` steps
    #[serde(default = "default_bands")]
    pub bands: SizeBands,
}

fn default_command() -> Vec<String> {
    vec!["wget".to_string(), "-qO-".to_string(), "{url}".to_string()]
}
fn default_user_agent() -> String {
    format!("reelforge/{}", env!("CARGO_PKG_VERSION"))
}
fn default_link_filter() -> Option<String> {
    Some("hubcloud".to_string())
}
fn default_navigation_timeout() -> u64 {
    30
}
fn default_resolver_poll() -> u64 {
    500
}
fn default_bands() -> SizeBands {
    SizeBands {
        mb: Some(SizeBand {
            min: 300.0,
            max: 800.0,
        }),
        gb: None,
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            command: default_command(),
            user_agent: default_user_agent(),
            link_filter: default_link_filter(),
            navigation_timeout_secs: default_navigation_timeout(),
            poll_interval_ms: default_resolver_poll(),
            steps: default_pipeline(),
            bands: default_bands(),
        }
    }
}
