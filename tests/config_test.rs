//! Integration tests for configuration loading and the services built from it.

use std::io::Write;

use reelforge::config::{self, Engine, StoreBackend};
use reelforge::services;
use reelforge_resolver::StepConfig;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn custom_pipeline_from_toml() {
    let file = write_config(
        r##"
[server]
port = 9000

[cache]
cache_dir = "/var/cache/reelforge"
persist_to_store = true

[store]
backend = "http"
base_url = "https://blobs.example/v1"
token = "secret"
chunk_size = 1048576

[resolver]
engine = "command"
command = ["curl", "-sL", "{url}"]
link_filter = "hubcloud"

[resolver.bands]
MB = { min = 300.0, max = 800.0 }
GB = { min = 1.0, max = 2.0 }

[[resolver.steps]]
kind = "script_redirect"

[[resolver.steps]]
kind = "click"
element = "#download"
wait_for = "#section2"

[[resolver.steps]]
kind = "select_candidate"
"##,
    );

    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.server.port, 9000);
    assert!(config.cache.persist_to_store);
    assert_eq!(config.store.backend, StoreBackend::Http);
    assert_eq!(config.store.chunk_size, 1_048_576);
    assert_eq!(config.resolver.engine, Engine::Command);
    assert_eq!(config.resolver.steps.len(), 3);
    assert!(matches!(
        &config.resolver.steps[1],
        StepConfig::Click { element, wait_for: Some(w), timeout_secs: 30 }
            if element == "#download" && w == "#section2"
    ));

    let resolver = services::build_resolver(&config.resolver).unwrap();
    assert_eq!(resolver.engine(), "command");
    assert!(services::build_store(&config.store).is_ok());
}

#[test]
fn headless_browser_command_preset() {
    let file = write_config(
        r#"
[resolver]
engine = "command"
command = ["chromium", "--headless", "--disable-gpu", "--virtual-time-budget=10000", "--dump-dom", "{url}"]
navigation_timeout_secs = 60
"#,
    );

    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.resolver.command, reelforge_resolver::HEADLESS_BROWSER_COMMAND);
    let resolver = services::build_resolver(&config.resolver).unwrap();
    assert_eq!(resolver.engine(), "command");
}

#[test]
fn invalid_step_is_rejected_on_load() {
    let file = write_config(
        r#"
[[resolver.steps]]
kind = "script_redirect"
pattern = "var url = 'http[^']*';"
"#,
    );

    let err = config::load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("capture group"));
}

#[test]
fn unknown_step_kind_fails_to_parse() {
    let file = write_config(
        r#"
[[resolver.steps]]
kind = "solve_captcha"
"#,
    );
    assert!(config::load_config(file.path()).is_err());
}

#[test]
fn explicit_path_wins_over_defaults() {
    let file = write_config("[streaming]\nmax_wait_ms = 5000\n");
    let config = config::load_config_or_default(Some(file.path())).unwrap();
    assert_eq!(config.streaming.max_wait_ms, 5000);
    assert_eq!(config.streaming.content_type, "video/mp4");
}
