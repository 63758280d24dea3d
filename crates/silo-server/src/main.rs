//! silod — the Silo data pod server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the
//! SQLite store, starts the dispatch worker, and serves the JSON API over
//! HTTP. Environment variables prefixed `SILO_` override file settings
//! (e.g. `SILO_PORT=8080`).

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use serde::Deserialize;
use silo_dispatch::{
  CommandGateway, DispatchConfig, Executors, GlobalValidator, QueueWorker, queue,
};
use silo_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
  #[serde(default = "default_host")]
  host:       String,
  #[serde(default = "default_port")]
  port:       u16,
  store_path: PathBuf,
  #[serde(default)]
  queue:      QueueSettings,
}

#[derive(Debug, Clone, Deserialize)]
struct QueueSettings {
  #[serde(default = "default_family_limit")]
  family_limit:     usize,
  #[serde(default = "default_validator_limit")]
  validator_limit:  usize,
  #[serde(default = "default_max_attempts")]
  max_attempts:     u32,
  #[serde(default = "default_retry_backoff_ms")]
  retry_backoff_ms: u64,
}

impl Default for QueueSettings {
  fn default() -> Self {
    Self {
      family_limit:     default_family_limit(),
      validator_limit:  default_validator_limit(),
      max_attempts:     default_max_attempts(),
      retry_backoff_ms: default_retry_backoff_ms(),
    }
  }
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 7171 }
fn default_family_limit() -> usize { 10 }
fn default_validator_limit() -> usize { 4 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }

#[derive(Parser)]
#[command(author, version, about = "Silo data pod server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("SILO"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .map_err(|e| anyhow::anyhow!("failed to open store at {store_path:?}: {e}"))?;

  // Wire the command pipeline: one queue, one gateway, one worker.
  let (handle, rx) = queue();
  let gateway = CommandGateway::new(store.clone(), handle.clone());
  let validator = GlobalValidator::new(store.clone(), gateway.clone());
  let executors = Executors::new(store.clone());
  let worker = QueueWorker::new(rx, executors, validator, DispatchConfig {
    family_limit:    server_cfg.queue.family_limit,
    validator_limit: server_cfg.queue.validator_limit,
    max_attempts:    server_cfg.queue.max_attempts,
    retry_backoff:   Duration::from_millis(server_cfg.queue.retry_backoff_ms),
  });
  tokio::spawn(worker.run());

  let app = silo_api::api_router(Arc::new(store), Arc::new(gateway))
    .layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
