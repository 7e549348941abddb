//! titra-server binary.
//!
//! Reads `titra.toml` (or the path given with `--config`), opens the SQLite
//! store, and serves the fulfillment API over HTTP.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use titra_server::ServerConfig;
use titra_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Titra recurring-fulfillment server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "titra.toml")]
  config: PathBuf,
}

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
  let server_cfg = ServerConfig::load(&cli.config)?;

  let store_path = server_cfg.store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = titra_server::build_engine(&server_cfg, store)?;
  if server_cfg.notifications_url.is_none() {
    tracing::info!("no notifications_url configured; notifications will be logged");
  }

  let app = titra_server::router(engine);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
