//! Titra server wiring.
//!
//! Holds the deserialised [`ServerConfig`], the [`HttpBackend`] that binds
//! the engine to SQLite and the HTTP collaborators, and the top-level router.

pub mod collaborators;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use axum::Router;
use serde::Deserialize;
use titra_engine::{Backend, EngineConfig, RecurringFulfillmentProcessor};
use titra_store_sqlite::SqliteStore;
use tower_http::trace::TraceLayer;

use collaborators::{HttpCatalog, HttpOrders, Notifications};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `titra.toml` and
/// `TITRA_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                    String,
  #[serde(default = "default_port")]
  pub port:                    u16,
  pub store_path:              PathBuf,
  pub catalog_url:             String,
  pub orders_url:              String,
  #[serde(default)]
  pub notifications_url:       Option<String>,
  #[serde(default = "default_timeout_ms")]
  pub collaborator_timeout_ms: u64,
  #[serde(default = "default_billing_cycle_days")]
  pub billing_cycle_days:      u32,
}

fn default_host() -> String { "127.0.0.1".into() }

fn default_port() -> u16 { 8080 }

fn default_timeout_ms() -> u64 { EngineConfig::default().collaborator_timeout_ms }

fn default_billing_cycle_days() -> u32 { EngineConfig::default().billing_cycle_days }

impl ServerConfig {
  /// Layer the config file (optional) under `TITRA_*` environment variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TITRA"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn engine(&self) -> EngineConfig {
    EngineConfig {
      collaborator_timeout_ms: self.collaborator_timeout_ms,
      billing_cycle_days:      self.billing_cycle_days,
    }
  }

  /// `store_path` with a leading `~` expanded.
  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
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

// ─── Backend ──────────────────────────────────────────────────────────────────

/// SQLite storage with HTTP collaborators.
pub struct HttpBackend;

impl Backend for HttpBackend {
  type Store = SqliteStore;
  type Catalog = HttpCatalog;
  type Orders = HttpOrders;
  type Notifier = Notifications;
}

pub type Engine = Arc<RecurringFulfillmentProcessor<HttpBackend>>;

/// Build the engine around `store` with collaborators from `cfg`.
pub fn build_engine(cfg: &ServerConfig, store: SqliteStore) -> anyhow::Result<Engine> {
  let engine_cfg = cfg.engine();
  // The engine bounds each call too; this also caps connection setup.
  let client = reqwest::Client::builder()
    .timeout(engine_cfg.collaborator_timeout() + Duration::from_secs(1))
    .build()
    .context("failed to build HTTP client")?;

  let notifier = match &cfg.notifications_url {
    Some(url) => Notifications::Webhook { client: client.clone(), url: url.clone() },
    None => Notifications::Log,
  };

  Ok(Arc::new(RecurringFulfillmentProcessor::new(
    Arc::new(store),
    Arc::new(HttpCatalog::new(client.clone(), cfg.catalog_url.clone())),
    Arc::new(HttpOrders::new(client, cfg.orders_url.clone())),
    Arc::new(notifier),
    engine_cfg,
  )))
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The API router with request tracing.
pub fn router(engine: Engine) -> Router {
  titra_api::api_router(engine).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use config::{Config, File, FileFormat};
  use tower::ServiceExt as _;

  use super::*;

  const MINIMAL: &str = r#"
    store_path  = "~/titra/titra.db"
    catalog_url = "http://catalog.internal"
    orders_url  = "http://orders.internal"
  "#;

  fn parse(toml: &str) -> ServerConfig {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn minimal_config_takes_defaults() {
    let cfg = parse(MINIMAL);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.port, 8080);
    assert!(cfg.notifications_url.is_none());
    assert_eq!(cfg.engine().collaborator_timeout_ms, 10_000);
    assert_eq!(cfg.engine().billing_cycle_days, 30);
  }

  #[test]
  fn engine_settings_are_overridable() {
    let cfg = parse(&format!(
      "{MINIMAL}\ncollaborator_timeout_ms = 2500\nbilling_cycle_days = 28\n\
       notifications_url = \"http://hooks\""
    ));
    assert_eq!(cfg.engine().collaborator_timeout(), Duration::from_millis(2500));
    assert_eq!(cfg.engine().billing_cycle_days, 28);
    assert_eq!(cfg.notifications_url.as_deref(), Some("http://hooks"));
  }

  #[test]
  fn tilde_expands_against_home() {
    let expanded = expand_tilde(Path::new("~/titra/titra.db"));
    match std::env::var("HOME") {
      Ok(home) => assert_eq!(expanded, PathBuf::from(home).join("titra/titra.db")),
      Err(_) => assert_eq!(expanded, PathBuf::from("~/titra/titra.db")),
    }
    assert_eq!(expand_tilde(Path::new("/var/titra.db")), PathBuf::from("/var/titra.db"));
  }

  #[tokio::test]
  async fn router_serves_api_over_sqlite() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let engine = build_engine(&parse(MINIMAL), store).unwrap();

    let req = Request::builder()
      .uri(format!("/prescriptions/{}", uuid::Uuid::new_v4()))
      .body(Body::empty())
      .unwrap();
    let resp = router(engine).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }
}
