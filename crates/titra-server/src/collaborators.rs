//! HTTP adapters for the catalog, order, and notification services.

use reqwest::{Client, StatusCode};
use titra_core::{
  collaborator::{
    CatalogResolver, CatalogVariant, CollaboratorError, FulfillmentClient, Notifier,
    OrderConfirmation, OrderRequest,
  },
  event::Notification,
  schedule::DoseStage,
};
use tracing::{debug, info, warn};

fn url(base: &str, path: &str) -> String { format!("{}{}", base.trim_end_matches('/'), path) }

fn transport(e: reqwest::Error) -> CollaboratorError { CollaboratorError::Transport(e.to_string()) }

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Resolves stages against `POST {base_url}/resolve`. A 404 means the
/// catalog has no variant for the stage.
#[derive(Clone)]
pub struct HttpCatalog {
  client:   Client,
  base_url: String,
}

impl HttpCatalog {
  pub fn new(client: Client, base_url: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into() }
  }
}

impl CatalogResolver for HttpCatalog {
  async fn resolve_variant(
    &self,
    stage: &DoseStage,
  ) -> Result<Option<CatalogVariant>, CollaboratorError> {
    let resp = self
      .client
      .post(url(&self.base_url, "/resolve"))
      .json(stage)
      .send()
      .await
      .map_err(transport)?;

    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !resp.status().is_success() {
      return Err(CollaboratorError::Rejected(format!("POST /resolve → {}", resp.status())));
    }
    resp.json().await.map(Some).map_err(transport)
  }
}

// ─── Orders ──────────────────────────────────────────────────────────────────

/// Places orders with `POST {base_url}/orders`. The `Idempotency-Key` is the
/// billing event id plus the stage index, so the order service collapses
/// retries of one dispensation but never merges two different stages.
#[derive(Clone)]
pub struct HttpOrders {
  client:   Client,
  base_url: String,
}

impl HttpOrders {
  pub fn new(client: Client, base_url: impl Into<String>) -> Self {
    Self { client, base_url: base_url.into() }
  }
}

impl FulfillmentClient for HttpOrders {
  async fn create_order(
    &self,
    request: &OrderRequest,
  ) -> Result<OrderConfirmation, CollaboratorError> {
    let resp = self
      .client
      .post(url(&self.base_url, "/orders"))
      .header("Idempotency-Key", idempotency_key(request))
      .json(request)
      .send()
      .await
      .map_err(transport)?;

    if !resp.status().is_success() {
      return Err(CollaboratorError::Rejected(format!("POST /orders → {}", resp.status())));
    }
    resp.json().await.map_err(transport)
  }
}

fn idempotency_key(request: &OrderRequest) -> String {
  format!("{}:{}", request.external_event_id, request.stage_index)
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Where lifecycle notifications go.
#[derive(Clone)]
pub enum Notifications {
  /// `POST` each notification as JSON from a background task. Failures are
  /// logged and dropped.
  Webhook { client: Client, url: String },
  /// No endpoint configured: log and drop.
  Log,
}

impl Notifier for Notifications {
  fn notify(&self, notification: Notification) {
    match self {
      Notifications::Log => info!(?notification, "notification"),
      Notifications::Webhook { client, url } => {
        let client = client.clone();
        let url = url.clone();
        tokio::spawn(async move {
          match client.post(&url).json(&notification).send().await {
            Ok(resp) if resp.status().is_success() => debug!(?notification, "notification sent"),
            Ok(resp) => warn!(status = %resp.status(), ?notification, "notification rejected"),
            Err(e) => warn!(error = %e, ?notification, "notification delivery failed"),
          }
        });
      }
    }
  }
}
