//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use titra_core::{
  collaborator::{
    CatalogResolver, CatalogVariant, CollaboratorError, FulfillmentClient, Notifier,
    OrderConfirmation, OrderRequest,
  },
  event::Notification,
  schedule::DoseStage,
};
use titra_engine::{Backend, EngineConfig, RecurringFulfillmentProcessor};
use titra_store_sqlite::SqliteStore;
use tower::ServiceExt as _;
use uuid::Uuid;

use crate::api_router;

// ─── Fixtures ────────────────────────────────────────────────────────────────

struct EchoCatalog;

impl CatalogResolver for EchoCatalog {
  async fn resolve_variant(
    &self,
    stage: &DoseStage,
  ) -> Result<Option<CatalogVariant>, CollaboratorError> {
    Ok(Some(CatalogVariant {
      catalog_variant_id: stage.catalog_variant_id.clone(),
      price_id:           stage.price_id.clone(),
    }))
  }
}

#[derive(Default)]
struct StubOrders {
  down: AtomicBool,
}

impl FulfillmentClient for StubOrders {
  async fn create_order(
    &self,
    request: &OrderRequest,
  ) -> Result<OrderConfirmation, CollaboratorError> {
    if self.down.load(Ordering::SeqCst) {
      return Err(CollaboratorError::Transport("503 from orders".into()));
    }
    Ok(OrderConfirmation {
      order_ref: format!("ord_{}", request.external_event_id),
    })
  }
}

struct Silent;

impl Notifier for Silent {
  fn notify(&self, _notification: Notification) {}
}

struct TestBackend;

impl Backend for TestBackend {
  type Store = SqliteStore;
  type Catalog = EchoCatalog;
  type Orders = StubOrders;
  type Notifier = Silent;
}

async fn app() -> (Router, Arc<StubOrders>) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let orders = Arc::new(StubOrders::default());
  let engine = RecurringFulfillmentProcessor::<TestBackend>::new(
    Arc::new(store),
    Arc::new(EchoCatalog),
    orders.clone(),
    Arc::new(Silent),
    EngineConfig::default(),
  );
  (api_router(Arc::new(engine)), orders)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let builder = Request::builder().method(method).uri(uri);
  let req = match body {
    Some(body) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };
  let resp = app.clone().oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
  let value = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, value)
}

fn stage(index: u32, dose_label: &str) -> Value {
  json!({
    "stage_index": index,
    "dose_label": dose_label,
    "catalog_variant_id": format!("var_{index}"),
    "price_id": format!("price_{index}"),
  })
}

fn new_prescription(patient_id: Uuid, refills: u32) -> Value {
  json!({
    "patient_id": patient_id,
    "prescriber_id": Uuid::new_v4(),
    "dose_schedule": [stage(0, "0.25 mg"), stage(1, "0.5 mg"), stage(2, "1 mg")],
    "refills_remaining": refills,
    "start_date": "2026-01-05",
  })
}

fn terms() -> Value {
  json!({ "external_customer_ref": "cus_123", "first_charge_date": "2026-02-05" })
}

fn billing_event(event_id: &str, prescription_id: &str, event_type: &str) -> Value {
  json!({
    "external_event_id": event_id,
    "prescription_id": prescription_id,
    "event_type": event_type,
  })
}

fn renewal(event_id: &str, prescription_id: &str) -> Value {
  billing_event(event_id, prescription_id, "renewal")
}

/// Create and activate a prescription; returns its id.
async fn activate(app: &Router) -> String {
  let (status, body) =
    call(app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 2))).await;
  assert_eq!(status, StatusCode::CREATED);
  let id = body["id"].as_str().unwrap().to_owned();

  let (status, _) =
    call(app, "POST", &format!("/prescriptions/{id}/payment-authorized"), None).await;
  assert_eq!(status, StatusCode::OK);
  let (status, body) =
    call(app, "POST", &format!("/prescriptions/{id}/signature"), Some(terms())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["prescription"]["status"], "active");
  assert_eq!(body["subscription"]["status"], "active");
  id
}

// ─── Prescriptions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_prescription() {
  let (app, _) = app().await;
  let (status, created) =
    call(&app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 2))).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["status"], "pending_payment");

  let id = created["id"].as_str().unwrap();
  let (status, fetched) = call(&app, "GET", &format!("/prescriptions/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fetched["refills_remaining"], 2);
  assert_eq!(fetched["dose_schedule"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_prescription_is_404_with_error_body() {
  let (app, _) = app().await;
  let (status, body) = call(&app, "GET", &format!("/prescriptions/{}", Uuid::new_v4()), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn list_filters_by_patient() {
  let (app, _) = app().await;
  let patient = Uuid::new_v4();
  call(&app, "POST", "/prescriptions", Some(new_prescription(patient, 1))).await;
  call(&app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 1))).await;

  let (status, body) =
    call(&app, "GET", &format!("/prescriptions?patient_id={patient}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 1);

  let (_, all) = call(&app, "GET", "/prescriptions", None).await;
  assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn too_many_refills_is_unprocessable() {
  let (app, _) = app().await;
  let (status, _) =
    call(&app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 7))).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn signature_before_payment_conflicts() {
  let (app, _) = app().await;
  let (_, created) =
    call(&app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 2))).await;
  let id = created["id"].as_str().unwrap();

  let (status, _) =
    call(&app, "POST", &format!("/prescriptions/{id}/signature"), Some(terms())).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

// ─── Billing events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn initial_event_before_signature_is_retryable() {
  let (app, _) = app().await;
  let (_, created) =
    call(&app, "POST", "/prescriptions", Some(new_prescription(Uuid::new_v4(), 2))).await;
  let id = created["id"].as_str().unwrap().to_owned();
  call(&app, "POST", &format!("/prescriptions/{id}/payment-authorized"), None).await;

  let initial = billing_event("evt_first", &id, "initial");
  let (status, body) = call(&app, "POST", "/billing-events", Some(initial.clone())).await;
  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert!(body["error"].as_str().unwrap().contains("pending_signature"));
  let (_, history) = call(&app, "GET", &format!("/prescriptions/{id}/fulfillments"), None).await;
  assert!(history.as_array().unwrap().is_empty());

  let (status, _) =
    call(&app, "POST", &format!("/prescriptions/{id}/signature"), Some(terms())).await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = call(&app, "POST", "/billing-events", Some(initial)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["outcome"], "dispensed");
  assert_eq!(body["entry"]["stage_index_dispensed"], 0);
  assert_eq!(body["refills_remaining"], 2);
}

#[tokio::test]
async fn renewal_dispenses_and_redelivery_replays() {
  let (app, _) = app().await;
  let id = activate(&app).await;

  let (status, body) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["outcome"], "dispensed");
  assert_eq!(body["entry"]["stage_index_dispensed"], 1);
  assert_eq!(body["refills_remaining"], 1);

  let (status, body) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["outcome"], "already_processed");
  assert_eq!(body["entry"]["order_ref"], "ord_evt_a");

  let (_, history) = call(&app, "GET", &format!("/prescriptions/{id}/fulfillments"), None).await;
  assert_eq!(history.as_array().unwrap().len(), 1);

  let (_, dose) = call(&app, "GET", &format!("/prescriptions/{id}/dose"), None).await;
  assert_eq!(dose["next_renewal_stage"]["stage_index"], 2);
}

#[tokio::test]
async fn order_outage_is_503_for_redelivery() {
  let (app, orders) = app().await;
  let id = activate(&app).await;
  orders.down.store(true, Ordering::SeqCst);

  let (status, body) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert!(body["error"].as_str().unwrap().contains("external fulfillment"));

  orders.down.store(false, Ordering::SeqCst);
  let (status, _) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn empty_event_id_is_rejected() {
  let (app, _) = app().await;
  let id = activate(&app).await;
  let (status, _) = call(&app, "POST", "/billing-events", Some(renewal("  ", &id))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancellation_event_closes_prescription() {
  let (app, _) = app().await;
  let id = activate(&app).await;
  let event = json!({
    "external_event_id": "evt_cancel",
    "prescription_id": id,
    "event_type": "cancellation",
  });

  let (status, body) = call(&app, "POST", "/billing-events", Some(event.clone())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["outcome"], "cancelled");
  assert_eq!(body["prescription_status"], "cancelled");

  let (_, body) = call(&app, "POST", "/billing-events", Some(event)).await;
  assert_eq!(body["outcome"], "no_change");

  let (status, _) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

// ─── Subscriptions and replacement ───────────────────────────────────────────

#[tokio::test]
async fn paused_subscription_blocks_renewal() {
  let (app, _) = app().await;
  let id = activate(&app).await;

  let (status, sub) =
    call(&app, "POST", &format!("/prescriptions/{id}/subscription/pause"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(sub["status"], "paused");

  let (status, _) = call(&app, "POST", "/billing-events", Some(renewal("evt_a", &id))).await;
  assert_eq!(status, StatusCode::CONFLICT);

  let (status, sub) =
    call(&app, "POST", &format!("/prescriptions/{id}/subscription/resume"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(sub["status"], "active");
}

#[tokio::test]
async fn replace_returns_both_prescriptions() {
  let (app, _) = app().await;
  let id = activate(&app).await;

  let (status, body) = call(
    &app,
    "POST",
    &format!("/prescriptions/{id}/replace"),
    Some(new_prescription(Uuid::new_v4(), 1)),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body["replaced"]["status"], "replaced");
  assert_eq!(body["successor"]["replaces"], id.as_str());
  assert_eq!(body["replaced"]["replaced_by"], body["successor"]["id"]);

  let (_, sub) = call(&app, "GET", &format!("/prescriptions/{id}/subscription"), None).await;
  assert_eq!(sub["status"], "cancelled");
}

#[tokio::test]
async fn cancel_with_reason() {
  let (app, _) = app().await;
  let id = activate(&app).await;

  let (status, body) = call(
    &app,
    "POST",
    &format!("/prescriptions/{id}/cancel"),
    Some(json!({ "reason": "patient request" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "cancelled");
  assert!(body["end_date"].is_string());
}
