use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use fulfil_core::location::LocationDirectory;
use fulfil_storage::Database;

use crate::{fulfillment, product, store, telemetry, warehouse};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    locations: Arc<LocationDirectory>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        Self {
            metrics,
            storage,
            locations: Arc::new(LocationDirectory::new()),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn locations(&self) -> &LocationDirectory {
        &self.locations
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/product", get(product::list).post(product::create))
        .route(
            "/product/:id",
            get(product::fetch).put(product::update).delete(product::remove),
        )
        .route("/store", get(store::list).post(store::create))
        .route(
            "/store/:id",
            get(store::fetch)
                .put(store::update)
                .patch(store::update)
                .delete(store::remove),
        )
        .route("/warehouse", get(warehouse::list).post(warehouse::create))
        .route(
            "/warehouse/:code",
            get(warehouse::fetch).delete(warehouse::archive),
        )
        .route("/warehouse/:code/replacement", post(warehouse::replace))
        .route(
            "/fulfillment",
            get(fulfillment::list_for_product_in_store).post(fulfillment::create),
        )
        .route("/fulfillment/constraints", get(fulfillment::constraints))
        .route("/fulfillment/analytics", get(fulfillment::analytics))
        .route("/fulfillment/store/:id", get(fulfillment::list_for_store))
        .route(
            "/fulfillment/warehouse/:code",
            get(fulfillment::list_for_warehouse),
        )
        .route("/fulfillment/:id", delete(fulfillment::remove))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Builds an `AppState` against a fresh in-memory database.
    pub async fn setup_state() -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        AppState::new(metrics, database)
    }

    /// Sends one request to the router and decodes the JSON body, if any.
    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("handler should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }
}
