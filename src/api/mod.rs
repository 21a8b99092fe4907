//! HTTP surface. Handlers only ever see finished snapshots; scraping
//! failures arrive as fallback-tagged data with status 200.

use crate::pipeline::Aggregator;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The aggregation task died before answering.
    #[error("snapshot task failed: {0}")]
    TransportFailure(String),
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        ApiError::TransportFailure(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("{}", self);
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    data: &'a T,
    timestamp: DateTime<Utc>,
}

fn envelope<T: Serialize>(data: &T, max_age: Duration) -> Response {
    let body = Json(Envelope { success: true, data, timestamp: Utc::now() });
    let cache_control = HeaderValue::from_str(&format!("max-age={}", max_age.as_secs()))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));
    ([(header::CACHE_CONTROL, cache_control)], body).into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/market-indices",
            get(market_indices).post(refresh_market_indices).options(preflight),
        )
        .route("/api/commodities", get(commodities).options(preflight))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn market_indices(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let aggregator = Arc::clone(&state.aggregator);
    let snapshot = tokio::spawn(async move { aggregator.get_snapshot().await }).await?;
    Ok(envelope(snapshot.as_ref(), state.aggregator.index_ttl()))
}

async fn refresh_market_indices(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let aggregator = Arc::clone(&state.aggregator);
    let snapshot = tokio::spawn(async move { aggregator.refresh_snapshot().await }).await?;
    Ok(envelope(snapshot.as_ref(), state.aggregator.index_ttl()))
}

async fn commodities(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let aggregator = Arc::clone(&state.aggregator);
    let snapshot = tokio::spawn(async move { aggregator.get_commodities().await }).await?;
    Ok(envelope(snapshot.as_ref(), state.aggregator.commodity_ttl()))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    envelope(&state.aggregator.health(), Duration::ZERO)
}

/// Bare OPTIONS acknowledgement; real preflights are answered by the CORS layer.
async fn preflight() -> StatusCode {
    StatusCode::OK
}
