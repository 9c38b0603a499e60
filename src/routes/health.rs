// src/routes/health.rs
//! Liveness and readiness endpoints.
//!
//! `/health` answers as long as the process is serving HTTP and never touches
//! the database. `/ready` additionally round-trips a query through the store,
//! so orchestrators can hold traffic until PostgreSQL is reachable.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::store::PgStore;

/// JSON response body for both health checks.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Handle `GET /ready`; 503 when the store cannot be reached.
async fn ready(State(store): State<PgStore>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}

/// Create a subrouter containing the `/health` and `/ready` routes.
pub fn router() -> Router<PgStore> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}
