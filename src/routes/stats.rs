use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use tracing::{debug, error};

use crate::models::Metric;
use crate::store::PgStore;

// ---

pub fn router() -> Router<PgStore> {
    // ---
    Router::new()
        .route("/stats", get(list_handler))
        .route("/stats/{stat_type}", get(get_handler))
}

/// `GET /stats` - every aggregated stat currently stored
async fn list_handler(State(store): State<PgStore>) -> impl IntoResponse {
    // ---
    match store.list_stats().await {
        Ok(stats) => {
            debug!("GET /stats - returning {} stats", stats.len());
            (StatusCode::OK, Json(stats)).into_response()
        }
        Err(e) => {
            error!("Failed to list stats: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json("Failed to list stats")).into_response()
        }
    }
}

/// `GET /stats/{stat_type}` - one metric's stat, 404 until first aggregated
async fn get_handler(
    Path(stat_type): Path<String>,
    State(store): State<PgStore>,
) -> impl IntoResponse {
    // ---
    let metric = match stat_type.parse::<Metric>() {
        Ok(metric) => metric,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(e.to_string())).into_response(),
    };

    match store.fetch_stat(metric).await {
        Ok(Some(stat)) => (StatusCode::OK, Json(stat)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(format!("no stats recorded for {metric}")),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to fetch stat {}: {}", metric, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json("Failed to fetch stat")).into_response()
        }
    }
}
