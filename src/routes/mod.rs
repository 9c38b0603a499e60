use axum::Router;

use crate::store::PgStore;

mod health;
mod stats;

// ---

pub fn router(store: PgStore) -> Router {
    // ---
    Router::new()
        .merge(stats::router())
        .merge(health::router())
        .with_state(store)
}
