//! Health check endpoint

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::http::server::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Live connection pools
    pub pools: usize,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pools: state.registry().len().await,
    })
}

/// Health routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgdeck_core::driver::memory::MemoryDriver;
    use pgdeck_core::{MemoryProfileStore, PoolDefaults};

    #[tokio::test]
    async fn health_returns_ok() {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryProfileStore::new()),
            Arc::new(MemoryDriver::new("demo")),
            PoolDefaults::with_ceiling(20),
        ));
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.pools, 0);
    }
}
