//! Connection profile endpoints
//!
//! CRUD over profiles plus the profile-scoped actions. Handlers own the
//! status convention: they report each pool outcome back to the store.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use pgdeck_core::{
    ConnectionProfile, NewProfile, Outcome, PoolError, PoolStats, ProfilePatch, QueryResult,
    TestResult, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::error::ApiError;
use crate::http::extractors::ProfileId;
use crate::http::response::ApiResponse;
use crate::http::server::AppState;

/// Execute query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Returned by delete and disconnect
#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
}

/// Report an outcome; a profile deleted meanwhile is not an error here.
async fn record(state: &AppState, id: &str, outcome: Outcome) {
    if let Err(e) = state.manager.record_outcome(id, outcome).await {
        tracing::debug!(connection_id = %id, error = %e, "Could not record connection status");
    }
}

/// GET /connections - list all profiles, secrets masked
async fn list_connections(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Vec<ConnectionProfile>>, ApiError> {
    let profiles = state.store.list_profiles().await?;
    Ok(ApiResponse::ok(
        profiles.iter().map(ConnectionProfile::masked).collect(),
    ))
}

/// POST /connections - create a profile
async fn create_connection(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewProfile>, JsonRejection>,
) -> Result<ApiResponse<ConnectionProfile>, ApiError> {
    let Json(req) = body?;
    let profile = state.store.create_profile(req).await?;
    Ok(ApiResponse::created(profile.masked()))
}

/// GET /connections/{id} - fetch one profile
async fn get_connection(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
) -> Result<ApiResponse<ConnectionProfile>, ApiError> {
    let profile = state.store.get_profile(&id).await?;
    Ok(ApiResponse::ok(profile.masked()))
}

/// PUT /connections/{id} - partial update
///
/// When connection or pool fields change, the pool is invalidated both
/// before and after the change is persisted. A request that read the old
/// profile while the update was in flight may have rebuilt the pool from
/// the old credentials; the second invalidation drops it.
async fn update_connection(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
    body: Result<Json<ProfilePatch>, JsonRejection>,
) -> Result<ApiResponse<ConnectionProfile>, ApiError> {
    let Json(patch) = body?;
    state.store.get_profile(&id).await?;
    patch.validate(&id)?;

    let touches_pool = patch.touches_pool();
    if touches_pool {
        state.manager.invalidate(&id).await?;
    }
    let profile = state.store.update_profile(&id, patch).await?;
    if touches_pool {
        // The change is already stored, so a slow drain only warrants a warning
        if let Err(e) = state.manager.invalidate(&id).await {
            tracing::warn!(connection_id = %id, error = %e, "Pool did not close cleanly");
        }
    }
    Ok(ApiResponse::ok(profile.masked()))
}

/// DELETE /connections/{id} - delete, then close the pool
async fn delete_connection(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
) -> Result<ApiResponse<IdResponse>, ApiError> {
    state.store.delete_profile(&id).await?;

    // The profile is gone either way; a slow drain is only worth a warning
    if let Err(e) = state.manager.invalidate(&id).await {
        tracing::warn!(connection_id = %id, error = %e, "Pool did not close cleanly");
    }

    Ok(ApiResponse::ok(IdResponse { id, closed: None }))
}

/// POST /connections/{id}/test - throwaway connectivity probe
async fn test_connection(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
) -> Result<ApiResponse<TestResult>, ApiError> {
    let profile = state.store.get_profile(&id).await?;
    let result = state.prober.probe(&profile.target()).await;

    let outcome = if result.success {
        Outcome::Succeeded
    } else {
        Outcome::Failed
    };
    record(&state, &id, outcome).await;

    Ok(ApiResponse::ok(result))
}

/// POST /connections/{id}/query - run a statement on the profile's pool
async fn execute_query(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<ApiResponse<QueryResult>, ApiError> {
    let Json(req) = body?;
    if req.query.trim().is_empty() {
        return Err(ValidationError::Empty { field: "query" }.into());
    }

    match state.manager.execute_query(&id, &req.query, &req.params).await {
        Ok(result) => {
            record(&state, &id, Outcome::Succeeded).await;
            Ok(ApiResponse::ok(result))
        }
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Failed to execute query");
            if !matches!(e, PoolError::ProfileNotFound { .. } | PoolError::PoolClosed) {
                record(&state, &id, Outcome::Failed).await;
            }
            Err(e.into())
        }
    }
}

/// GET /connections/{id}/stats - live pool statistics
async fn connection_stats(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
) -> Result<ApiResponse<PoolStats>, ApiError> {
    let stats = state.manager.get_stats(&id).await?;
    Ok(ApiResponse::ok(stats))
}

/// POST /connections/{id}/disconnect - close the pool without deleting
async fn disconnect(
    State(state): State<Arc<AppState>>,
    ProfileId(id): ProfileId,
) -> Result<ApiResponse<IdResponse>, ApiError> {
    state.store.get_profile(&id).await?;
    let closed = state.manager.invalidate(&id).await?;
    record(&state, &id, Outcome::Invalidated).await;
    Ok(ApiResponse::ok(IdResponse {
        id,
        closed: Some(closed),
    }))
}

/// Connection routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route(
            "/connections/{id}",
            get(get_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
        .route("/connections/{id}/test", post(test_connection))
        .route("/connections/{id}/query", post(execute_query))
        .route("/connections/{id}/stats", get(connection_stats))
        .route("/connections/{id}/disconnect", post(disconnect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use pgdeck_core::driver::memory::{MemoryDriver, SERVER_VERSION};
    use pgdeck_core::{
        ConnectionStatus, MemoryProfileStore, PoolDefaults, ProfileStore, StoreError,
        MASKED_SECRET,
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::http::server::{build_router, ServerConfig};

    struct TestApp {
        router: Router,
        driver: MemoryDriver,
        state: Arc<AppState>,
    }

    fn app() -> TestApp {
        let driver = MemoryDriver::new("demo");
        let state = Arc::new(AppState::new(
            Arc::new(MemoryProfileStore::new()),
            Arc::new(driver.clone()),
            PoolDefaults::with_ceiling(20),
        ));
        TestApp {
            router: build_router(Arc::clone(&state), &ServerConfig::default()),
            driver,
            state,
        }
    }

    impl TestApp {
        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let request = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn create(&self, password: &str) -> String {
            let (status, body) = self
                .send(
                    "POST",
                    "/connections",
                    Some(json!({
                        "name": "demo",
                        "host": "localhost",
                        "port": 5432,
                        "database": "demo",
                        "username": "demo",
                        "password": password
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["data"]["id"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn test_create_test_query_stats_flow() {
        let app = app();
        let id = app.create("demo").await;

        let (status, body) = app.send("GET", &format!("/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["password"], MASKED_SECRET);
        assert_eq!(body["data"]["status"], "unknown");
        assert_eq!(body["data"]["port"], 5432);

        let (status, body) = app.send("POST", &format!("/connections/{id}/test"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["data"]["details"]["serverVersion"], SERVER_VERSION);

        let (_, body) = app.send("GET", &format!("/connections/{id}"), None).await;
        assert_eq!(body["data"]["status"], "connected");
        assert!(body["data"]["lastConnected"].is_string());

        let (status, body) = app
            .send(
                "POST",
                &format!("/connections/{id}/query"),
                Some(json!({"query": "SELECT 1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows"], json!([{"?column?": 1}]));
        assert_eq!(body["data"]["rowCount"], 1);
        assert_eq!(body["data"]["command"], "SELECT");
        assert!(body["data"]["executionTime"].is_u64());

        let (status, body) = app.send("GET", &format!("/connections/{id}/stats"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["activeConnections"], 0);
        assert_eq!(body["data"]["idleConnections"], 1);
        assert_eq!(body["data"]["maxClients"], 10);

        let (_, body) = app.send("GET", "/health", None).await;
        assert_eq!(body["pools"], 1);
    }

    #[tokio::test]
    async fn test_wrong_password_reports_failure_without_pool() {
        let app = app();
        let id = app.create("wrong").await;

        let (status, body) = app.send("POST", &format!("/connections/{id}/test"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["success"], false);
        assert!(body["data"]["details"]["error"]
            .as_str()
            .unwrap()
            .contains("password authentication failed"));

        assert!(app.state.registry().is_empty().await);
        let (_, body) = app.send("GET", &format!("/connections/{id}"), None).await;
        assert_eq!(body["data"]["status"], "error");
    }

    #[tokio::test]
    async fn test_delete_then_query_is_not_found() {
        let app = app();
        let id = app.create("demo").await;
        app.send(
            "POST",
            &format!("/connections/{id}/query"),
            Some(json!({"query": "SELECT 1"})),
        )
        .await;

        let (status, body) = app.send("DELETE", &format!("/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], id.as_str());
        assert_eq!(app.driver.pools_closed(), 1);

        let (status, body) = app
            .send(
                "POST",
                &format!("/connections/{id}/query"),
                Some(json!({"query": "SELECT 1"})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_password_change_rebuilds_pool() {
        let app = app();
        let id = app.create("demo").await;
        let query = json!({"query": "SELECT 1"});
        app.send("POST", &format!("/connections/{id}/query"), Some(query.clone()))
            .await;

        app.driver.rotate_password("rotated").await;
        let (status, body) = app
            .send(
                "PUT",
                &format!("/connections/{id}"),
                Some(json!({"password": "rotated"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["password"], MASKED_SECRET);

        let (status, _) = app
            .send("POST", &format!("/connections/{id}/query"), Some(query))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.driver.pools_opened(), 2);
        assert_eq!(app.driver.secrets_seen().await, vec!["demo", "rotated"]);
    }

    /// Holds every profile update for `delay` before it is stored
    struct SlowUpdateStore {
        inner: MemoryProfileStore,
        delay: Duration,
    }

    #[async_trait]
    impl ProfileStore for SlowUpdateStore {
        async fn get_profile(&self, id: &str) -> Result<ConnectionProfile, StoreError> {
            self.inner.get_profile(id).await
        }

        async fn list_profiles(&self) -> Result<Vec<ConnectionProfile>, StoreError> {
            self.inner.list_profiles().await
        }

        async fn update_status(
            &self,
            id: &str,
            status: ConnectionStatus,
            last_connected_at: Option<DateTime<Utc>>,
        ) -> Result<(), StoreError> {
            self.inner.update_status(id, status, last_connected_at).await
        }

        async fn create_profile(&self, new: NewProfile) -> Result<ConnectionProfile, StoreError> {
            self.inner.create_profile(new).await
        }

        async fn update_profile(
            &self,
            id: &str,
            patch: ProfilePatch,
        ) -> Result<ConnectionProfile, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.update_profile(id, patch).await
        }

        async fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete_profile(id).await
        }
    }

    #[tokio::test]
    async fn test_query_during_password_update_leaves_no_stale_pool() {
        let driver = MemoryDriver::new("demo");
        let state = Arc::new(AppState::new(
            Arc::new(SlowUpdateStore {
                inner: MemoryProfileStore::new(),
                delay: Duration::from_millis(200),
            }),
            Arc::new(driver.clone()),
            PoolDefaults::with_ceiling(20),
        ));
        let app = TestApp {
            router: build_router(Arc::clone(&state), &ServerConfig::default()),
            driver,
            state,
        };
        let id = app.create("demo").await;
        let query = json!({"query": "SELECT 1"});

        app.driver.rotate_password("rotated").await;
        let update = {
            let router = app.router.clone();
            let request = Request::builder()
                .method("PUT")
                .uri(format!("/connections/{id}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"password": "rotated"}).to_string()))
                .unwrap();
            tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
        };

        // Still reads the old password, so this builds a pool that cannot connect
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (status, _) = app
            .send("POST", &format!("/connections/{id}/query"), Some(query.clone()))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        assert_eq!(update.await.unwrap(), StatusCode::OK);
        assert!(app.state.registry().is_empty().await);

        let (status, _) = app
            .send("POST", &format!("/connections/{id}/query"), Some(query))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.driver.pools_opened(), 2);
        assert_eq!(app.driver.secrets_seen().await, vec!["rotated"]);
    }

    #[tokio::test]
    async fn test_rename_keeps_pool() {
        let app = app();
        let id = app.create("demo").await;
        app.send(
            "POST",
            &format!("/connections/{id}/query"),
            Some(json!({"query": "SELECT 1"})),
        )
        .await;

        let (status, body) = app
            .send(
                "PUT",
                &format!("/connections/{id}"),
                Some(json!({"name": "renamed", "password": MASKED_SECRET})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "renamed");
        assert_eq!(app.driver.pools_closed(), 0);
    }

    #[tokio::test]
    async fn test_update_rejects_status() {
        let app = app();
        let id = app.create("demo").await;

        let (status, body) = app
            .send(
                "PUT",
                &format!("/connections/{id}"),
                Some(json!({"status": "connected"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "status cannot be modified");
    }

    #[tokio::test]
    async fn test_failed_query_sets_error_status() {
        let app = app();
        let id = app.create("demo").await;

        let (status, body) = app
            .send(
                "POST",
                &format!("/connections/{id}/query"),
                Some(json!({"query": "SELEC 1"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["sqlState"], "42601");

        let (_, body) = app.send("GET", &format!("/connections/{id}"), None).await;
        assert_eq!(body["data"]["status"], "error");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_bad_gateway() {
        let app = app();
        let id = app.create("demo").await;
        app.driver.set_reachable(false);

        let (status, body) = app
            .send(
                "POST",
                &format!("/connections/{id}/query"),
                Some(json!({"query": "SELECT 1"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "connect_error");

        // Stats still answer with counts only
        let (status, body) = app.send("GET", &format!("/connections/{id}/stats"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["lastQueryLatencyMs"].is_null());
    }

    #[tokio::test]
    async fn test_disconnect_closes_pool() {
        let app = app();
        let id = app.create("demo").await;
        app.send(
            "POST",
            &format!("/connections/{id}/query"),
            Some(json!({"query": "SELECT 1"})),
        )
        .await;

        let (status, body) = app
            .send("POST", &format!("/connections/{id}/disconnect"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["closed"], true);
        assert!(app.state.registry().is_empty().await);

        let (_, body) = app.send("GET", &format!("/connections/{id}"), None).await;
        assert_eq!(body["data"]["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_create_validation() {
        let app = app();

        let (status, body) = app
            .send(
                "POST",
                "/connections",
                Some(json!({
                    "name": "demo",
                    "host": "",
                    "database": "demo",
                    "username": "demo"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, body) = app
            .send("POST", "/connections", Some(json!({"name": "missing fields"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let app = app();
        let id = app.create("demo").await;

        let (status, _) = app
            .send(
                "POST",
                &format!("/connections/{id}/query"),
                Some(json!({"query": "   "})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.state.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_ids_are_checked() {
        let app = app();

        let (status, _) = app.send("GET", "/connections/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = "00000000-0000-4000-8000-000000000000";
        let (status, _) = app
            .send("GET", &format!("/connections/{unknown}/stats"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_masks_secrets() {
        let app = app();
        app.create("demo").await;
        app.create("other").await;

        let (status, body) = app.send("GET", "/connections", None).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["data"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|p| p["password"] == MASKED_SECRET));
    }
}
