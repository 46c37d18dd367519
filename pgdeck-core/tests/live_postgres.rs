//! End-to-end scenarios against a real Postgres server.
//!
//! Run with: PGDECK_TEST_HOST=localhost PGDECK_TEST_PASSWORD=demo \
//!     cargo test -p pgdeck-core -- --ignored

use std::sync::Arc;

use pgdeck_core::{
    ConnectivityProber, MemoryProfileStore, NewProfile, PoolDefaults, PoolError, PoolManager,
    PoolRegistry, PostgresDriver, ProfileStore,
};
use serde_json::json;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn demo_profile(password: &str) -> NewProfile {
    let port: u16 = env_or("PGDECK_TEST_PORT", "5432")
        .parse()
        .expect("PGDECK_TEST_PORT must be a port number");
    serde_json::from_value(json!({
        "name": "live",
        "host": env_or("PGDECK_TEST_HOST", "localhost"),
        "port": port,
        "database": env_or("PGDECK_TEST_DATABASE", "demo"),
        "username": env_or("PGDECK_TEST_USER", "demo"),
        "password": password,
    }))
    .expect("valid profile")
}

struct Live {
    store: Arc<MemoryProfileStore>,
    manager: PoolManager,
    prober: ConnectivityProber,
}

fn live() -> Live {
    let defaults = PoolDefaults::with_ceiling(20);
    let driver = Arc::new(PostgresDriver);
    let store = Arc::new(MemoryProfileStore::new());
    let registry = Arc::new(PoolRegistry::new(driver.clone(), defaults.clone()));
    Live {
        manager: PoolManager::new(store.clone(), registry),
        prober: ConnectivityProber::new(driver, &defaults),
        store,
    }
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_query_and_stats_on_fresh_profile() {
    let live = live();
    let profile = live
        .store
        .create_profile(demo_profile(&env_or("PGDECK_TEST_PASSWORD", "demo")))
        .await
        .unwrap();

    let tested = live.prober.probe(&profile.target()).await;
    assert!(tested.success, "probe failed: {:?}", tested.details.error);
    assert!(tested.details.server_version.unwrap().contains("PostgreSQL"));

    let result = live
        .manager
        .execute_query(&profile.id, "SELECT 1", &[])
        .await
        .unwrap();
    assert_eq!(result.rows, vec![json!({"?column?": 1}).as_object().unwrap().clone()]);
    assert_eq!(result.row_count, 1);

    let stats = live.manager.get_stats(&profile.id).await.unwrap();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.idle_connections, 1);
    assert_eq!(stats.max_clients, 10);
    assert!(stats.server_uptime_seconds.is_some());

    live.manager.registry().destroy_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_wrong_password_fails_without_registering_pool() {
    let live = live();
    let profile = live
        .store
        .create_profile(demo_profile("definitely-not-the-password"))
        .await
        .unwrap();

    let tested = live.prober.probe(&profile.target()).await;

    assert!(!tested.success);
    let error = tested.details.error.unwrap();
    assert!(error.contains("password authentication failed"), "{error}");
    assert!(live.manager.registry().is_empty().await);
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_query_after_delete_is_not_found() {
    let live = live();
    let profile = live
        .store
        .create_profile(demo_profile(&env_or("PGDECK_TEST_PASSWORD", "demo")))
        .await
        .unwrap();
    live.manager
        .execute_query(&profile.id, "SELECT 1", &[])
        .await
        .unwrap();

    live.store.delete_profile(&profile.id).await.unwrap();
    assert!(live.manager.invalidate(&profile.id).await.unwrap());

    let err = live
        .manager
        .execute_query(&profile.id, "SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::ProfileNotFound { .. }));
}
