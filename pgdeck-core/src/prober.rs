//! Connectivity prober - "can these exact credentials connect right now?"
//!
//! Each probe opens its own single-connection pool and closes it before
//! returning. The registry is never consulted, so a failing probe cannot
//! block or poison a profile's live pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{EffectivePoolConfig, PoolDefaults};
use crate::driver::{ConnectTarget, Driver, DriverPool, PoolObserver};
use crate::error::PoolError;

const VERSION_SQL: &str = "SELECT version()";

pub const PROBE_SUCCESS_MESSAGE: &str = "Connection established successfully";
pub const PROBE_FAILURE_MESSAGE: &str = "Connection failed";

/// Outcome of a probe. Failure is a normal value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: TestDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    #[serde(rename = "latency")]
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    fn succeeded(latency: Duration, server_version: String) -> Self {
        Self {
            success: true,
            message: PROBE_SUCCESS_MESSAGE.to_string(),
            timestamp: Utc::now(),
            details: TestDetails {
                latency_ms: latency.as_millis() as u64,
                server_version: Some(server_version),
                error: None,
            },
        }
    }

    fn failed(latency: Duration, error: &PoolError) -> Self {
        Self {
            success: false,
            message: PROBE_FAILURE_MESSAGE.to_string(),
            timestamp: Utc::now(),
            details: TestDetails {
                latency_ms: latency.as_millis() as u64,
                server_version: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Runs throwaway connection tests
pub struct ConnectivityProber {
    driver: Arc<dyn Driver>,
    config: EffectivePoolConfig,
    timeout: Duration,
}

impl ConnectivityProber {
    pub fn new(driver: Arc<dyn Driver>, defaults: &PoolDefaults) -> Self {
        Self {
            driver,
            config: defaults.probe_config(),
            timeout: defaults.probe_timeout,
        }
    }

    /// Probe `target`. Never fails; every failure mode lands in the result.
    pub async fn probe(&self, target: &ConnectTarget) -> TestResult {
        let started = Instant::now();
        let observer = Arc::new(PoolObserver::new(format!("probe:{}", target.host)));

        let pool = match self.driver.open_pool(target, &self.config, observer).await {
            Ok(pool) => pool,
            Err(e) => return self.report(target, TestResult::failed(started.elapsed(), &e)),
        };

        let outcome = match tokio::time::timeout(self.timeout, server_version(pool.as_ref())).await
        {
            Ok(result) => result,
            Err(_) => Err(PoolError::connect(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };
        let latency = started.elapsed();

        if let Err(e) = pool.close().await {
            tracing::warn!(host = %target.host, error = %e, "Failed to close probe pool");
        }

        let result = match outcome {
            Ok(version) => TestResult::succeeded(latency, version),
            Err(e) => TestResult::failed(latency, &e),
        };
        self.report(target, result)
    }

    fn report(&self, target: &ConnectTarget, result: TestResult) -> TestResult {
        if result.success {
            tracing::info!(
                host = %target.host,
                database = %target.database,
                latency_ms = result.details.latency_ms,
                "Connection test succeeded"
            );
        } else {
            tracing::warn!(
                host = %target.host,
                database = %target.database,
                latency_ms = result.details.latency_ms,
                error = result.details.error.as_deref().unwrap_or_default(),
                "Connection test failed"
            );
        }
        result
    }
}

impl std::fmt::Debug for ConnectivityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityProber")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn server_version(pool: &dyn DriverPool) -> Result<String, PoolError> {
    let mut conn = pool.acquire().await?;
    let output = conn.execute(VERSION_SQL, &[]).await?;
    Ok(output
        .rows
        .first()
        .and_then(|row| row.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string())
}
