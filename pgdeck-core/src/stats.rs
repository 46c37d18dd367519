//! Pool statistics, computed per request and never cached

use std::time::Instant;

use serde::Serialize;

use crate::error::PoolError;
use crate::registry::PoolHandle;

pub(crate) const LATENCY_SQL: &str = "SELECT 1";
pub(crate) const UPTIME_SQL: &str =
    "SELECT extract(epoch from now() - pg_postmaster_start_time())::float8 AS uptime";

/// Connection counts read from a live pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCounts {
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
}

/// Statistics for one profile's pool.
///
/// Latency and uptime are absent when the round trip to the server failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub waiting_clients: u32,
    pub max_clients: u32,
    pub last_query_latency_ms: Option<u64>,
    pub server_uptime_seconds: Option<f64>,
}

impl PoolStats {
    pub(crate) fn new(counts: PoolCounts, round_trip: Option<RoundTrip>) -> Self {
        Self {
            active_connections: counts.active,
            idle_connections: counts.idle,
            waiting_clients: counts.waiting,
            max_clients: counts.max,
            last_query_latency_ms: round_trip.map(|rt| rt.latency_ms),
            server_uptime_seconds: round_trip.and_then(|rt| rt.uptime_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RoundTrip {
    latency_ms: u64,
    uptime_seconds: Option<f64>,
}

/// One trivial query for latency, then server uptime, on a single borrowed
/// connection. The connection is released before returning either way.
pub(crate) async fn round_trip(pool: &PoolHandle) -> Result<RoundTrip, PoolError> {
    let mut conn = pool.acquire().await?;

    let started = Instant::now();
    conn.execute(LATENCY_SQL, &[]).await?;
    let latency_ms = started.elapsed().as_millis() as u64;

    // Uptime needs pg_postmaster_start_time; treat a refusal as unknown
    let uptime_seconds = match conn.execute(UPTIME_SQL, &[]).await {
        Ok(output) => output
            .rows
            .first()
            .and_then(|row| row.get("uptime"))
            .and_then(|v| v.as_f64()),
        Err(e) => {
            tracing::debug!(connection_id = %pool.profile_id(), error = %e, "Uptime query failed");
            None
        }
    };

    Ok(RoundTrip {
        latency_ms,
        uptime_seconds,
    })
}
