//! Pool manager - the only path that runs statements on pooled connections
//!
//! Every operation follows acquire, use, release. Release is the drop of the
//! borrowed connection, so it happens on the error path too.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::driver::ColumnInfo;
use crate::error::{PoolError, Result, StoreError};
use crate::profile::{ConnectionProfile, Outcome, PoolOverrides};
use crate::registry::{PoolHandle, PoolRegistry};
use crate::stats::{self, PoolStats};
use crate::store::ProfileStore;

/// Result of one statement run through a pool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub fields: Vec<ColumnInfo>,
    pub row_count: u64,
    pub command: String,
    /// Milliseconds from the start of acquire to the end of execution
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
}

pub struct PoolManager {
    store: Arc<dyn ProfileStore>,
    registry: Arc<PoolRegistry>,
}

impl PoolManager {
    pub fn new(store: Arc<dyn ProfileStore>, registry: Arc<PoolRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    async fn pool_for(
        &self,
        profile_id: &str,
        overrides: Option<&PoolOverrides>,
    ) -> Result<(ConnectionProfile, Arc<PoolHandle>)> {
        let profile = self.store.get_profile(profile_id).await?;
        let pool = self.registry.get_or_create(&profile, overrides).await?;

        // A delete that finished between the read and registration has
        // already run its invalidate, so this pool would never be closed.
        match self.store.get_profile(profile_id).await {
            Ok(_) => Ok((profile, pool)),
            Err(StoreError::NotFound { .. }) => {
                drop(pool);
                self.registry.destroy(profile_id).await?;
                tracing::debug!(connection_id = %profile_id, "Closed pool of deleted profile");
                Err(PoolError::profile_not_found(profile_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run `sql` with positional `params` on the profile's pool.
    pub async fn execute_query(
        &self,
        profile_id: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        self.execute_query_with(profile_id, sql, params, None).await
    }

    /// Like [`execute_query`](Self::execute_query), with pool tuning that
    /// applies only if this call creates the pool.
    pub async fn execute_query_with(
        &self,
        profile_id: &str,
        sql: &str,
        params: &[Value],
        overrides: Option<&PoolOverrides>,
    ) -> Result<QueryResult> {
        let (_, pool) = self.pool_for(profile_id, overrides).await?;

        let started = Instant::now();
        let mut conn = pool.acquire().await?;
        let output = conn.execute(sql, params).await;
        drop(conn);
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let output = output.inspect_err(|e| {
            tracing::debug!(connection_id = %profile_id, error = %e, "Query failed");
        })?;

        tracing::debug!(
            connection_id = %profile_id,
            command = %output.command,
            row_count = output.row_count,
            latency_ms = execution_time_ms,
            "Query executed"
        );

        Ok(QueryResult {
            rows: output.rows,
            fields: output.fields,
            row_count: output.row_count,
            command: output.command,
            execution_time_ms,
        })
    }

    /// Live counts plus a best-effort latency and uptime sample.
    ///
    /// Creates the pool if the profile has none yet. A failed round trip
    /// yields counts only; it is never an error.
    pub async fn get_stats(&self, profile_id: &str) -> Result<PoolStats> {
        let (_, pool) = self.pool_for(profile_id, None).await?;

        let counts = pool.counts();
        let round_trip = match stats::round_trip(&pool).await {
            Ok(rt) => Some(rt),
            Err(e) => {
                tracing::debug!(connection_id = %profile_id, error = %e, "Stats round trip failed");
                None
            }
        };

        Ok(PoolStats::new(counts, round_trip))
    }

    /// Drop the profile's pool so the next operation rebuilds it from the
    /// stored profile. Returns whether a pool existed.
    pub async fn invalidate(&self, profile_id: &str) -> Result<bool> {
        self.registry.destroy(profile_id).await
    }

    /// Record an observed outcome on the profile's status.
    ///
    /// A success also stamps `lastConnected`. An unknown id is
    /// `ProfileNotFound`, reported by the store itself.
    pub async fn record_outcome(&self, profile_id: &str, outcome: Outcome) -> Result<()> {
        let last_connected_at = (outcome == Outcome::Succeeded).then(Utc::now);
        self.store
            .update_status(profile_id, outcome.into(), last_connected_at)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager").finish_non_exhaustive()
    }
}
