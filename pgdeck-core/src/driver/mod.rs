//! Driver seam between the pool manager and physical connections
//!
//! The registry and prober only ever see these traits. `postgres` is the
//! production implementation on top of sqlx; `memory` is an in-process
//! stand-in for tests.
//!
//! Release is RAII: dropping a [`DriverConnection`] hands it back to the
//! pool it came from, on success and error paths alike.

pub mod postgres;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EffectivePoolConfig;
use crate::error::PoolError;

pub use postgres::PostgresDriver;

/// Everything needed to open a physical connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub secret: String,
    pub tls: bool,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Column descriptor of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Raw output of one statement, before timing is attached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutput {
    pub rows: Vec<Map<String, Value>>,
    pub fields: Vec<ColumnInfo>,
    pub row_count: u64,
    pub command: String,
}

/// Opens pools. Opening must not require a live server.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn open_pool(
        &self,
        target: &ConnectTarget,
        config: &EffectivePoolConfig,
        observer: Arc<PoolObserver>,
    ) -> Result<Box<dyn DriverPool>, PoolError>;
}

/// A live set of physical connections
#[async_trait]
pub trait DriverPool: Send + Sync {
    /// Borrow one connection, connecting if none is idle.
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, PoolError>;

    /// Physical connections currently open (idle + borrowed)
    fn size(&self) -> u32;

    /// Physical connections sitting idle
    fn idle(&self) -> u32;

    /// Drain borrowed connections and close everything.
    async fn close(&self) -> Result<(), PoolError>;
}

/// One borrowed connection
#[async_trait]
pub trait DriverConnection: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementOutput, PoolError>;
}

/// Connect/error observer registered on every pool
#[derive(Debug)]
pub struct PoolObserver {
    pool_id: String,
    connects: AtomicU64,
    errors: AtomicU64,
}

impl PoolObserver {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            connects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = %self.pool_id, "New client connected to pool");
    }

    pub fn on_error(&self, error: &PoolError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = %self.pool_id, error = %error, "Pool error");
    }

    /// Physical connections established over the pool's lifetime
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Command tag reported for a statement: its leading keyword, upper-cased.
pub(crate) fn command_tag(sql: &str) -> String {
    sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tag_takes_leading_keyword() {
        assert_eq!(command_tag("SELECT 1"), "SELECT");
        assert_eq!(command_tag("  insert into t values (1)"), "INSERT");
        assert_eq!(command_tag("(select 1) union (select 2)"), "SELECT");
        assert_eq!(command_tag("vacuum;"), "VACUUM");
        assert_eq!(command_tag(""), "");
    }

    #[test]
    fn target_debug_redacts_secret() {
        let target = ConnectTarget {
            host: "localhost".into(),
            port: 5432,
            database: "demo".into(),
            username: "demo".into(),
            secret: "hunter2".into(),
            tls: false,
        };
        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
