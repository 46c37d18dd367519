//! In-process driver for tests
//!
//! Simulates a single Postgres server: it accepts one password, can be made
//! unreachable, and understands the handful of statements the pool manager
//! and prober issue. Every physical connect and every pool open is counted,
//! so tests can assert on leaks and duplicate pools.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

use super::{
    command_tag, ColumnInfo, ConnectTarget, Driver, DriverConnection, DriverPool, PoolObserver,
    StatementOutput,
};
use crate::config::EffectivePoolConfig;
use crate::error::PoolError;

pub const SERVER_VERSION: &str = "PostgreSQL 16.2 (pgdeck in-memory)";
pub const SERVER_UPTIME_SECONDS: f64 = 3600.0;

#[derive(Debug)]
struct ServerState {
    password: RwLock<String>,
    reachable: AtomicBool,
    fail_close: AtomicBool,
    pools_opened: AtomicUsize,
    pools_closed: AtomicUsize,
    connects: AtomicUsize,
    secrets_seen: RwLock<Vec<String>>,
}

/// Fake Postgres server plus driver
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    server: Arc<ServerState>,
}

impl MemoryDriver {
    /// A reachable server that accepts `password` for any user.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            server: Arc::new(ServerState {
                password: RwLock::new(password.into()),
                reachable: AtomicBool::new(true),
                fail_close: AtomicBool::new(false),
                pools_opened: AtomicUsize::new(0),
                pools_closed: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                secrets_seen: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Change the password the server accepts for new connections.
    pub async fn rotate_password(&self, password: impl Into<String>) {
        *self.server.password.write().await = password.into();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.server.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every subsequent pool close report a failure.
    pub fn fail_closes(&self, fail: bool) {
        self.server.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn pools_opened(&self) -> usize {
        self.server.pools_opened.load(Ordering::SeqCst)
    }

    pub fn pools_closed(&self) -> usize {
        self.server.pools_closed.load(Ordering::SeqCst)
    }

    /// Physical connections established across all pools
    pub fn physical_connects(&self) -> usize {
        self.server.connects.load(Ordering::SeqCst)
    }

    /// Secrets presented by successful physical connects, in order
    pub async fn secrets_seen(&self) -> Vec<String> {
        self.server.secrets_seen.read().await.clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn open_pool(
        &self,
        target: &ConnectTarget,
        config: &EffectivePoolConfig,
        observer: Arc<PoolObserver>,
    ) -> Result<Box<dyn DriverPool>, PoolError> {
        // Give racing callers a chance to interleave
        tokio::task::yield_now().await;
        self.server.pools_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryPool {
            server: Arc::clone(&self.server),
            target: target.clone(),
            permits: Arc::new(Semaphore::new(config.max_size as usize)),
            size: Arc::new(AtomicU32::new(0)),
            idle: Arc::new(AtomicU32::new(0)),
            closed: AtomicBool::new(false),
            observer,
        }))
    }
}

struct MemoryPool {
    server: Arc<ServerState>,
    target: ConnectTarget,
    permits: Arc<Semaphore>,
    size: Arc<AtomicU32>,
    idle: Arc<AtomicU32>,
    closed: AtomicBool,
    observer: Arc<PoolObserver>,
}

impl MemoryPool {
    async fn connect(&self) -> Result<(), PoolError> {
        if !self.server.reachable.load(Ordering::SeqCst) {
            return Err(PoolError::connect(format!(
                "connect ECONNREFUSED {}:{}",
                self.target.host, self.target.port
            )));
        }
        if *self.server.password.read().await != self.target.secret {
            return Err(PoolError::connect(format!(
                "password authentication failed for user \"{}\"",
                self.target.username
            )));
        }
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        self.server
            .secrets_seen
            .write()
            .await
            .push(self.target.secret.clone());
        self.size.fetch_add(1, Ordering::SeqCst);
        self.observer.on_connect();
        Ok(())
    }
}

#[async_trait]
impl DriverPool for MemoryPool {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::PoolClosed);
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)?;

        let reused = self
            .idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !reused {
            if let Err(e) = self.connect().await {
                self.observer.on_error(&e);
                return Err(e);
            }
        }

        Ok(Box::new(MemoryConnection {
            idle: Arc::clone(&self.idle),
            _permit: permit,
        }))
    }

    fn size(&self) -> u32 {
        self.size.load(Ordering::SeqCst)
    }

    fn idle(&self) -> u32 {
        self.idle.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        self.server.pools_closed.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(PoolError::connect("terminating connection failed"));
        }
        self.size.store(0, Ordering::SeqCst);
        self.idle.store(0, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConnection {
    idle: Arc<AtomicU32>,
    // Released after `drop` has put the connection back on the idle list
    _permit: OwnedSemaphorePermit,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.idle.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DriverConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementOutput, PoolError> {
        let normalized = sql.trim().trim_end_matches(';').to_ascii_lowercase();

        let single = |name: &str, data_type: &str, value: Value| {
            let mut row = Map::new();
            row.insert(name.to_string(), value);
            StatementOutput {
                rows: vec![row],
                fields: vec![ColumnInfo {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                }],
                row_count: 1,
                command: command_tag(sql),
            }
        };

        if normalized == "select 1" {
            Ok(single("?column?", "INT4", json!(1)))
        } else if normalized == "select $1" {
            let value = params.first().cloned().unwrap_or(Value::Null);
            Ok(single("?column?", "TEXT", value))
        } else if normalized == "select version()" {
            Ok(single("version", "TEXT", json!(SERVER_VERSION)))
        } else if normalized.contains("pg_postmaster_start_time") {
            Ok(single("uptime", "FLOAT8", json!(SERVER_UPTIME_SECONDS)))
        } else if normalized.starts_with("set ") || normalized.starts_with("begin") {
            Ok(StatementOutput {
                command: command_tag(sql),
                ..Default::default()
            })
        } else {
            let near = sql.split_whitespace().next().unwrap_or_default();
            Err(PoolError::query(
                format!("syntax error at or near \"{}\"", near),
                Some("42601".to_string()),
            ))
        }
    }
}
