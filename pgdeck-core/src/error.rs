/// Structured error types for pgdeck-core.
///
/// Every failure the pool subsystem can produce is one of a closed set of
/// variants. The core never logs-and-swallows: callers decide how an error
/// maps to a profile status and an HTTP response.
use std::time::Duration;

use thiserror::Error;

use crate::validation::ValidationError;

/// Errors raised by the pool registry, pool manager and drivers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// No profile is stored under this id
    #[error("Connection with ID {id} not found")]
    ProfileNotFound { id: String },

    /// No connection became available within the acquire window
    #[error("Timed out after {waited_ms}ms waiting for a pooled connection")]
    AcquireTimeout { waited_ms: u64 },

    /// Establishing a physical connection failed (TCP, TLS or auth)
    #[error("Connection failed: {message}")]
    Connect { message: String },

    /// The database rejected the statement
    #[error("Query failed: {message}")]
    Query {
        message: String,
        sql_state: Option<String>,
    },

    /// The pool was closed underneath the caller (invalidated mid-flight)
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Draining a pool did not finish in time
    #[error("Pool did not drain within {}ms", .0.as_millis())]
    DrainTimeout(Duration),

    /// The profile store failed for a reason other than a missing id
    #[error("Profile store error: {0}")]
    Store(String),
}

impl PoolError {
    pub fn profile_not_found(id: impl Into<String>) -> Self {
        Self::ProfileNotFound { id: id.into() }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    pub fn acquire_timeout(waited: Duration) -> Self {
        Self::AcquireTimeout {
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Whether the caller may simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::PoolClosed)
    }
}

/// Errors raised by a profile store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Connection with ID {id} not found")]
    NotFound { id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for PoolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => Self::ProfileNotFound { id },
            other => Self::Store(other.to_string()),
        }
    }
}

/// Aggregate of pools that failed to close during `destroy_all`
#[derive(Error, Debug)]
#[error("{} connection pool(s) failed to close", failures.len())]
pub struct ShutdownError {
    pub failures: Vec<(String, PoolError)>,
}

/// Invalid start-up configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: u64 },
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
