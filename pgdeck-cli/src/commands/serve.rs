//! HTTP server command
//!
//! Builds the pool defaults from flags and environment, then runs the API
//! until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use pgdeck_core::config::{
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DRAIN_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_SIZE, DEFAULT_PROBE_TIMEOUT,
};
use pgdeck_core::{MemoryProfileStore, PoolDefaults, PostgresDriver};
use pgdeck_server::{run_server, AppState, ServerConfig};

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, short = 'b', env = "PGDECK_BIND", default_value = "127.0.0.1:3001")]
    pub bind: SocketAddr,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long, env = "PGDECK_CORS_PERMISSIVE")]
    pub cors_permissive: bool,

    /// Request timeout in seconds
    #[arg(long, env = "PGDECK_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// System-wide pool defaults. Timeouts are in milliseconds.
#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Pool size when a profile does not set one
    #[arg(long, env = "PG_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_SIZE)]
    pub max_connections: u32,

    /// Largest pool any profile may get unless explicit max is allowed
    #[arg(long, env = "PG_MAX_CONNECTIONS_CEILING")]
    pub max_connections_ceiling: u32,

    /// How long an idle connection is kept
    #[arg(long, env = "PG_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT.as_millis() as u64)]
    pub idle_timeout: u64,

    /// How long a request waits for a pooled connection
    #[arg(long, env = "PG_ACQUIRE_TIMEOUT", default_value_t = DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64)]
    pub acquire_timeout: u64,

    /// How long establishing a physical connection may take
    #[arg(long, env = "PG_CONNECTION_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connection_timeout: u64,

    /// Let profiles exceed the ceiling
    #[arg(long, env = "PG_ALLOW_EXPLICIT_MAX")]
    pub allow_explicit_max: bool,

    /// Budget for a whole connection test
    #[arg(long, env = "PG_PROBE_TIMEOUT", default_value_t = DEFAULT_PROBE_TIMEOUT.as_millis() as u64)]
    pub probe_timeout: u64,

    /// Server-side statement timeout for pooled connections
    #[arg(long, env = "PG_STATEMENT_TIMEOUT")]
    pub statement_timeout: Option<u64>,

    /// How long closing a pool waits for borrowed connections
    #[arg(long, env = "PG_DRAIN_TIMEOUT", default_value_t = DEFAULT_DRAIN_TIMEOUT.as_millis() as u64)]
    pub drain_timeout: u64,
}

impl PoolArgs {
    pub fn to_defaults(&self) -> PoolDefaults {
        PoolDefaults {
            default_max_size: self.max_connections,
            max_size_ceiling: self.max_connections_ceiling,
            idle_timeout: Duration::from_millis(self.idle_timeout),
            acquire_timeout: Duration::from_millis(self.acquire_timeout),
            connect_timeout: Duration::from_millis(self.connection_timeout),
            allow_explicit_max: self.allow_explicit_max,
            probe_timeout: Duration::from_millis(self.probe_timeout),
            statement_timeout: self
                .statement_timeout
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            drain_timeout: Duration::from_millis(self.drain_timeout),
        }
    }
}

/// Run the HTTP server
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let defaults = args.pool.to_defaults();
    defaults.validate().context("Invalid pool configuration")?;

    tracing::info!(
        default_max = defaults.default_max_size,
        ceiling = defaults.max_size_ceiling,
        allow_explicit_max = defaults.allow_explicit_max,
        "Pool defaults loaded"
    );
    tracing::info!("Starting pgdeck server on {}", args.bind);

    let state = AppState::new(
        Arc::new(MemoryProfileStore::new()),
        Arc::new(PostgresDriver),
        defaults,
    );

    let config = ServerConfig {
        bind_addr: args.bind,
        cors_permissive: args.cors_permissive,
        request_timeout: Duration::from_secs(args.request_timeout),
    };

    // Blocks until shutdown, then drains every pool
    run_server(Arc::new(state), config)
        .await
        .context("Server error")?;

    Ok(())
}
