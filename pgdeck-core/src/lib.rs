//! pgdeck-core: connection-pool lifecycle for a Postgres admin service
//!
//! Owns one lazily created pool per connection profile, runs statements
//! and gathers statistics through those pools, and answers throwaway
//! connectivity probes without touching them.

pub mod config;
pub mod driver;
pub mod error;
pub mod manager;
pub mod profile;
pub mod prober;
pub mod registry;
pub mod stats;
pub mod store;
pub mod validation;

pub use config::{EffectivePoolConfig, PoolDefaults};
pub use driver::{ColumnInfo, ConnectTarget, Driver, PostgresDriver};
pub use error::{ConfigError, PoolError, ShutdownError, StoreError};
pub use manager::{PoolManager, QueryResult};
pub use profile::{
    ConnectionProfile, ConnectionStatus, NewProfile, Outcome, PoolOverrides, ProfilePatch,
    MASKED_SECRET,
};
pub use prober::{ConnectivityProber, TestDetails, TestResult};
pub use registry::{PoolHandle, PoolRegistry};
pub use stats::{PoolCounts, PoolStats};
pub use store::{MemoryProfileStore, ProfileStore};
pub use validation::ValidationError;
