//! Pool configuration: system defaults and the per-pool effective config
//!
//! Every knob the underlying driver would otherwise default is spelled out
//! here, so pool behaviour does not depend on a particular driver's choices.

use std::time::Duration;

use crate::error::ConfigError;
use crate::profile::PoolOverrides;

/// Default maximum connections per pool
pub const DEFAULT_MAX_SIZE: u32 = 10;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(10_000);

/// System-wide pool defaults, fixed at process start.
///
/// The ceiling has no default: it bounds how many server-side connection
/// slots a single profile may claim and must be chosen by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDefaults {
    /// Pool size when a profile does not ask for one
    pub default_max_size: u32,
    /// Hard upper bound on pool size unless explicit max is allowed
    pub max_size_ceiling: u32,
    /// How long an idle physical connection is kept
    pub idle_timeout: Duration,
    /// How long a caller waits to borrow a connection
    pub acquire_timeout: Duration,
    /// How long the driver may spend establishing a physical connection
    pub connect_timeout: Duration,
    /// Whether profiles may exceed the ceiling by default
    pub allow_explicit_max: bool,
    /// Budget for a whole connectivity probe
    pub probe_timeout: Duration,
    /// Driver-side statement timeout, if any
    pub statement_timeout: Option<Duration>,
    /// How long closing a pool may wait for borrowed connections
    pub drain_timeout: Duration,
}

impl PoolDefaults {
    /// Defaults matching the documented environment fallbacks.
    pub fn with_ceiling(max_size_ceiling: u32) -> Self {
        Self {
            default_max_size: DEFAULT_MAX_SIZE,
            max_size_ceiling,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            allow_explicit_max: false,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            statement_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_ceiling == 0 {
            return Err(ConfigError::TooSmall {
                field: "max_size_ceiling",
                min: 1,
            });
        }
        if self.default_max_size == 0 {
            return Err(ConfigError::TooSmall {
                field: "default_max_size",
                min: 1,
            });
        }
        for (field, value) in [
            ("acquire_timeout", self.acquire_timeout),
            ("connect_timeout", self.connect_timeout),
            ("probe_timeout", self.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::TooSmall { field, min: 1 });
            }
        }
        Ok(())
    }

    /// Merge profile tuning and a per-call override over these defaults.
    ///
    /// Precedence is profile, then override, then default. Zero counts as
    /// absent. Without explicit-max permission the size is clamped to the
    /// ceiling.
    pub fn merge(
        &self,
        profile: &PoolOverrides,
        request: Option<&PoolOverrides>,
    ) -> EffectivePoolConfig {
        let empty = PoolOverrides::default();
        let request = request.unwrap_or(&empty);

        let requested_max = profile
            .max_connections
            .filter(|v| *v > 0)
            .or(request.max_connections.filter(|v| *v > 0))
            .unwrap_or(self.default_max_size);
        let allow_explicit_max = profile
            .allow_explicit_max
            .or(request.allow_explicit_max)
            .unwrap_or(self.allow_explicit_max);
        let max_size = if allow_explicit_max {
            requested_max
        } else {
            requested_max.min(self.max_size_ceiling)
        };

        let idle_timeout = pick_ms(profile.idle_timeout_ms, request.idle_timeout_ms)
            .unwrap_or(self.idle_timeout);
        let acquire_timeout = pick_ms(profile.acquire_timeout_ms, request.acquire_timeout_ms)
            .unwrap_or(self.acquire_timeout);

        EffectivePoolConfig {
            max_size: max_size.max(1),
            idle_timeout,
            acquire_timeout,
            connect_timeout: self.connect_timeout,
            statement_timeout: self.statement_timeout,
        }
    }

    /// Config for the single-use pool behind a connectivity probe.
    pub fn probe_config(&self) -> EffectivePoolConfig {
        EffectivePoolConfig {
            max_size: 1,
            idle_timeout: self.probe_timeout,
            acquire_timeout: self.probe_timeout,
            connect_timeout: self.probe_timeout,
            statement_timeout: Some(self.probe_timeout),
        }
    }
}

fn pick_ms(first: Option<u64>, second: Option<u64>) -> Option<Duration> {
    first
        .filter(|v| *v > 0)
        .or(second.filter(|v| *v > 0))
        .map(Duration::from_millis)
}

/// Configuration a pool was created with. Fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePoolConfig {
    pub max_size: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}
