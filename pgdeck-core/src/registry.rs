//! Pool registry - profile id to live pool
//!
//! # Invariants
//!
//! - At most one pool per profile id. Concurrent first requests for a cold
//!   id share a single creation (per-id `OnceCell`); callers for other ids
//!   never wait on it.
//! - The slot map is the only shared mutable state. It is locked only to
//!   insert or remove a slot, never across pool creation or draining.
//! - A pool's configuration is fixed when it is created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};

use crate::config::{EffectivePoolConfig, PoolDefaults};
use crate::driver::{Driver, DriverConnection, DriverPool, PoolObserver};
use crate::error::{PoolError, ShutdownError};
use crate::profile::{ConnectionProfile, PoolOverrides};
use crate::stats::PoolCounts;

type Slot = Arc<OnceCell<Arc<PoolHandle>>>;

/// A registered pool and the configuration it was built with
pub struct PoolHandle {
    profile_id: String,
    config: EffectivePoolConfig,
    pool: Box<dyn DriverPool>,
    observer: Arc<PoolObserver>,
    waiting: AtomicU32,
    closed: AtomicBool,
    created_at: Instant,
}

impl PoolHandle {
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn config(&self) -> &EffectivePoolConfig {
        &self.config
    }

    pub fn observer(&self) -> &PoolObserver {
        &self.observer
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Borrow a connection, waiting at most the pool's acquire timeout.
    ///
    /// A timeout abandons only this caller's wait; the pool is unaffected.
    pub async fn acquire(&self) -> Result<Box<dyn DriverConnection>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::PoolClosed);
        }

        let _waiting = WaitGuard::enter(&self.waiting);
        match tokio::time::timeout(self.config.acquire_timeout, self.pool.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                let err = PoolError::acquire_timeout(self.config.acquire_timeout);
                self.observer.on_error(&err);
                Err(err)
            }
        }
    }

    /// Live connection counts, read straight from the pool.
    pub fn counts(&self) -> PoolCounts {
        let size = self.pool.size();
        let idle = self.pool.idle().min(size);
        PoolCounts {
            active: size - idle,
            idle,
            waiting: self.waiting.load(Ordering::SeqCst),
            max: self.config.max_size,
        }
    }

    /// Drain and close. Only the first call does any work.
    async fn close(&self, drain_timeout: Duration) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match tokio::time::timeout(drain_timeout, self.pool.close()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::DrainTimeout(drain_timeout)),
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("profile_id", &self.profile_id)
            .field("config", &self.config)
            .field("counts", &self.counts())
            .finish()
    }
}

/// Counts a caller as waiting for as long as it is alive
struct WaitGuard<'a>(&'a AtomicU32);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns every live pool, keyed by profile id
pub struct PoolRegistry {
    driver: Arc<dyn Driver>,
    defaults: PoolDefaults,
    slots: Mutex<HashMap<String, Slot>>,
}

impl PoolRegistry {
    pub fn new(driver: Arc<dyn Driver>, defaults: PoolDefaults) -> Self {
        Self {
            driver,
            defaults,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> &PoolDefaults {
        &self.defaults
    }

    /// Return the pool for `profile.id`, creating it if needed.
    ///
    /// `overrides` only matter when this call creates the pool.
    pub async fn get_or_create(
        &self,
        profile: &ConnectionProfile,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<PoolHandle>, PoolError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(profile.id.clone()).or_default())
        };

        let mut created = false;
        let opened = slot
            .get_or_try_init(|| {
                created = true;
                self.open(profile, overrides)
            })
            .await
            .map(Arc::clone);
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                self.forget_empty_slot(&profile.id, &slot).await;
                return Err(e);
            }
        };

        // A destroy that ran while we were creating has already dropped
        // this slot, so it could not have closed the new pool.
        let registered = self
            .slots
            .lock()
            .await
            .get(&profile.id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !registered {
            if created {
                handle.close(self.defaults.drain_timeout).await?;
            }
            return Err(PoolError::PoolClosed);
        }

        Ok(handle)
    }

    /// Drop `slot` from the map if it is still registered and never got a pool.
    async fn forget_empty_slot(&self, id: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        let empty = slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if empty {
            slots.remove(id);
        }
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<PoolHandle>, PoolError> {
        let config = self.defaults.merge(&profile.pool, overrides);
        let observer = Arc::new(PoolObserver::new(profile.id.clone()));
        let pool = self
            .driver
            .open_pool(&profile.target(), &config, Arc::clone(&observer))
            .await?;

        tracing::info!(
            connection_id = %profile.id,
            max_size = config.max_size,
            "Connection pool created"
        );

        Ok(Arc::new(PoolHandle {
            profile_id: profile.id.clone(),
            config,
            pool,
            observer,
            waiting: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        }))
    }

    /// The registered pool for `id`, if one exists.
    pub async fn get(&self, id: &str) -> Option<Arc<PoolHandle>> {
        let slots = self.slots.lock().await;
        slots.get(id).and_then(|slot| slot.get().cloned())
    }

    /// Remove and drain the pool for `id`. Returns whether one existed.
    ///
    /// Idempotent: destroying an unknown id is a no-op.
    pub async fn destroy(&self, id: &str) -> Result<bool, PoolError> {
        let slot = self.slots.lock().await.remove(id);
        let Some(handle) = slot.and_then(|slot| slot.get().cloned()) else {
            return Ok(false);
        };

        handle.close(self.defaults.drain_timeout).await?;
        tracing::info!(connection_id = %id, "Connection pool closed");
        Ok(true)
    }

    /// Drain every pool. Individual failures are collected, not fatal.
    pub async fn destroy_all(&self) -> Result<usize, ShutdownError> {
        let drained: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        let handles: Vec<Arc<PoolHandle>> = drained
            .into_iter()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();

        let drain_timeout = self.defaults.drain_timeout;
        let results = join_all(handles.iter().map(|handle| async move {
            let result = handle.close(drain_timeout).await;
            (handle.profile_id.clone(), result)
        }))
        .await;

        let total = results.len();
        let failures: Vec<(String, PoolError)> = results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(connection_id = %id, error = %e, "Failed to close connection pool");
                    Some((id, e))
                }
            })
            .collect();

        tracing::info!(
            closed = total - failures.len(),
            failed = failures.len(),
            "All connection pools closed"
        );

        if failures.is_empty() {
            Ok(total)
        } else {
            Err(ShutdownError { failures })
        }
    }

    /// Number of live pools
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
