//! Profile store - where connection profiles live
//!
//! The pool manager only reads profiles and reports status through this
//! trait. `MemoryProfileStore` keeps everything in process; a restart
//! starts empty.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::profile::{ConnectionProfile, ConnectionStatus, NewProfile, ProfilePatch};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: &str) -> Result<ConnectionProfile, StoreError>;

    /// All profiles, oldest first
    async fn list_profiles(&self) -> Result<Vec<ConnectionProfile>, StoreError>;

    /// Record an observed status. `last_connected_at` is kept when `None`.
    async fn update_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        last_connected_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn create_profile(&self, new: NewProfile) -> Result<ConnectionProfile, StoreError>;

    async fn update_profile(
        &self,
        id: &str,
        patch: ProfilePatch,
    ) -> Result<ConnectionProfile, StoreError>;

    async fn delete_profile(&self, id: &str) -> Result<(), StoreError>;
}

/// In-memory profile store
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, ConnectionProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound { id: id.to_owned() }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, id: &str) -> Result<ConnectionProfile, StoreError> {
        self.profiles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list_profiles(&self) -> Result<Vec<ConnectionProfile>, StoreError> {
        let mut profiles: Vec<_> = self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(profiles)
    }

    async fn update_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        last_connected_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(id).ok_or_else(|| not_found(id))?;
        profile.status = status;
        if let Some(at) = last_connected_at {
            profile.last_connected_at = Some(at);
        }
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn create_profile(&self, new: NewProfile) -> Result<ConnectionProfile, StoreError> {
        new.validate()?;
        let profile = ConnectionProfile::from_new(Uuid::new_v4().to_string(), new, Utc::now());
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile.clone());
        tracing::info!(connection_id = %profile.id, name = %profile.name, "Connection created");
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: &str,
        patch: ProfilePatch,
    ) -> Result<ConnectionProfile, StoreError> {
        patch.validate(id)?;
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(id).ok_or_else(|| not_found(id))?;
        profile.apply_patch(patch, Utc::now());
        tracing::info!(connection_id = %id, name = %profile.name, "Connection updated");
        Ok(profile.clone())
    }

    async fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .remove(id)
            .map(|_| tracing::info!(connection_id = %id, "Connection deleted"))
            .ok_or_else(|| not_found(id))
    }
}
