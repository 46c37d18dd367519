//! Connection profiles and their status convention
//!
//! A profile is the persisted description of one database endpoint plus
//! optional pool tuning. Status and `last_connected_at` are only ever
//! written from observed pool outcomes (see [`Outcome`]), never from client
//! input.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::driver::ConnectTarget;
use crate::validation::{self, ValidationError};

/// Placeholder returned instead of stored secrets
pub const MASKED_SECRET: &str = "********";

/// Default Postgres port when a request omits it
pub const DEFAULT_PORT: u16 = 5432;

const MAX_NAME_LEN: usize = 128;
const MAX_HOST_LEN: usize = 255;
const MAX_IDENT_LEN: usize = 63;

/// Hostname, IPv4 or bracket-less IPv6 literal
static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._:-]*[A-Za-z0-9])?$").expect("invalid host regex")
});

/// Observed connectivity state of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
    #[default]
    Unknown,
}

/// What the calling layer observed from a pool operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A query or probe succeeded
    Succeeded,
    /// A query or probe failed
    Failed,
    /// The pool was invalidated administratively with no follow-up activity
    Invalidated,
}

/// Status recorded after `outcome`. The previous status never matters and
/// there is no terminal state.
impl From<Outcome> for ConnectionStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => Self::Connected,
            Outcome::Failed => Self::Error,
            Outcome::Invalidated => Self::Disconnected,
        }
    }
}

/// Per-profile pool tuning; absent fields fall back to system defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(default, rename = "idleTimeout", skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default, rename = "connectionTimeout", skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_explicit_max: Option<bool>,
}

impl PoolOverrides {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::positive("maxConnections", self.max_connections.map(u64::from))?;
        validation::positive("idleTimeout", self.idle_timeout_ms)?;
        validation::positive("connectionTimeout", self.acquire_timeout_ms)?;
        Ok(())
    }
}

/// A stored connection profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(rename = "password")]
    pub secret: String,
    #[serde(rename = "ssl")]
    pub tls_enabled: bool,
    #[serde(flatten)]
    pub pool: PoolOverrides,
    pub status: ConnectionStatus,
    #[serde(rename = "lastConnected", skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionProfile {
    /// Build a fresh profile from a validated request.
    pub fn from_new(id: String, new: NewProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            host: new.host,
            port: new.port.unwrap_or(DEFAULT_PORT),
            database: new.database,
            username: new.username,
            secret: new.password,
            tls_enabled: new.ssl,
            pool: new.pool,
            status: ConnectionStatus::Unknown,
            last_connected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credentials needed to open a physical connection.
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            secret: self.secret.clone(),
            tls: self.tls_enabled,
        }
    }

    /// Copy safe to hand to clients.
    pub fn masked(&self) -> Self {
        Self {
            secret: MASKED_SECRET.to_string(),
            ..self.clone()
        }
    }

    /// Apply a validated patch. Id, status and timestamps other than
    /// `updated_at` are untouched.
    pub fn apply_patch(&mut self, patch: ProfilePatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(host) = patch.host {
            self.host = host;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(database) = patch.database {
            self.database = database;
        }
        if let Some(username) = patch.username {
            self.username = username;
        }
        // Clients echo the masked secret back when they did not change it
        if let Some(password) = patch.password.filter(|p| p != MASKED_SECRET) {
            self.secret = password;
        }
        if let Some(ssl) = patch.ssl {
            self.tls_enabled = ssl;
        }
        if let Some(max) = patch.max_connections {
            self.pool.max_connections = Some(max);
        }
        if let Some(idle) = patch.idle_timeout_ms {
            self.pool.idle_timeout_ms = Some(idle);
        }
        if let Some(acquire) = patch.acquire_timeout_ms {
            self.pool.acquire_timeout_ms = Some(acquire);
        }
        if let Some(allow) = patch.allow_explicit_max {
            self.pool.allow_explicit_max = Some(allow);
        }
        self.updated_at = now;
    }
}

/// Request body for creating a profile
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(flatten)]
    pub pool: PoolOverrides,
}

impl NewProfile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text("name", &self.name, MAX_NAME_LEN)?;
        check_host(&self.host)?;
        check_text("database", &self.database, MAX_IDENT_LEN)?;
        check_text("username", &self.username, MAX_IDENT_LEN)?;
        if let Some(port) = self.port {
            check_port(port)?;
        }
        self.pool.validate()
    }
}

/// Partial update for a profile; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub max_connections: Option<u32>,
    #[serde(rename = "idleTimeout")]
    pub idle_timeout_ms: Option<u64>,
    #[serde(rename = "connectionTimeout")]
    pub acquire_timeout_ms: Option<u64>,
    pub allow_explicit_max: Option<bool>,

    // Present only so they can be rejected
    pub id: Option<String>,
    pub status: Option<ConnectionStatus>,
    #[serde(rename = "lastConnected")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    /// Validate the patch against the profile it targets.
    pub fn validate(&self, current_id: &str) -> Result<(), ValidationError> {
        if self.id.as_deref().is_some_and(|id| id != current_id) {
            return Err(ValidationError::ReadOnly { field: "id" });
        }
        if self.status.is_some() {
            return Err(ValidationError::ReadOnly { field: "status" });
        }
        if self.last_connected_at.is_some() {
            return Err(ValidationError::ReadOnly {
                field: "lastConnected",
            });
        }
        if let Some(name) = &self.name {
            check_text("name", name, MAX_NAME_LEN)?;
        }
        if let Some(host) = &self.host {
            check_host(host)?;
        }
        if let Some(database) = &self.database {
            check_text("database", database, MAX_IDENT_LEN)?;
        }
        if let Some(username) = &self.username {
            check_text("username", username, MAX_IDENT_LEN)?;
        }
        if let Some(port) = self.port {
            check_port(port)?;
        }
        validation::positive("maxConnections", self.max_connections.map(u64::from))?;
        validation::positive("idleTimeout", self.idle_timeout_ms)?;
        validation::positive("connectionTimeout", self.acquire_timeout_ms)?;
        Ok(())
    }

    /// Whether applying the patch changes anything a live pool depends on.
    pub fn touches_pool(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.database.is_some()
            || self.username.is_some()
            || self.password.as_deref().is_some_and(|p| p != MASKED_SECRET)
            || self.ssl.is_some()
            || self.max_connections.is_some()
            || self.idle_timeout_ms.is_some()
            || self.acquire_timeout_ms.is_some()
            || self.allow_explicit_max.is_some()
    }
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    validation::require(field, value)?;
    validation::max_len(field, value, max)
}

fn check_host(host: &str) -> Result<(), ValidationError> {
    check_text("host", host, MAX_HOST_LEN)?;
    if !HOST_RE.is_match(host) {
        return Err(ValidationError::InvalidFormat {
            field: "host",
            reason: "must be a hostname or IP address",
        });
    }
    Ok(())
}

fn check_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::OutOfRange {
            field: "port",
            min: 1,
            max: 65535,
        });
    }
    Ok(())
}
