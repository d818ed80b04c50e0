//! Device-local cache of the last known session and company profile.
//!
//! The cache only exists to render something useful before the network
//! answers; it is never the source of truth.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::domain::{OrganizationProfile, Session};

mod memory;
mod sqlite;

pub use memory::MemoryCredentialStore;
pub use sqlite::SqliteCredentialStore;

pub const SESSION_KEY: &str = "orcaFacil_session";
pub const PROFILE_KEY: &str = "orcaFacil_profile";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedCredentials {
    pub session: Option<Session>,
    pub profile: Option<OrganizationProfile>,
    /// Write time of the most recent entry that was loaded.
    pub saved_at: Option<DateTime<Utc>>,
}

impl CachedCredentials {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.profile.is_none()
    }

    /// Cached profile, but only when it belongs to the cached session's identity.
    pub fn profile_for_session(&self) -> Option<&OrganizationProfile> {
        let session = self.session.as_ref()?;
        self.profile
            .as_ref()
            .filter(|profile| profile.owner_id == session.identity_id())
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<CachedCredentials>;
    /// `None` removes the corresponding entry.
    async fn save(
        &self,
        session: Option<&Session>,
        profile: Option<&OrganizationProfile>,
    ) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

fn is_fresh(updated_at: DateTime<Utc>, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
    match max_age {
        Some(max_age) => now - updated_at <= max_age,
        None => true,
    }
}

fn decode_entry<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, "ignoring unreadable credential cache entry: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
