use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::domain::{OrganizationProfile, Session};
use tokio::sync::Mutex;

use crate::{is_fresh, CachedCredentials, CredentialStore};

#[derive(Default)]
struct Entries {
    session: Option<(Session, DateTime<Utc>)>,
    profile: Option<(OrganizationProfile, DateTime<Utc>)>,
}

/// Process-local store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<Entries>,
    max_age: Option<Duration>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Store pre-populated as if a previous run had saved these values.
    pub fn seeded(session: Option<Session>, profile: Option<OrganizationProfile>) -> Self {
        let now = Utc::now();
        Self {
            entries: Mutex::new(Entries {
                session: session.map(|session| (session, now)),
                profile: profile.map(|profile| (profile, now)),
            }),
            max_age: None,
        }
    }

    /// Rewrites entry timestamps; lets callers simulate an old cache.
    pub async fn backdate(&self, saved_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().await;
        if let Some((_, at)) = entries.session.as_mut() {
            *at = saved_at;
        }
        if let Some((_, at)) = entries.profile.as_mut() {
            *at = saved_at;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<CachedCredentials> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let mut loaded = CachedCredentials::default();

        if let Some((session, at)) = &entries.session {
            if is_fresh(*at, self.max_age, now) {
                loaded.session = Some(session.clone());
                loaded.saved_at = Some(*at);
            }
        }
        if let Some((profile, at)) = &entries.profile {
            if is_fresh(*at, self.max_age, now) {
                loaded.profile = Some(profile.clone());
                loaded.saved_at = loaded.saved_at.max(Some(*at));
            }
        }

        Ok(loaded)
    }

    async fn save(
        &self,
        session: Option<&Session>,
        profile: Option<&OrganizationProfile>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        entries.session = session.map(|session| (session.clone(), now));
        entries.profile = profile.map(|profile| (profile.clone(), now));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.session = None;
        entries.profile = None;
        Ok(())
    }
}
