use async_trait::async_trait;
use shared::{
    domain::{Identity, IdentityId, OrganizationProfile, ProfileDraft, Session},
    protocol::{AuthStateChange, SignUpMetadata},
};
use tokio::sync::broadcast;
use url::Url;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            other => Err(format!("unsupported oauth provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// Account created; the backend waits for e-mail confirmation before issuing a session.
    ConfirmationPending(Identity),
}

/// Live subscription to auth state changes. Dropping it (or calling
/// [`AuthSubscription::unsubscribe`]) releases the subscription.
pub struct AuthSubscription {
    receiver: broadcast::Receiver<AuthStateChange>,
}

impl AuthSubscription {
    pub fn new(receiver: broadcast::Receiver<AuthStateChange>) -> Self {
        Self { receiver }
    }

    /// Next change, or `None` once the oracle is gone.
    pub async fn recv(&mut self) -> Option<AuthStateChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth subscription lagged; older events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Source of truth for who is signed in.
#[async_trait]
pub trait SessionOracle: Send + Sync {
    /// Single-shot check of the current session.
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;
    fn subscribe(&self) -> AuthSubscription;
    /// Seeds the oracle with a session recovered from the local cache.
    async fn adopt_session(&self, session: Session);
    async fn sign_out(&self) -> Result<(), BackendError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;
    /// Returns the provider authorization URL the user has to visit.
    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, BackendError>;
    /// Finishes an OAuth sign-in from the URL the provider redirected back to.
    async fn complete_oauth_redirect(&self, redirect: &Url) -> Result<Session, BackendError>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, BackendError>;
}

#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// `Ok(None)` is the definitive "this identity has no profile yet".
    async fn fetch_profile(
        &self,
        identity_id: IdentityId,
    ) -> Result<Option<OrganizationProfile>, BackendError>;
    async fn create_profile(
        &self,
        identity_id: IdentityId,
        draft: &ProfileDraft,
    ) -> Result<OrganizationProfile, BackendError>;
}
