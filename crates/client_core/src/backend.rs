//! HTTP client for the hosted auth and table endpoints.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{IdentityId, OrganizationProfile, ProfileDraft, Session},
    protocol::{
        AuthEvent, AuthStateChange, AuthUser, CompanyRow, ErrorBody, PasswordGrant, RefreshGrant,
        SignUpMetadata, SignUpRequest, SignUpResponse, TokenResponse,
    },
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::BackendError,
    oracle::{AuthSubscription, OAuthProvider, ProfileFetcher, SessionOracle, SignUpOutcome},
    session::{expiry_leeway, resolve_expiry, session_for_identity, session_from_tokens},
};

const AUTH_EVENT_CAPACITY: usize = 32;
const COMPANIES_TABLE: &str = "rest/v1/companies";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: Url,
    pub anon_key: String,
}

impl BackendConfig {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            anon_key: anon_key.into(),
        })
    }
}

pub struct HostedBackend {
    http: Client,
    config: BackendConfig,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl HostedBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: BackendConfig, http: Client) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            http,
            config,
            session: RwLock::new(None),
            events,
        }
    }

    /// Session currently held in memory, without revalidation.
    pub async fn live_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.config.base_url.join(path)?)
    }

    fn request(&self, method: Method, url: Url, access_token: Option<&str>) -> RequestBuilder {
        let bearer = access_token.unwrap_or(&self.config.anon_key);
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    fn emit(&self, change: AuthStateChange) {
        debug!(event = ?change.event, "auth state change");
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    async fn install_session(&self, session: Session, event: AuthEvent) -> Session {
        *self.session.write().await = Some(session.clone());
        self.emit(AuthStateChange {
            event,
            session: Some(session.clone()),
        });
        session
    }

    /// Installs `session` only while `previous` is still the held session, so
    /// a sign-out that happened during the request wins.
    async fn replace_session(
        &self,
        previous: &Session,
        session: Session,
        event: AuthEvent,
    ) -> Option<Session> {
        let mut held = self.session.write().await;
        let still_current = held.as_ref().is_some_and(|current| {
            current.identity.id == previous.identity.id
                && current.refresh_token == previous.refresh_token
        });
        if !still_current {
            debug!(event = ?event, "held session changed during request; result discarded");
            return None;
        }
        *held = Some(session.clone());
        drop(held);

        self.emit(AuthStateChange {
            event,
            session: Some(session.clone()),
        });
        Some(session)
    }

    async fn drop_local_session(&self, reason: &str) {
        if self.session.write().await.take().is_some() {
            info!(reason, "discarding local session");
        }
    }

    /// `Ok(None)` when the held session changed while the request was running,
    /// e.g. a sign-out; the refreshed tokens are then discarded.
    async fn refresh(
        &self,
        previous: &Session,
        refresh_token: &str,
    ) -> Result<Option<Session>, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let response = self
            .request(Method::POST, url, None)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await?;
        let tokens: TokenResponse = read_json(response).await?;
        let session = session_from_tokens(tokens, Utc::now());
        info!(identity_id = %session.identity_id(), "access token refreshed");
        Ok(self
            .replace_session(previous, session, AuthEvent::TokenRefreshed)
            .await)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .request(Method::GET, url, Some(access_token))
            .send()
            .await?;
        read_json(response).await
    }

    /// Held session, refreshed first when its access token is about to expire.
    /// `Ok(None)` means there is no usable session any more.
    async fn fresh_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.live_session().await else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now(), expiry_leeway()) {
            return Ok(Some(session));
        }
        self.refresh_or_drop(&session).await
    }

    async fn refresh_or_drop(&self, session: &Session) -> Result<Option<Session>, BackendError> {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.drop_local_session("access token expired without refresh token")
                .await;
            return Ok(None);
        };
        match self.refresh(session, refresh_token).await {
            Ok(Some(session)) => Ok(Some(session)),
            Ok(None) => Ok(self.live_session().await),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => {
                warn!("session refresh rejected: {err}");
                self.drop_local_session("refresh token rejected").await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SessionOracle for HostedBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.fresh_session().await? else {
            return Ok(None);
        };

        let user = match self.fetch_user(&session.access_token).await {
            Ok(user) => user,
            Err(BackendError::Unauthorized) => return self.refresh_or_drop(&session).await,
            Err(err) => return Err(err),
        };

        let identity = user.to_identity();
        if identity == session.identity {
            return Ok(Some(session));
        }
        let updated = Session {
            identity,
            ..session.clone()
        };
        match self
            .replace_session(&session, updated, AuthEvent::UserUpdated)
            .await
        {
            Some(updated) => Ok(Some(updated)),
            None => Ok(self.live_session().await),
        }
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn adopt_session(&self, session: Session) {
        let mut held = self.session.write().await;
        if held.is_none() {
            debug!(identity_id = %session.identity_id(), "adopted cached session");
            *held = Some(session);
        }
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.session.write().await.take();
        self.emit(AuthStateChange::signed_out());

        let Some(previous) = previous else {
            return Ok(());
        };
        let url = self.endpoint("auth/v1/logout")?;
        let response = self
            .request(Method::POST, url, Some(&previous.access_token))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        match error_from_response(response).await {
            // Token already invalid: the remote session is gone either way.
            BackendError::Unauthorized => Ok(()),
            err => Err(err),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .request(Method::POST, url, None)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let tokens: TokenResponse = read_json(response).await?;
        let session = session_from_tokens(tokens, Utc::now());
        info!(identity_id = %session.identity_id(), "signed in with password");
        Ok(self.install_session(session, AuthEvent::SignedIn).await)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str())
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    async fn complete_oauth_redirect(&self, redirect: &Url) -> Result<Session, BackendError> {
        let params = OAuthRedirect::parse(redirect);
        if let Some(message) = params.error {
            return Err(BackendError::Rejected {
                status: 400,
                message,
            });
        }
        let access_token = params.access_token.ok_or_else(|| {
            BackendError::Protocol("oauth redirect carries no access_token".to_string())
        })?;

        let user = self.fetch_user(&access_token).await?;
        let expires_at = resolve_expiry(
            &access_token,
            params.expires_at,
            params.expires_in,
            Utc::now(),
        );
        let session = session_for_identity(
            user.to_identity(),
            access_token,
            params.refresh_token,
            expires_at,
        );
        info!(identity_id = %session.identity_id(), "signed in with oauth");
        Ok(self.install_session(session, AuthEvent::SignedIn).await)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, BackendError> {
        let url = self.endpoint("auth/v1/signup")?;
        let response = self
            .request(Method::POST, url, None)
            .json(&SignUpRequest {
                email,
                password,
                data: metadata,
            })
            .send()
            .await?;
        match read_json::<SignUpResponse>(response).await? {
            SignUpResponse::Session(tokens) => {
                let session = session_from_tokens(tokens, Utc::now());
                info!(identity_id = %session.identity_id(), "signed up and signed in");
                Ok(SignUpOutcome::SignedIn(
                    self.install_session(session, AuthEvent::SignedIn).await,
                ))
            }
            SignUpResponse::User(user) => {
                info!(identity_id = %user.id, "signed up; e-mail confirmation pending");
                Ok(SignUpOutcome::ConfirmationPending(user.to_identity()))
            }
        }
    }
}

#[async_trait]
impl ProfileFetcher for HostedBackend {
    async fn fetch_profile(
        &self,
        identity_id: IdentityId,
    ) -> Result<Option<OrganizationProfile>, BackendError> {
        // Without a user token row-level security hides every row, which
        // would read as "no profile".
        let session = self
            .fresh_session()
            .await?
            .ok_or(BackendError::Unauthorized)?;

        let url = self.endpoint(COMPANIES_TABLE)?;
        let response = self
            .request(Method::GET, url, Some(&session.access_token))
            .query(&[
                ("owner_id", format!("eq.{identity_id}")),
                ("select", "*".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<CompanyRow> = read_json(response).await?;
        Ok(rows.into_iter().next().map(OrganizationProfile::from))
    }

    async fn create_profile(
        &self,
        identity_id: IdentityId,
        draft: &ProfileDraft,
    ) -> Result<OrganizationProfile, BackendError> {
        let session = self
            .fresh_session()
            .await?
            .ok_or(BackendError::Unauthorized)?;
        let owner_id = session.identity_id();
        if owner_id != identity_id {
            warn!(
                requested = %identity_id,
                owner_id = %owner_id,
                "profile owner differs from live session; using live session"
            );
        }

        let url = self.endpoint(COMPANIES_TABLE)?;
        let response = self
            .request(Method::POST, url, Some(&session.access_token))
            .header("Prefer", "return=representation")
            .json(&CompanyRow::from_draft(owner_id, draft))
            .send()
            .await?;
        let rows: Vec<CompanyRow> = read_json(response).await?;
        let row = rows.into_iter().next().ok_or_else(|| {
            BackendError::Protocol("profile insert returned no representation".to_string())
        })?;
        info!(identity_id = %owner_id, "company profile created");
        Ok(row.into())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|err| BackendError::Protocol(format!("malformed response body: {err}")))
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(bytes) => serde_json::from_slice::<ErrorBody>(&bytes).unwrap_or_default(),
        Err(err) => return err.into(),
    };
    BackendError::from_status(status, &body)
}

#[derive(Debug, Default)]
struct OAuthRedirect {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    error: Option<String>,
}

impl OAuthRedirect {
    /// Tokens arrive in the fragment; some providers fall back to the query string.
    fn parse(redirect: &Url) -> Self {
        let mut parsed = Self::default();
        let fragment = redirect.fragment().unwrap_or_default();
        let pairs = url::form_urlencoded::parse(fragment.as_bytes()).chain(redirect.query_pairs());
        for (key, value) in pairs {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" if parsed.access_token.is_none() => {
                    parsed.access_token = Some(value)
                }
                "refresh_token" if parsed.refresh_token.is_none() => {
                    parsed.refresh_token = Some(value)
                }
                "expires_in" => parsed.expires_in = parsed.expires_in.or(value.parse().ok()),
                "expires_at" => parsed.expires_at = parsed.expires_at.or(value.parse().ok()),
                "error_description" => parsed.error = Some(value),
                "error" if parsed.error.is_none() => parsed.error = Some(value),
                _ => {}
            }
        }
        parsed
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
