//! Startup reconciliation of cached credentials, the live session and the
//! company profile into a single UI state.
//!
//! [`Bootstrap`] is a pure reducer: it consumes [`BootstrapEvent`]s and
//! returns [`Effect`]s for the caller to run. The visible
//! [`BootstrapState`] is derived from what the machine knows about the
//! session and the profile, so impossible flag combinations cannot occur.

use shared::{
    domain::{Identity, IdentityId, OrganizationProfile, Session},
    protocol::{AuthEvent, AuthStateChange},
};
use storage::CachedCredentials;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Loading,
    LoggedOut,
    Onboarding {
        identity: Identity,
        /// Shown above the form when the profile could not be loaded.
        notice: Option<String>,
    },
    Ready {
        identity: Identity,
        profile: OrganizationProfile,
    },
    Fatal {
        message: String,
    },
}

impl BootstrapState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Loading => Phase::Loading,
            Self::LoggedOut => Phase::LoggedOut,
            Self::Onboarding { .. } => Phase::Onboarding,
            Self::Ready { .. } => Phase::Ready,
            Self::Fatal { .. } => Phase::Fatal,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Onboarding { identity, .. } | Self::Ready { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&OrganizationProfile> {
        match self {
            Self::Ready { profile, .. } => Some(profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Loading,
    LoggedOut,
    Onboarding,
    Ready,
    Fatal,
}

/// Tag carried by a profile fetch so late answers can be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRequest {
    pub identity_id: IdentityId,
    pub generation: u64,
    /// 0 for the first try, 1 for the single background retry.
    pub attempt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResolution {
    Active(Session),
    Absent,
    /// The session query itself failed.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The backend rejected the access token.
    Unauthorized,
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(OrganizationProfile),
    NotFound,
    Failed(FetchFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapEvent {
    SessionResolved(SessionResolution),
    AuthChanged(AuthStateChange),
    SignOutRequested,
    ProfileFetched {
        request: ProfileRequest,
        outcome: FetchOutcome,
    },
    ProfileCreated {
        identity_id: IdentityId,
        profile: OrganizationProfile,
    },
    RenderFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchProfile(ProfileRequest),
    /// Overwrite the cache; `profile: None` removes the cached profile.
    Persist {
        session: Session,
        profile: Option<OrganizationProfile>,
    },
    ClearCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionKnowledge {
    /// Nothing cached and the session query has not answered.
    Pending,
    /// Recovered from the cache, not yet confirmed by the backend.
    Cached(Session),
    Active(Session),
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProfileKnowledge {
    Unknown,
    Cached(OrganizationProfile),
    Confirmed(OrganizationProfile),
    Missing,
    Unavailable { reason: String },
}

impl ProfileKnowledge {
    fn is_definitive(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::Missing)
    }

    fn usable(&self) -> Option<&OrganizationProfile> {
        match self {
            Self::Cached(profile) | Self::Confirmed(profile) => Some(profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    session: SessionKnowledge,
    profile: ProfileKnowledge,
    fatal: Option<String>,
    generation: u64,
    in_flight: Option<ProfileRequest>,
    /// The initial session query answered, or an auth event made it moot.
    session_settled: bool,
    /// The session query reported no session while one was cached.
    oracle_denied: bool,
    /// A profile fetch was refused with the cached access token.
    token_rejected: bool,
}

impl Bootstrap {
    pub fn new(cached: &CachedCredentials) -> (Self, Vec<Effect>) {
        let mut machine = Self {
            session: SessionKnowledge::Pending,
            profile: ProfileKnowledge::Unknown,
            fatal: None,
            generation: 0,
            in_flight: None,
            session_settled: false,
            oracle_denied: false,
            token_rejected: false,
        };
        let mut effects = Vec::new();

        if let Some(session) = cached.session.clone() {
            machine.profile = cached
                .profile_for_session()
                .cloned()
                .map(ProfileKnowledge::Cached)
                .unwrap_or(ProfileKnowledge::Unknown);
            debug!(
                identity_id = %session.identity_id(),
                with_profile = machine.profile.usable().is_some(),
                "seeded from credential cache"
            );
            machine.session = SessionKnowledge::Cached(session);
            machine.issue_fetch(0, &mut effects);
        }

        (machine, effects)
    }

    pub fn state(&self) -> BootstrapState {
        if let Some(message) = &self.fatal {
            return BootstrapState::Fatal {
                message: message.clone(),
            };
        }
        let session = match &self.session {
            SessionKnowledge::Pending => return BootstrapState::Loading,
            SessionKnowledge::Absent => return BootstrapState::LoggedOut,
            SessionKnowledge::Cached(session) | SessionKnowledge::Active(session) => session,
        };
        let identity = session.identity.clone();
        match &self.profile {
            ProfileKnowledge::Cached(profile) | ProfileKnowledge::Confirmed(profile) => {
                BootstrapState::Ready {
                    identity,
                    profile: profile.clone(),
                }
            }
            ProfileKnowledge::Missing => BootstrapState::Onboarding {
                identity,
                notice: None,
            },
            ProfileKnowledge::Unavailable { reason } => BootstrapState::Onboarding {
                identity,
                notice: Some(reason.clone()),
            },
            ProfileKnowledge::Unknown => BootstrapState::Loading,
        }
    }

    pub fn session_known(&self) -> bool {
        !matches!(self.session, SessionKnowledge::Pending)
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.session {
            SessionKnowledge::Cached(session) | SessionKnowledge::Active(session) => Some(session),
            SessionKnowledge::Pending | SessionKnowledge::Absent => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session().map(|session| &session.identity)
    }

    /// True once the profile question is settled for the current identity,
    /// or when nobody is signed in.
    pub fn profile_known(&self) -> bool {
        match self.session {
            SessionKnowledge::Pending => false,
            SessionKnowledge::Absent => true,
            _ => self.profile.is_definitive(),
        }
    }

    pub fn profile(&self) -> Option<&OrganizationProfile> {
        self.profile.usable()
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> Option<ProfileRequest> {
        self.in_flight
    }

    pub fn apply(&mut self, event: BootstrapEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            BootstrapEvent::SessionResolved(resolution) => {
                self.on_session_resolved(resolution, &mut effects)
            }
            BootstrapEvent::AuthChanged(change) => self.on_auth_changed(change, &mut effects),
            BootstrapEvent::SignOutRequested => {
                info!("sign-out requested");
                self.sign_out(&mut effects);
            }
            BootstrapEvent::ProfileFetched { request, outcome } => {
                self.on_profile_fetched(request, outcome, &mut effects)
            }
            BootstrapEvent::ProfileCreated {
                identity_id,
                profile,
            } => self.on_profile_created(identity_id, profile, &mut effects),
            BootstrapEvent::RenderFailed(message) => {
                error!(%message, "render failed; showing error screen");
                self.fatal = Some(message);
            }
        }
        self.ensure_progress();
        effects
    }

    fn on_session_resolved(&mut self, resolution: SessionResolution, effects: &mut Vec<Effect>) {
        if self.session_settled {
            debug!("session query answered after an auth event; ignoring");
            return;
        }
        self.session_settled = true;

        match resolution {
            SessionResolution::Active(session) => self.adopt_session(session, effects),
            SessionResolution::Absent => {
                if matches!(self.session, SessionKnowledge::Cached(_)) {
                    self.oracle_denied = true;
                    if self.token_rejected {
                        self.exhaust_cached_session(effects);
                    } else {
                        debug!("backend reports no session; keeping cached session until disproven");
                    }
                } else {
                    self.session = SessionKnowledge::Absent;
                }
            }
            SessionResolution::Unavailable(reason) => {
                if matches!(self.session, SessionKnowledge::Cached(_)) {
                    warn!(%reason, "session query failed; keeping cached session");
                } else {
                    warn!(%reason, "session query failed; treating as signed out");
                    self.session = SessionKnowledge::Absent;
                }
            }
        }
    }

    fn on_auth_changed(&mut self, change: AuthStateChange, effects: &mut Vec<Effect>) {
        if change.event == AuthEvent::SignedOut {
            info!("signed out by backend");
            self.sign_out(effects);
            return;
        }
        let Some(session) = change.session else {
            debug!(event = ?change.event, "auth event without session ignored");
            return;
        };
        // Only a fresh sign-in leaves the signed-out state.
        if change.event != AuthEvent::SignedIn && matches!(self.session, SessionKnowledge::Absent) {
            debug!(event = ?change.event, "auth event after sign-out ignored");
            return;
        }
        self.session_settled = true;
        self.adopt_session(session, effects);
    }

    fn adopt_session(&mut self, session: Session, effects: &mut Vec<Effect>) {
        let identity_id = session.identity_id();
        self.oracle_denied = false;
        self.token_rejected = false;

        if self.identity().map(|identity| identity.id) == Some(identity_id) {
            self.session = SessionKnowledge::Active(session.clone());
            effects.push(Effect::Persist {
                session,
                profile: self.profile.usable().cloned(),
            });
            if !self.profile.is_definitive() && self.in_flight.is_none() {
                self.issue_fetch(0, effects);
            }
            return;
        }

        info!(identity_id = %identity_id, "signed-in identity changed");
        self.generation += 1;
        self.in_flight = None;
        self.profile = ProfileKnowledge::Unknown;
        self.session = SessionKnowledge::Active(session.clone());
        effects.push(Effect::Persist {
            session,
            profile: None,
        });
        self.issue_fetch(0, effects);
    }

    fn on_profile_fetched(
        &mut self,
        request: ProfileRequest,
        outcome: FetchOutcome,
        effects: &mut Vec<Effect>,
    ) {
        if self.in_flight != Some(request) {
            debug!(
                identity_id = %request.identity_id,
                generation = request.generation,
                "stale profile result discarded"
            );
            return;
        }
        self.in_flight = None;

        match outcome {
            FetchOutcome::Found(profile) => {
                self.profile = ProfileKnowledge::Confirmed(profile.clone());
                self.persist(Some(profile), effects);
            }
            FetchOutcome::NotFound => {
                info!(identity_id = %request.identity_id, "no company profile registered");
                self.profile = ProfileKnowledge::Missing;
                self.persist(None, effects);
            }
            FetchOutcome::Failed(FetchFailure::Unauthorized)
                if matches!(self.session, SessionKnowledge::Cached(_)) =>
            {
                self.token_rejected = true;
                if self.oracle_denied {
                    self.exhaust_cached_session(effects);
                } else {
                    debug!("cached access token rejected; waiting for the session query");
                }
            }
            FetchOutcome::Failed(failure) => {
                let reason = match failure {
                    FetchFailure::Unauthorized => "access token rejected".to_string(),
                    FetchFailure::Transient(reason) => reason,
                };
                if request.attempt == 0 {
                    warn!(%reason, "profile fetch failed; retrying");
                    self.issue_fetch(1, effects);
                } else if matches!(self.profile, ProfileKnowledge::Cached(_)) {
                    warn!(%reason, "profile fetch failed again; keeping cached profile");
                } else {
                    warn!(%reason, "profile fetch failed again; falling back to onboarding");
                    self.profile = ProfileKnowledge::Unavailable {
                        reason: format!("company profile could not be loaded: {reason}"),
                    };
                }
            }
        }
    }

    fn on_profile_created(
        &mut self,
        identity_id: IdentityId,
        profile: OrganizationProfile,
        effects: &mut Vec<Effect>,
    ) {
        if self.identity().map(|identity| identity.id) != Some(identity_id) {
            debug!(%identity_id, "profile created for a previous identity; ignoring");
            return;
        }
        // A fetch issued before the insert could still answer "not found".
        self.in_flight = None;
        self.profile = ProfileKnowledge::Confirmed(profile.clone());
        self.persist(Some(profile), effects);
    }

    fn sign_out(&mut self, effects: &mut Vec<Effect>) {
        self.fatal = None;
        self.session = SessionKnowledge::Absent;
        self.profile = ProfileKnowledge::Unknown;
        self.generation += 1;
        self.in_flight = None;
        self.session_settled = true;
        self.oracle_denied = false;
        self.token_rejected = false;
        effects.push(Effect::ClearCache);
    }

    fn exhaust_cached_session(&mut self, effects: &mut Vec<Effect>) {
        warn!("cached session refused by the backend; signing out");
        self.sign_out(effects);
    }

    fn issue_fetch(&mut self, attempt: u8, effects: &mut Vec<Effect>) {
        let Some(identity_id) = self.identity().map(|identity| identity.id) else {
            return;
        };
        let request = ProfileRequest {
            identity_id,
            generation: self.generation,
            attempt,
        };
        self.in_flight = Some(request);
        effects.push(Effect::FetchProfile(request));
    }

    fn persist(&self, profile: Option<OrganizationProfile>, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session() {
            effects.push(Effect::Persist {
                session: session.clone(),
                profile,
            });
        }
    }

    /// Never leave a signed-in identity on the loading screen with nothing
    /// left that could resolve it.
    fn ensure_progress(&mut self) {
        if self.session_settled
            && self.session().is_some()
            && self.in_flight.is_none()
            && self.profile == ProfileKnowledge::Unknown
        {
            warn!("no profile answer pending; falling back to onboarding");
            self.profile = ProfileKnowledge::Unavailable {
                reason: "company profile could not be loaded".to_string(),
            };
        }
    }
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
