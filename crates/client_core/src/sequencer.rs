//! Async driver around the [`Bootstrap`] reducer.
//!
//! One event loop task owns the machine. Network calls run in spawned tasks
//! that report back through a weak handle to the loop's inbox, so results
//! arriving after shutdown are dropped instead of mutating anything.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{OrganizationProfile, ProfileDraft, Session},
    protocol::AuthStateChange,
};
use storage::{CachedCredentials, CredentialStore};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    bootstrap::{
        Bootstrap, BootstrapEvent, BootstrapState, Effect, FetchFailure, FetchOutcome,
        ProfileRequest, SessionResolution,
    },
    error::BackendError,
    forms::{validate_profile_draft, AuthFormError, OnboardingError, SignInForm, SignUpForm},
    oracle::{AuthSubscription, OAuthProvider, ProfileFetcher, SessionOracle, SignUpOutcome},
};

pub const DEFAULT_PROFILE_RETRY_DELAY: Duration = Duration::from_millis(750);
const INBOX_CAPACITY: usize = 64;
const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Pause before the single background retry of a failed profile fetch.
    pub profile_retry_delay: Duration,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            profile_retry_delay: DEFAULT_PROFILE_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: BootstrapState,
    pub to: BootstrapState,
}

enum Command {
    Event(BootstrapEvent),
    /// Apply and acknowledge once the resulting effects have run.
    Apply {
        event: BootstrapEvent,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

pub struct BootstrapSequencer {
    oracle: Arc<dyn SessionOracle>,
    profiles: Arc<dyn ProfileFetcher>,
    store: Arc<dyn CredentialStore>,
    options: SequencerOptions,
    transitions: broadcast::Sender<StateTransition>,
}

impl BootstrapSequencer {
    pub fn new(
        oracle: Arc<dyn SessionOracle>,
        profiles: Arc<dyn ProfileFetcher>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            oracle,
            profiles,
            store,
            options: SequencerOptions::default(),
            transitions,
        }
    }

    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    /// Transitions published after `start`; subscribe first to see all of them.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub async fn start(self) -> SequencerHandle {
        let cached = match self.store.load().await {
            Ok(cached) => cached,
            Err(err) => {
                warn!("credential cache unreadable; starting without it: {err:#}");
                CachedCredentials::default()
            }
        };
        if let Some(session) = cached.session.clone() {
            self.oracle.adopt_session(session).await;
        }

        let (machine, effects) = Bootstrap::new(&cached);
        let initial = machine.state();
        info!(phase = ?initial.phase(), "bootstrap started");

        let (state_tx, state_rx) = watch::channel(initial);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let auth = self.oracle.subscribe();

        let mut event_loop = EventLoop {
            machine,
            profiles: self.profiles.clone(),
            store: self.store.clone(),
            options: self.options,
            inbox: inbox_rx,
            reply_to: inbox_tx.downgrade(),
            auth: Some(auth),
            state: state_tx,
            transitions: self.transitions.clone(),
        };
        event_loop.run_effects(effects).await;
        spawn_session_query(self.oracle.clone(), inbox_tx.downgrade());
        let task = tokio::spawn(event_loop.run());

        SequencerHandle {
            inbox: inbox_tx,
            state: state_rx,
            transitions: self.transitions,
            oracle: self.oracle,
            profiles: self.profiles,
            task,
        }
    }
}

pub struct SequencerHandle {
    inbox: mpsc::Sender<Command>,
    state: watch::Receiver<BootstrapState>,
    transitions: broadcast::Sender<StateTransition>,
    oracle: Arc<dyn SessionOracle>,
    profiles: Arc<dyn ProfileFetcher>,
    task: JoinHandle<()>,
}

impl SequencerHandle {
    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BootstrapState> {
        self.state.clone()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub async fn report_render_failure(&self, message: impl Into<String>) {
        self.send(BootstrapEvent::RenderFailed(message.into())).await;
    }

    pub async fn sign_in_with_password(&self, form: &SignInForm) -> Result<Session, AuthFormError> {
        form.validate()?;
        let session = self
            .oracle
            .sign_in_with_password(form.email.trim(), &form.password)
            .await?;
        Ok(session)
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> Result<SignUpOutcome, AuthFormError> {
        form.validate()?;
        let outcome = self
            .oracle
            .sign_up(form.email.trim(), &form.password, &form.metadata())
            .await?;
        Ok(outcome)
    }

    pub async fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, AuthFormError> {
        Ok(self.oracle.sign_in_with_oauth(provider, redirect_to).await?)
    }

    pub async fn complete_oauth_redirect(&self, redirect: &Url) -> Result<Session, AuthFormError> {
        Ok(self.oracle.complete_oauth_redirect(redirect).await?)
    }

    /// Registers the company profile and returns once the app state and the
    /// credential cache both reflect it.
    pub async fn complete_onboarding(
        &self,
        draft: &ProfileDraft,
    ) -> Result<OrganizationProfile, OnboardingError> {
        validate_profile_draft(draft)?;
        let identity = match self.state() {
            BootstrapState::Onboarding { identity, .. } => identity,
            BootstrapState::LoggedOut => return Err(OnboardingError::NotSignedIn),
            _ => return Err(OnboardingError::NotOnboarding),
        };

        let profile = self.profiles.create_profile(identity.id, draft).await?;
        self.apply(BootstrapEvent::ProfileCreated {
            identity_id: profile.owner_id,
            profile: profile.clone(),
        })
        .await;
        Ok(profile)
    }

    /// Signs out locally right away, then tells the backend. A failing remote
    /// sign-out is logged and otherwise ignored.
    pub async fn sign_out(&self) {
        self.apply(BootstrapEvent::SignOutRequested).await;
        if let Err(err) = self.oracle.sign_out().await {
            warn!("remote sign-out failed: {err}");
        }
    }

    pub async fn shutdown(self) {
        if self.inbox.send(Command::Shutdown).await.is_err() {
            debug!("sequencer loop already stopped");
        }
        if let Err(err) = self.task.await {
            warn!("sequencer loop ended abnormally: {err}");
        }
    }

    async fn send(&self, event: BootstrapEvent) {
        if self.inbox.send(Command::Event(event)).await.is_err() {
            debug!("sequencer loop stopped; event dropped");
        }
    }

    async fn apply(&self, event: BootstrapEvent) {
        let (done, applied) = oneshot::channel();
        if self.inbox.send(Command::Apply { event, done }).await.is_err() {
            debug!("sequencer loop stopped; event dropped");
            return;
        }
        if applied.await.is_err() {
            debug!("sequencer loop stopped before acknowledging");
        }
    }
}

struct EventLoop {
    machine: Bootstrap,
    profiles: Arc<dyn ProfileFetcher>,
    store: Arc<dyn CredentialStore>,
    options: SequencerOptions,
    inbox: mpsc::Receiver<Command>,
    reply_to: mpsc::WeakSender<Command>,
    auth: Option<AuthSubscription>,
    state: watch::Sender<BootstrapState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(Command::Event(event)) => self.dispatch(event).await,
                    Some(Command::Apply { event, done }) => {
                        self.dispatch(event).await;
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                change = next_auth_change(&mut self.auth) => match change {
                    Some(change) => self.dispatch(BootstrapEvent::AuthChanged(change)).await,
                    None => {
                        debug!("auth subscription closed");
                        self.auth = None;
                    }
                },
            }
        }

        if let Some(auth) = self.auth.take() {
            auth.unsubscribe();
        }
        debug!("sequencer loop stopped");
    }

    async fn dispatch(&mut self, event: BootstrapEvent) {
        let effects = self.machine.apply(event);
        self.publish();
        self.run_effects(effects).await;
    }

    fn publish(&self) {
        let next = self.machine.state();
        let mut previous = None;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = Some(std::mem::replace(current, next.clone()));
            true
        });
        if !changed {
            return;
        }
        if let Some(from) = previous {
            info!(from = ?from.phase(), to = ?next.phase(), "bootstrap state changed");
            // Nobody listening is fine.
            let _ = self.transitions.send(StateTransition { from, to: next });
        }
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FetchProfile(request) => self.spawn_fetch(request),
                Effect::Persist { session, profile } => {
                    if let Err(err) = self.store.save(Some(&session), profile.as_ref()).await {
                        warn!("failed to write credential cache: {err:#}");
                    }
                }
                Effect::ClearCache => {
                    if let Err(err) = self.store.clear().await {
                        warn!("failed to clear credential cache: {err:#}");
                    }
                }
            }
        }
    }

    fn spawn_fetch(&self, request: ProfileRequest) {
        let profiles = self.profiles.clone();
        let reply_to = self.reply_to.clone();
        let delay = if request.attempt > 0 {
            self.options.profile_retry_delay
        } else {
            Duration::ZERO
        };
        debug!(
            identity_id = %request.identity_id,
            generation = request.generation,
            attempt = request.attempt,
            "fetching company profile"
        );

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = match profiles.fetch_profile(request.identity_id).await {
                Ok(Some(profile)) => FetchOutcome::Found(profile),
                Ok(None) => FetchOutcome::NotFound,
                Err(BackendError::Unauthorized) => FetchOutcome::Failed(FetchFailure::Unauthorized),
                Err(err) => FetchOutcome::Failed(FetchFailure::Transient(err.to_string())),
            };
            deliver(&reply_to, BootstrapEvent::ProfileFetched { request, outcome }).await;
        });
    }
}

fn spawn_session_query(oracle: Arc<dyn SessionOracle>, reply_to: mpsc::WeakSender<Command>) {
    tokio::spawn(async move {
        let resolution = match oracle.current_session().await {
            Ok(Some(session)) => SessionResolution::Active(session),
            Ok(None) => SessionResolution::Absent,
            Err(err) => SessionResolution::Unavailable(err.to_string()),
        };
        deliver(&reply_to, BootstrapEvent::SessionResolved(resolution)).await;
    });
}

/// Hands a task result to the loop if it is still running.
async fn deliver(reply_to: &mpsc::WeakSender<Command>, event: BootstrapEvent) {
    let Some(inbox) = reply_to.upgrade() else {
        debug!("sequencer stopped; discarding late result");
        return;
    };
    if inbox.send(Command::Event(event)).await.is_err() {
        debug!("sequencer stopped; discarding late result");
    }
}

async fn next_auth_change(auth: &mut Option<AuthSubscription>) -> Option<AuthStateChange> {
    match auth {
        Some(auth) => auth.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/sequencer_tests.rs"]
mod tests;
