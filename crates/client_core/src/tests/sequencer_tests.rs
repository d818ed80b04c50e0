use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use super::*;
use async_trait::async_trait;
use shared::{
    domain::{EntityType, Identity, IdentityId},
    protocol::{CompanyRow, SignUpMetadata},
};
use storage::MemoryCredentialStore;
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use crate::bootstrap::Phase;

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(100);
const PASSWORD: &str = "segredo1";

fn identity(n: u128) -> Identity {
    Identity {
        id: IdentityId(Uuid::from_u128(n)),
        display_name: format!("User {n}"),
        email: format!("user{n}@example.com"),
    }
}

fn session(n: u128) -> Session {
    Session {
        identity: identity(n),
        access_token: format!("access-{n}"),
        refresh_token: Some(format!("refresh-{n}")),
        expires_at: None,
    }
}

fn profile(owner: u128) -> OrganizationProfile {
    OrganizationProfile::from(CompanyRow::from_draft(
        IdentityId(Uuid::from_u128(owner)),
        &draft(),
    ))
}

fn draft() -> ProfileDraft {
    ProfileDraft {
        legal_name: "Padaria Pão Bom LTDA".to_string(),
        trade_name: "Pão Bom".to_string(),
        tax_id: "12.345.678/0001-90".to_string(),
        email: "contato@paobom.com".to_string(),
        phone: "(11) 99999-0000".to_string(),
        address: None,
        brand_color: None,
        entity_type: EntityType::Company,
    }
}

struct FakeOracle {
    current: Mutex<Result<Option<Session>, BackendError>>,
    query_delay: Duration,
    events: broadcast::Sender<AuthStateChange>,
    adopted: Mutex<Option<Session>>,
    sign_in_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    sign_out_error: Option<BackendError>,
}

impl FakeOracle {
    fn new(current: Result<Option<Session>, BackendError>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(current),
            query_delay: Duration::ZERO,
            events,
            adopted: Mutex::new(None),
            sign_in_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            sign_out_error: None,
        }
    }

    fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    fn failing_sign_out(mut self) -> Self {
        self.sign_out_error = Some(BackendError::Transport("offline".to_string()));
        self
    }

    fn emit(&self, change: AuthStateChange) {
        let _ = self.events.send(change);
    }
}

#[async_trait]
impl SessionOracle for FakeOracle {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        tokio::time::sleep(self.query_delay).await;
        self.current.lock().expect("lock").clone()
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn adopt_session(&self, session: Session) {
        *self.adopted.lock().expect("lock") = Some(session);
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().expect("lock") = Ok(None);
        self.emit(AuthStateChange::signed_out());
        match &self.sign_out_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if password != PASSWORD {
            return Err(BackendError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            });
        }
        *self.current.lock().expect("lock") = Ok(Some(session(1)));
        self.emit(AuthStateChange::signed_in(session(1)));
        Ok(session(1))
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, BackendError> {
        let mut url = Url::parse("https://auth.example.com/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn complete_oauth_redirect(&self, _redirect: &Url) -> Result<Session, BackendError> {
        Err(BackendError::Protocol("not scripted".to_string()))
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, BackendError> {
        let mut pending = identity(3);
        pending.display_name = metadata.name.clone();
        Ok(SignUpOutcome::ConfirmationPending(pending))
    }
}

type FetchResult = Result<Option<OrganizationProfile>, BackendError>;

struct FakeProfiles {
    scripted: Mutex<VecDeque<FetchResult>>,
    fallback: FetchResult,
    fetch_delay: Duration,
    fetch_calls: AtomicUsize,
    create_error: Option<BackendError>,
    created: Mutex<Vec<ProfileDraft>>,
}

impl FakeProfiles {
    fn answering(fallback: FetchResult) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback,
            fetch_delay: Duration::ZERO,
            fetch_calls: AtomicUsize::new(0),
            create_error: None,
            created: Mutex::new(Vec::new()),
        }
    }

    fn then(self, result: FetchResult) -> Self {
        self.scripted.lock().expect("lock").push_back(result);
        self
    }

    fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    fn failing_create(mut self, err: BackendError) -> Self {
        self.create_error = Some(err);
        self
    }

    fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileFetcher for FakeProfiles {
    async fn fetch_profile(&self, _identity_id: IdentityId) -> FetchResult {
        tokio::time::sleep(self.fetch_delay).await;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().expect("lock").pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    async fn create_profile(
        &self,
        identity_id: IdentityId,
        draft: &ProfileDraft,
    ) -> Result<OrganizationProfile, BackendError> {
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        self.created.lock().expect("lock").push(draft.clone());
        Ok(CompanyRow::from_draft(identity_id, draft).into())
    }
}

struct Harness {
    oracle: Arc<FakeOracle>,
    profiles: Arc<FakeProfiles>,
    store: Arc<MemoryCredentialStore>,
}

impl Harness {
    fn new(oracle: FakeOracle, profiles: FakeProfiles, store: MemoryCredentialStore) -> Self {
        Self {
            oracle: Arc::new(oracle),
            profiles: Arc::new(profiles),
            store: Arc::new(store),
        }
    }

    fn sequencer(&self) -> BootstrapSequencer {
        BootstrapSequencer::new(
            self.oracle.clone(),
            self.profiles.clone(),
            self.store.clone(),
        )
        .with_options(SequencerOptions {
            profile_retry_delay: Duration::from_millis(10),
        })
    }

    async fn cache(&self) -> CachedCredentials {
        self.store.load().await.expect("load cache")
    }
}

async fn wait_for_phase(handle: &SequencerHandle, phase: Phase) -> BootstrapState {
    let mut watch = handle.watch();
    let state = tokio::time::timeout(WAIT, watch.wait_for(|state| state.phase() == phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {phase:?}, at {:?}", handle.state()))
        .expect("sequencer alive")
        .clone();
    state
}

async fn wait_for_cache(
    store: &MemoryCredentialStore,
    condition: impl Fn(&CachedCredentials) -> bool,
) -> CachedCredentials {
    tokio::time::timeout(WAIT, async {
        loop {
            let cache = store.load().await.expect("load cache");
            if condition(&cache) {
                return cache;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("credential cache never reached the expected contents")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn drain(transitions: &mut broadcast::Receiver<StateTransition>) -> Vec<(Phase, Phase)> {
    let mut seen = Vec::new();
    loop {
        match transitions.try_recv() {
            Ok(transition) => seen.push((transition.from.phase(), transition.to.phase())),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[tokio::test]
async fn cold_start_with_session_and_profile_goes_loading_then_main_app() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::new(),
    );
    let sequencer = harness.sequencer();
    let mut transitions = sequencer.subscribe_transitions();
    let handle = sequencer.start().await;
    assert_eq!(handle.state(), BootstrapState::Loading);

    let state = wait_for_phase(&handle, Phase::Ready).await;
    assert_eq!(state.profile(), Some(&profile(1)));
    assert_eq!(drain(&mut transitions), vec![(Phase::Loading, Phase::Ready)]);

    let cache = harness.cache().await;
    assert_eq!(cache.session, Some(session(1)));
    assert_eq!(cache.profile, Some(profile(1)));
    handle.shutdown().await;
}

#[tokio::test]
async fn cold_start_without_session_goes_loading_then_login() {
    let harness = Harness::new(
        FakeOracle::new(Ok(None)),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::new(),
    );
    let sequencer = harness.sequencer();
    let mut transitions = sequencer.subscribe_transitions();
    let handle = sequencer.start().await;

    wait_for_phase(&handle, Phase::LoggedOut).await;
    assert_eq!(
        drain(&mut transitions),
        vec![(Phase::Loading, Phase::LoggedOut)]
    );
    assert_eq!(harness.profiles.fetch_calls(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn warm_start_renders_cached_profile_without_visible_transition() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let sequencer = harness.sequencer();
    let mut transitions = sequencer.subscribe_transitions();
    let handle = sequencer.start().await;

    assert_eq!(handle.state().phase(), Phase::Ready);
    assert_eq!(
        *harness.oracle.adopted.lock().expect("lock"),
        Some(session(1))
    );

    let profiles = harness.profiles.clone();
    wait_until(move || profiles.fetch_calls() == 1).await;
    tokio::time::sleep(SETTLE).await;

    assert!(drain(&mut transitions).is_empty());
    assert_eq!(handle.state().profile(), Some(&profile(1)));
    handle.shutdown().await;
}

#[tokio::test]
async fn transient_fetch_failures_keep_cached_profile() {
    let offline = || Err(BackendError::Transport("connection reset".to_string()));
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(offline()).then(offline()),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let sequencer = harness.sequencer();
    let mut transitions = sequencer.subscribe_transitions();
    let handle = sequencer.start().await;

    let profiles = harness.profiles.clone();
    wait_until(move || profiles.fetch_calls() == 2).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.profiles.fetch_calls(), 2, "exactly one retry");
    assert_eq!(handle.state().profile(), Some(&profile(1)));
    assert!(drain(&mut transitions).is_empty());
    assert_eq!(harness.cache().await.profile, Some(profile(1)));
    handle.shutdown().await;
}

#[tokio::test]
async fn definitive_not_found_leads_to_onboarding_despite_cache() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let handle = harness.sequencer().start().await;

    let state = wait_for_phase(&handle, Phase::Onboarding).await;
    assert_eq!(
        state,
        BootstrapState::Onboarding {
            identity: identity(1),
            notice: None,
        }
    );
    wait_for_cache(&harness.store, |cache| {
        cache.session == Some(session(1)) && cache.profile.is_none()
    })
    .await;
    handle.shutdown().await;
}

#[tokio::test]
async fn onboarding_completion_reaches_main_app_and_fills_cache() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;
    wait_for_phase(&handle, Phase::Onboarding).await;

    let created = handle
        .complete_onboarding(&draft())
        .await
        .expect("profile created");
    assert_eq!(created, profile(1));

    // Acknowledged only after the cache write, so no waiting here.
    assert_eq!(
        handle.state(),
        BootstrapState::Ready {
            identity: identity(1),
            profile: profile(1),
        }
    );
    assert_eq!(harness.cache().await.profile, Some(profile(1)));
    assert_eq!(harness.profiles.created.lock().expect("lock").len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn onboarding_permission_denied_is_actionable_and_stays_on_onboarding() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(None)).failing_create(BackendError::PermissionDenied(
            "new row violates row-level security policy for table \"companies\"".to_string(),
        )),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;
    wait_for_phase(&handle, Phase::Onboarding).await;

    let err = handle
        .complete_onboarding(&draft())
        .await
        .expect_err("insert refused");
    let OnboardingError::PermissionDenied(message) = &err else {
        panic!("expected permission denied, got {err:?}");
    };
    assert!(message.contains("SELECT and INSERT"));
    assert_eq!(handle.state().phase(), Phase::Onboarding);
    assert_eq!(harness.cache().await.profile, None);
    handle.shutdown().await;
}

#[tokio::test]
async fn invalid_onboarding_form_never_reaches_backend() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;
    wait_for_phase(&handle, Phase::Onboarding).await;

    let mut incomplete = draft();
    incomplete.tax_id.clear();
    let err = handle
        .complete_onboarding(&incomplete)
        .await
        .expect_err("validation fails");
    assert!(matches!(err, OnboardingError::Invalid(_)));
    assert!(harness.profiles.created.lock().expect("lock").is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn onboarding_requires_a_signed_in_identity() {
    let harness = Harness::new(
        FakeOracle::new(Ok(None)),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;
    wait_for_phase(&handle, Phase::LoggedOut).await;

    assert_eq!(
        handle.complete_onboarding(&draft()).await,
        Err(OnboardingError::NotSignedIn)
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn password_sign_in_drives_state_through_auth_event() {
    let harness = Harness::new(
        FakeOracle::new(Ok(None)),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;
    wait_for_phase(&handle, Phase::LoggedOut).await;

    let err = handle
        .sign_in_with_password(&SignInForm::new("not-an-email", PASSWORD))
        .await
        .expect_err("invalid form");
    assert!(matches!(err, AuthFormError::Invalid(_)));
    assert_eq!(harness.oracle.sign_in_calls.load(Ordering::SeqCst), 0);

    let err = handle
        .sign_in_with_password(&SignInForm::new("user1@example.com", "wrong"))
        .await
        .expect_err("bad password");
    assert!(matches!(
        err,
        AuthFormError::Backend(BackendError::Rejected { status: 400, .. })
    ));
    assert_eq!(handle.state().phase(), Phase::LoggedOut);

    handle
        .sign_in_with_password(&SignInForm::new(" user1@example.com ", PASSWORD))
        .await
        .expect("signed in");
    let state = wait_for_phase(&handle, Phase::Ready).await;
    assert_eq!(state.identity(), Some(&identity(1)));
    handle.shutdown().await;
}

#[tokio::test]
async fn sign_up_and_oauth_go_through_the_oracle() {
    let harness = Harness::new(
        FakeOracle::new(Ok(None)),
        FakeProfiles::answering(Ok(None)),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;

    let form = SignUpForm {
        name: "Ana Souza".to_string(),
        email: "ana@example.com".to_string(),
        password: PASSWORD.to_string(),
        confirm_password: PASSWORD.to_string(),
        ..SignUpForm::default()
    };
    let outcome = handle.sign_up(&form).await.expect("signed up");
    let SignUpOutcome::ConfirmationPending(pending) = outcome else {
        panic!("expected confirmation pending");
    };
    assert_eq!(pending.display_name, "Ana Souza");

    let redirect = Url::parse("http://localhost:3000/").expect("url");
    let authorize = handle
        .oauth_authorize_url(OAuthProvider::Google, &redirect)
        .await
        .expect("authorize url");
    assert!(authorize.query_pairs().any(|(k, v)| k == "provider" && v == "google"));
    handle.shutdown().await;
}

#[tokio::test]
async fn sign_out_is_local_first_even_when_remote_fails() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))).failing_sign_out(),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let handle = harness.sequencer().start().await;
    assert_eq!(handle.state().phase(), Phase::Ready);

    handle.sign_out().await;

    assert_eq!(handle.state(), BootstrapState::LoggedOut);
    assert!(harness.cache().await.is_empty());
    assert_eq!(harness.oracle.sign_out_calls.load(Ordering::SeqCst), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn backend_signed_out_event_clears_state_and_cache() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let handle = harness.sequencer().start().await;
    let profiles = harness.profiles.clone();
    wait_until(move || profiles.fetch_calls() == 1).await;

    harness.oracle.emit(AuthStateChange::signed_out());

    wait_for_phase(&handle, Phase::LoggedOut).await;
    wait_for_cache(&harness.store, CachedCredentials::is_empty).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn late_session_query_cannot_override_sign_in_event() {
    let harness = Harness::new(
        FakeOracle::new(Ok(None)).with_query_delay(Duration::from_millis(150)),
        FakeProfiles::answering(Ok(Some(profile(2)))),
        MemoryCredentialStore::new(),
    );
    let handle = harness.sequencer().start().await;

    harness.oracle.emit(AuthStateChange::signed_in(session(2)));
    wait_for_phase(&handle, Phase::Ready).await;

    tokio::time::sleep(Duration::from_millis(150) + SETTLE).await;
    assert_eq!(handle.state().identity(), Some(&identity(2)));
    handle.shutdown().await;
}

#[tokio::test]
async fn render_failure_is_fatal_and_reload_recovers_from_cache() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(Some(profile(1)))),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let handle = harness.sequencer().start().await;

    handle.report_render_failure("dashboard panicked").await;
    let state = wait_for_phase(&handle, Phase::Fatal).await;
    assert_eq!(
        state,
        BootstrapState::Fatal {
            message: "dashboard panicked".to_string()
        }
    );
    handle.shutdown().await;

    let reloaded = harness.sequencer().start().await;
    assert_eq!(reloaded.state().profile(), Some(&profile(1)));
    reloaded.shutdown().await;
}

#[tokio::test]
async fn results_arriving_after_shutdown_are_dropped() {
    let harness = Harness::new(
        FakeOracle::new(Ok(Some(session(1)))),
        FakeProfiles::answering(Ok(None)).with_fetch_delay(Duration::from_millis(50)),
        MemoryCredentialStore::seeded(Some(session(1)), Some(profile(1))),
    );
    let handle = harness.sequencer().start().await;
    handle.shutdown().await;

    let profiles = harness.profiles.clone();
    wait_until(move || profiles.fetch_calls() == 1).await;
    tokio::time::sleep(SETTLE).await;

    // A delivered "not found" would have removed the cached profile.
    assert_eq!(harness.cache().await.profile, Some(profile(1)));
}

#[tokio::test]
async fn unreadable_cache_is_treated_as_empty() {
    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn load(&self) -> anyhow::Result<CachedCredentials> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn save(
            &self,
            _session: Option<&Session>,
            _profile: Option<&OrganizationProfile>,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }

        async fn clear(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    let sequencer = BootstrapSequencer::new(
        Arc::new(FakeOracle::new(Ok(Some(session(1))))),
        Arc::new(FakeProfiles::answering(Ok(Some(profile(1))))),
        Arc::new(BrokenStore),
    );
    let handle = sequencer.start().await;
    assert_eq!(handle.state(), BootstrapState::Loading);
    wait_for_phase(&handle, Phase::Ready).await;
    handle.shutdown().await;
}
