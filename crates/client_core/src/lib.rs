pub mod backend;
pub mod bootstrap;
pub mod error;
pub mod forms;
pub mod oracle;
pub mod sequencer;
pub mod session;

pub use backend::{BackendConfig, HostedBackend};
pub use bootstrap::{
    Bootstrap, BootstrapEvent, BootstrapState, Effect, FetchFailure, FetchOutcome, Phase,
    ProfileRequest, SessionResolution,
};
pub use error::BackendError;
pub use forms::{
    AuthFormError, FieldError, FieldErrors, OnboardingError, SignInForm, SignUpForm,
};
pub use oracle::{
    AuthSubscription, OAuthProvider, ProfileFetcher, SessionOracle, SignUpOutcome,
};
pub use sequencer::{
    BootstrapSequencer, SequencerHandle, SequencerOptions, StateTransition,
    DEFAULT_PROFILE_RETRY_DELAY,
};
