//! Error classification for the shell: what kind of failure and where it happened.

use client_core::{AuthFormError, BackendError, OnboardingError};
use shared::error::{ApiError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Auth,
    Permission,
    Transport,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    SignIn,
    SignUp,
    OAuth,
    Onboarding,
    Command,
}

impl UiErrorContext {
    fn label(self) -> &'static str {
        match self {
            Self::SignIn => "sign-in",
            Self::SignUp => "sign-up",
            Self::OAuth => "google sign-in",
            Self::Onboarding => "company registration",
            Self::Command => "command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn new(
        category: UiErrorCategory,
        context: UiErrorContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            context,
            message: message.into(),
        }
    }

    pub fn from_api_error(context: UiErrorContext, error: &ApiError) -> Self {
        let category = match error.code {
            ErrorCode::Unauthorized => UiErrorCategory::Auth,
            ErrorCode::PermissionDenied => UiErrorCategory::Permission,
            ErrorCode::Transport => UiErrorCategory::Transport,
            ErrorCode::Validation | ErrorCode::NotFound => UiErrorCategory::Validation,
            ErrorCode::Internal => UiErrorCategory::Unknown,
        };
        Self::new(category, context, error.message.clone())
    }

    pub fn from_backend(context: UiErrorContext, error: &BackendError) -> Self {
        let mut ui = Self::from_api_error(context, &error.to_api_error());
        // Wrong credentials come back as a plain 400 from the token endpoint.
        if matches!(context, UiErrorContext::SignIn | UiErrorContext::OAuth)
            && matches!(error, BackendError::Rejected { status: 400, .. })
        {
            ui.category = UiErrorCategory::Auth;
        }
        ui
    }

    pub fn from_auth_form(context: UiErrorContext, error: &AuthFormError) -> Self {
        match error {
            AuthFormError::Invalid(fields) => {
                Self::new(UiErrorCategory::Validation, context, fields.to_string())
            }
            AuthFormError::Backend(err) => Self::from_backend(context, err),
        }
    }

    pub fn from_onboarding(error: &OnboardingError) -> Self {
        let context = UiErrorContext::Onboarding;
        match error {
            OnboardingError::Invalid(fields) => {
                Self::new(UiErrorCategory::Validation, context, fields.to_string())
            }
            OnboardingError::NotSignedIn => {
                Self::new(UiErrorCategory::Auth, context, error.to_string())
            }
            OnboardingError::NotOnboarding => {
                Self::new(UiErrorCategory::Validation, context, error.to_string())
            }
            OnboardingError::PermissionDenied(message) => {
                Self::new(UiErrorCategory::Permission, context, message.clone())
            }
            OnboardingError::Backend(err) => Self::from_backend(context, err),
        }
    }

    /// Field problems stay next to the form; everything else gets a banner.
    pub fn is_inline(&self) -> bool {
        self.category == UiErrorCategory::Validation
    }

    pub fn requires_reauth(&self) -> bool {
        self.category == UiErrorCategory::Auth
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.context.label(), self.message)
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
