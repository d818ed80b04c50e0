//! Inline validation of the sign-in, sign-up and onboarding forms.
//!
//! Validation runs before any network call; a form that fails it never
//! reaches the backend.

use std::fmt;

use shared::{domain::ProfileDraft, protocol::SignUpMetadata};
use thiserror::Error;

use crate::error::BackendError;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("e-mail address is not valid")]
    InvalidEmail,
    #[error("password must have at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("brand color must look like #rrggbb")]
    InvalidColor,
}

/// Every field problem found in one pass over a form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, error: &FieldError) -> bool {
        self.0.contains(error)
    }

    fn require(&mut self, field: &'static str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.0.push(FieldError::Required(field));
            return false;
        }
        true
    }

    fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFormError {
    #[error("{0}")]
    Invalid(#[from] FieldErrors),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnboardingError {
    #[error("{0}")]
    Invalid(#[from] FieldErrors),
    #[error("sign in before registering a company")]
    NotSignedIn,
    #[error("company registration is not pending")]
    NotOnboarding,
    #[error("{0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for OnboardingError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied(_) => Self::PermissionDenied(
                "permission denied by row-level security: make sure the SELECT and INSERT \
                 policies of the companies table are installed for authenticated users"
                    .to_string(),
            ),
            BackendError::Unauthorized => Self::NotSignedIn,
            other => Self::Backend(other),
        }
    }
}

/// Shape check only: one `@`, non-empty local part, dotted domain, no spaces.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    if errors.require("email", email) && !is_valid_email(email) {
        errors.0.push(FieldError::InvalidEmail);
    }
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    if password.is_empty() {
        errors.0.push(FieldError::Required("password"));
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.0.push(FieldError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        check_email(&mut errors, &self.email);
        if self.password.is_empty() {
            errors.0.push(FieldError::Required("password"));
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub document: Option<String>,
    pub whatsapp: Option<String>,
    pub website: Option<String>,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.require("name", &self.name);
        check_email(&mut errors, &self.email);
        check_password(&mut errors, &self.password);
        if self.password != self.confirm_password {
            errors.0.push(FieldError::PasswordMismatch);
        }
        errors.into_result()
    }

    pub fn metadata(&self) -> SignUpMetadata {
        SignUpMetadata {
            name: self.name.trim().to_string(),
            document: non_blank(self.document.as_deref()),
            phone: non_blank(self.whatsapp.as_deref()),
            website: non_blank(self.website.as_deref()),
        }
    }
}

pub fn validate_profile_draft(draft: &ProfileDraft) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();
    errors.require("legal name", &draft.legal_name);
    errors.require("trade name", &draft.trade_name);
    errors.require("tax id", &draft.tax_id);
    check_email(&mut errors, &draft.email);
    errors.require("phone", &draft.phone);
    if let Some(color) = non_blank(draft.brand_color.as_deref()) {
        if !is_hex_color(&color) {
            errors.0.push(FieldError::InvalidColor);
        }
    }
    errors.into_result()
}

/// `#` followed by exactly six hex digits.
pub fn is_hex_color(color: &str) -> bool {
    color
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "tests/forms_tests.rs"]
mod tests;
