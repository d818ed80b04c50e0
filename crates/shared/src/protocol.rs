//! Wire types exchanged with the hosted auth and table endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    EntityType, Identity, IdentityId, OrganizationProfile, ProfileDraft, ProfileId, Session,
};

/// Display name used when the auth provider supplied none (typical for OAuth).
pub const DEFAULT_DISPLAY_NAME: &str = "Usuário Google";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthStateChange {
    pub fn signed_in(session: Session) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            session: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: IdentityId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl AuthUser {
    pub fn to_identity(&self) -> Identity {
        let display_name = [
            self.user_metadata.full_name.as_deref(),
            self.user_metadata.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(DEFAULT_DISPLAY_NAME)
        .to_string();

        Identity {
            id: self.id,
            display_name,
            email: self.email.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

#[derive(Debug, Serialize)]
pub struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignUpRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub data: &'a SignUpMetadata,
}

/// Sign-up answers with a full session when e-mail confirmation is off,
/// and with the bare user otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

/// Row of the `companies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProfileId>,
    pub owner_id: IdentityId,
    pub razao_social: String,
    pub nome_fantasia: String,
    pub cnpj: String,
    pub email: String,
    pub telefone: String,
    #[serde(default)]
    pub endereco: Option<String>,
    #[serde(default)]
    pub brand_color: Option<String>,
    #[serde(default)]
    pub tipo_empresa: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CompanyRow {
    pub fn from_draft(owner_id: IdentityId, draft: &ProfileDraft) -> Self {
        Self {
            id: None,
            owner_id,
            razao_social: draft.legal_name.trim().to_string(),
            nome_fantasia: draft.trade_name.trim().to_string(),
            cnpj: draft.tax_id.trim().to_string(),
            email: draft.email.trim().to_string(),
            telefone: draft.phone.trim().to_string(),
            endereco: draft.normalized_address(),
            brand_color: Some(draft.brand_color_or_default().to_string()),
            tipo_empresa: draft.entity_type,
            created_at: None,
        }
    }
}

impl From<CompanyRow> for OrganizationProfile {
    fn from(row: CompanyRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            legal_name: row.razao_social,
            trade_name: row.nome_fantasia,
            tax_id: row.cnpj,
            email: row.email,
            phone: row.telefone,
            address: row.endereco,
            brand_color: row
                .brand_color
                .filter(|color| !color.trim().is_empty())
                .unwrap_or_else(|| crate::domain::DEFAULT_BRAND_COLOR.to_string()),
            entity_type: row.tipo_empresa,
            created_at: row.created_at,
        }
    }
}

/// Error body of either endpoint family. Auth endpoints use
/// `error`/`error_description` or `msg`, table endpoints use `code`/`message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ErrorBody {
    /// Database/auth error code as text; numeric codes are stringified.
    pub fn code(&self) -> Option<String> {
        match self.code.as_ref()? {
            serde_json::Value::String(code) => Some(code.clone()),
            serde_json::Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        [
            self.message.as_deref(),
            self.msg.as_deref(),
            self.error_description.as_deref(),
            self.error.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
    }
}
