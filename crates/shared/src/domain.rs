use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(IdentityId);
id_newtype!(ProfileId);

/// Brand color applied to quotes when the company never picked one.
pub const DEFAULT_BRAND_COLOR: &str = "#2563eb";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntityType {
    #[default]
    #[serde(rename = "pessoa_juridica")]
    Company,
    #[serde(rename = "pessoa_fisica")]
    Individual,
}

impl EntityType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProfileId>,
    pub owner_id: IdentityId,
    pub legal_name: String,
    pub trade_name: String,
    pub tax_id: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub brand_color: String,
    #[serde(default)]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Onboarding form contents before the backend assigns ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub legal_name: String,
    pub trade_name: String,
    pub tax_id: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub brand_color: Option<String>,
    pub entity_type: EntityType,
}

impl ProfileDraft {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            email: identity.email.clone(),
            ..Self::default()
        }
    }

    pub fn brand_color_or_default(&self) -> &str {
        self.brand_color
            .as_deref()
            .map(str::trim)
            .filter(|color| !color.is_empty())
            .unwrap_or(DEFAULT_BRAND_COLOR)
    }

    /// Address with surrounding whitespace removed; blank counts as absent.
    pub fn normalized_address(&self) -> Option<String> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn identity_id(&self) -> IdentityId {
        self.identity.id
    }

    /// Sessions without a known expiry are never considered expired locally.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - leeway <= now)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
