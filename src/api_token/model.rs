/// API token data model
///
/// Storage records (`ApiToken`, `Permission`), write payloads for the
/// persistence collaborator, caller-facing attribute sets and the public
/// projections returned by every operation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Permission model a token carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    ReadOnly,
    FullAccess,
    Custom,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::ReadOnly => "read-only",
            TokenType::FullAccess => "full-access",
            TokenType::Custom => "custom",
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, TokenType::Custom)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(TokenType::ReadOnly),
            "full-access" => Ok(TokenType::FullAccess),
            "custom" => Ok(TokenType::Custom),
            _ => Err(ValidationError::InvalidFormat("type".to_string())),
        }
    }
}

/// Stored token row. Carries the access key hash, so it never leaves the crate
/// boundary as a response; see [`ApiTokenView`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiToken {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub token_type: TokenType,
    pub access_key_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Stored permission row, owned by one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: Uuid,
    pub token_id: Uuid,
    pub action: String,
}

/// Token row to insert; the store assigns `id` and `created_at`
#[derive(Debug, Clone)]
pub struct NewApiToken {
    pub name: String,
    pub description: Option<String>,
    pub token_type: TokenType,
    pub access_key_hash: String,
}

/// Attribute changes applied by the store; `None` leaves a column untouched.
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default)]
pub struct TokenChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub token_type: Option<TokenType>,
}

/// Lookup filter. Unset fields do not constrain the match.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenCriteria {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub token_type: Option<TokenType>,
    #[serde(skip)]
    pub access_key_hash: Option<String>,
}

impl TokenCriteria {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_access_key_hash(hash: impl Into<String>) -> Self {
        Self {
            access_key_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.name.is_none()
            && self.token_type.is_none()
            && self.access_key_hash.is_none()
    }

    pub fn matches(&self, token: &ApiToken) -> bool {
        self.id.map_or(true, |id| token.id == id)
            && self.name.as_ref().map_or(true, |name| &token.name == name)
            && self.token_type.map_or(true, |t| token.token_type == t)
            && self
                .access_key_hash
                .as_ref()
                .map_or(true, |hash| &token.access_key_hash == hash)
    }
}

/// Sort order for `find_many`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Name,
    CreatedAt,
}

/// Attributes accepted by `create`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiToken {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub permissions: Option<Vec<String>>,
}

/// Attributes accepted by `update`; absent fields keep their stored value.
/// A blank `description` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiToken {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub token_type: Option<TokenType>,
    pub permissions: Option<Vec<String>>,
}

/// Public projection of a token: no hash, no plaintext
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTokenView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

impl ApiTokenView {
    /// Projects a stored token. Permissions are only attached to custom tokens,
    /// sorted by action.
    pub fn project(token: &ApiToken, permissions: &[Permission]) -> Self {
        let permissions = token.token_type.is_custom().then(|| {
            let mut actions: Vec<String> = permissions.iter().map(|p| p.action.clone()).collect();
            actions.sort();
            actions
        });

        Self {
            id: token.id,
            name: token.name.clone(),
            description: token.description.clone(),
            token_type: token.token_type,
            created_at: token.created_at,
            permissions,
        }
    }
}

/// Response of `create`: the only place the plaintext access key appears
#[derive(Clone, Serialize, Deserialize)]
pub struct CreatedApiToken {
    #[serde(flatten)]
    pub token: ApiTokenView,
    pub access_key: String,
}

impl fmt::Debug for CreatedApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedApiToken")
            .field("token", &self.token)
            .field("access_key", &"[REDACTED]")
            .finish()
    }
}
