use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission strings that grant every capability.
pub const WILDCARD_PERMISSIONS: [&str; 2] = ["*", "admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Inactive,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStatus::Active => write!(f, "active"),
            TokenStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TokenStatus::Active),
            "inactive" | "revoked" => Ok(TokenStatus::Inactive),
            other => Err(format!("unknown token status '{}'", other)),
        }
    }
}

/// How a token with an empty permission set is treated.
///
/// `AllowAll` keeps the historical behavior where an unscoped token can do
/// anything. `DenyAll` makes empty sets grant nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPermissionPolicy {
    #[default]
    AllowAll,
    DenyAll,
}

impl FromStr for EmptyPermissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" | "allow_all" | "allow-all" => Ok(Self::AllowAll),
            "deny" | "deny_all" | "deny-all" => Ok(Self::DenyAll),
            other => Err(format!("expected 'allow' or 'deny', got '{}'", other)),
        }
    }
}

/// An issued credential record. Never holds the plaintext secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_data: Option<String>,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    /// Active and not expired.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && !self.is_expired_at(now)
    }

    pub fn grants(&self, required: &str, policy: EmptyPermissionPolicy) -> bool {
        if self.permissions.is_empty() {
            return policy == EmptyPermissionPolicy::AllowAll;
        }
        self.permissions.contains(required)
            || WILDCARD_PERMISSIONS
                .iter()
                .any(|w| self.permissions.contains(*w))
    }

    /// Apply the mutable subset of fields. `id`, `secret_hash`, `created_at`
    /// and `expires_at` are fixed at creation.
    pub fn apply(&mut self, update: TokenUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(permissions) = update.permissions {
            self.permissions = permissions;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(aux) = update.auxiliary_data {
            self.auxiliary_data = aux;
        }
    }
}

/// Caller-supplied metadata for a new token.
#[derive(Debug, Clone, Default)]
pub struct NewToken {
    /// Generated when absent.
    pub id: Option<String>,
    /// Defaults to the id when absent.
    pub name: Option<String>,
    pub permissions: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auxiliary_data: Option<String>,
}

impl NewToken {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn auxiliary_data(mut self, data: impl Into<String>) -> Self {
        self.auxiliary_data = Some(data.into());
        self
    }
}

/// Partial update. `None` leaves a field unchanged; for `auxiliary_data`,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TokenUpdate {
    pub name: Option<String>,
    pub permissions: Option<BTreeSet<String>>,
    pub status: Option<TokenStatus>,
    pub auxiliary_data: Option<Option<String>>,
}

impl TokenUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.permissions.is_none()
            && self.status.is_none()
            && self.auxiliary_data.is_none()
    }
}

/// Parse a comma-separated permission list, dropping blanks.
pub fn parse_permissions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
