//! Canonical user profile.
//!
//! The auth endpoints are not consistent about field naming: the same
//! profile may arrive with `first_name` or `firstName`, `is_admin` or
//! `isAdmin`, and sometimes both. [`ProfilePayload`] accepts every spelling
//! and [`User::from`] folds it into one canonical record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::email::Email;

/// A user profile exactly as the server sent it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePayload {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default, rename = "firstName")]
    first_name_camel: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default, rename = "lastName")]
    last_name_camel: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    is_admin: Option<bool>,
    #[serde(default, rename = "isAdmin")]
    is_admin_camel: Option<bool>,
    #[serde(default)]
    is_verified: Option<bool>,
    #[serde(default, rename = "isVerified")]
    is_verified_camel: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// The canonical user record held by an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Stable server identifier (`resource_id`, falling back to `id`).
    pub id: Option<String>,
    pub username: Option<String>,
    /// Normalized email; absent if the server sent none or an invalid one.
    pub email: Option<Email>,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub is_admin: bool,
    /// Whether the account's email has been verified.
    pub is_verified: bool,
    /// Any fields this client does not model, kept verbatim.
    pub extra: Map<String, Value>,
}

impl User {
    /// "First Last", or `"User"` when neither name is known.
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            "User".to_string()
        } else {
            name.to_string()
        }
    }

    /// Uppercase initials of first and last name, or `"U"` when unknown.
    #[must_use]
    pub fn initials(&self) -> String {
        let initials: String = [&self.first_name, &self.last_name]
            .iter()
            .filter_map(|part| part.chars().next())
            .flat_map(char::to_uppercase)
            .collect();
        if initials.is_empty() {
            "U".to_string()
        } else {
            initials
        }
    }
}

/// First non-empty string among the candidates.
fn first_non_empty(candidates: [Option<String>; 2]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

impl From<ProfilePayload> for User {
    fn from(raw: ProfilePayload) -> Self {
        let id = raw
            .resource_id
            .filter(|id| !id.is_empty())
            .or_else(|| match raw.id {
                Some(Value::String(id)) => Some(id),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            });

        Self {
            id,
            username: raw.username.filter(|name| !name.is_empty()),
            email: raw.email.and_then(|email| Email::parse(&email).ok()),
            first_name: first_non_empty([raw.first_name, raw.first_name_camel])
                .unwrap_or_default(),
            last_name: first_non_empty([raw.last_name, raw.last_name_camel]).unwrap_or_default(),
            avatar: raw.avatar.filter(|avatar| !avatar.trim().is_empty()),
            is_admin: raw.is_admin_camel.or(raw.is_admin).unwrap_or(false),
            is_verified: raw.is_verified_camel.or(raw.is_verified).unwrap_or(false),
            extra: raw.extra,
        }
    }
}
