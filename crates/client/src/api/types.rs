//! Request and response types exchanged with a [`StoreApi`](super::StoreApi).
//!
//! These are transport-neutral: [`HttpApi`](super::HttpApi) maps them to and
//! from the JSON bodies, and test doubles construct them directly.

use core::fmt;

use secrecy::SecretString;
use shopsync_core::{Email, ItemKey, LineId, Price, User};

/// Which server-backed collection a store mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cart,
    Wishlist,
}

impl ResourceKind {
    /// Path segment of the collection endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cart => "cart",
            Self::Wishlist => "wishlist",
        }
    }

    /// Whether adding an existing key increments its quantity.
    ///
    /// Wishlist entries have no quantity; adding one twice is a no-op.
    #[must_use]
    pub const fn tracks_quantity(self) -> bool {
        matches!(self, Self::Cart)
    }

    /// Whether removals are addressed by product rather than by server line.
    #[must_use]
    pub const fn removes_by_product(self) -> bool {
        matches!(self, Self::Wishlist)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Email and password for `POST /auth/login`.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub email: Email,
    pub password: SecretString,
}

/// Sign-up form for `POST /auth/register`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: Email,
    pub password: SecretString,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// Partial profile edit for `PUT /auth/profile`.
///
/// Only the fields that are `Some` are sent; the server keeps the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    /// Whether the edit changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.avatar.is_none()
    }
}

/// Access/refresh pair issued by login, register or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    /// Absent when the server keeps the current refresh token valid.
    pub refresh_token: Option<SecretString>,
}

/// Successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub tokens: TokenPair,
    pub user: User,
    /// Optional server message, e.g. "check your inbox".
    pub message: Option<String>,
}

/// One line of a collection as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerItem {
    pub server_id: LineId,
    pub key: ItemKey,
    pub title: Option<String>,
    pub quantity: u32,
    pub unit_price: Price,
}

/// The server's authoritative view of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSnapshot {
    pub items: Vec<ServerItem>,
}

/// A single write against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceWrite {
    /// Add `quantity` of `key`; the server merges into an existing line.
    Add { key: ItemKey, quantity: u32 },
    /// Set the absolute quantity of a line.
    Update { line: LineId, quantity: u32 },
    /// Delete a line. Carts address it by `line`, wishlists by product.
    Remove { line: Option<LineId>, key: ItemKey },
    /// Empty the whole collection.
    Clear,
}

impl ResourceWrite {
    /// Short operation name for logs and breadcrumbs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Clear => "clear",
        }
    }
}
