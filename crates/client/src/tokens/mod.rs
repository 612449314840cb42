//! Credential ownership.
//!
//! [`TokenStore`] holds the access/refresh pair and answers presence and
//! expiry questions about it. It performs no validation; only the session
//! manager writes to it.

mod jwt;
mod storage;

pub use jwt::decode_expiry;
pub use storage::{CredentialStorage, FileStorage, MemoryStorage, StorageError, StoredCredentials};

#[cfg(test)]
pub(crate) use jwt::tests::token_with;

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// How close to expiry a token may get before it is refreshed.
pub const DEFAULT_REFRESH_HORIZON: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct CredentialPair {
    access: Option<SecretString>,
    refresh: Option<SecretString>,
}

impl CredentialPair {
    fn from_stored(stored: StoredCredentials) -> Self {
        Self {
            access: stored.access_token.map(SecretString::from),
            refresh: stored.refresh_token.map(SecretString::from),
        }
    }

    fn to_stored(&self) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access.as_ref().map(|t| t.expose_secret().to_string()),
            refresh_token: self.refresh.as_ref().map(|t| t.expose_secret().to_string()),
        }
    }
}

/// The credential pair and its persistence.
pub struct TokenStore {
    pair: RwLock<CredentialPair>,
    storage: Box<dyn CredentialStorage>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_access_token", &self.is_authenticated())
            .field("has_refresh_token", &self.refresh_token().is_some())
            .field("expiry", &self.expiry())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Create a store, loading any pair already persisted in `storage`.
    ///
    /// A storage read failure is logged and treated as "no credentials".
    #[must_use]
    pub fn new(storage: impl CredentialStorage + 'static) -> Self {
        let pair = match storage.load() {
            Ok(stored) => CredentialPair::from_stored(stored),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load stored credentials");
                CredentialPair::default()
            }
        };

        Self {
            pair: RwLock::new(pair),
            storage: Box::new(storage),
        }
    }

    /// Overwrite the tokens. `None` leaves that token unchanged.
    pub fn set_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>) {
        let stored = {
            let mut pair = self.pair.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(access) = access {
                pair.access = Some(access);
            }
            if let Some(refresh) = refresh {
                pair.refresh = Some(refresh);
            }
            pair.to_stored()
        };

        if let Err(e) = self.storage.save(&stored) {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Remove both tokens. Idempotent.
    pub fn clear(&self) {
        *self.pair.write().unwrap_or_else(PoisonError::into_inner) = CredentialPair::default();

        if let Err(e) = self.storage.clear() {
            tracing::warn!(error = %e, "Failed to clear stored credentials");
        }
    }

    /// Whether an access token is present. Says nothing about its validity.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read(|pair| pair.access.is_some())
    }

    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.read(|pair| pair.access.clone())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.read(|pair| pair.refresh.clone())
    }

    /// Expiry encoded in the access token, if it carries one.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.read(|pair| {
            pair.access
                .as_ref()
                .and_then(|token| decode_expiry(token.expose_secret()))
        })
    }

    /// Whether the access token's expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the access token expires within `horizon` from now.
    ///
    /// False when the expiry cannot be decoded: such tokens are assumed
    /// valid until the server says otherwise.
    #[must_use]
    pub fn needs_refresh(&self, horizon: Duration) -> bool {
        self.needs_refresh_at(horizon, Utc::now())
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|expiry| expiry <= now)
    }

    pub(crate) fn needs_refresh_at(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        let horizon = chrono::Duration::from_std(horizon).unwrap_or(chrono::TimeDelta::MAX);
        self.expiry()
            .is_some_and(|expiry| now.checked_add_signed(horizon).is_none_or(|edge| expiry <= edge))
    }

    fn read<T>(&self, f: impl FnOnce(&CredentialPair) -> T) -> T {
        f(&self.pair.read().unwrap_or_else(PoisonError::into_inner))
    }
}
