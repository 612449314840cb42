//! The client context handed to a UI.

use std::sync::Arc;

use crate::api::{HttpApi, ResourceKind, StoreApi};
use crate::config::{ClientConfig, ConfigError};
use crate::orchestrator::Orchestrator;
use crate::session::{SessionManager, SessionOptions, SessionState};
use crate::store::ResourceStore;
use crate::tokens::{FileStorage, MemoryStorage, TokenStore};

/// One session with its cart and wishlist.
///
/// Cheap to clone; clones share all state. Construct one per signed-in
/// context; nothing here is global.
pub struct Client<A> {
    session: SessionManager<A>,
    cart: ResourceStore<A>,
    wishlist: ResourceStore<A>,
    /// Kept alive here; the session only holds it weakly.
    _orchestrator: Arc<Orchestrator<A>>,
}

impl<A> Clone for Client<A> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            cart: self.cart.clone(),
            wishlist: self.wishlist.clone(),
            _orchestrator: Arc::clone(&self._orchestrator),
        }
    }
}

impl<A: StoreApi> Client<A> {
    /// Wire a session and both stores to `api`.
    ///
    /// Nothing is fetched until [`start`](Self::start).
    #[must_use]
    pub fn new(api: A, tokens: TokenStore, options: SessionOptions) -> Self {
        let session = SessionManager::new(Arc::new(api), tokens, options);
        let cart = ResourceStore::new(ResourceKind::Cart, session.clone());
        let wishlist = ResourceStore::new(ResourceKind::Wishlist, session.clone());
        let orchestrator = Arc::new(Orchestrator::new(vec![cart.clone(), wishlist.clone()]));
        session.add_observer(&orchestrator);

        Self {
            session,
            cart,
            wishlist,
            _orchestrator: orchestrator,
        }
    }

    /// Restore the persisted session. A restored session loads both
    /// collections in the background.
    pub async fn start(&self) -> SessionState {
        self.session.restore().await
    }

    #[must_use]
    pub const fn session(&self) -> &SessionManager<A> {
        &self.session
    }

    #[must_use]
    pub const fn cart(&self) -> &ResourceStore<A> {
        &self.cart
    }

    #[must_use]
    pub const fn wishlist(&self) -> &ResourceStore<A> {
        &self.wishlist
    }

    #[must_use]
    pub const fn store(&self, kind: ResourceKind) -> &ResourceStore<A> {
        match kind {
            ResourceKind::Cart => &self.cart,
            ResourceKind::Wishlist => &self.wishlist,
        }
    }
}

impl Client<HttpApi> {
    /// Build an HTTP-backed client from configuration.
    ///
    /// Credentials persist to `token_file` when one is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let api = HttpApi::new(config)?;
        let tokens = match &config.token_file {
            Some(path) => TokenStore::new(FileStorage::new(path)),
            None => TokenStore::new(MemoryStorage::new()),
        };
        let options = SessionOptions {
            refresh_horizon: config.refresh_horizon,
        };
        Ok(Self::new(api, tokens, options))
    }
}
