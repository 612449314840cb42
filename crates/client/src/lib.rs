//! shopsync client library.
//!
//! Client-side state for a storefront: who is signed in, and what is in
//! their cart and wishlist.
//!
//! # Architecture
//!
//! - [`tokens`] - The credential pair, its persistence and JWT expiry
//! - [`session`] - Session state machine; the only writer of tokens
//! - [`store`] - Optimistic collections reconciled against server snapshots
//! - [`orchestrator`] - Clears and reloads the collections on session changes
//! - [`api`] - The [`StoreApi`] seam and its HTTP implementation
//! - [`client`] - One [`Client`] wiring all of the above together
//!
//! # Example
//!
//! ```rust,ignore
//! let client = Client::from_config(&ClientConfig::from_env()?)?;
//! client.start().await;
//!
//! let pending = client.cart().add(NewItem::new(key, 1, price))?;
//! // The cart view already shows the item; the request runs in the background.
//! pending.await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod client;
pub mod config;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod tokens;

pub use api::{ApiError, HttpApi, ResourceKind, StoreApi};
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use session::{
    SessionError, SessionManager, SessionObserver, SessionOptions, SessionState, SessionStatus,
};
pub use store::{CollectionView, NewItem, PendingMutation, ResourceItem, ResourceStore, StoreError};
pub use tokens::TokenStore;
