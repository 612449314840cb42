//! Resource store error types.

use shopsync_core::LocalId;
use thiserror::Error;

use crate::api::{ApiError, ResourceKind};
use crate::session::SessionError;

/// Why a collection operation was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Collections can only be changed while signed in.
    #[error("Sign in to change this collection")]
    NotAuthenticated,

    /// Quantities start at 1.
    #[error("Quantity must be at least 1 (got {0})")]
    InvalidQuantity(i64),

    /// The line or collection total would exceed the representable amount.
    #[error("Total is too large")]
    AmountOverflow,

    /// The operation does not exist for this collection.
    #[error("{kind} does not support {operation}")]
    Unsupported {
        kind: ResourceKind,
        operation: &'static str,
    },

    /// The item has a request in flight that this operation depends on.
    #[error("Item {0} is still syncing")]
    ItemBusy(LocalId),

    /// No credentials could be obtained for the request.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The server rejected or failed the request.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The session ended while the request was in flight; its result was
    /// discarded.
    #[error("Session changed while the request was in flight")]
    SessionChanged,

    /// The operation was called outside a tokio runtime.
    #[error("No async runtime available to run the request")]
    NoRuntime,

    /// The background task running the request panicked or was cancelled.
    #[error("Sync task ended unexpectedly: {0}")]
    Aborted(String),
}

impl StoreError {
    /// Whether the server reported a conflicting write.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Api(ApiError::Conflict(_)))
    }
}
