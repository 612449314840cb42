//! CLI command implementations.

pub mod collection;
pub mod session;

use shopsync_client::{
    Client, ClientConfig, ConfigError, HttpApi, ResourceKind, SessionError, StoreError,
};
use shopsync_core::{EmailError, ItemKey};
use thiserror::Error;

/// Errors that can end a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The client could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The email argument is not an address.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A cart or wishlist operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The command needs a session and none could be restored.
    #[error("Not signed in. Run `shopsync login` first")]
    NotSignedIn,

    /// The product is not in the collection.
    #[error("{0} is not in the {1}")]
    NotFound(ItemKey, ResourceKind),
}

/// Build the client and restore the stored session.
pub async fn connect(config: &ClientConfig) -> Result<Client<HttpApi>, CliError> {
    let client = Client::from_config(config)?;
    let state = client.start().await;
    tracing::debug!(status = state.status.name(), "Session restored");
    Ok(client)
}
