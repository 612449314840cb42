//! Shop API transport.
//!
//! [`StoreApi`] is the seam between the sync layer and the network. The
//! session manager and the resource stores only ever talk to the server
//! through it, which keeps them testable against an in-memory double.
//!
//! # Endpoints
//!
//! | Method                | HTTP                                    |
//! |-----------------------|-----------------------------------------|
//! | `login`               | `POST /auth/login`                      |
//! | `register`            | `POST /auth/register`                   |
//! | `refresh`             | `POST /auth/refresh`                    |
//! | `profile`             | `GET /auth/profile`                     |
//! | `update_profile`      | `PUT /auth/profile`                     |
//! | `logout`              | `POST /auth/logout`                     |
//! | `fetch_collection`    | `GET /cart`, `GET /wishlist`            |
//! | `write_collection`    | `POST/PATCH/DELETE /cart/...`, `/wishlist` |

mod error;
mod http;
mod types;

pub use error::{ApiError, FieldErrors, extract_message};
pub use http::HttpApi;
pub use types::*;

use std::future::Future;

use secrecy::SecretString;
use shopsync_core::User;

/// Remote operations the sync layer depends on.
///
/// Every method is independent and stateless from the caller's point of
/// view; tokens are passed in explicitly.
pub trait StoreApi: Send + Sync + 'static {
    /// Exchange credentials for a token pair and the user's profile.
    fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> impl Future<Output = Result<AuthGrant, ApiError>> + Send;

    /// Create an account. The returned user may still need verification.
    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<AuthGrant, ApiError>> + Send;

    /// Trade a refresh token for a new pair.
    fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> impl Future<Output = Result<TokenPair, ApiError>> + Send;

    /// Fetch the profile of the token's owner.
    fn profile(
        &self,
        access_token: &SecretString,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// Apply a partial profile edit and return the updated profile.
    fn update_profile(
        &self,
        access_token: &SecretString,
        update: &ProfileUpdate,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// Invalidate the token server-side.
    fn logout(
        &self,
        access_token: &SecretString,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Read the whole collection.
    fn fetch_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
    ) -> impl Future<Output = Result<CollectionSnapshot, ApiError>> + Send;

    /// Apply one write and return the collection as it stands afterwards.
    fn write_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
        write: &ResourceWrite,
    ) -> impl Future<Output = Result<CollectionSnapshot, ApiError>> + Send;
}
