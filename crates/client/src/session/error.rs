//! Session error types.

use shopsync_core::User;
use thiserror::Error;

use crate::api::{ApiError, FieldErrors};

/// Why a session operation failed.
///
/// Carried by `SessionStatus::Failed` and returned from the operations
/// themselves, so it is cheap to clone and comparable in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Wrong email or password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account exists but its email is not verified yet.
    #[error("Email verification required for {}", .0.display_name())]
    VerificationRequired(Box<User>),

    /// The server rejected individual form fields.
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// The account already exists (409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The server could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The server failed or answered something unexpected.
    #[error("Server error: {0}")]
    Server(String),

    /// Credentials were rejected even after a refresh.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// A refresh was needed but no refresh token is stored.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The operation needs a signed-in session.
    #[error("Not signed in")]
    NotAuthenticated,

    /// A logout or another sign-in replaced the session while this
    /// operation was in flight; its result was discarded.
    #[error("Session changed while the request was in flight")]
    Superseded,
}

impl SessionError {
    /// Map a failed login or registration. A 401 here means bad credentials.
    #[must_use]
    pub fn from_credentials_failure(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => Self::InvalidCredentials,
            other => other.into(),
        }
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(message) => Self::Network(message),
            ApiError::Unauthorized(_) => Self::SessionExpired,
            ApiError::Conflict(message) => Self::Conflict(message),
            ApiError::Validation(fields) => Self::Validation(fields),
            ApiError::Server { message, .. }
            | ApiError::Rejected { message, .. }
            | ApiError::Decode(message) => Self::Server(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_depends_on_context() {
        let err = ApiError::Unauthorized("nope".into());
        assert_eq!(
            SessionError::from_credentials_failure(err.clone()),
            SessionError::InvalidCredentials
        );
        assert_eq!(SessionError::from(err), SessionError::SessionExpired);
    }

    #[test]
    fn test_transport_mapping() {
        assert_eq!(
            SessionError::from(ApiError::Network("timeout".into())),
            SessionError::Network("timeout".into())
        );
        assert_eq!(
            SessionError::from(ApiError::Server {
                status: 502,
                message: "bad gateway".into()
            }),
            SessionError::Server("bad gateway".into())
        );
        assert!(matches!(
            SessionError::from_credentials_failure(ApiError::Conflict("email taken".into())),
            SessionError::Conflict(_)
        ));
    }
}
