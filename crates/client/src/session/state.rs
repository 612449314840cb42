//! Session state machine.
//!
//! [`SessionState::apply`] is the whole transition table. It is pure: the
//! manager feeds it events, commits whatever state it returns, and performs
//! side effects (token writes, network calls) around it.

use std::mem;

use shopsync_core::User;

use super::SessionError;

/// Authentication status of the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No usable credentials.
    #[default]
    Unauthenticated,
    /// A login, registration or profile fetch is in flight.
    Authenticating,
    /// Credentials are usable and the profile is loaded.
    Authenticated(User),
    /// The access token was rejected; a refresh is in flight.
    Refreshing,
    /// The last attempt failed and needs user action.
    Failed(SessionError),
}

impl SessionStatus {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Whether `self` and `other` are the same state, ignoring payloads.
    #[must_use]
    pub fn same_phase(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated(_) => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Failed(_) => "failed",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Start (or restart) from persisted credentials.
    Restore { has_access_token: bool },
    ProfileLoaded(User),
    /// The profile request came back 401.
    ProfileRejected,
    /// The profile request failed for any other reason.
    ProfileFailed(SessionError),
    RefreshSucceeded,
    /// Refresh failed or there was no refresh token; tokens are cleared.
    RefreshFailed(SessionError),
    /// Login or registration was submitted.
    CredentialsSubmitted,
    LoginSucceeded(User),
    /// Registration succeeded; the user may still be unverified.
    Registered(User),
    CredentialsRejected(SessionError),
    /// The signed-in user's profile was edited.
    ProfileUpdated(User),
    LoggedOut,
    /// Credentials were rejected after a refresh, or the UI reported expiry.
    Expired,
    ErrorCleared,
}

/// Snapshot published to subscribers after every committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Error of the most recent failed operation, until cleared.
    pub last_error: Option<SessionError>,
    /// Bumped whenever a new authentication attempt starts or the session
    /// ends. Work started under an older epoch must not commit.
    pub epoch: u64,
}

impl SessionState {
    /// The signed-in user, or the unverified user awaiting verification.
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match &self.status {
            SessionStatus::Authenticated(user) => Some(user),
            SessionStatus::Failed(SessionError::VerificationRequired(user)) => Some(user.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.status.is_authenticated()
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Authenticating | SessionStatus::Refreshing
        )
    }

    /// The state after `event`, or `None` if the event does not apply in
    /// the current state.
    #[must_use]
    pub fn apply(&self, event: SessionEvent) -> Option<Self> {
        use SessionEvent as E;
        use SessionStatus as S;

        let same_epoch = |status, last_error| Self {
            status,
            last_error,
            epoch: self.epoch,
        };
        let new_epoch = |status, last_error| Self {
            status,
            last_error,
            epoch: self.epoch.wrapping_add(1),
        };

        let next = match (&self.status, event) {
            (_, E::Restore { has_access_token }) => {
                let status = if has_access_token {
                    S::Authenticating
                } else {
                    S::Unauthenticated
                };
                new_epoch(status, None)
            }
            (S::Authenticating, E::ProfileLoaded(user) | E::LoginSucceeded(user)) => {
                same_epoch(S::Authenticated(user), None)
            }
            (S::Authenticating, E::ProfileRejected) => {
                same_epoch(S::Refreshing, self.last_error.clone())
            }
            (S::Authenticating, E::ProfileFailed(error) | E::CredentialsRejected(error)) => {
                same_epoch(S::Failed(error.clone()), Some(error))
            }
            (S::Refreshing, E::RefreshSucceeded) => {
                same_epoch(S::Authenticating, self.last_error.clone())
            }
            // A proactive refresh while signed in changes nothing visible.
            (S::Authenticated(_), E::RefreshSucceeded) => self.clone(),
            (S::Refreshing | S::Authenticating | S::Authenticated(_), E::RefreshFailed(error)) => {
                new_epoch(S::Unauthenticated, Some(error))
            }
            (_, E::CredentialsSubmitted) => new_epoch(S::Authenticating, None),
            (S::Authenticating, E::Registered(user)) => {
                if user.is_verified {
                    same_epoch(S::Authenticated(user), None)
                } else {
                    let error = SessionError::VerificationRequired(Box::new(user));
                    same_epoch(S::Failed(error.clone()), Some(error))
                }
            }
            (S::Authenticated(_), E::ProfileUpdated(user)) => {
                same_epoch(S::Authenticated(user), self.last_error.clone())
            }
            (_, E::LoggedOut) => new_epoch(S::Unauthenticated, None),
            (_, E::Expired) => new_epoch(
                S::Failed(SessionError::SessionExpired),
                Some(SessionError::SessionExpired),
            ),
            (status, E::ErrorCleared) => same_epoch(status.clone(), None),
            _ => return None,
        };
        Some(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn user(verified: bool) -> User {
        let payload: shopsync_core::ProfilePayload = serde_json::from_value(serde_json::json!({
            "resource_id": "u-1",
            "email": "ada@example.com",
            "first_name": "Ada",
            "is_verified": verified,
        }))
        .unwrap();
        User::from(payload)
    }

    fn state(status: SessionStatus) -> SessionState {
        SessionState {
            status,
            last_error: None,
            epoch: 7,
        }
    }

    #[test]
    fn test_restore() {
        let init = SessionState::default();
        let without = init
            .apply(SessionEvent::Restore {
                has_access_token: false,
            })
            .unwrap();
        assert_eq!(without.status, SessionStatus::Unauthenticated);

        let with = init
            .apply(SessionEvent::Restore {
                has_access_token: true,
            })
            .unwrap();
        assert_eq!(with.status, SessionStatus::Authenticating);
        assert!(with.epoch > init.epoch);
    }

    #[test]
    fn test_profile_paths() {
        let authenticating = state(SessionStatus::Authenticating);

        let loaded = authenticating
            .apply(SessionEvent::ProfileLoaded(user(true)))
            .unwrap();
        assert!(loaded.is_authenticated());
        assert_eq!(loaded.epoch, 7);

        let rejected = authenticating.apply(SessionEvent::ProfileRejected).unwrap();
        assert_eq!(rejected.status, SessionStatus::Refreshing);

        let failed = authenticating
            .apply(SessionEvent::ProfileFailed(SessionError::Network("down".into())))
            .unwrap();
        assert_eq!(
            failed.status,
            SessionStatus::Failed(SessionError::Network("down".into()))
        );
        assert_eq!(failed.last_error, Some(SessionError::Network("down".into())));
    }

    #[test]
    fn test_refresh_paths() {
        let refreshing = state(SessionStatus::Refreshing);
        assert_eq!(
            refreshing
                .apply(SessionEvent::RefreshSucceeded)
                .unwrap()
                .status,
            SessionStatus::Authenticating
        );

        let failed = refreshing
            .apply(SessionEvent::RefreshFailed(SessionError::NoRefreshToken))
            .unwrap();
        assert_eq!(failed.status, SessionStatus::Unauthenticated);
        assert_eq!(failed.last_error, Some(SessionError::NoRefreshToken));
        assert_eq!(failed.epoch, 8);

        let signed_in = state(SessionStatus::Authenticated(user(true)));
        assert_eq!(
            signed_in.apply(SessionEvent::RefreshSucceeded).unwrap(),
            signed_in
        );
    }

    #[test]
    fn test_login_from_authenticated() {
        let signed_in = state(SessionStatus::Authenticated(user(true)));
        let submitted = signed_in.apply(SessionEvent::CredentialsSubmitted).unwrap();
        assert_eq!(submitted.status, SessionStatus::Authenticating);
        assert_eq!(submitted.epoch, 8);

        let rejected = submitted
            .apply(SessionEvent::CredentialsRejected(
                SessionError::InvalidCredentials,
            ))
            .unwrap();
        assert_eq!(
            rejected.status,
            SessionStatus::Failed(SessionError::InvalidCredentials)
        );
    }

    #[test]
    fn test_registration_requires_verification() {
        let authenticating = state(SessionStatus::Authenticating);

        let verified = authenticating
            .apply(SessionEvent::Registered(user(true)))
            .unwrap();
        assert!(verified.is_authenticated());

        let unverified = authenticating
            .apply(SessionEvent::Registered(user(false)))
            .unwrap();
        assert!(matches!(
            unverified.status,
            SessionStatus::Failed(SessionError::VerificationRequired(_))
        ));
        assert_eq!(unverified.user().unwrap().first_name, "Ada");
    }

    #[test]
    fn test_logout_and_expiry_from_any_state() {
        for status in [
            SessionStatus::Unauthenticated,
            SessionStatus::Authenticating,
            SessionStatus::Authenticated(user(true)),
            SessionStatus::Refreshing,
            SessionStatus::Failed(SessionError::InvalidCredentials),
        ] {
            let from = state(status);
            let out = from.apply(SessionEvent::LoggedOut).unwrap();
            assert_eq!(out.status, SessionStatus::Unauthenticated);
            assert!(out.epoch > from.epoch);

            let expired = from.apply(SessionEvent::Expired).unwrap();
            assert_eq!(
                expired.status,
                SessionStatus::Failed(SessionError::SessionExpired)
            );
        }
    }

    #[test]
    fn test_stale_results_do_not_apply() {
        let out = state(SessionStatus::Unauthenticated);
        assert!(out.apply(SessionEvent::ProfileLoaded(user(true))).is_none());
        assert!(out.apply(SessionEvent::LoginSucceeded(user(true))).is_none());
        assert!(out.apply(SessionEvent::RefreshSucceeded).is_none());
        assert!(out
            .apply(SessionEvent::RefreshFailed(SessionError::NoRefreshToken))
            .is_none());
    }

    #[test]
    fn test_profile_update_stays_signed_in() {
        let signed_in = state(SessionStatus::Authenticated(user(true)));
        let mut edited = user(true);
        edited.first_name = "Augusta".into();

        let next = signed_in
            .apply(SessionEvent::ProfileUpdated(edited.clone()))
            .unwrap();
        assert_eq!(next.status, SessionStatus::Authenticated(edited.clone()));
        assert!(next.status.same_phase(&signed_in.status));
        assert_eq!(next.epoch, signed_in.epoch);

        for status in [
            SessionStatus::Unauthenticated,
            SessionStatus::Authenticating,
            SessionStatus::Refreshing,
        ] {
            assert!(state(status)
                .apply(SessionEvent::ProfileUpdated(edited.clone()))
                .is_none());
        }
    }

    #[test]
    fn test_clear_error_keeps_status() {
        let mut failed = state(SessionStatus::Failed(SessionError::InvalidCredentials));
        failed.last_error = Some(SessionError::InvalidCredentials);
        let cleared = failed.apply(SessionEvent::ErrorCleared).unwrap();
        assert_eq!(cleared.status, failed.status);
        assert_eq!(cleared.last_error, None);
    }
}
