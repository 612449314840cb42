//! Session management.
//!
//! [`SessionManager`] is the single source of truth for whether the client
//! is signed in. It owns the [`TokenStore`], drives the state machine in
//! [`state`], and is the only component that writes tokens.
//!
//! # Flows
//!
//! - **Restore**: stored access token → fetch profile → on 401 refresh once
//!   and retry → `Authenticated`, `Unauthenticated` or `Failed`.
//! - **Login / register**: de-duplicated per operation; a second call while
//!   one is in flight joins it.
//! - **External sign-in**: a grant obtained elsewhere (e.g. a social login
//!   callback) is adopted as if a login had returned it.
//! - **Profile edits**: applied in place; the session stays `Authenticated`.
//! - **Authorized calls**: [`SessionManager::authorized`] attaches a fresh
//!   token, refreshes proactively near expiry, and on a 401 refreshes once
//!   and retries once.
//!
//! Every committed transition is published on a `watch` channel and handed
//! to registered [`SessionObserver`]s.

mod error;
mod single_flight;
mod state;

pub use error::SessionError;
pub use state::{SessionEvent, SessionState, SessionStatus};

use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use shopsync_core::User;
use tokio::sync::watch;
use tracing::instrument;

use self::single_flight::SingleFlight;
use crate::api::{ApiError, AuthGrant, LoginCredentials, ProfileUpdate, Registration, StoreApi};
use crate::telemetry;
use crate::tokens::{DEFAULT_REFRESH_HORIZON, TokenStore};

/// Receives every committed status transition, synchronously and in commit
/// order.
///
/// Implementations may read session state but must not start session
/// operations from inside the callback.
pub trait SessionObserver: Send + Sync {
    fn on_transition(&self, previous: &SessionStatus, next: &SessionStatus);
}

/// Tunables for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Refresh the access token once it expires within this window.
    pub refresh_horizon: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_horizon: DEFAULT_REFRESH_HORIZON,
        }
    }
}

#[derive(Debug, Clone)]
enum RefreshTrigger {
    /// The access token is about to expire.
    Expiring,
    /// The server rejected this access token.
    Rejected(SecretString),
}

/// Owner of the session state machine and the credential pair.
///
/// Cheap to clone; clones share all state.
pub struct SessionManager<A> {
    inner: Arc<SessionInner<A>>,
}

impl<A> Clone for SessionManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<A> {
    api: Arc<A>,
    tokens: TokenStore,
    state: Mutex<SessionState>,
    /// Held from commit until observers have run, so they see transitions
    /// in commit order. Always taken before `state`.
    announcing: Mutex<()>,
    updates: watch::Sender<SessionState>,
    observers: Mutex<Vec<Weak<dyn SessionObserver>>>,
    login: SingleFlight<Result<User, SessionError>>,
    register: SingleFlight<Result<User, SessionError>>,
    refresh: SingleFlight<Result<(), SessionError>>,
    options: SessionOptions,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: StoreApi> SessionManager<A> {
    /// Create a manager in the `Unauthenticated` state.
    ///
    /// Call [`restore`](Self::restore) to pick up persisted credentials.
    #[must_use]
    pub fn new(api: Arc<A>, tokens: TokenStore, options: SessionOptions) -> Self {
        let (updates, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                api,
                tokens,
                state: Mutex::new(SessionState::default()),
                announcing: Mutex::new(()),
                updates,
                observers: Mutex::new(Vec::new()),
                login: SingleFlight::new(),
                register: SingleFlight::new(),
                refresh: SingleFlight::new(),
                options,
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.inner.state).clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner.state).is_authenticated()
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        lock(&self.inner.state).user().cloned()
    }

    /// Whether an access token is stored, regardless of session status.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.inner.tokens.is_authenticated()
    }

    /// Expiry of the stored access token, if it encodes one.
    #[must_use]
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.inner.tokens.expiry()
    }

    /// Receive every committed state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.updates.subscribe()
    }

    /// Register an observer. Only a weak reference is kept.
    pub fn add_observer<O: SessionObserver + 'static>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn SessionObserver> = weak;
        lock(&self.inner.observers).push(weak);
    }

    pub(crate) fn api(&self) -> &Arc<A> {
        &self.inner.api
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Initialize from persisted credentials.
    ///
    /// Never fails; the outcome is the returned state.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionState {
        if let Err(e) = self.refresh_session().await {
            tracing::debug!(error = %e, "Session not restored");
        }
        self.state()
    }

    /// Re-run the restore path: re-fetch the profile with the stored
    /// credentials, refreshing them once if they are rejected.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without stored credentials, otherwise the reason
    /// the profile could not be loaded.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<User, SessionError> {
        let has_access_token = self.inner.tokens.is_authenticated();
        let epoch = self
            .commit(SessionEvent::Restore { has_access_token }, None, |_| {})
            .ok_or(SessionError::Superseded)?;
        if !has_access_token {
            return Err(SessionError::NotAuthenticated);
        }
        self.load_profile(epoch).await
    }

    /// Sign in with email and password.
    ///
    /// Concurrent calls share one request and one result. On failure the
    /// stored tokens are left untouched.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` on a 401, otherwise the mapped transport error.
    #[instrument(skip_all, fields(email = %credentials.email))]
    pub async fn login(&self, credentials: LoginCredentials) -> Result<User, SessionError> {
        let this = self.clone();
        self.inner
            .login
            .run(move || async move { this.perform_login(credentials).await }.boxed())
            .await
    }

    /// Create an account and sign in with the returned tokens.
    ///
    /// # Errors
    ///
    /// `VerificationRequired` carrying the new user when the server
    /// requires email verification first; `Validation` or `Conflict` when
    /// the form is rejected.
    #[instrument(skip_all, fields(email = %registration.email))]
    pub async fn register(&self, registration: Registration) -> Result<User, SessionError> {
        let this = self.clone();
        self.inner
            .register
            .run(move || async move { this.perform_register(registration).await }.boxed())
            .await
    }

    /// Sign in with a grant issued outside this client, such as the answer
    /// to a social login callback.
    ///
    /// The grant replaces any current session, exactly like a successful
    /// [`login`](Self::login).
    ///
    /// # Errors
    ///
    /// `VerificationRequired` when the granted user is not verified yet,
    /// `Superseded` if another sign-in committed concurrently.
    #[instrument(skip_all)]
    pub fn accept_external_grant(&self, grant: AuthGrant) -> Result<User, SessionError> {
        let epoch = self
            .commit(SessionEvent::CredentialsSubmitted, None, |_| {})
            .ok_or(SessionError::Superseded)?;

        let user = self.accept_grant(grant, SessionEvent::Registered, epoch)?;
        if user.is_verified {
            tracing::info!("Signed in with external grant");
            Ok(user)
        } else {
            tracing::info!("External grant user requires email verification");
            Err(SessionError::VerificationRequired(Box::new(user)))
        }
    }

    /// Edit the signed-in user's profile.
    ///
    /// The session stays `Authenticated` throughout; only the user it
    /// carries changes. A rejected edit leaves the session untouched.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when signed out, `Validation` or `Conflict` when
    /// the server rejects the edit, `Superseded` if the session ended while
    /// the request was in flight.
    #[instrument(skip_all)]
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SessionError> {
        if update.is_empty() {
            return self.user().ok_or(SessionError::NotAuthenticated);
        }

        let epoch = lock(&self.inner.state).epoch;
        let api = &self.inner.api;
        let update = &update;
        let user = self
            .authorized::<User, SessionError, _, _>(|token| async move {
                api.update_profile(&token, update).await
            })
            .await?;

        self.commit(SessionEvent::ProfileUpdated(user.clone()), Some(epoch), |_| {})
            .ok_or(SessionError::Superseded)?;
        tracing::info!("Profile updated");
        Ok(user)
    }

    /// Sign out. Local credentials are cleared immediately; the server is
    /// told afterwards, best-effort.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let token = self.inner.tokens.access_token();
        self.commit(SessionEvent::LoggedOut, None, TokenStore::clear);

        if let Some(token) = token
            && let Err(e) = self.inner.api.logout(&token).await
        {
            tracing::warn!(error = %e, "Server-side logout failed");
        }
    }

    /// Forget the last error without changing status.
    pub fn clear_error(&self) {
        self.commit(SessionEvent::ErrorCleared, None, |_| {});
    }

    /// Report that the credentials are no longer accepted.
    ///
    /// Clears tokens and moves to `Failed(SessionExpired)`.
    pub fn expire(&self) {
        self.expire_at(None);
    }

    /// A usable access token, refreshed first if it is about to expire.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when signed out, or the refresh failure.
    pub async fn access_token(&self) -> Result<SecretString, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        if self
            .inner
            .tokens
            .needs_refresh(self.inner.options.refresh_horizon)
        {
            self.refresh_tokens(RefreshTrigger::Expiring).await?;
        }
        self.inner
            .tokens
            .access_token()
            .ok_or(SessionError::NotAuthenticated)
    }

    /// Run `call` with a usable access token.
    ///
    /// A 401 triggers exactly one refresh and one retry. If the retry is
    /// rejected too the session expires.
    ///
    /// # Errors
    ///
    /// The session error if no token can be obtained, otherwise the call's
    /// own error.
    pub async fn authorized<T, E, F, Fut>(&self, call: F) -> Result<T, E>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        E: From<SessionError> + From<ApiError>,
    {
        let token = self.access_token().await?;
        let epoch = lock(&self.inner.state).epoch;

        match call(token.clone()).await {
            Err(e) if e.is_unauthorized() => {
                tracing::debug!("Access token rejected, refreshing");
                self.refresh_tokens(RefreshTrigger::Rejected(token)).await?;
                let token = self
                    .inner
                    .tokens
                    .access_token()
                    .ok_or(SessionError::NotAuthenticated)?;

                match call(token).await {
                    Err(e) if e.is_unauthorized() => {
                        tracing::warn!("Access token rejected after refresh");
                        self.expire_at(Some(epoch));
                        Err(SessionError::SessionExpired.into())
                    }
                    other => other.map_err(E::from),
                }
            }
            other => other.map_err(E::from),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn perform_login(&self, credentials: LoginCredentials) -> Result<User, SessionError> {
        let epoch = self
            .commit(SessionEvent::CredentialsSubmitted, None, |_| {})
            .ok_or(SessionError::Superseded)?;

        match self.inner.api.login(&credentials).await {
            Ok(grant) => {
                let user = self.accept_grant(grant, SessionEvent::LoginSucceeded, epoch)?;
                tracing::info!("Signed in");
                Ok(user)
            }
            Err(e) => Err(self.reject_credentials(e, epoch)),
        }
    }

    async fn perform_register(&self, registration: Registration) -> Result<User, SessionError> {
        let epoch = self
            .commit(SessionEvent::CredentialsSubmitted, None, |_| {})
            .ok_or(SessionError::Superseded)?;

        match self.inner.api.register(&registration).await {
            Ok(grant) => {
                let user = self.accept_grant(grant, SessionEvent::Registered, epoch)?;
                if user.is_verified {
                    tracing::info!("Registered and signed in");
                    Ok(user)
                } else {
                    tracing::info!("Registered, email verification required");
                    Err(SessionError::VerificationRequired(Box::new(user)))
                }
            }
            Err(e) => Err(self.reject_credentials(e, epoch)),
        }
    }

    /// Store the granted tokens and commit `event`, unless the session
    /// moved on while the request was in flight.
    fn accept_grant(
        &self,
        grant: AuthGrant,
        event: fn(User) -> SessionEvent,
        epoch: u64,
    ) -> Result<User, SessionError> {
        let AuthGrant { tokens, user, .. } = grant;
        self.commit(event(user.clone()), Some(epoch), move |store| {
            store.set_tokens(Some(tokens.access_token), tokens.refresh_token);
        })
        .map(|_| user)
        .ok_or(SessionError::Superseded)
    }

    fn reject_credentials(&self, err: ApiError, epoch: u64) -> SessionError {
        let error = SessionError::from_credentials_failure(err);
        tracing::info!(error = %error, "Credentials rejected");
        self.commit(
            SessionEvent::CredentialsRejected(error.clone()),
            Some(epoch),
            |_| {},
        );
        error
    }

    /// Fetch the profile for the stored token, refreshing once on a 401.
    async fn load_profile(&self, epoch: u64) -> Result<User, SessionError> {
        let mut refreshed = false;
        loop {
            let token = self
                .inner
                .tokens
                .access_token()
                .ok_or(SessionError::Superseded)?;

            match self.inner.api.profile(&token).await {
                Ok(user) => {
                    return self
                        .commit(SessionEvent::ProfileLoaded(user.clone()), Some(epoch), |_| {})
                        .map(|_| user)
                        .ok_or(SessionError::Superseded);
                }
                Err(e) if e.is_unauthorized() && !refreshed => {
                    self.commit(SessionEvent::ProfileRejected, Some(epoch), |_| {})
                        .ok_or(SessionError::Superseded)?;
                    self.refresh_tokens(RefreshTrigger::Rejected(token)).await?;
                    refreshed = true;
                }
                Err(e) if e.is_unauthorized() => {
                    tracing::warn!("Profile rejected after refresh");
                    self.expire_at(Some(epoch));
                    return Err(SessionError::SessionExpired);
                }
                Err(e) => {
                    let error = SessionError::from(e);
                    tracing::warn!(error = %error, "Failed to load profile");
                    self.commit(SessionEvent::ProfileFailed(error.clone()), Some(epoch), |_| {});
                    return Err(error);
                }
            }
        }
    }

    /// Refresh the token pair. Concurrent callers share one request.
    async fn refresh_tokens(&self, trigger: RefreshTrigger) -> Result<(), SessionError> {
        let this = self.clone();
        self.inner
            .refresh
            .run(move || async move { this.perform_refresh(trigger).await }.boxed())
            .await
    }

    async fn perform_refresh(&self, trigger: RefreshTrigger) -> Result<(), SessionError> {
        let epoch = lock(&self.inner.state).epoch;

        let already_fresh = match &trigger {
            RefreshTrigger::Expiring => !self
                .inner
                .tokens
                .needs_refresh(self.inner.options.refresh_horizon),
            RefreshTrigger::Rejected(rejected) => self
                .inner
                .tokens
                .access_token()
                .is_some_and(|current| current.expose_secret() != rejected.expose_secret()),
        };
        if already_fresh {
            // Another flight replaced the token since the caller looked.
            self.commit(SessionEvent::RefreshSucceeded, Some(epoch), |_| {});
            return Ok(());
        }

        let Some(refresh_token) = self.inner.tokens.refresh_token() else {
            tracing::info!("No refresh token, signing out");
            self.commit(
                SessionEvent::RefreshFailed(SessionError::NoRefreshToken),
                Some(epoch),
                TokenStore::clear,
            );
            return Err(SessionError::NoRefreshToken);
        };

        match self.inner.api.refresh(&refresh_token).await {
            Ok(pair) => {
                self.commit(SessionEvent::RefreshSucceeded, Some(epoch), move |store| {
                    store.set_tokens(Some(pair.access_token), pair.refresh_token);
                })
                .ok_or(SessionError::Superseded)?;
                tracing::debug!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                let error = match e {
                    ApiError::Unauthorized(_) => SessionError::SessionExpired,
                    other => other.into(),
                };
                tracing::warn!(error = %error, "Token refresh failed, signing out");
                self.commit(
                    SessionEvent::RefreshFailed(error.clone()),
                    Some(epoch),
                    TokenStore::clear,
                );
                Err(error)
            }
        }
    }

    fn expire_at(&self, epoch: Option<u64>) {
        self.commit(SessionEvent::Expired, epoch, TokenStore::clear);
    }

    /// Apply `event` and, if it is accepted, run `effect` on the tokens and
    /// publish the new state. Returns the new epoch.
    ///
    /// With `Some(epoch)` the event is dropped if the session has moved to a
    /// newer epoch since the caller's work began.
    fn commit(
        &self,
        event: SessionEvent,
        epoch: Option<u64>,
        effect: impl FnOnce(&TokenStore),
    ) -> Option<u64> {
        let _announcing = lock(&self.inner.announcing);
        let (previous, next) = {
            let mut state = lock(&self.inner.state);
            if epoch.is_some_and(|epoch| epoch != state.epoch) {
                tracing::debug!(
                    status = state.status.name(),
                    "Discarding result of a superseded session operation"
                );
                return None;
            }
            let Some(next) = state.apply(event) else {
                tracing::debug!(
                    status = state.status.name(),
                    "Event does not apply in current state"
                );
                return None;
            };

            effect(&self.inner.tokens);
            let previous = mem::replace(&mut *state, next.clone());
            self.inner.updates.send_replace(next.clone());
            (previous, next)
        };

        self.announce(&previous.status, &next.status);
        Some(next.epoch)
    }

    fn announce(&self, previous: &SessionStatus, next: &SessionStatus) {
        if !previous.same_phase(next) {
            tracing::info!(
                from = previous.name(),
                to = next.name(),
                "Session transition"
            );
            telemetry::add_breadcrumb(
                "session",
                "Session transition",
                Some(&[("from", previous.name()), ("to", next.name())]),
            );
        }

        match (previous.is_authenticated(), next) {
            (_, SessionStatus::Authenticated(user)) => telemetry::set_sentry_user(user),
            (true, _) => telemetry::clear_sentry_user(),
            _ => {}
        }

        let observers: Vec<Arc<dyn SessionObserver>> = {
            let mut list = lock(&self.inner.observers);
            list.retain(|observer| observer.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_transition(previous, next);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use shopsync_core::{Email, ProfilePayload};

    use super::*;
    use crate::api::{CollectionSnapshot, ResourceKind, ResourceWrite, TokenPair};
    use crate::tokens::{MemoryStorage, StoredCredentials};

    /// Scripted transport: profile answers come from a queue.
    #[derive(Default)]
    struct Scripted {
        profile: Mutex<Vec<Result<User, ApiError>>>,
        refresh: Mutex<Option<Result<TokenPair, ApiError>>>,
        login: Mutex<Option<Result<AuthGrant, ApiError>>>,
        profile_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    fn user() -> User {
        let payload: ProfilePayload =
            serde_json::from_value(json!({"resource_id": "u-1", "is_verified": true})).unwrap();
        User::from(payload)
    }

    impl StoreApi for Scripted {
        async fn login(&self, _: &LoginCredentials) -> Result<AuthGrant, ApiError> {
            lock(&self.login)
                .take()
                .unwrap_or(Err(ApiError::Unauthorized("no".into())))
        }

        async fn register(&self, _: &Registration) -> Result<AuthGrant, ApiError> {
            Err(ApiError::Network("unused".into()))
        }

        async fn refresh(&self, _: &SecretString) -> Result<TokenPair, ApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.refresh)
                .take()
                .unwrap_or(Err(ApiError::Unauthorized("no".into())))
        }

        async fn profile(&self, _: &SecretString) -> Result<User, ApiError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = lock(&self.profile);
            if queue.is_empty() {
                Ok(user())
            } else {
                queue.remove(0)
            }
        }

        async fn update_profile(
            &self,
            _: &SecretString,
            update: &ProfileUpdate,
        ) -> Result<User, ApiError> {
            let mut edited = user();
            if let Some(first_name) = &update.first_name {
                edited.first_name.clone_from(first_name);
            }
            Ok(edited)
        }

        async fn logout(&self, _: &SecretString) -> Result<(), ApiError> {
            Err(ApiError::Network("offline".into()))
        }

        async fn fetch_collection(
            &self,
            _: &SecretString,
            _: ResourceKind,
        ) -> Result<CollectionSnapshot, ApiError> {
            Ok(CollectionSnapshot::default())
        }

        async fn write_collection(
            &self,
            _: &SecretString,
            _: ResourceKind,
            _: &ResourceWrite,
        ) -> Result<CollectionSnapshot, ApiError> {
            Ok(CollectionSnapshot::default())
        }
    }

    fn manager(api: Scripted, storage: MemoryStorage) -> SessionManager<Scripted> {
        SessionManager::new(
            Arc::new(api),
            TokenStore::new(storage),
            SessionOptions::default(),
        )
    }

    fn stored(access: &str, refresh: Option<&str>) -> MemoryStorage {
        MemoryStorage::with(StoredCredentials {
            access_token: Some(access.into()),
            refresh_token: refresh.map(Into::into),
        })
    }

    #[tokio::test]
    async fn test_restore_without_credentials() {
        let session = manager(Scripted::default(), MemoryStorage::new());
        let state = session.restore().await;
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert_eq!(session.inner.api.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_refreshes_once_on_401() {
        let api = Scripted::default();
        lock(&api.profile).push(Err(ApiError::Unauthorized("expired".into())));
        *lock(&api.refresh) = Some(Ok(TokenPair {
            access_token: SecretString::from("a2"),
            refresh_token: Some(SecretString::from("r2")),
        }));
        let storage = stored("a1", Some("r1"));
        let session = manager(api, storage.clone());

        let state = session.restore().await;
        assert!(state.is_authenticated());
        assert_eq!(session.inner.api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.inner.api.profile_calls.load(Ordering::SeqCst), 2);
        assert_eq!(storage.snapshot().access_token.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_restore_without_refresh_token_signs_out() {
        let api = Scripted::default();
        lock(&api.profile).push(Err(ApiError::Unauthorized("expired".into())));
        let storage = stored("a1", None);
        let session = manager(api, storage.clone());

        let state = session.restore().await;
        assert_eq!(state.status, SessionStatus::Unauthenticated);
        assert_eq!(state.last_error, Some(SessionError::NoRefreshToken));
        assert!(storage.snapshot().is_empty());
        assert_eq!(session.inner.api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_401_expires_session() {
        let api = Scripted::default();
        lock(&api.profile).push(Err(ApiError::Unauthorized("expired".into())));
        lock(&api.profile).push(Err(ApiError::Unauthorized("still expired".into())));
        *lock(&api.refresh) = Some(Ok(TokenPair {
            access_token: SecretString::from("a2"),
            refresh_token: None,
        }));
        let session = manager(api, stored("a1", Some("r1")));

        let state = session.restore().await;
        assert_eq!(
            state.status,
            SessionStatus::Failed(SessionError::SessionExpired)
        );
        assert!(!session.has_credentials());
    }

    #[tokio::test]
    async fn test_failed_login_keeps_tokens() {
        let storage = stored("old-access", Some("old-refresh"));
        let session = manager(Scripted::default(), storage.clone());
        let before = storage.snapshot();

        let result = session
            .login(LoginCredentials {
                email: Email::parse("ada@example.com").unwrap(),
                password: SecretString::from("wrong"),
            })
            .await;

        assert_eq!(result, Err(SessionError::InvalidCredentials));
        assert_eq!(
            session.status(),
            SessionStatus::Failed(SessionError::InvalidCredentials)
        );
        assert_eq!(storage.snapshot(), before);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let storage = stored("a1", Some("r1"));
        let session = manager(Scripted::default(), storage.clone());
        session.restore().await;
        assert!(session.is_authenticated());

        let mut updates = session.subscribe();
        session.logout().await;
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(storage.snapshot().is_empty());
        assert!(updates.has_changed().unwrap());
        assert_eq!(
            updates.borrow_and_update().status,
            SessionStatus::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_profile_update_keeps_epoch_and_phase() {
        let session = manager(Scripted::default(), stored("a1", Some("r1")));
        session.restore().await;
        let before = session.state();

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.add_observer(&recorder);
        let edited = session
            .update_profile(ProfileUpdate {
                first_name: Some("Augusta".into()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        assert_eq!(edited.first_name, "Augusta");
        assert_eq!(session.user(), Some(edited));
        assert_eq!(session.state().epoch, before.epoch);
        assert_eq!(
            *lock(&recorder.0),
            vec![("authenticated", "authenticated")]
        );
    }

    #[tokio::test]
    async fn test_profile_update_requires_session() {
        let session = manager(Scripted::default(), MemoryStorage::new());
        let result = session
            .update_profile(ProfileUpdate {
                first_name: Some("Augusta".into()),
                ..ProfileUpdate::default()
            })
            .await;
        assert_eq!(result, Err(SessionError::NotAuthenticated));
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn test_unverified_external_grant_requires_verification() {
        let storage = MemoryStorage::new();
        let session = manager(Scripted::default(), storage.clone());
        let payload: ProfilePayload =
            serde_json::from_value(json!({"resource_id": "u-2", "is_verified": false})).unwrap();

        let result = session.accept_external_grant(AuthGrant {
            tokens: TokenPair {
                access_token: SecretString::from("g1"),
                refresh_token: Some(SecretString::from("gr1")),
            },
            user: User::from(payload),
            message: None,
        });

        assert!(matches!(result, Err(SessionError::VerificationRequired(_))));
        assert!(!session.is_authenticated());
        assert_eq!(storage.snapshot().access_token.as_deref(), Some("g1"));
    }

    struct Recorder(Mutex<Vec<(&'static str, &'static str)>>);

    impl SessionObserver for Recorder {
        fn on_transition(&self, previous: &SessionStatus, next: &SessionStatus) {
            lock(&self.0).push((previous.name(), next.name()));
        }
    }

    #[tokio::test]
    async fn test_observers_see_transitions_in_order() {
        let session = manager(Scripted::default(), stored("a1", Some("r1")));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.add_observer(&recorder);

        session.restore().await;
        session.logout().await;

        assert_eq!(
            *lock(&recorder.0),
            vec![
                ("unauthenticated", "authenticating"),
                ("authenticating", "authenticated"),
                ("authenticated", "unauthenticated"),
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_observers_are_pruned() {
        let session = manager(Scripted::default(), MemoryStorage::new());
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.add_observer(&recorder);
        drop(recorder);

        session.restore().await;
        assert!(lock(&session.inner.observers).is_empty());
    }
}
