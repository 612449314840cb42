//! Integration test support for shopsync.
//!
//! [`FakeApi`] is an in-memory shop backend implementing
//! [`StoreApi`]: accounts, JWT-shaped access tokens with real `exp` claims,
//! rotating refresh tokens, a product catalog, and a cart and wishlist per
//! account.
//!
//! Tests script it three ways:
//! - `fail_next` queues an error for the next call to an endpoint
//! - `hold` / `release` / `open` park calls at a gate so a test can inspect
//!   the optimistic state while a request is in flight
//! - `calls` / `wait_for_calls` count requests per endpoint
//!
//! Every request is handled in the same order: count, authenticate, wait at
//! the gate, take a queued failure, apply.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p shopsync-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use shopsync_client::api::{
    AuthGrant, CollectionSnapshot, FieldErrors, LoginCredentials, ProfileUpdate, Registration,
    ResourceWrite, ServerItem, TokenPair,
};
use shopsync_client::tokens::{MemoryStorage, StoredCredentials};
use shopsync_client::{
    ApiError, Client, ResourceKind, SessionOptions, StoreApi, TokenStore,
};
use shopsync_core::{CurrencyCode, ItemKey, LineId, Price, ProductId, ProfilePayload, User};
use tokio::sync::Semaphore;

/// One operation of the shop API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Register,
    Refresh,
    Profile,
    UpdateProfile,
    Logout,
    Fetch(ResourceKind),
    Write(ResourceKind),
}

struct Account {
    password: String,
    user: User,
}

struct Product {
    title: String,
    price: Price,
}

struct Data {
    accounts: HashMap<String, Account>,
    /// Access token → (owner email, expiry timestamp).
    access_tokens: HashMap<String, (String, i64)>,
    /// Refresh token → owner email.
    refresh_tokens: HashMap<String, String>,
    catalog: HashMap<ProductId, Product>,
    carts: HashMap<String, Vec<ServerItem>>,
    wishlists: HashMap<String, Vec<ServerItem>>,
    access_ttl: TimeDelta,
    register_verified: bool,
    next_token: u64,
    next_line: u64,
}

impl Data {
    fn issue(&mut self, email: &str) -> (String, String) {
        self.next_token += 1;
        let exp = (Utc::now() + self.access_ttl).timestamp();
        let access = jwt(email, exp, self.next_token);
        let refresh = format!("refresh-{}", self.next_token);
        self.access_tokens
            .insert(access.clone(), (email.to_string(), exp));
        self.refresh_tokens
            .insert(refresh.clone(), email.to_string());
        (access, refresh)
    }

    fn collection(&mut self, kind: ResourceKind, email: &str) -> &mut Vec<ServerItem> {
        let collections = match kind {
            ResourceKind::Cart => &mut self.carts,
            ResourceKind::Wishlist => &mut self.wishlists,
        };
        collections.entry(email.to_string()).or_default()
    }

    fn line_for(&mut self, key: ItemKey, quantity: u32) -> Result<ServerItem, ApiError> {
        let product = self.catalog.get(&key.product).ok_or_else(|| ApiError::Rejected {
            status: 404,
            message: format!("Product {} not found", key.product),
        })?;
        let item = ServerItem {
            server_id: LineId::new(self.next_line + 1),
            key,
            title: Some(product.title.clone()),
            quantity,
            unit_price: product.price,
        };
        self.next_line += 1;
        Ok(item)
    }

    fn apply(
        &mut self,
        kind: ResourceKind,
        email: &str,
        write: &ResourceWrite,
    ) -> Result<CollectionSnapshot, ApiError> {
        match (kind, write) {
            (_, ResourceWrite::Add { quantity: 0, .. }) => Err(ApiError::Validation(
                FieldErrors::from_pairs([("quantity", "must be at least 1")]),
            )),
            (ResourceKind::Cart, ResourceWrite::Add { key, quantity }) => {
                let existing = self
                    .collection(kind, email)
                    .iter()
                    .position(|item| item.key == *key);
                match existing {
                    Some(index) => {
                        if let Some(item) = self.collection(kind, email).get_mut(index) {
                            item.quantity += quantity;
                        }
                    }
                    None => {
                        let line = self.line_for(*key, *quantity)?;
                        self.collection(kind, email).push(line);
                    }
                }
                Ok(self.snapshot(kind, email))
            }
            (ResourceKind::Wishlist, ResourceWrite::Add { key, .. }) => {
                if !self.collection(kind, email).iter().any(|item| item.key.product == key.product) {
                    let line = self.line_for(ItemKey::new(key.product, None), 1)?;
                    self.collection(kind, email).push(line);
                }
                Ok(self.snapshot(kind, email))
            }
            (ResourceKind::Cart, ResourceWrite::Update { line, quantity }) => {
                let item = self
                    .collection(kind, email)
                    .iter_mut()
                    .find(|item| item.server_id == *line)
                    .ok_or_else(|| not_found(*line))?;
                item.quantity = *quantity;
                Ok(self.snapshot(kind, email))
            }
            (ResourceKind::Cart, ResourceWrite::Remove { line: Some(line), .. }) => {
                let items = self.collection(kind, email);
                let before = items.len();
                items.retain(|item| item.server_id != *line);
                if items.len() == before {
                    return Err(not_found(*line));
                }
                Ok(self.snapshot(kind, email))
            }
            (ResourceKind::Wishlist, ResourceWrite::Remove { key, .. }) => {
                self.collection(kind, email)
                    .retain(|item| item.key.product != key.product);
                Ok(self.snapshot(kind, email))
            }
            (ResourceKind::Cart, ResourceWrite::Clear) => {
                self.collection(kind, email).clear();
                Ok(self.snapshot(kind, email))
            }
            _ => Err(ApiError::Rejected {
                status: 405,
                message: format!("{kind} does not support {}", write.name()),
            }),
        }
    }

    fn snapshot(&mut self, kind: ResourceKind, email: &str) -> CollectionSnapshot {
        CollectionSnapshot {
            items: self.collection(kind, email).clone(),
        }
    }
}

fn not_found(line: LineId) -> ApiError {
    ApiError::Rejected {
        status: 404,
        message: format!("Line {line} not found"),
    }
}

/// An unsigned JWT carrying `sub`, `exp` and `jti`.
#[must_use]
pub fn jwt(subject: &str, exp: i64, jti: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let claims = URL_SAFE_NO_PAD.encode(json!({"sub": subject, "exp": exp, "jti": jti}).to_string());
    format!("{header}.{claims}.unsigned")
}

/// A profile as the server would return it.
#[must_use]
pub fn user(email: &str, first_name: &str, verified: bool) -> User {
    let payload: ProfilePayload = serde_json::from_value(json!({
        "resource_id": format!("user-{email}"),
        "email": email,
        "first_name": first_name,
        "is_verified": verified,
    }))
    .unwrap_or_default();
    User::from(payload)
}

/// `cents` in USD.
#[must_use]
pub fn usd(cents: i64) -> Price {
    Price::from_minor(cents, CurrencyCode::USD)
}

/// Key of a product without a variant.
#[must_use]
pub const fn product(id: u64) -> ItemKey {
    ItemKey::new(ProductId::new(id), None)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct FakeInner {
    data: Mutex<Data>,
    calls: Mutex<HashMap<Endpoint, usize>>,
    failures: Mutex<HashMap<Endpoint, VecDeque<ApiError>>>,
    gates: Mutex<HashMap<Endpoint, Arc<Semaphore>>>,
}

/// In-memory shop backend. Clones share all state.
#[derive(Clone)]
pub struct FakeApi {
    inner: Arc<FakeInner>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                data: Mutex::new(Data {
                    accounts: HashMap::new(),
                    access_tokens: HashMap::new(),
                    refresh_tokens: HashMap::new(),
                    catalog: HashMap::new(),
                    carts: HashMap::new(),
                    wishlists: HashMap::new(),
                    access_ttl: TimeDelta::hours(1),
                    register_verified: true,
                    next_token: 0,
                    next_line: 100,
                }),
                calls: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Add a verified account.
    #[must_use]
    pub fn with_account(self, email: &str, password: &str, first_name: &str) -> Self {
        lock(&self.inner.data).accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user(email, first_name, true),
            },
        );
        self
    }

    #[must_use]
    pub fn with_product(self, id: u64, title: &str, cents: i64) -> Self {
        lock(&self.inner.data).catalog.insert(
            ProductId::new(id),
            Product {
                title: title.to_string(),
                price: usd(cents),
            },
        );
        self
    }

    /// Lifetime of access tokens issued from now on. May be negative.
    pub fn set_access_ttl(&self, ttl: TimeDelta) {
        lock(&self.inner.data).access_ttl = ttl;
    }

    /// Whether newly registered accounts are verified.
    pub fn set_register_verified(&self, verified: bool) {
        lock(&self.inner.data).register_verified = verified;
    }

    /// Put `items` (product, quantity) straight into an account's cart.
    pub fn seed_cart(&self, email: &str, items: &[(u64, u32)]) {
        let mut data = lock(&self.inner.data);
        for &(id, quantity) in items {
            if let Ok(line) = data.line_for(product(id), quantity) {
                data.collection(ResourceKind::Cart, email).push(line);
            }
        }
    }

    pub fn seed_wishlist(&self, email: &str, products: &[u64]) {
        let mut data = lock(&self.inner.data);
        for &id in products {
            if let Ok(line) = data.line_for(product(id), 1) {
                data.collection(ResourceKind::Wishlist, email).push(line);
            }
        }
    }

    /// Issue a token pair for `email` without a login call, as if persisted
    /// by an earlier run.
    #[must_use]
    pub fn issue_credentials(&self, email: &str) -> StoredCredentials {
        let (access, refresh) = lock(&self.inner.data).issue(email);
        StoredCredentials {
            access_token: Some(access),
            refresh_token: Some(refresh),
        }
    }

    /// A grant for `email` as an external identity provider would hand it
    /// over, without a login call.
    #[must_use]
    pub fn external_grant(&self, email: &str) -> Option<AuthGrant> {
        let mut data = lock(&self.inner.data);
        let user = data.accounts.get(email)?.user.clone();
        let (access, refresh) = data.issue(email);
        Some(AuthGrant {
            tokens: TokenPair {
                access_token: SecretString::from(access),
                refresh_token: Some(SecretString::from(refresh)),
            },
            user,
            message: None,
        })
    }

    /// Invalidate every access token issued so far.
    pub fn revoke_access_tokens(&self) {
        lock(&self.inner.data).access_tokens.clear();
    }

    /// Invalidate every refresh token issued so far.
    pub fn revoke_refresh_tokens(&self) {
        lock(&self.inner.data).refresh_tokens.clear();
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Fail the next call to `endpoint` with `error` (after authentication).
    pub fn fail_next(&self, endpoint: Endpoint, error: ApiError) {
        lock(&self.inner.failures)
            .entry(endpoint)
            .or_default()
            .push_back(error);
    }

    /// Park calls to `endpoint` until released.
    pub fn hold(&self, endpoint: Endpoint) {
        lock(&self.inner.gates).insert(endpoint, Arc::new(Semaphore::new(0)));
    }

    /// Let `n` parked (or future) calls to `endpoint` through.
    pub fn release(&self, endpoint: Endpoint, n: usize) {
        if let Some(gate) = lock(&self.inner.gates).get(&endpoint) {
            gate.add_permits(n);
        }
    }

    /// Remove the gate; every parked call proceeds.
    pub fn open(&self, endpoint: Endpoint) {
        if let Some(gate) = lock(&self.inner.gates).remove(&endpoint) {
            gate.close();
        }
    }

    /// Calls received by `endpoint`, including parked and failed ones.
    #[must_use]
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        lock(&self.inner.calls).get(&endpoint).copied().unwrap_or(0)
    }

    /// Wait (up to five seconds) until `endpoint` has received `n` calls.
    pub async fn wait_for_calls(&self, endpoint: Endpoint, n: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls(endpoint) < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .is_ok()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    #[must_use]
    pub fn cart_of(&self, email: &str) -> Vec<ServerItem> {
        lock(&self.inner.data)
            .collection(ResourceKind::Cart, email)
            .clone()
    }

    #[must_use]
    pub fn wishlist_of(&self, email: &str) -> Vec<ServerItem> {
        lock(&self.inner.data)
            .collection(ResourceKind::Wishlist, email)
            .clone()
    }

    #[must_use]
    pub fn has_access_token(&self, token: &str) -> bool {
        lock(&self.inner.data).access_tokens.contains_key(token)
    }

    // =========================================================================
    // Request pipeline
    // =========================================================================

    fn count(&self, endpoint: Endpoint) {
        *lock(&self.inner.calls).entry(endpoint).or_insert(0) += 1;
    }

    fn authenticate(&self, token: &SecretString) -> Result<String, ApiError> {
        let data = lock(&self.inner.data);
        match data.access_tokens.get(token.expose_secret()) {
            Some((email, exp)) if *exp > Utc::now().timestamp() => Ok(email.clone()),
            Some(_) => Err(ApiError::Unauthorized("Token expired".into())),
            None => Err(ApiError::Unauthorized("Invalid token".into())),
        }
    }

    async fn pass(&self, endpoint: Endpoint) -> Result<(), ApiError> {
        let gate = lock(&self.inner.gates).get(&endpoint).cloned();
        if let Some(gate) = gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        let failure = lock(&self.inner.failures)
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        failure.map_or(Ok(()), Err)
    }

    async fn authorized(
        &self,
        endpoint: Endpoint,
        token: &SecretString,
    ) -> Result<String, ApiError> {
        self.count(endpoint);
        let email = self.authenticate(token)?;
        self.pass(endpoint).await?;
        Ok(email)
    }
}

impl StoreApi for FakeApi {
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthGrant, ApiError> {
        self.count(Endpoint::Login);
        self.pass(Endpoint::Login).await?;

        let mut data = lock(&self.inner.data);
        let email = credentials.email.as_str().to_string();
        let user = match data.accounts.get(&email) {
            Some(account) if account.password == credentials.password.expose_secret() => {
                account.user.clone()
            }
            _ => return Err(ApiError::Unauthorized("Invalid email or password".into())),
        };
        let (access, refresh) = data.issue(&email);
        Ok(AuthGrant {
            tokens: TokenPair {
                access_token: SecretString::from(access),
                refresh_token: Some(SecretString::from(refresh)),
            },
            user,
            message: None,
        })
    }

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, ApiError> {
        self.count(Endpoint::Register);
        self.pass(Endpoint::Register).await?;

        let mut data = lock(&self.inner.data);
        let email = registration.email.as_str().to_string();
        if data.accounts.contains_key(&email) {
            return Err(ApiError::Conflict("Email already registered".into()));
        }
        if registration.password.expose_secret().len() < 8 {
            return Err(ApiError::Validation(FieldErrors::from_pairs([(
                "password",
                "must be at least 8 characters",
            )])));
        }

        let user = user(&email, &registration.first_name, data.register_verified);
        data.accounts.insert(
            email.clone(),
            Account {
                password: registration.password.expose_secret().to_string(),
                user: user.clone(),
            },
        );
        let (access, refresh) = data.issue(&email);
        let message = (!user.is_verified).then(|| "Check your inbox to verify your email".into());
        Ok(AuthGrant {
            tokens: TokenPair {
                access_token: SecretString::from(access),
                refresh_token: Some(SecretString::from(refresh)),
            },
            user,
            message,
        })
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, ApiError> {
        self.count(Endpoint::Refresh);
        self.pass(Endpoint::Refresh).await?;

        let mut data = lock(&self.inner.data);
        let Some(email) = data.refresh_tokens.remove(refresh_token.expose_secret()) else {
            return Err(ApiError::Unauthorized("Invalid refresh token".into()));
        };
        let (access, refresh) = data.issue(&email);
        Ok(TokenPair {
            access_token: SecretString::from(access),
            refresh_token: Some(SecretString::from(refresh)),
        })
    }

    async fn profile(&self, access_token: &SecretString) -> Result<User, ApiError> {
        let email = self.authorized(Endpoint::Profile, access_token).await?;
        lock(&self.inner.data)
            .accounts
            .get(&email)
            .map(|account| account.user.clone())
            .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))
    }

    async fn update_profile(
        &self,
        access_token: &SecretString,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError> {
        let email = self.authorized(Endpoint::UpdateProfile, access_token).await?;
        if update.username.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ApiError::Validation(FieldErrors::from_pairs([(
                "username",
                "must not be blank",
            )])));
        }

        let mut data = lock(&self.inner.data);
        let account = data
            .accounts
            .get_mut(&email)
            .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))?;
        let user = &mut account.user;
        if let Some(username) = &update.username {
            user.username = Some(username.clone());
        }
        if let Some(first_name) = &update.first_name {
            user.first_name.clone_from(first_name);
        }
        if let Some(last_name) = &update.last_name {
            user.last_name.clone_from(last_name);
        }
        if let Some(avatar) = &update.avatar {
            user.avatar = Some(avatar.clone());
        }
        if let Some(phone) = &update.phone {
            user.extra.insert("phone".into(), json!(phone));
        }
        Ok(user.clone())
    }

    async fn logout(&self, access_token: &SecretString) -> Result<(), ApiError> {
        self.authorized(Endpoint::Logout, access_token).await?;
        lock(&self.inner.data)
            .access_tokens
            .remove(access_token.expose_secret());
        Ok(())
    }

    async fn fetch_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
    ) -> Result<CollectionSnapshot, ApiError> {
        let email = self.authorized(Endpoint::Fetch(kind), access_token).await?;
        Ok(lock(&self.inner.data).snapshot(kind, &email))
    }

    async fn write_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
        write: &ResourceWrite,
    ) -> Result<CollectionSnapshot, ApiError> {
        let email = self.authorized(Endpoint::Write(kind), access_token).await?;
        lock(&self.inner.data).apply(kind, &email, write)
    }
}

/// A client with empty in-memory credential storage.
#[must_use]
pub fn client(api: &FakeApi) -> Client<FakeApi> {
    client_with(api, MemoryStorage::new())
}

/// A client whose credentials live in `storage`.
#[must_use]
pub fn client_with(api: &FakeApi, storage: MemoryStorage) -> Client<FakeApi> {
    Client::new(api.clone(), TokenStore::new(storage), SessionOptions::default())
}

/// A client already signed in as `email`, with both collections loaded.
pub async fn signed_in(api: &FakeApi, email: &str) -> (Client<FakeApi>, MemoryStorage) {
    let storage = MemoryStorage::with(api.issue_credentials(email));
    let client = client_with(api, storage.clone());
    client.start().await;
    client.cart().settled().await;
    client.wishlist().settled().await;
    (client, storage)
}

/// Standard fixture: one account (`ada@example.com` / `correct-horse`) and
/// three products priced $10.00, $4.50 and $25.00.
#[must_use]
pub fn shop() -> FakeApi {
    FakeApi::new()
        .with_account(ADA, ADA_PASSWORD, "Ada")
        .with_product(1, "Notebook", 1000)
        .with_product(2, "Pencil", 450)
        .with_product(3, "Backpack", 2500)
}

pub const ADA: &str = "ada@example.com";
pub const ADA_PASSWORD: &str = "correct-horse";
