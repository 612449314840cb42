//! reqwest-backed [`StoreApi`].

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use shopsync_core::{CurrencyCode, ItemKey, LineId, Price, ProductId, ProfilePayload, User, VariantId};
use tracing::instrument;
use url::Url;

use super::{
    ApiError, AuthGrant, CollectionSnapshot, LoginCredentials, ProfileUpdate, Registration,
    ResourceKind, ResourceWrite, ServerItem, StoreApi, TokenPair,
};
use crate::config::{ClientConfig, ConfigError};

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: ProfilePayload,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: Option<LineId>,
    product_id: ProductId,
    #[serde(default)]
    variant_id: Option<VariantId>,
    #[serde(default)]
    quantity: Option<u32>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    product: Option<WireProduct>,
}

#[derive(Debug, Deserialize)]
struct WireProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
}

impl WireItem {
    fn into_server_item(self, currency: CurrencyCode) -> ServerItem {
        let (title, product_price) = self
            .product
            .map_or((None, None), |product| (product.name, product.price));
        // Wishlist entries have no line id of their own; the product is unique there.
        let server_id = self
            .id
            .unwrap_or_else(|| LineId::new(self.product_id.as_u64()));
        let variant = self.variant_id.filter(|variant| variant.as_u64() != 0);

        ServerItem {
            server_id,
            key: ItemKey::new(self.product_id, variant),
            title,
            quantity: self.quantity.unwrap_or(1).max(1),
            unit_price: Price::new(
                self.price.or(product_price).unwrap_or(Decimal::ZERO),
                currency,
            ),
        }
    }
}

/// Pull the item list out of a collection body.
///
/// Carts answer `{items: [...] | null, ...}`, wishlists a bare array.
/// Returns `None` when the body carries no collection at all, as most write
/// acknowledgements do.
fn parse_snapshot(
    body: Value,
    currency: CurrencyCode,
) -> Result<Option<CollectionSnapshot>, ApiError> {
    let items = match body {
        Value::Null => Value::Array(Vec::new()),
        Value::Array(_) => body,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Null) => Value::Array(Vec::new()),
            Some(items) => items,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    let items: Vec<WireItem> =
        serde_json::from_value(items).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(Some(CollectionSnapshot {
        items: items
            .into_iter()
            .map(|item| item.into_server_item(currency))
            .collect(),
    }))
}

/// Body of `PUT /auth/profile`; unset fields are left out entirely.
fn profile_update_body(update: &ProfileUpdate) -> Value {
    let fields = [
        ("username", &update.username),
        ("firstName", &update.first_name),
        ("lastName", &update.last_name),
        ("phone", &update.phone),
        ("avatar", &update.avatar),
    ];
    Value::Object(
        fields
            .into_iter()
            .filter_map(|(name, value)| {
                value
                    .as_ref()
                    .map(|value| (name.to_owned(), Value::String(value.clone())))
            })
            .collect(),
    )
}

/// Strip the `{user: {...}}` envelope some deployments put around a profile.
fn unwrap_profile(mut body: Value) -> Result<User, ApiError> {
    if let Some(user) = body.get_mut("user").map(Value::take) {
        body = user;
    }
    let payload: ProfilePayload = decode(body)?;
    Ok(User::from(payload))
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Client
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-over-HTTP implementation of [`StoreApi`].
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct HttpApi {
    inner: Arc<HttpApiInner>,
}

struct HttpApiInner {
    client: reqwest::Client,
    base_url: Url,
    currency: CurrencyCode,
}

impl HttpApi {
    /// Create a client for the configured base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::HttpClient` if the TLS backend cannot be
    /// initialized.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("shopsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(HttpApiInner {
                client,
                base_url: config.api_base_url.clone(),
                currency: CurrencyCode::default(),
            }),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self
            .inner
            .base_url
            .join(path)
            .map_err(|e| ApiError::Decode(format!("invalid path '{path}': {e}")))?;
        let builder = self.inner.client.request(method, url);
        Ok(match token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        })
    }

    /// Send a request and return its JSON body (`Null` when empty).
    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "API request failed");
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn write_request(
        &self,
        token: &SecretString,
        kind: ResourceKind,
        write: &ResourceWrite,
    ) -> Result<RequestBuilder, ApiError> {
        match (kind, write) {
            (ResourceKind::Cart, ResourceWrite::Add { key, quantity }) => Ok(self
                .request(Method::POST, "cart/items", Some(token))?
                .json(&json!({
                    "product_id": key.product,
                    "variant_id": key.variant,
                    "quantity": quantity,
                }))),
            (ResourceKind::Cart, ResourceWrite::Update { line, quantity }) => Ok(self
                .request(Method::PATCH, &format!("cart/items/{line}"), Some(token))?
                .json(&json!({ "quantity": quantity }))),
            (ResourceKind::Cart, ResourceWrite::Remove { line: Some(line), .. }) => {
                self.request(Method::DELETE, &format!("cart/items/{line}"), Some(token))
            }
            (ResourceKind::Cart, ResourceWrite::Clear) => {
                self.request(Method::DELETE, "cart", Some(token))
            }
            (ResourceKind::Wishlist, ResourceWrite::Add { key, .. }) => Ok(self
                .request(Method::POST, "wishlist", Some(token))?
                .json(&json!({ "product_id": key.product }))),
            (ResourceKind::Wishlist, ResourceWrite::Remove { key, .. }) => self.request(
                Method::DELETE,
                &format!("wishlist/{}", key.product),
                Some(token),
            ),
            (kind, write) => Err(ApiError::Rejected {
                status: 405,
                message: format!("{kind} does not support {}", write.name()),
            }),
        }
    }
}

impl StoreApi for HttpApi {
    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthGrant, ApiError> {
        let request = self.request(Method::POST, "auth/login", None)?.json(&json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
        }));
        let body: AuthResponse = decode(self.send(request).await?)?;
        Ok(body.into())
    }

    #[instrument(skip_all, fields(email = %registration.email))]
    async fn register(&self, registration: &Registration) -> Result<AuthGrant, ApiError> {
        let request = self
            .request(Method::POST, "auth/register", None)?
            .json(&json!({
                "username": registration.username,
                "email": registration.email,
                "password": registration.password.expose_secret(),
                "firstName": registration.first_name,
                "lastName": registration.last_name,
                "phone": registration.phone,
            }));
        let body: AuthResponse = decode(self.send(request).await?)?;
        Ok(body.into())
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, ApiError> {
        let request = self
            .request(Method::POST, "auth/refresh", None)?
            .json(&json!({ "refresh_token": refresh_token.expose_secret() }));
        let body: RefreshResponse = decode(self.send(request).await?)?;
        Ok(TokenPair {
            access_token: SecretString::from(body.access_token),
            refresh_token: body.refresh_token.map(SecretString::from),
        })
    }

    #[instrument(skip_all)]
    async fn profile(&self, access_token: &SecretString) -> Result<User, ApiError> {
        let request = self.request(Method::GET, "auth/profile", Some(access_token))?;
        unwrap_profile(self.send(request).await?)
    }

    #[instrument(skip_all)]
    async fn update_profile(
        &self,
        access_token: &SecretString,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError> {
        let request = self
            .request(Method::PUT, "auth/profile", Some(access_token))?
            .json(&profile_update_body(update));
        unwrap_profile(self.send(request).await?)
    }

    #[instrument(skip_all)]
    async fn logout(&self, access_token: &SecretString) -> Result<(), ApiError> {
        let request = self.request(Method::POST, "auth/logout", Some(access_token))?;
        self.send(request).await.map(|_| ())
    }

    #[instrument(skip(self, access_token))]
    async fn fetch_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
    ) -> Result<CollectionSnapshot, ApiError> {
        let request = self.request(Method::GET, kind.as_str(), Some(access_token))?;
        let body = self.send(request).await?;
        parse_snapshot(body, self.inner.currency)?
            .ok_or_else(|| ApiError::Decode(format!("{kind} response carries no items")))
    }

    #[instrument(skip(self, access_token), fields(op = write.name()))]
    async fn write_collection(
        &self,
        access_token: &SecretString,
        kind: ResourceKind,
        write: &ResourceWrite,
    ) -> Result<CollectionSnapshot, ApiError> {
        let request = self.write_request(access_token, kind, write)?;
        let body = self.send(request).await?;
        match parse_snapshot(body, self.inner.currency)? {
            Some(snapshot) => Ok(snapshot),
            None => {
                tracing::debug!(%kind, "write response carried no collection, re-fetching");
                self.fetch_collection(access_token, kind).await
            }
        }
    }
}

impl From<AuthResponse> for AuthGrant {
    fn from(body: AuthResponse) -> Self {
        Self {
            tokens: TokenPair {
                access_token: SecretString::from(body.access_token),
                refresh_token: body.refresh_token.map(SecretString::from),
            },
            user: User::from(body.user),
            message: body.message,
        }
    }
}
