//! Access-token expiry decoding.
//!
//! Only the `exp` claim of the payload segment is read. Signatures are not
//! checked; the server remains the authority on validity.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<Value>,
}

/// Expiry encoded in a JWT-shaped token, or `None` if there is none.
///
/// Never fails: anything that is not `header.payload[.signature]` with a
/// base64 JSON payload containing a numeric `exp` yields `None`.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;

    let seconds = match claims.exp? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(truncate))?,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0)
}

#[allow(clippy::cast_possible_truncation)] // out-of-range values saturate, then fail from_timestamp
fn truncate(value: f64) -> i64 {
    value as i64
}
