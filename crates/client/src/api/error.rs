//! Transport error type and server error-body parsing.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors returned by a [`StoreApi`](super::StoreApi) call.
///
/// Cloneable so that one in-flight request can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// 401: missing, invalid or expired credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 409: the write conflicts with the server's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 422, or a 400 that carried per-field messages.
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// 5xx.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Extracted or fallback message.
        message: String,
    },

    /// Any other non-success status (400, 403, 404, 429, ...).
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Extracted or fallback message.
        message: String,
    },

    /// A success response whose body could not be understood.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify a non-success response.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let data: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = extract_message(&data).unwrap_or_else(|| status_message(status).to_string());
        let fields = FieldErrors::from_body(&data);

        match status {
            401 => Self::Unauthorized(message),
            409 => Self::Conflict(message),
            422 => Self::Validation(fields.with_fallback(message)),
            400 if !fields.is_empty() => Self::Validation(fields.with_fallback(message)),
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Whether this is the credentials-rejected case that warrants a refresh.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// The user-facing message carried by this error.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Connection error. Please check your internet connection and try again."
                    .to_string()
            }
            Self::Unauthorized(message) | Self::Conflict(message) | Self::Decode(message) => {
                message.clone()
            }
            Self::Validation(fields) => fields.to_string(),
            Self::Server { message, .. } | Self::Rejected { message, .. } => message.clone(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_response(status.as_u16(), "")
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Per-field validation messages, e.g. `{"email": "already taken"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<String, String>,
    message: Option<String>,
}

impl FieldErrors {
    /// Collect field messages from `{errors: {field: [msg]}}` and
    /// `{validation: {field: msg}}` bodies. Later sources override earlier.
    #[must_use]
    pub fn from_body(data: &Value) -> Self {
        let mut fields = BTreeMap::new();

        if let Some(errors) = data.get("errors").and_then(Value::as_object) {
            for (field, value) in errors {
                let message = match value {
                    Value::Array(messages) => messages.first().and_then(Value::as_str),
                    Value::String(message) => Some(message.as_str()),
                    _ => None,
                };
                if let Some(message) = message {
                    fields.insert(field.clone(), message.to_string());
                }
            }
        }

        if let Some(validation) = data.get("validation").and_then(Value::as_object) {
            for (field, value) in validation {
                if let Some(message) = value.as_str() {
                    fields.insert(field.clone(), message.to_string());
                }
            }
        }

        Self {
            fields,
            message: None,
        }
    }

    /// Build from explicit pairs.
    #[must_use]
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            message: None,
        }
    }

    fn with_fallback(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    /// Message for one field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate `(field, message)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return f.write_str(
                self.message
                    .as_deref()
                    .unwrap_or("Validation error. Please check your input."),
            );
        }
        let joined: Vec<String> = self
            .fields
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        f.write_str(&joined.join("; "))
    }
}

/// The most specific message in an error body.
///
/// Looks at `message`, then `error`, then the first entry of an `errors`
/// array (either a string or an object with a `message`).
#[must_use]
pub fn extract_message(data: &Value) -> Option<String> {
    let non_blank = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    non_blank(data.get("message"))
        .or_else(|| non_blank(data.get("error")))
        .or_else(|| {
            let first = data.get("errors")?.as_array()?.first()?;
            non_blank(Some(first)).or_else(|| non_blank(first.get("message")))
        })
}

/// Fallback message for a status code when the body carries none.
const fn status_message(status: u16) -> &'static str {
    match status {
        400 => "Invalid request. Please check your information.",
        401 => "Invalid credentials. Please check your email and password.",
        403 => "Access denied. You do not have permission.",
        404 => "Resource not found. Please try again.",
        409 => "Conflict. This resource already exists.",
        422 => "Validation error. Please check your input.",
        429 => "Too many requests. Please try again later.",
        500..=599 => "Server error. Please try again later.",
        _ => "An error occurred. Please try again.",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_priority() {
        let body = json!({"message": " Out of stock ", "error": "conflict"});
        assert_eq!(extract_message(&body).as_deref(), Some("Out of stock"));

        let body = json!({"message": "  ", "error": "bad token"});
        assert_eq!(extract_message(&body).as_deref(), Some("bad token"));

        let body = json!({"errors": [{"message": "first"}, "second"]});
        assert_eq!(extract_message(&body).as_deref(), Some("first"));

        let body = json!({"errors": ["plain"]});
        assert_eq!(extract_message(&body).as_deref(), Some("plain"));

        assert_eq!(extract_message(&json!({})), None);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ApiError::from_response(401, r#"{"error":"token expired"}"#),
            ApiError::Unauthorized("token expired".into())
        );
        assert!(matches!(
            ApiError::from_response(409, ""),
            ApiError::Conflict(m) if m.starts_with("Conflict")
        ));
        assert!(matches!(
            ApiError::from_response(503, "<html>"),
            ApiError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ApiError::from_response(404, r#"{"message":"no such item"}"#),
            ApiError::Rejected { status: 404, message } if message == "no such item"
        ));
    }

    #[test]
    fn test_field_errors() {
        let err = ApiError::from_response(
            400,
            r#"{"errors":{"email":["is taken","is long"],"username":"too short"},"validation":{"username":"reserved"}}"#,
        );
        let ApiError::Validation(fields) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(fields.get("email"), Some("is taken"));
        assert_eq!(fields.get("username"), Some("reserved"));
        assert_eq!(fields.to_string(), "email: is taken; username: reserved");
    }

    #[test]
    fn test_bare_400_is_rejected_not_validation() {
        assert!(matches!(
            ApiError::from_response(400, r#"{"error":"bad"}"#),
            ApiError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_422_without_fields_keeps_message() {
        let err = ApiError::from_response(422, r#"{"message":"quantity exceeds stock"}"#);
        assert_eq!(err.message(), "quantity exceeds stock");
    }
}
