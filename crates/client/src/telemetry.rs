//! Sentry scope helpers.
//!
//! The session manager attaches the signed-in user to the Sentry scope while
//! the session is authenticated, and both stores leave breadcrumbs when an
//! optimistic write has to be rolled back.

use shopsync_core::User;

/// Attach the signed-in user to subsequent Sentry events.
pub fn set_sentry_user(user: &User) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: user.id.clone(),
            email: user.email.as_ref().map(ToString::to_string),
            username: user.username.clone(),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Called whenever the session leaves the authenticated state.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a client-side action.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Rolled back add", Some(&[("product", "42")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
