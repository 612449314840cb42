//! Session commands.
//!
//! # Usage
//!
//! ```bash
//! shopsync login -e ada@example.com -p hunter2
//! shopsync register -u ada -e ada@example.com --first-name Ada --last-name Lovelace
//! shopsync whoami
//! shopsync profile --first-name Augusta
//! shopsync logout
//! ```

use secrecy::SecretString;
use shopsync_client::api::{LoginCredentials, ProfileUpdate, Registration};
use shopsync_client::{Client, HttpApi, SessionError};
use shopsync_core::Email;

use super::CliError;
use crate::render;

/// Arguments of `shopsync register`.
pub struct RegisterArgs {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// Sign in and persist the new credentials.
pub async fn login(
    client: &Client<HttpApi>,
    email: &str,
    password: String,
) -> Result<(), CliError> {
    let credentials = LoginCredentials {
        email: Email::parse(email)?,
        password: SecretString::from(password),
    };

    let user = client.session().login(credentials).await?;
    render::signed_in(&user);
    Ok(())
}

/// Create an account. An account that still needs email verification is
/// reported, not treated as a failure.
pub async fn register(client: &Client<HttpApi>, args: RegisterArgs) -> Result<(), CliError> {
    let registration = Registration {
        username: args.username,
        email: Email::parse(&args.email)?,
        password: SecretString::from(args.password),
        first_name: args.first_name,
        last_name: args.last_name,
        phone: args.phone,
    };

    match client.session().register(registration).await {
        Ok(user) => render::signed_in(&user),
        Err(SessionError::VerificationRequired(user)) => render::verification_required(&user),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Edit the signed-in user's profile and show the result.
pub async fn update_profile(
    client: &Client<HttpApi>,
    update: ProfileUpdate,
) -> Result<(), CliError> {
    if !client.session().is_authenticated() {
        return Err(CliError::NotSignedIn);
    }
    if update.is_empty() {
        render::message("Nothing to change");
        return Ok(());
    }

    let user = client.session().update_profile(update).await?;
    render::user(&user, client.session().token_expiry());
    Ok(())
}

pub async fn logout(client: &Client<HttpApi>) {
    client.session().logout().await;
    render::message("Signed out");
}

pub fn whoami(client: &Client<HttpApi>) -> Result<(), CliError> {
    let state = client.session().state();
    match (state.is_authenticated(), state.user()) {
        (true, Some(user)) => {
            render::user(user, client.session().token_expiry());
            Ok(())
        }
        _ => Err(state
            .last_error
            .map_or(CliError::NotSignedIn, CliError::Session)),
    }
}
