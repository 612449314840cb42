//! Integration tests for keeping the collections in step with the session.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use secrecy::SecretString;
use shopsync_client::api::LoginCredentials;
use shopsync_client::{NewItem, ResourceKind, SessionError, SessionStatus, StoreError};
use shopsync_core::Email;
use shopsync_integration_tests::{
    ADA, ADA_PASSWORD, Endpoint, client, product, shop, signed_in, usd,
};

const BOB: &str = "bob@example.com";

fn credentials(email: &str, password: &str) -> LoginCredentials {
    LoginCredentials {
        email: Email::parse(email).unwrap(),
        password: SecretString::from(password.to_string()),
    }
}

#[tokio::test]
async fn test_login_loads_both_collections() {
    let api = shop();
    api.seed_cart(ADA, &[(1, 2)]);
    api.seed_wishlist(ADA, &[3]);
    let client = client(&api);
    client.start().await;
    assert_eq!(api.calls(Endpoint::Fetch(ResourceKind::Cart)), 0);

    client
        .session()
        .login(credentials(ADA, ADA_PASSWORD))
        .await
        .unwrap();

    let cart = client.cart().settled().await;
    let wishlist = client.wishlist().settled().await;
    assert_eq!(cart.item_count, 2);
    assert!(wishlist.contains(product(3)));
    assert_eq!(api.calls(Endpoint::Fetch(ResourceKind::Cart)), 1);
    assert_eq!(api.calls(Endpoint::Fetch(ResourceKind::Wishlist)), 1);
}

#[tokio::test]
async fn test_restore_loads_both_collections() {
    let api = shop();
    api.seed_cart(ADA, &[(2, 1)]);
    let (client, _) = signed_in(&api, ADA).await;

    assert!(client.store(ResourceKind::Cart).view().contains(product(2)));
    assert!(client.store(ResourceKind::Wishlist).view().is_empty());
}

#[tokio::test]
async fn test_logout_clears_before_the_server_answers() {
    let api = shop();
    api.seed_cart(ADA, &[(1, 1)]);
    api.seed_wishlist(ADA, &[2]);
    let (client, _) = signed_in(&api, ADA).await;
    api.hold(Endpoint::Logout);

    let signing_out = {
        let client = client.clone();
        tokio::spawn(async move { client.session().logout().await })
    };
    assert!(api.wait_for_calls(Endpoint::Logout, 1).await);

    assert_eq!(client.session().status(), SessionStatus::Unauthenticated);
    assert!(client.cart().view().items.is_empty());
    assert!(client.wishlist().view().items.is_empty());

    api.open(Endpoint::Logout);
    signing_out.await.unwrap();
}

#[tokio::test]
async fn test_write_resolving_after_logout_is_discarded() {
    let api = shop();
    let (client, _) = signed_in(&api, ADA).await;
    api.hold(Endpoint::Write(ResourceKind::Cart));

    let pending = client
        .cart()
        .add(NewItem::new(product(1), 1, usd(1000)))
        .unwrap();
    assert!(
        api.wait_for_calls(Endpoint::Write(ResourceKind::Cart), 1)
            .await
    );
    client.session().logout().await;
    assert!(client.cart().view().items.is_empty());

    api.open(Endpoint::Write(ResourceKind::Cart));
    assert_eq!(pending.await, Err(StoreError::SessionChanged));

    // The server applied it, but the signed-out client never shows it.
    assert_eq!(api.cart_of(ADA).len(), 1);
    assert!(client.cart().view().items.is_empty());
    assert_eq!(client.cart().view().error, None);
}

#[tokio::test]
async fn test_load_resolving_after_logout_is_discarded() {
    let api = shop();
    api.seed_cart(ADA, &[(1, 1)]);
    let (client, _) = signed_in(&api, ADA).await;
    api.hold(Endpoint::Fetch(ResourceKind::Cart));

    let reload = {
        let cart = client.cart().clone();
        tokio::spawn(async move { cart.reload().await })
    };
    assert!(
        api.wait_for_calls(Endpoint::Fetch(ResourceKind::Cart), 2)
            .await
    );
    client.session().logout().await;

    api.open(Endpoint::Fetch(ResourceKind::Cart));
    assert_eq!(reload.await.unwrap(), Err(StoreError::SessionChanged));
    let view = client.cart().view();
    assert!(view.items.is_empty());
    assert!(!view.is_loading);
}

#[tokio::test]
async fn test_switching_accounts_replaces_collections() {
    let api = shop().with_account(BOB, "bob-password", "Bob");
    api.seed_cart(ADA, &[(1, 1)]);
    api.seed_cart(BOB, &[(3, 2)]);
    let (client, _) = signed_in(&api, ADA).await;
    assert!(client.cart().view().contains(product(1)));

    client
        .session()
        .login(credentials(BOB, "bob-password"))
        .await
        .unwrap();

    let cart = client.cart().settled().await;
    assert!(!cart.contains(product(1)));
    assert!(cart.contains(product(3)));
    assert_eq!(cart.item_count, 2);
}

#[tokio::test]
async fn test_expiry_clears_collections() {
    let api = shop();
    api.seed_cart(ADA, &[(1, 1)]);
    let (client, storage) = signed_in(&api, ADA).await;

    client.session().expire();

    assert_eq!(
        client.session().status(),
        SessionStatus::Failed(SessionError::SessionExpired)
    );
    assert!(client.cart().view().items.is_empty());
    assert!(storage.snapshot().is_empty());
}
