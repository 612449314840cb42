//! Integration tests for the wishlist store.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use shopsync_client::{ApiError, NewItem, ResourceKind, StoreError};
use shopsync_core::{ItemStatus, LocalId};
use shopsync_integration_tests::{ADA, Endpoint, product, shop, signed_in, usd};

const WRITE: Endpoint = Endpoint::Write(ResourceKind::Wishlist);

#[tokio::test]
async fn test_add_then_remove() {
    let api = shop();
    let (client, _) = signed_in(&api, ADA).await;
    let wishlist = client.wishlist();

    let pending = wishlist.add(NewItem::new(product(3), 1, usd(2500))).unwrap();
    assert!(wishlist.view().contains(product(3)));
    pending.await.unwrap();
    assert_eq!(api.wishlist_of(ADA).len(), 1);

    api.hold(WRITE);
    let pending = wishlist.remove_key(product(3)).unwrap();
    let view = wishlist.view();
    assert!(!view.contains(product(3)));
    assert_eq!(view.items[0].status, ItemStatus::PendingRemove);

    api.open(WRITE);
    pending.await.unwrap();
    assert!(wishlist.view().items.is_empty());
    assert!(api.wishlist_of(ADA).is_empty());
}

#[tokio::test]
async fn test_adding_a_saved_product_is_a_noop() {
    let api = shop();
    api.seed_wishlist(ADA, &[1]);
    let (client, _) = signed_in(&api, ADA).await;
    let wishlist = client.wishlist();
    let before = wishlist.view().items;

    let pending = wishlist.add(NewItem::new(product(1), 1, usd(1000))).unwrap();

    assert!(pending.is_noop());
    assert_eq!(pending.local_id(), Some(before[0].local_id));
    assert_eq!(pending.await, Ok(()));
    assert_eq!(wishlist.view().items, before);
    assert_eq!(api.calls(WRITE), 0);
}

#[tokio::test]
async fn test_wishlist_lines_have_quantity_one() {
    let api = shop();
    let (client, _) = signed_in(&api, ADA).await;

    client
        .wishlist()
        .add(NewItem::new(product(2), 4, usd(450)))
        .unwrap()
        .await
        .unwrap();

    let view = client.wishlist().view();
    assert_eq!(view.items[0].quantity, 1);
    assert_eq!(view.item_count, 1);
}

#[tokio::test]
async fn test_quantity_operations_are_unsupported() {
    let api = shop();
    api.seed_wishlist(ADA, &[1]);
    let (client, _) = signed_in(&api, ADA).await;
    let wishlist = client.wishlist();
    let line = wishlist.view().items[0].local_id;

    assert_eq!(
        wishlist.update_quantity(line, 2).unwrap_err(),
        StoreError::Unsupported {
            kind: ResourceKind::Wishlist,
            operation: "update_quantity",
        }
    );
    assert!(matches!(
        wishlist.clear(),
        Err(StoreError::Unsupported { .. })
    ));
    assert_eq!(api.calls(WRITE), 0);
}

#[tokio::test]
async fn test_failed_remove_puts_the_product_back() {
    let api = shop();
    api.seed_wishlist(ADA, &[1, 2]);
    let (client, _) = signed_in(&api, ADA).await;
    let wishlist = client.wishlist();
    let before = wishlist.view().items;
    api.fail_next(
        WRITE,
        ApiError::Server {
            status: 502,
            message: "bad gateway".into(),
        },
    );

    let outcome = wishlist.remove(before[0].local_id).unwrap().await;

    assert!(outcome.is_err());
    assert_eq!(wishlist.view().items, before);
    assert!(wishlist.view().contains(product(1)));
}

#[tokio::test]
async fn test_removing_an_unknown_line_is_a_noop() {
    let api = shop();
    let (client, _) = signed_in(&api, ADA).await;

    let pending = client.wishlist().remove(LocalId::generate()).unwrap();

    assert!(pending.is_noop());
    assert_eq!(api.calls(WRITE), 0);
}
