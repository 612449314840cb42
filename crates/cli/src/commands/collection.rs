//! Cart and wishlist commands.
//!
//! Every command waits for the initial load, applies its write, and waits
//! for the server's answer before printing the collection.

use rust_decimal::Decimal;
use shopsync_client::{Client, CollectionView, HttpApi, NewItem, ResourceKind};
use shopsync_core::{CurrencyCode, ItemKey, Price, ProductId, VariantId};

use super::CliError;
use crate::render;

fn key(product: u64, variant: Option<u64>) -> ItemKey {
    ItemKey::new(ProductId::new(product), variant.map(VariantId::new))
}

/// The collection once its initial load has finished.
async fn loaded(client: &Client<HttpApi>, kind: ResourceKind) -> Result<CollectionView, CliError> {
    if !client.session().is_authenticated() {
        return Err(CliError::NotSignedIn);
    }
    let view = client.store(kind).settled().await;
    match view.error {
        Some(error) => Err(error.into()),
        None => Ok(view),
    }
}

pub async fn show(client: &Client<HttpApi>, kind: ResourceKind) -> Result<(), CliError> {
    let view = loaded(client, kind).await?;
    render::collection(&view);
    Ok(())
}

pub async fn add(
    client: &Client<HttpApi>,
    kind: ResourceKind,
    product: u64,
    variant: Option<u64>,
    quantity: u32,
    price: Decimal,
) -> Result<(), CliError> {
    loaded(client, kind).await?;
    let store = client.store(kind);

    let item = NewItem::new(
        key(product, variant),
        quantity,
        Price::new(price, CurrencyCode::default()),
    );
    store.add(item)?.await?;

    render::collection(&store.view());
    Ok(())
}

pub async fn set_quantity(
    client: &Client<HttpApi>,
    kind: ResourceKind,
    product: u64,
    variant: Option<u64>,
    quantity: i64,
) -> Result<(), CliError> {
    let view = loaded(client, kind).await?;
    let key = key(product, variant);
    let item = view.find(key).ok_or(CliError::NotFound(key, kind))?;

    let store = client.store(kind);
    store.update_quantity(item.local_id, quantity)?.await?;

    render::collection(&store.view());
    Ok(())
}

pub async fn remove(
    client: &Client<HttpApi>,
    kind: ResourceKind,
    product: u64,
    variant: Option<u64>,
) -> Result<(), CliError> {
    let view = loaded(client, kind).await?;
    let key = key(product, variant);
    if !view.contains(key) {
        return Err(CliError::NotFound(key, kind));
    }

    let store = client.store(kind);
    store.remove_key(key)?.await?;

    render::collection(&store.view());
    Ok(())
}

pub async fn clear(client: &Client<HttpApi>, kind: ResourceKind) -> Result<(), CliError> {
    loaded(client, kind).await?;
    let store = client.store(kind);
    store.clear()?.await?;

    render::collection(&store.view());
    Ok(())
}
