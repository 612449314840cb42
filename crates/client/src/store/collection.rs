//! Pure optimistic collection reducer.
//!
//! Every local write is applied here synchronously and returns the server
//! request to send plus an [`Undo`] record. The store later either replaces
//! the items wholesale with the server's snapshot or hands the undo back.
//!
//! Each item carries the revision of the last local change that touched it.
//! A rollback only applies while that revision is unchanged, so a failure
//! that arrives after a later write or a reconciliation never clobbers newer
//! state.

use std::mem;

use shopsync_core::{CurrencyCode, ItemKey, ItemStatus, LineId, LocalId, Price};

use super::StoreError;
use crate::api::{CollectionSnapshot, ResourceKind, ResourceWrite};

/// One line of a local collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    /// Stable client-side identity; UI rows key on it.
    pub local_id: LocalId,
    /// Server line id; absent until the server has acknowledged the line.
    pub server_id: Option<LineId>,
    pub key: ItemKey,
    pub title: Option<String>,
    /// Always 1 in a wishlist.
    pub quantity: u32,
    pub unit_price: Price,
    pub status: ItemStatus,
    pub(crate) revision: u64,
}

impl ResourceItem {
    /// `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// What the caller wants to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub key: ItemKey,
    pub quantity: u32,
    /// Price shown until the server's snapshot arrives.
    pub unit_price: Price,
    pub title: Option<String>,
}

impl NewItem {
    #[must_use]
    pub const fn new(key: ItemKey, quantity: u32, unit_price: Price) -> Self {
        Self {
            key,
            quantity,
            unit_price,
            title: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// How to revert one optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Undo {
    /// Drop the line the write created.
    Discard { local_id: LocalId, revision: u64 },
    /// Put the line back exactly as it was.
    Restore { prior: ResourceItem, revision: u64 },
    /// Put every line back (after an optimistic clear).
    RestoreAll {
        prior: Vec<ResourceItem>,
        revision: u64,
    },
}

/// An optimistic write that has been applied locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) local_id: Option<LocalId>,
    pub(crate) write: ResourceWrite,
    pub(crate) undo: Undo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Collection {
    items: Vec<ResourceItem>,
    revision: u64,
}

impl Collection {
    pub(crate) fn items(&self) -> &[ResourceItem] {
        &self.items
    }

    /// Σ `unit_price × quantity` over lines not pending removal.
    pub(crate) fn total(&self) -> Price {
        let currency = self
            .items
            .first()
            .map_or_else(CurrencyCode::default, |item| item.unit_price.currency_code);
        self.counted().fold(Price::zero(currency), |total, item| {
            total.plus(item.line_total())
        })
    }

    /// Σ quantity over lines not pending removal.
    pub(crate) fn item_count(&self) -> u32 {
        self.counted()
            .fold(0, |count: u32, item| count.saturating_add(item.quantity))
    }

    fn counted(&self) -> impl Iterator<Item = &ResourceItem> {
        self.items
            .iter()
            .filter(|item| item.status.counts_toward_total())
    }

    /// Fail unless the total stays representable with `quantity` units at
    /// `unit_price` in place of the line `replacing` (or as a new line).
    fn check_total(
        &self,
        replacing: Option<LocalId>,
        unit_price: Price,
        quantity: u32,
    ) -> Result<(), StoreError> {
        let line = unit_price
            .checked_times(quantity)
            .ok_or(StoreError::AmountOverflow)?;
        self.counted()
            .filter(|item| Some(item.local_id) != replacing)
            .try_fold(line, |total, item| {
                item.unit_price
                    .checked_times(item.quantity)
                    .and_then(|other| total.checked_plus(other))
            })
            .map(|_| ())
            .ok_or(StoreError::AmountOverflow)
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn find_mut(&mut self, local_id: LocalId) -> Option<&mut ResourceItem> {
        self.items.iter_mut().find(|item| item.local_id == local_id)
    }

    fn position(&self, local_id: LocalId) -> Option<usize> {
        self.items.iter().position(|item| item.local_id == local_id)
    }

    // =========================================================================
    // Optimistic writes
    // =========================================================================

    /// Add `new`, merging into an existing line with the same key.
    ///
    /// Returns `None` when nothing needs to be sent (a wishlist already
    /// holding the product).
    pub(crate) fn apply_add(
        &mut self,
        new: NewItem,
        kind: ResourceKind,
    ) -> Result<Option<Applied>, StoreError> {
        let existing = self
            .items
            .iter()
            .find(|item| item.key == new.key)
            .map(|item| (item.local_id, item.status, item.quantity, item.unit_price));

        if let Some((local_id, status, quantity, unit_price)) = existing {
            if status == ItemStatus::PendingRemove {
                return Err(StoreError::ItemBusy(local_id));
            }
            if !kind.tracks_quantity() {
                return Ok(None);
            }
            let merged = quantity.checked_add(new.quantity).ok_or_else(|| {
                StoreError::InvalidQuantity(i64::from(quantity) + i64::from(new.quantity))
            })?;
            self.check_total(Some(local_id), unit_price, merged)?;

            let revision = self.next_revision();
            let Some(item) = self.find_mut(local_id) else {
                return Ok(None);
            };
            let prior = item.clone();
            item.quantity = merged;
            if item.status == ItemStatus::Confirmed {
                item.status = ItemStatus::PendingUpdate;
            }
            item.revision = revision;

            return Ok(Some(Applied {
                local_id: Some(local_id),
                write: ResourceWrite::Add {
                    key: new.key,
                    quantity: new.quantity,
                },
                undo: Undo::Restore { prior, revision },
            }));
        }

        let quantity = if kind.tracks_quantity() {
            new.quantity
        } else {
            1
        };
        self.check_total(None, new.unit_price, quantity)?;
        let revision = self.next_revision();
        let local_id = LocalId::generate();
        self.items.push(ResourceItem {
            local_id,
            server_id: None,
            key: new.key,
            title: new.title,
            quantity,
            unit_price: new.unit_price,
            status: ItemStatus::PendingAdd,
            revision,
        });

        Ok(Some(Applied {
            local_id: Some(local_id),
            write: ResourceWrite::Add {
                key: new.key,
                quantity,
            },
            undo: Undo::Discard { local_id, revision },
        }))
    }

    /// Set an absolute quantity (≥ 1). Absent items and unchanged
    /// quantities need no request.
    pub(crate) fn apply_update(
        &mut self,
        local_id: LocalId,
        quantity: u32,
    ) -> Result<Option<Applied>, StoreError> {
        let Some(item) = self.items.iter().find(|item| item.local_id == local_id) else {
            return Ok(None);
        };
        if item.status == ItemStatus::PendingRemove {
            return Err(StoreError::ItemBusy(local_id));
        }
        let Some(line) = item.server_id else {
            return Err(StoreError::ItemBusy(local_id));
        };
        if item.quantity == quantity {
            return Ok(None);
        }
        self.check_total(Some(local_id), item.unit_price, quantity)?;

        let revision = self.next_revision();
        let Some(item) = self.find_mut(local_id) else {
            return Ok(None);
        };
        let prior = item.clone();
        item.quantity = quantity;
        item.status = ItemStatus::PendingUpdate;
        item.revision = revision;

        Ok(Some(Applied {
            local_id: Some(local_id),
            write: ResourceWrite::Update { line, quantity },
            undo: Undo::Restore { prior, revision },
        }))
    }

    /// Mark a line for removal. It stays in place, excluded from totals,
    /// until the server confirms.
    pub(crate) fn apply_remove(
        &mut self,
        local_id: LocalId,
        kind: ResourceKind,
    ) -> Result<Option<Applied>, StoreError> {
        let revision = self.next_revision();
        let Some(item) = self.find_mut(local_id) else {
            return Ok(None);
        };
        if item.status == ItemStatus::PendingRemove {
            return Ok(None);
        }
        if item.server_id.is_none() && !kind.removes_by_product() {
            return Err(StoreError::ItemBusy(local_id));
        }

        let prior = item.clone();
        item.status = ItemStatus::PendingRemove;
        item.revision = revision;

        Ok(Some(Applied {
            local_id: Some(local_id),
            write: ResourceWrite::Remove {
                line: prior.server_id,
                key: prior.key,
            },
            undo: Undo::Restore { prior, revision },
        }))
    }

    /// Mark every line for removal.
    pub(crate) fn apply_clear(&mut self) -> Option<Applied> {
        if self.items.is_empty() {
            return None;
        }
        let revision = self.next_revision();
        let prior = self.items.clone();
        for item in &mut self.items {
            item.status = ItemStatus::PendingRemove;
            item.revision = revision;
        }

        Some(Applied {
            local_id: None,
            write: ResourceWrite::Clear,
            undo: Undo::RestoreAll { prior, revision },
        })
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Revert a failed write. Returns `false` if the affected lines changed
    /// since, in which case nothing is touched.
    pub(crate) fn rollback(&mut self, undo: Undo) -> bool {
        match undo {
            Undo::Discard { local_id, revision } => match self.position(local_id) {
                Some(index) if self.revision_at(index) == Some(revision) => {
                    self.items.remove(index);
                    true
                }
                _ => false,
            },
            Undo::Restore { prior, revision } => {
                match self.find_mut(prior.local_id) {
                    Some(item) if item.revision == revision => {
                        *item = prior;
                        true
                    }
                    _ => false,
                }
            }
            Undo::RestoreAll { prior, revision } => {
                if self.revision == revision {
                    self.items = prior;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn revision_at(&self, index: usize) -> Option<u64> {
        self.items.get(index).map(|item| item.revision)
    }

    /// Replace every line with the server's snapshot.
    ///
    /// Local ids carry over to the line with the same server id, or failing
    /// that to the pending add with the same key.
    pub(crate) fn reconcile(&mut self, snapshot: CollectionSnapshot) {
        let revision = self.next_revision();
        let mut previous = mem::take(&mut self.items);

        self.items = snapshot
            .items
            .into_iter()
            .map(|server| {
                let matched = take_first(&mut previous, |item| {
                    item.server_id == Some(server.server_id)
                })
                .or_else(|| {
                    take_first(&mut previous, |item| {
                        item.server_id.is_none() && item.key == server.key
                    })
                });
                let (local_id, local_title) =
                    matched.map_or_else(|| (LocalId::generate(), None), |item| {
                        (item.local_id, item.title)
                    });

                ResourceItem {
                    local_id,
                    server_id: Some(server.server_id),
                    key: server.key,
                    title: server.title.or(local_title),
                    quantity: server.quantity,
                    unit_price: server.unit_price,
                    status: ItemStatus::Confirmed,
                    revision,
                }
            })
            .collect();
    }

    /// Drop every line.
    pub(crate) fn clear(&mut self) {
        self.next_revision();
        self.items.clear();
    }
}

fn take_first(
    items: &mut Vec<ResourceItem>,
    predicate: impl Fn(&ResourceItem) -> bool,
) -> Option<ResourceItem> {
    let index = items.iter().position(predicate)?;
    Some(items.remove(index))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use rust_decimal::Decimal;
    use shopsync_core::ProductId;

    use super::*;
    use crate::api::ServerItem;

    fn key(product: u64) -> ItemKey {
        ItemKey::new(ProductId::new(product), None)
    }

    fn usd(cents: i64) -> Price {
        Price::from_minor(cents, CurrencyCode::USD)
    }

    fn new_item(product: u64, quantity: u32, cents: i64) -> NewItem {
        NewItem::new(key(product), quantity, usd(cents))
    }

    fn server_item(line: u64, product: u64, quantity: u32, cents: i64) -> ServerItem {
        ServerItem {
            server_id: LineId::new(line),
            key: key(product),
            title: None,
            quantity,
            unit_price: usd(cents),
        }
    }

    fn confirmed(items: Vec<ServerItem>) -> Collection {
        let mut collection = Collection::default();
        collection.reconcile(CollectionSnapshot { items });
        collection
    }

    #[test]
    fn test_add_is_optimistic_and_counted() {
        let mut cart = Collection::default();
        let applied = cart
            .apply_add(new_item(1, 2, 1000), ResourceKind::Cart)
            .unwrap()
            .unwrap();

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].status, ItemStatus::PendingAdd);
        assert_eq!(cart.total().amount, Decimal::new(2000, 2));
        assert_eq!(cart.item_count(), 2);
        assert_eq!(
            applied.write,
            ResourceWrite::Add {
                key: key(1),
                quantity: 2
            }
        );
    }

    #[test]
    fn test_add_existing_key_merges() {
        let mut cart = confirmed(vec![server_item(10, 1, 1, 500)]);
        let local_id = cart.items()[0].local_id;

        let applied = cart
            .apply_add(new_item(1, 2, 500), ResourceKind::Cart)
            .unwrap()
            .unwrap();

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
        assert_eq!(cart.items()[0].status, ItemStatus::PendingUpdate);
        assert_eq!(applied.local_id, Some(local_id));
        assert_eq!(
            applied.write,
            ResourceWrite::Add {
                key: key(1),
                quantity: 2
            }
        );
    }

    #[test]
    fn test_wishlist_add_existing_is_noop() {
        let mut wishlist = confirmed(vec![server_item(1, 1, 1, 500)]);
        let before = wishlist.items().to_vec();
        assert!(
            wishlist
                .apply_add(new_item(1, 1, 500), ResourceKind::Wishlist)
                .unwrap()
                .is_none()
        );
        assert_eq!(wishlist.items(), before.as_slice());
    }

    #[test]
    fn test_wishlist_add_forces_quantity_one() {
        let mut wishlist = Collection::default();
        wishlist
            .apply_add(new_item(4, 5, 500), ResourceKind::Wishlist)
            .unwrap();
        assert_eq!(wishlist.items()[0].quantity, 1);
    }

    #[test]
    fn test_rollback_restores_exact_items() {
        let mut cart = confirmed(vec![server_item(10, 1, 1, 500), server_item(11, 2, 4, 250)]);
        let before = cart.items().to_vec();
        let second = cart.items()[1].local_id;

        let add = cart
            .apply_add(new_item(3, 1, 100), ResourceKind::Cart)
            .unwrap()
            .unwrap();
        assert!(cart.rollback(add.undo));
        assert_eq!(cart.items(), before.as_slice());

        let merge = cart
            .apply_add(new_item(1, 1, 500), ResourceKind::Cart)
            .unwrap()
            .unwrap();
        assert!(cart.rollback(merge.undo));
        assert_eq!(cart.items(), before.as_slice());

        let update = cart.apply_update(second, 9).unwrap().unwrap();
        assert!(cart.rollback(update.undo));
        assert_eq!(cart.items(), before.as_slice());

        let remove = cart
            .apply_remove(second, ResourceKind::Cart)
            .unwrap()
            .unwrap();
        assert_eq!(cart.items()[1].status, ItemStatus::PendingRemove);
        assert!(cart.rollback(remove.undo));
        assert_eq!(cart.items(), before.as_slice(), "restored at original index");

        let clear = cart.apply_clear().unwrap();
        assert_eq!(cart.item_count(), 0);
        assert!(cart.rollback(clear.undo));
        assert_eq!(cart.items(), before.as_slice());
    }

    #[test]
    fn test_remove_excludes_from_totals_but_keeps_item() {
        let mut cart = confirmed(vec![server_item(10, 1, 2, 500)]);
        let id = cart.items()[0].local_id;
        cart.apply_remove(id, ResourceKind::Cart).unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.total().amount, Decimal::ZERO);
        assert_eq!(cart.item_count(), 0);
    }

    #[test]
    fn test_superseded_rollback_is_skipped() {
        let mut cart = confirmed(vec![server_item(10, 1, 1, 500)]);
        let id = cart.items()[0].local_id;

        let first = cart.apply_update(id, 2).unwrap().unwrap();
        let _second = cart.apply_update(id, 3).unwrap().unwrap();

        assert!(!cart.rollback(first.undo));
        assert_eq!(cart.items()[0].quantity, 3);
    }

    #[test]
    fn test_rollback_after_reconcile_is_skipped() {
        let mut cart = Collection::default();
        let add = cart
            .apply_add(new_item(1, 1, 500), ResourceKind::Cart)
            .unwrap()
            .unwrap();
        cart.reconcile(CollectionSnapshot {
            items: vec![server_item(10, 1, 1, 500)],
        });
        assert!(!cart.rollback(add.undo));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn test_reconcile_keeps_local_ids() {
        let mut cart = confirmed(vec![server_item(10, 1, 1, 500)]);
        let existing = cart.items()[0].local_id;
        let pending = cart
            .apply_add(new_item(2, 1, 700).with_title("Mug"), ResourceKind::Cart)
            .unwrap()
            .unwrap()
            .local_id
            .unwrap();

        cart.reconcile(CollectionSnapshot {
            items: vec![server_item(10, 1, 1, 500), server_item(11, 2, 1, 700)],
        });

        assert_eq!(cart.items()[0].local_id, existing);
        assert_eq!(cart.items()[1].local_id, pending);
        assert_eq!(cart.items()[1].title.as_deref(), Some("Mug"));
        assert!(cart.items().iter().all(|item| {
            item.status == ItemStatus::Confirmed && item.server_id.is_some()
        }));
    }

    #[test]
    fn test_update_and_remove_edge_cases() {
        let mut cart = Collection::default();
        assert!(cart.apply_update(LocalId::generate(), 2).unwrap().is_none());
        assert!(cart
            .apply_remove(LocalId::generate(), ResourceKind::Cart)
            .unwrap()
            .is_none());

        let pending = cart
            .apply_add(new_item(1, 1, 500), ResourceKind::Cart)
            .unwrap()
            .unwrap()
            .local_id
            .unwrap();
        assert_eq!(
            cart.apply_update(pending, 2),
            Err(StoreError::ItemBusy(pending))
        );
        assert_eq!(
            cart.apply_remove(pending, ResourceKind::Cart),
            Err(StoreError::ItemBusy(pending))
        );
    }

    #[test]
    fn test_unrepresentable_totals_are_rejected_before_apply() {
        let max = Price::new(Decimal::MAX, CurrencyCode::USD);
        let mut cart = Collection::default();

        assert_eq!(
            cart.apply_add(NewItem::new(key(1), 2, max), ResourceKind::Cart),
            Err(StoreError::AmountOverflow)
        );
        assert!(cart.items().is_empty());
        assert_eq!(cart.total().amount, Decimal::ZERO);

        cart.apply_add(NewItem::new(key(1), 1, max), ResourceKind::Cart)
            .unwrap()
            .unwrap();
        let before = cart.items().to_vec();
        assert_eq!(
            cart.apply_add(new_item(2, 1, 100), ResourceKind::Cart),
            Err(StoreError::AmountOverflow)
        );
        assert_eq!(
            cart.apply_add(NewItem::new(key(1), 1, max), ResourceKind::Cart),
            Err(StoreError::AmountOverflow)
        );
        assert_eq!(cart.items(), before.as_slice());
        assert_eq!(cart.total().amount, Decimal::MAX);
    }

    #[test]
    fn test_update_past_representable_total_is_rejected() {
        let mut cart = confirmed(vec![ServerItem {
            unit_price: Price::new(Decimal::MAX, CurrencyCode::USD),
            ..server_item(10, 1, 1, 0)
        }]);
        let id = cart.items()[0].local_id;

        assert_eq!(cart.apply_update(id, 3), Err(StoreError::AmountOverflow));
        assert_eq!(cart.items()[0].quantity, 1);
        assert_eq!(cart.items()[0].status, ItemStatus::Confirmed);
    }

    #[test]
    fn test_line_pending_removal_cannot_be_updated() {
        let mut cart = confirmed(vec![server_item(10, 1, 2, 500)]);
        let id = cart.items()[0].local_id;
        cart.apply_remove(id, ResourceKind::Cart).unwrap().unwrap();

        assert_eq!(cart.apply_update(id, 5), Err(StoreError::ItemBusy(id)));
        assert_eq!(cart.items()[0].quantity, 2);
        assert_eq!(cart.items()[0].status, ItemStatus::PendingRemove);
    }

    #[test]
    fn test_merged_quantity_cannot_wrap() {
        let mut cart = confirmed(vec![server_item(10, 1, u32::MAX, 0)]);
        assert!(matches!(
            cart.apply_add(new_item(1, 1, 0), ResourceKind::Cart),
            Err(StoreError::InvalidQuantity(_))
        ));
        assert_eq!(cart.items()[0].quantity, u32::MAX);
    }

    #[test]
    fn test_wishlist_removes_pending_add_by_product() {
        let mut wishlist = Collection::default();
        let pending = wishlist
            .apply_add(new_item(5, 1, 500), ResourceKind::Wishlist)
            .unwrap()
            .unwrap()
            .local_id
            .unwrap();
        let applied = wishlist
            .apply_remove(pending, ResourceKind::Wishlist)
            .unwrap()
            .unwrap();
        assert_eq!(
            applied.write,
            ResourceWrite::Remove {
                line: None,
                key: key(5)
            }
        );
    }
}
