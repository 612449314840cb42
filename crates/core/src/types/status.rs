//! Status enums for collection items.

use serde::{Deserialize, Serialize};

/// Synchronization status of a single collection item.
///
/// Only [`ItemStatus::Confirmed`] items are known to match the server. The
/// pending variants mark an optimistic local write whose request is still in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Confirmed,
    /// Created locally, not yet acknowledged.
    PendingAdd,
    /// Quantity changed locally, not yet acknowledged.
    PendingUpdate,
    /// Removal requested; the item stays visible (dimmed) until confirmed.
    PendingRemove,
}

impl ItemStatus {
    /// Whether a request for this item is still outstanding.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Confirmed)
    }

    /// Whether the item contributes to totals and counts.
    #[must_use]
    pub const fn counts_toward_total(self) -> bool {
        !matches!(self, Self::PendingRemove)
    }
}
