//! Optimistic, server-backed collections.
//!
//! A [`ResourceStore`] mirrors one collection (cart or wishlist). Writes are
//! applied locally and published before the request leaves, then the
//! server's snapshot replaces the local items wholesale. A failed request
//! restores the affected items and records the error on the view.
//!
//! Results that resolve after the store was [`reset`](ResourceStore::reset)
//! (sign-out, a new sign-in) are recognized by their generation and
//! dropped.

mod collection;
mod error;

pub use collection::{NewItem, ResourceItem};
pub use error::StoreError;

use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use shopsync_core::{ItemKey, LocalId, Price};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use self::collection::{Applied, Collection};
use crate::api::{CollectionSnapshot, ResourceKind, StoreApi};
use crate::session::SessionManager;
use crate::telemetry;

/// What a UI renders for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionView {
    pub kind: ResourceKind,
    /// In display order, including lines pending removal.
    pub items: Vec<ResourceItem>,
    /// Excludes lines pending removal.
    pub total: Price,
    pub item_count: u32,
    pub is_loading: bool,
    /// Error of the most recent failed request, until the next success.
    pub error: Option<StoreError>,
}

impl CollectionView {
    fn empty(kind: ResourceKind) -> Self {
        Self::of(kind, &Collection::default(), false, None)
    }

    fn of(
        kind: ResourceKind,
        collection: &Collection,
        is_loading: bool,
        error: Option<StoreError>,
    ) -> Self {
        Self {
            kind,
            items: collection.items().to_vec(),
            total: collection.total(),
            item_count: collection.item_count(),
            is_loading,
            error,
        }
    }

    #[must_use]
    pub fn get(&self, local_id: LocalId) -> Option<&ResourceItem> {
        self.items.iter().find(|item| item.local_id == local_id)
    }

    /// The line for `key`, whatever its status.
    #[must_use]
    pub fn find(&self, key: ItemKey) -> Option<&ResourceItem> {
        self.items.iter().find(|item| item.key == key)
    }

    /// Whether `key` is present and not on its way out.
    #[must_use]
    pub fn contains(&self, key: ItemKey) -> bool {
        self.find(key)
            .is_some_and(|item| item.status.counts_toward_total())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self
            .items
            .iter()
            .any(|item| item.status.counts_toward_total())
    }

    /// Whether any line still waits for the server.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.items.iter().any(|item| item.status.is_pending())
    }
}

/// Handle to an optimistic write whose request runs in the background.
///
/// Dropping it does not cancel the request. Await it (or call
/// [`outcome`](Self::outcome)) to learn whether the server accepted the
/// write; by then the store already reflects the result.
#[derive(Debug)]
pub struct PendingMutation {
    local_id: Option<LocalId>,
    task: Option<JoinHandle<Result<(), StoreError>>>,
}

impl PendingMutation {
    const fn settled(local_id: Option<LocalId>) -> Self {
        Self {
            local_id,
            task: None,
        }
    }

    /// Local id of the line the write created or changed.
    #[must_use]
    pub const fn local_id(&self) -> Option<LocalId> {
        self.local_id
    }

    /// Whether the write needed no request at all.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.task.is_none()
    }

    /// Wait for the server's answer.
    ///
    /// # Errors
    ///
    /// The reason the write was rolled back (or discarded).
    pub async fn outcome(self) -> Result<(), StoreError> {
        match self.task {
            None => Ok(()),
            Some(task) => task
                .await
                .unwrap_or_else(|e| Err(StoreError::Aborted(e.to_string()))),
        }
    }
}

impl IntoFuture for PendingMutation {
    type Output = Result<(), StoreError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome().boxed()
    }
}

/// One optimistic collection bound to a session.
///
/// Cheap to clone; clones share all state.
pub struct ResourceStore<A> {
    inner: Arc<StoreInner<A>>,
}

impl<A> Clone for ResourceStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<A> {
    kind: ResourceKind,
    session: SessionManager<A>,
    state: Mutex<StoreState>,
    views: watch::Sender<CollectionView>,
}

#[derive(Default)]
struct StoreState {
    collection: Collection,
    /// Bumped by `reset`; results from an older generation are dropped.
    generation: u64,
    /// Sequence number of the latest load; only it may apply its snapshot.
    load_seq: u64,
    is_loading: bool,
    last_error: Option<StoreError>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: StoreApi> ResourceStore<A> {
    #[must_use]
    pub fn new(kind: ResourceKind, session: SessionManager<A>) -> Self {
        let (views, _) = watch::channel(CollectionView::empty(kind));
        Self {
            inner: Arc::new(StoreInner {
                kind,
                session,
                state: Mutex::new(StoreState::default()),
                views,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> CollectionView {
        self.inner.views.borrow().clone()
    }

    /// Receive every published view.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CollectionView> {
        self.inner.views.subscribe()
    }

    /// Wait until no load is in flight and return the view at that point.
    pub async fn settled(&self) -> CollectionView {
        let mut views = self.subscribe();
        match views.wait_for(|view| !view.is_loading).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Add an item, merging into an existing line with the same key.
    ///
    /// # Errors
    ///
    /// Rejected synchronously, without a request: `NotAuthenticated` when
    /// signed out, `InvalidQuantity` for 0 or a merged quantity past
    /// `u32::MAX`, `ItemBusy` when the line is being removed, and
    /// `AmountOverflow` when the collection total would not be representable.
    pub fn add(&self, item: NewItem) -> Result<PendingMutation, StoreError> {
        if item.quantity == 0 {
            return Err(StoreError::InvalidQuantity(0));
        }
        let key = item.key;
        let kind = self.inner.kind;
        let mut pending = self.submit(|collection| collection.apply_add(item, kind))?;
        if pending.local_id.is_none() {
            pending.local_id = self.view().find(key).map(|item| item.local_id);
        }
        Ok(pending)
    }

    /// Set the quantity of a cart line. Anything below 1 removes it.
    ///
    /// # Errors
    ///
    /// Rejected synchronously, without a request: `Unsupported` for a
    /// wishlist, `NotAuthenticated` when signed out, `InvalidQuantity` above
    /// `u32::MAX`, `ItemBusy` for a cart line the server has not acknowledged
    /// yet or one pending removal, and `AmountOverflow` when the total would
    /// not be representable. Updating an absent line succeeds without a
    /// request.
    pub fn update_quantity(
        &self,
        local_id: LocalId,
        quantity: i64,
    ) -> Result<PendingMutation, StoreError> {
        if !self.inner.kind.tracks_quantity() {
            return Err(StoreError::Unsupported {
                kind: self.inner.kind,
                operation: "update_quantity",
            });
        }
        if quantity < 1 {
            return self.remove(local_id);
        }
        let quantity = u32::try_from(quantity).map_err(|_| StoreError::InvalidQuantity(quantity))?;
        self.submit(|collection| collection.apply_update(local_id, quantity))
    }

    /// Remove a line. Removing an absent line succeeds without a request.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when signed out, `ItemBusy` for a cart line the
    /// server has not acknowledged yet.
    pub fn remove(&self, local_id: LocalId) -> Result<PendingMutation, StoreError> {
        let kind = self.inner.kind;
        self.submit(|collection| collection.apply_remove(local_id, kind))
    }

    /// Remove the line for `key`, if any.
    ///
    /// # Errors
    ///
    /// As for [`remove`](Self::remove).
    pub fn remove_key(&self, key: ItemKey) -> Result<PendingMutation, StoreError> {
        match self.view().find(key) {
            Some(item) => self.remove(item.local_id),
            None => self.remove(LocalId::generate()),
        }
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// `Unsupported` for a wishlist, `NotAuthenticated` when signed out.
    pub fn clear(&self) -> Result<PendingMutation, StoreError> {
        if !self.inner.kind.tracks_quantity() {
            return Err(StoreError::Unsupported {
                kind: self.inner.kind,
                operation: "clear",
            });
        }
        self.submit(|collection| Ok(collection.apply_clear()))
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Replace the local items with the server's collection.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when signed out, `SessionChanged` if the session
    /// ended during the request, otherwise the request's error.
    #[instrument(skip(self), fields(kind = %self.inner.kind))]
    pub async fn reload(&self) -> Result<(), StoreError> {
        let (generation, seq) = self.begin_load()?;
        self.finish_load(generation, seq).await
    }

    /// Drop every line and forget in-flight requests.
    pub fn reset(&self) {
        let mut state = lock(&self.inner.state);
        state.generation += 1;
        state.collection.clear();
        state.is_loading = false;
        state.last_error = None;
        tracing::debug!(
            kind = %self.inner.kind,
            generation = state.generation,
            "Collection reset"
        );
        self.publish(&state);
    }

    /// Start a load in the background.
    pub(crate) fn spawn_reload(&self) -> Result<(), StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let (generation, seq) = self.begin_load()?;
        let this = self.clone();
        runtime.spawn(async move {
            if let Err(e) = this.finish_load(generation, seq).await {
                tracing::debug!(kind = %this.inner.kind, error = %e, "Background load failed");
            }
        });
        Ok(())
    }

    fn begin_load(&self) -> Result<(u64, u64), StoreError> {
        if !self.inner.session.is_authenticated() {
            return Err(StoreError::NotAuthenticated);
        }
        let mut state = lock(&self.inner.state);
        state.load_seq += 1;
        state.is_loading = true;
        self.publish(&state);
        Ok((state.generation, state.load_seq))
    }

    async fn finish_load(&self, generation: u64, seq: u64) -> Result<(), StoreError> {
        let kind = self.inner.kind;
        let api = Arc::clone(self.inner.session.api());
        let result: Result<CollectionSnapshot, StoreError> = self
            .inner
            .session
            .authorized(|token| {
                let api = Arc::clone(&api);
                async move { api.fetch_collection(&token, kind).await }
            })
            .await;

        let mut state = lock(&self.inner.state);
        if state.generation != generation {
            tracing::debug!(%kind, generation, "Discarding load from a previous session");
            return Err(result.err().unwrap_or(StoreError::SessionChanged));
        }
        let latest = state.load_seq == seq;
        if latest {
            state.is_loading = false;
        }

        match result {
            Ok(snapshot) => {
                if latest {
                    tracing::debug!(%kind, items = snapshot.items.len(), "Collection loaded");
                    state.collection.reconcile(snapshot);
                    state.last_error = None;
                }
                self.publish(&state);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%kind, error = %error, "Failed to load collection");
                state.last_error = Some(error.clone());
                self.publish(&state);
                Err(error)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply a write locally, publish it, and send it in the background.
    fn submit(
        &self,
        apply: impl FnOnce(&mut Collection) -> Result<Option<Applied>, StoreError>,
    ) -> Result<PendingMutation, StoreError> {
        if !self.inner.session.is_authenticated() {
            return Err(StoreError::NotAuthenticated);
        }
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let (applied, generation) = {
            let mut state = lock(&self.inner.state);
            let Some(applied) = apply(&mut state.collection)? else {
                return Ok(PendingMutation::settled(None));
            };
            self.publish(&state);
            (applied, state.generation)
        };

        tracing::debug!(
            kind = %self.inner.kind,
            operation = applied.write.name(),
            local_id = ?applied.local_id,
            "Applied optimistic write"
        );
        let local_id = applied.local_id;
        let this = self.clone();
        let task = runtime.spawn(async move { this.complete_write(applied, generation).await });

        Ok(PendingMutation {
            local_id,
            task: Some(task),
        })
    }

    async fn complete_write(&self, applied: Applied, generation: u64) -> Result<(), StoreError> {
        let Applied {
            local_id,
            write,
            undo,
        } = applied;
        let kind = self.inner.kind;
        let api = Arc::clone(self.inner.session.api());
        let result: Result<CollectionSnapshot, StoreError> = self
            .inner
            .session
            .authorized(|token| {
                let api = Arc::clone(&api);
                let write = write.clone();
                async move { api.write_collection(&token, kind, &write).await }
            })
            .await;

        let mut state = lock(&self.inner.state);
        if state.generation != generation {
            tracing::debug!(
                %kind,
                operation = write.name(),
                generation,
                "Discarding write result from a previous session"
            );
            return Err(result.err().unwrap_or(StoreError::SessionChanged));
        }

        match result {
            Ok(snapshot) => {
                state.collection.reconcile(snapshot);
                state.last_error = None;
                self.publish(&state);
                Ok(())
            }
            Err(error) => {
                let rolled_back = state.collection.rollback(undo);
                state.last_error = Some(error.clone());
                self.publish(&state);
                drop(state);

                tracing::warn!(
                    %kind,
                    operation = write.name(),
                    local_id = ?local_id,
                    rolled_back,
                    error = %error,
                    "Optimistic write failed"
                );
                telemetry::add_breadcrumb(
                    "store",
                    "Rolled back optimistic write",
                    Some(&[("kind", kind.as_str()), ("operation", write.name())]),
                );

                // A skipped rollback leaves lines we can no longer trust.
                if (!rolled_back || error.is_conflict())
                    && let Err(e) = self.spawn_reload()
                {
                    tracing::debug!(%kind, error = %e, "Could not schedule re-fetch");
                }
                Err(error)
            }
        }
    }

    fn publish(&self, state: &StoreState) {
        self.inner.views.send_replace(CollectionView::of(
            self.inner.kind,
            &state.collection,
            state.is_loading,
            state.last_error.clone(),
        ));
    }
}
