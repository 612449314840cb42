//! Keeps the collections in step with the session.

use crate::api::StoreApi;
use crate::session::{SessionObserver, SessionStatus};
use crate::store::ResourceStore;

/// Clears the stores when the session ends and reloads them when a new one
/// begins.
///
/// Runs inside the session's commit, so a store is already empty by the
/// time `logout` returns.
pub struct Orchestrator<A> {
    stores: Vec<ResourceStore<A>>,
}

impl<A: StoreApi> Orchestrator<A> {
    #[must_use]
    pub const fn new(stores: Vec<ResourceStore<A>>) -> Self {
        Self { stores }
    }
}

impl<A: StoreApi> SessionObserver for Orchestrator<A> {
    fn on_transition(&self, previous: &SessionStatus, next: &SessionStatus) {
        match next {
            SessionStatus::Authenticated(_) if !previous.is_authenticated() => {
                for store in &self.stores {
                    // Anything collected before sign-in belongs to nobody.
                    store.reset();
                    if let Err(e) = store.spawn_reload() {
                        tracing::warn!(kind = %store.kind(), error = %e, "Could not load collection");
                    }
                }
            }
            SessionStatus::Unauthenticated | SessionStatus::Failed(_)
                if !previous.same_phase(next) =>
            {
                for store in &self.stores {
                    store.reset();
                }
            }
            _ => {}
        }
    }
}
