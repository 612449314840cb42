//! Join-the-in-flight-request de-duplication.

use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

/// At most one running instance of an operation.
///
/// While a flight is pending every caller of [`SingleFlight::run`] gets a
/// handle to it; once it completes the next call starts a new one.
pub(crate) struct SingleFlight<T: Clone> {
    slot: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the pending flight, or start one with `start`.
    pub(crate) fn run(
        &self,
        start: impl FnOnce() -> BoxFuture<'static, T>,
    ) -> Shared<BoxFuture<'static, T>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = slot.as_ref()
            && flight.peek().is_none()
        {
            return flight.clone();
        }

        let flight = start().shared();
        *slot = Some(flight.clone());
        flight
    }

    /// Whether a flight is currently pending.
    #[cfg(test)]
    fn in_flight(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|flight| flight.peek().is_none())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight = SingleFlight::<usize>::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();

        let start = |starts: Arc<AtomicUsize>, gate: Shared<oneshot::Receiver<()>>| {
            move || {
                let n = starts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let _ = gate.await;
                    n
                }
                .boxed()
            }
        };

        let a = flight.run(start(Arc::clone(&starts), gate.clone()));
        let b = flight.run(start(Arc::clone(&starts), gate.clone()));
        assert!(flight.in_flight());

        let _ = release.send(());
        assert_eq!(futures::join!(a, b), (1, 1));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!flight.in_flight());

        // Completed flights are not reused.
        let c = flight.run(start(Arc::clone(&starts), gate));
        assert_eq!(c.await, 2);
    }
}
