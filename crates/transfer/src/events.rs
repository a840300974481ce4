//! Listener registry and fan-out for transfer events.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::types::TransferEvent;

/// What a listener may return instead of `Ok(())`.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Asks the transfer to stop. Honoured for INITIATED, STARTED and
    /// PROGRESSED; ignored for terminal events.
    #[error("transfer cancelled by listener")]
    Cancelled,

    /// The listener itself malfunctioned. Logged and otherwise ignored.
    #[error("listener failed: {0}")]
    Failed(String),
}

/// Marker returned by [`EventBus::publish`] when a listener asked to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transfer cancelled")]
pub struct TransferCancelled;

/// Receives transfer events synchronously on the firing thread.
pub trait TransferListener: Send + Sync {
    fn on_event(&self, event: &TransferEvent<'_>) -> Result<(), ListenerError>;
}

impl<F> TransferListener for F
where
    F: Fn(&TransferEvent<'_>) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &TransferEvent<'_>) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Wraps a closure as a shareable listener.
pub fn listener_fn<F>(f: F) -> Arc<dyn TransferListener>
where
    F: Fn(&TransferEvent<'_>) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Thread-safe set of listeners.
///
/// `publish` delivers to a snapshot of the registry taken at call time, so
/// listeners may subscribe or unsubscribe (even from inside a callback)
/// while a publish is in flight.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TransferListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe(&self, listener: Arc<dyn TransferListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener registered at call time.
    ///
    /// Failing or panicking listeners are logged and skipped. Returns
    /// `Err(TransferCancelled)` if at least one listener asked to cancel;
    /// the remaining listeners are still delivered to.
    pub fn publish(&self, event: &TransferEvent<'_>) -> Result<(), TransferCancelled> {
        let snapshot: Vec<Arc<dyn TransferListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut cancelled = false;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(ListenerError::Cancelled)) => {
                    debug!(event = %event, "listener requested cancellation");
                    cancelled = true;
                }
                Ok(Err(e)) => {
                    warn!(event = %event, error = %e, "transfer listener failed");
                }
                Err(_) => {
                    warn!(event = %event, "transfer listener panicked");
                }
            }
        }

        if cancelled {
            Err(TransferCancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}
