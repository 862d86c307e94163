//! Serialized execution of transport-derived state changes.
//!
//! Every handler that reads and then writes chat entities runs through a
//! [`SerializedDispatcher`]. The dispatcher holds an [`EventLock`] for the
//! whole duration of the handler future, so two handlers never observe each
//! other's half-applied writes. One lock is created per bot instance and
//! passed in explicitly.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Exclusive lock shared by every dispatcher of one bot instance.
#[derive(Clone, Debug, Default)]
pub struct EventLock(Arc<Mutex<()>>);

impl EventLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.0.try_lock().is_err()
    }
}

#[derive(Clone, Debug)]
pub struct SerializedDispatcher {
    lock: EventLock,
}

impl SerializedDispatcher {
    pub fn new(lock: EventLock) -> Self {
        Self { lock }
    }

    pub fn lock(&self) -> &EventLock {
        &self.lock
    }

    /// Runs `handler` while holding the event lock.
    ///
    /// The lock is released when the handler settles, whether it returns
    /// `Ok`, `Err` or panics. Failed handlers are not retried.
    pub async fn dispatch<F, Fut, T, E>(&self, event_name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let _guard = self.lock.0.lock().await;
        debug!(event_name = "dispatch.lock.acquired", handler = event_name, "event lock acquired");

        let result = handler().await;
        if let Err(error) = &result {
            warn!(
                event_name = "dispatch.handler.failed",
                handler = event_name,
                error = %error,
                "dispatched handler failed; event dropped"
            );
        }
        result
    }
}
