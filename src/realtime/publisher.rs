//! Typed, ordered, failure-isolated event delivery.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::error::{BoxError, SubscriberError};
use super::events::{Event, EventTag};

type Callback = Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync>;

/// Identifies one registration made with [`EventPublisher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    handle: SubscriptionHandle,
    tag: EventTag,
    callback: Callback,
}

/// Delivers events to every subscriber registered for the event's tag.
///
/// Delivery is synchronous and follows registration order. Callbacks run on the dispatch path,
/// so they must not block: hand long-running work off to another task. A callback that
/// returns an error or panics is logged and skipped; the remaining subscribers still run.
///
/// Subscribing and unsubscribing are safe from any thread, including from inside a callback.
#[derive(Default)]
pub struct EventPublisher {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events tagged `tag`.
    pub fn subscribe<F>(&self, tag: EventTag, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                handle,
                tag,
                callback: Arc::new(callback),
            });

        #[cfg(feature = "tracing")]
        tracing::debug!(%tag, ?handle, "subscribed");

        handle
    }

    /// Removes a registration. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.handle != handle);

        before != subscribers.len()
    }

    /// Number of active registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` and returns how many subscribers handled it successfully.
    pub fn publish(&self, event: &Event) -> usize {
        let tag = event.tag();

        // Snapshot so callbacks can (un)subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.tag == tag)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::trace!(?event, subscribers = callbacks.len(), "publishing event");

        let mut delivered = 0;
        for callback in callbacks {
            match Self::deliver(tag, &callback, event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "event subscriber failed");
                    #[cfg(not(feature = "tracing"))]
                    let _: &SubscriberError = &e;
                }
            }
        }

        delivered
    }

    fn deliver(tag: EventTag, callback: &Callback, event: &Event) -> Result<(), SubscriberError> {
        match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SubscriberError::Failed { tag, source }),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(SubscriberError::Panicked { tag, message })
            }
        }
    }
}
