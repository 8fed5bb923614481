// =============================================================================
// Event Bus — fan-out of inbound messages to registered consumers
// =============================================================================
//
// Decouples the connection manager from whoever wants to observe the feed.
// Delivery is synchronous and per-subscriber isolated: a panicking callback
// is caught and logged, and the remaining subscribers (and the publisher)
// carry on untouched.
//
// The bus is an explicitly constructed, cheaply clonable handle — there is no
// process-wide singleton, so tests can run several independent buses.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

use crate::types::InboundMessage;

type Callback = dyn Fn(&InboundMessage) + Send + Sync;

/// Multicast registry forwarding every published message to all currently
/// registered callbacks. Clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, Arc<Callback>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback`. The returned handle revokes it exactly once,
    /// either explicitly via [`Subscription::unsubscribe`] or on drop.
    pub fn subscribe(
        &self,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver `message` synchronously to every subscriber registered at this
    /// moment.
    ///
    /// The registry is snapshotted before iterating, so a callback that
    /// subscribes or unsubscribes mid-delivery cannot skip, duplicate, or
    /// deadlock the fan-out. A panicking callback is isolated and logged.
    pub fn publish(&self, message: &InboundMessage) {
        let callbacks: Vec<Arc<Callback>> =
            self.inner.subscribers.lock().values().cloned().collect();

        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                error!(
                    reason = %panic_reason(&panic),
                    "subscriber callback panicked; continuing fan-out"
                );
            }
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort human-readable rendering of a panic payload.
fn panic_reason(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle for one registered callback, owned by the subscriber.
///
/// Revocation happens at most once: `unsubscribe` consumes the handle, and
/// dropping an unrevoked handle revokes it implicitly. Holds only a weak bus
/// reference so a forgotten handle never keeps a dead bus alive.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    /// Explicitly revoke the callback.
    pub fn unsubscribe(self) {
        // Drop does the actual removal.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.subscribers.lock().remove(&self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleStatus;

    fn lifecycle(status: LifecycleStatus) -> InboundMessage {
        InboundMessage::Lifecycle {
            status,
            detail: None,
        }
    }

    #[test]
    fn every_subscriber_receives_every_message_in_order() {
        let bus = EventBus::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = seen_a.clone();
        let _sub_a = bus.subscribe(move |m| {
            if let InboundMessage::Lifecycle { status, .. } = m {
                a.lock().push(*status);
            }
        });
        let b = seen_b.clone();
        let _sub_b = bus.subscribe(move |m| {
            if let InboundMessage::Lifecycle { status, .. } = m {
                b.lock().push(*status);
            }
        });

        bus.publish(&lifecycle(LifecycleStatus::Connected));
        bus.publish(&lifecycle(LifecycleStatus::Disconnected));

        let expected = vec![LifecycleStatus::Connected, LifecycleStatus::Disconnected];
        assert_eq!(*seen_a.lock(), expected);
        assert_eq!(*seen_b.lock(), expected);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let sub = bus.subscribe(move |m| {
            if let InboundMessage::Lifecycle { status, .. } = m {
                s.lock().push(*status);
            }
        });

        bus.publish(&lifecycle(LifecycleStatus::Connected));
        sub.unsubscribe();
        bus.publish(&lifecycle(LifecycleStatus::Disconnected));

        assert_eq!(*seen.lock(), vec![LifecycleStatus::Connected]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let _bad = bus.subscribe(|_| panic!("subscriber exploded"));
        let s = seen.clone();
        let _good = bus.subscribe(move |_| *s.lock() += 1);

        // The panicking callback must not affect this message or the next.
        bus.publish(&lifecycle(LifecycleStatus::Connected));
        bus.publish(&lifecycle(LifecycleStatus::Disconnected));

        assert_eq!(*seen.lock(), 2);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribing_during_delivery_is_safe() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        // First subscriber drops another subscription mid-delivery.
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let v = victim.clone();
        let _killer = bus.subscribe(move |_| {
            v.lock().take();
        });

        let s = seen.clone();
        *victim.lock() = Some(bus.subscribe(move |_| *s.lock() += 1));

        // The victim was registered before publish, so it still receives this
        // message regardless of iteration order; afterwards it is gone.
        bus.publish(&lifecycle(LifecycleStatus::Connected));
        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(&lifecycle(LifecycleStatus::Disconnected));
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn clones_share_one_registry() {
        let bus = EventBus::new();
        let other = bus.clone();
        let seen = Arc::new(Mutex::new(0u32));

        let s = seen.clone();
        let _sub = bus.subscribe(move |_| *s.lock() += 1);

        other.publish(&lifecycle(LifecycleStatus::Connected));
        assert_eq!(*seen.lock(), 1);
    }
}
