//! Named-topic synchronous event dispatcher (spec §4.6).
//!
//! Handlers run on the calling thread, in registration order. A handler that
//! panics is caught so it cannot take down the tick or any other handler.

use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

pub type Handler = Box<dyn Fn(&dyn Any) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to later
/// [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_name`. Handlers for the same topic run
    /// in the order they were subscribed.
    pub fn subscribe(&self, event_name: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.topics
            .lock()
            .unwrap()
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription { id, handler });

        id
    }

    /// Removes a previously registered handler. No-op if already removed.
    pub fn unsubscribe(&self, event_name: &str, id: SubscriptionId) {
        if let Some(subs) = self.topics.lock().unwrap().get_mut(event_name) {
            subs.retain(|sub| sub.id != id);
        }
    }

    /// Dispatches `event` to every handler registered for `event_name`, on
    /// the calling thread. A handler panic is caught and logged; it does not
    /// stop remaining handlers from running.
    pub fn dispatch(&self, event_name: &str, event: &dyn Any) {
        let topics = self.topics.lock().unwrap();
        let Some(subs) = topics.get(event_name) else {
            return;
        };

        for sub in subs {
            if catch_unwind(AssertUnwindSafe(|| (sub.handler)(event))).is_err() {
                log::error!("event listener for '{}' panicked", event_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_in_registration_order() {
        let bus = EventBus::new();
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe("topic", Box::new(move |_| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        bus.subscribe("topic", Box::new(move |_| o2.lock().unwrap().push(2)));

        bus.dispatch("topic", &());

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let count = std::sync::Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = bus.subscribe("topic", Box::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }));
        bus.dispatch("topic", &());
        bus.unsubscribe("topic", id);
        bus.dispatch("topic", &());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_to_unknown_topic_is_a_no_op() {
        let bus = EventBus::new();
        bus.dispatch("nonexistent", &());
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let count = std::sync::Arc::new(AtomicUsize::new(0));

        bus.subscribe("topic", Box::new(|_| panic!("boom")));
        let c = count.clone();
        bus.subscribe("topic", Box::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }));

        bus.dispatch("topic", &());

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
