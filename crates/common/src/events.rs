//! Minimal synchronous observer used by the registries.
//!
//! Handlers run on the emitting task, in subscription order. A panicking
//! handler is caught and logged; it never unwinds into the emitter.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::warn;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type HandlerList<E> = Arc<Mutex<Vec<(u64, Handler<E>)>>>;

pub struct EventBus<E> {
    handlers: HandlerList<E>,
    next_id: AtomicU64,
}

/// Handle returned by [`EventBus::subscribe`]; detaches the handler on
/// [`Subscription::unsubscribe`]. Dropping the handle leaves the
/// subscription active.
pub struct Subscription<E> {
    id: u64,
    handlers: Weak<Mutex<Vec<(u64, Handler<E>)>>>,
}

impl<E> Subscription<E> {
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade()
            && let Ok(mut list) = handlers.lock()
        {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut list) = self.handlers.lock() {
            list.push((id, Arc::new(handler)));
        }
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Emit synchronously to all current subscribers.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = match self.handlers.lock() {
            Ok(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => return,
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("event handler panicked; subscription left in place");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let _a = bus.subscribe(move |e| seen_a.lock().expect("lock").push(*e));
        let seen_b = Arc::clone(&seen);
        let _b = bus.subscribe(move |e| seen_b.lock().expect("lock").push(*e * 10));

        bus.emit(&7);
        assert_eq!(*seen.lock().expect("lock"), vec![7, 70]);
    }

    #[test]
    fn unsubscribe_detaches_handler() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_clone = Arc::clone(&seen);
        let sub = bus.subscribe(move |e| *seen_clone.lock().expect("lock") += *e);

        bus.emit(&1);
        sub.unsubscribe();
        bus.emit(&1);

        assert_eq!(*seen.lock().expect("lock"), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_poison_emit() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let _bad = bus.subscribe(|_| panic!("boom"));
        let seen_clone = Arc::clone(&seen);
        let _good = bus.subscribe(move |e| *seen_clone.lock().expect("lock") += *e);

        bus.emit(&3);
        assert_eq!(*seen.lock().expect("lock"), 3);
    }
}
