//! Event Publication
//!
//! Minimal publish/subscribe used for discovery and connection events.
//! Delivery on one publisher is serialized: a handler never runs
//! concurrently with another delivery from the same publisher. Handlers are
//! called outside the subscriber lock, so they may subscribe, unsubscribe or
//! publish again from inside a callback.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

struct Shared<T> {
    subscribers: Mutex<Subscribers<T>>,
    delivery: ReentrantMutex<()>,
}

impl<T> Shared<T> {
    fn remove(&self, id: u64) {
        self.subscribers.lock().handlers.retain(|(sid, _)| *sid != id);
    }
}

/// Fan-out of events of type `T` to registered handlers
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T: 'static> Publisher<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    handlers: Vec::new(),
                }),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Register a handler; it stays registered while the token lives
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut subscribers = self.shared.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.remove(id);
            }
        })
    }

    /// Deliver `event` to every handler, in subscription order
    pub fn publish(&self, event: &T) {
        let _serial = self.shared.delivery.lock();
        let handlers: Vec<Handler<T>> = self
            .shared
            .subscribers
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().handlers.len()
    }
}

impl<T: 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Token for a registered handler; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Token for a source that never publishes
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
