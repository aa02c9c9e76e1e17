//! Publisher/subscriber plumbing for UI-side notifications.
//!
//! A [`Publisher`] keeps a list of callbacks. Subscribing returns a
//! [`Subscription`] guard; dropping the guard or calling
//! [`Subscription::reset`] removes the callback. Resetting is idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;

type Callback<M> = Arc<dyn Fn(&M) + Send + Sync>;

struct PublisherInner<M> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback<M>)>>,
}

impl<M> PublisherInner<M> {
    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|(entry, _)| *entry != id);
    }
}

/// Broadcasts messages of type `M` to every live subscriber.
pub struct Publisher<M> {
    inner: Arc<PublisherInner<M>>,
}

impl<M: 'static> Publisher<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a callback invoked synchronously by [`Publisher::publish`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push((id, Arc::new(callback)));

        let weak: Weak<PublisherInner<M>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(id);
                }
            })),
        }
    }

    /// Subscribes through a channel so another thread can consume messages.
    pub fn subscribe_channel(&self) -> (Subscription, Receiver<M>)
    where
        M: Clone + Send,
    {
        let (tx, rx) = unbounded();
        let subscription = self.subscribe(move |message: &M| {
            let _ = tx.send(message.clone());
        });
        (subscription, rx)
    }

    /// Delivers `message` to every subscriber and returns how many were called.
    ///
    /// The subscriber list is copied before dispatch, so callbacks may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, message: &M) -> usize {
        let callbacks: Vec<Callback<M>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in &callbacks {
            callback(message);
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<M: 'static> Default for Publisher<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

/// Guard returned by [`Publisher::subscribe`].
#[must_use = "dropping a subscription immediately unsubscribes"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// A subscription that is not attached to any publisher.
    pub fn empty() -> Self {
        Self { detach: None }
    }

    /// Stops delivery. Only the first call has an effect.
    pub fn reset(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    pub fn is_active(&self) -> bool {
        self.detach.is_some()
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
