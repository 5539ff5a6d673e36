//! Listener registry shared by the store and the recovery coordinator.

use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Registry<T> = Mutex<IndexMap<u64, Callback<T>>>;

pub struct Listeners<T> {
    registry: Arc<Registry<T>>,
    next_id: AtomicU64,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Listeners {
            registry: Arc::new(Mutex::new(IndexMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f`. The listener stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn add(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(f));

        let weak: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .shift_remove(&id);
                }
            })),
        }
    }

    /// Call every listener in registration order.
    ///
    /// Callbacks run outside the registry lock, so a listener may subscribe
    /// or unsubscribe while being notified.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for cb in callbacks {
            cb(value);
        }
    }

    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener registered for the lifetime of the registry.
    pub fn detach(mut self) {
        self.remove.take();
    }

    /// A single handle for this registration and `other`.
    pub fn and(mut self, mut other: Subscription) -> Subscription {
        let first = self.remove.take();
        let second = other.remove.take();
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(remove) = first {
                    remove();
                }
                if let Some(remove) = second {
                    remove();
                }
            })),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_and_unsubscribe() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        let sub = listeners.add(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });
        listeners.notify(&2);
        listeners.notify(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        sub.unsubscribe();
        assert!(listeners.is_empty());
        listeners.notify(&10);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_drop_unsubscribes_and_detach_keeps() {
        let listeners: Listeners<()> = Listeners::new();
        {
            let _sub = listeners.add(|_| {});
            assert_eq!(listeners.len(), 1);
        }
        assert_eq!(listeners.len(), 0);

        listeners.add(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_combined_subscription_removes_both() {
        let a: Listeners<()> = Listeners::new();
        let b: Listeners<()> = Listeners::new();
        let both = a.add(|_| {}).and(b.add(|_| {}));
        assert_eq!((a.len(), b.len()), (1, 1));
        drop(both);
        assert_eq!((a.len(), b.len()), (0, 0));
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.add(|_| {});
        drop(listeners);
        sub.unsubscribe();
    }
}
