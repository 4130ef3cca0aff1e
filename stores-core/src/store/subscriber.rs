//! Subscriber types for stores.
//!
//! A Subscriber is a callback that receives every value a store emits. Each
//! subscriber carries an identity so that subscribing the same callback twice
//! counts once, the way a set of function references would.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ReactiveError;

/// Unique identifier for a subscriber.
///
/// Clones of a [`Subscriber`] share the same id; that id is what stores use
/// to deduplicate subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

type Notify<T> = Rc<dyn Fn(&T) -> Result<(), ReactiveError>>;

/// A callback subscribed to a store.
///
/// Cloning is cheap and keeps the identity, so
///
/// ```rust,ignore
/// let log = Subscriber::new(|v: &i32| println!("{v}"));
/// store.subscribe_with(&log);
/// store.subscribe_with(&log); // no-op, already subscribed
/// assert_eq!(store.subscriber_count(), 1);
/// ```
pub struct Subscriber<T> {
    id: SubscriberId,
    notify: Notify<T>,
}

impl<T> Subscriber<T> {
    /// Wrap a callback with a fresh identity.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Rc::new(move |value| {
                notify(value);
                Ok(())
            }),
        }
    }

    /// Internal subscribers (derived stores, effect tracking) may fail when the
    /// notification cascades into an effect re-run.
    pub(crate) fn fallible<F>(notify: F) -> Self
    where
        F: Fn(&T) -> Result<(), ReactiveError> + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Rc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn notify(&self, value: &T) -> Result<(), ReactiveError> {
        (self.notify)(value)
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            notify: Rc::clone(&self.notify),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Calling [`unsubscribe`](Self::unsubscribe) removes the subscriber; further
/// calls, on this handle or any clone of it, are no-ops. Dropping the handle
/// does *not* unsubscribe.
#[derive(Clone)]
pub struct Unsubscribe {
    detach: Rc<dyn Fn()>,
    done: Rc<Cell<bool>>,
}

impl Unsubscribe {
    pub(crate) fn new<F>(detach: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            detach: Rc::new(detach),
            done: Rc::new(Cell::new(false)),
        }
    }

    /// Remove the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.done.replace(true) {
            (self.detach)();
        }
    }

    /// Whether this handle has already been used.
    pub fn is_unsubscribed(&self) -> bool {
        self.done.get()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("done", &self.done.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn clones_share_identity() {
        let subscriber = Subscriber::new(|_: &i32| {});
        let clone = subscriber.clone();
        assert_eq!(subscriber.id(), clone.id());

        let other = Subscriber::new(|_: &i32| {});
        assert_ne!(subscriber.id(), other.id());
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let subscriber = Subscriber::new(move |v: &i32| seen_clone.borrow_mut().push(*v));

        assert!(seen.borrow().is_empty());
        subscriber.notify(&3).unwrap();
        subscriber.notify(&4).unwrap();
        assert_eq!(*seen.borrow(), vec![3, 4]);
    }

    #[test]
    fn unsubscribe_runs_detach_once() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let handle = Unsubscribe::new(move || calls_clone.set(calls_clone.get() + 1));
        let copy = handle.clone();

        assert!(!handle.is_unsubscribed());
        handle.unsubscribe();
        handle.unsubscribe();
        copy.unsubscribe();

        assert_eq!(calls.get(), 1);
        assert!(copy.is_unsubscribed());
    }
}
