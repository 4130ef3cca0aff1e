//! Store Implementation
//!
//! A store holds a value and a set of subscribers. It is lazily activated:
//! the start handler runs when the first subscriber arrives and the stop
//! handler it returned runs when the last one leaves.
//!
//! # How Stores Work
//!
//! 1. `subscribe` activates the store if needed, registers the subscriber and
//!    immediately hands it the current value.
//!
//! 2. `set` compares the new value with the current one. Equal values are
//!    dropped; anything else is cached and delivered to every subscriber in
//!    subscription order, synchronously.
//!
//! 3. Reading the value of an idle store performs a full
//!    activate/read/deactivate cycle, so the start handler runs once per read.
//!
//! # Re-entrancy
//!
//! A subscriber may call `set` on any store, including the one notifying it.
//! The nested notification runs depth-first to completion before the outer
//! one continues with its remaining subscribers, which still receive the value
//! that was current when the outer `set` began.
//!
//! # Memory Layout
//!
//! Each store is one `Rc` allocation holding:
//! - A unique ID (8 bytes)
//! - The value, `None` until the first value is produced
//! - An insertion-ordered map of subscribers
//! - The start handler and the pending stop handler

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::config::{EqualityComparator, StartHandler, StopHandler, StoreConfig};
use super::subscriber::{Subscriber, SubscriberId, Unsubscribe};
use crate::effect;
use crate::error::ReactiveError;

/// Counter for generating unique store IDs.
static STORE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a store.
///
/// Effects use it to remember which stores they already subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        Self(STORE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

pub(crate) struct StoreInner<T> {
    id: StoreId,
    this: Weak<StoreInner<T>>,
    value: RefCell<Option<T>>,
    subscribers: RefCell<IndexMap<SubscriberId, Subscriber<T>>>,
    start: RefCell<Option<StartHandler<T>>>,
    stop: RefCell<Option<StopHandler>>,
    comparator: EqualityComparator<T>,
}

impl<T: Clone + 'static> StoreInner<T> {
    fn new(initial: Option<T>, config: StoreConfig<T>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: StoreId::next(),
            this: this.clone(),
            value: RefCell::new(initial),
            subscribers: RefCell::new(IndexMap::new()),
            start: RefCell::new(config.start),
            stop: RefCell::new(None),
            comparator: config.comparator,
        })
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// The cached value, without activating anything.
    pub(crate) fn peek(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    pub(crate) fn set(&self, value: T) -> Result<(), ReactiveError> {
        let unchanged = match self.value.borrow().as_ref() {
            Some(current) => (self.comparator)(current, &value),
            None => false,
        };
        if unchanged {
            return Ok(());
        }

        *self.value.borrow_mut() = Some(value.clone());
        self.emit(&value)
    }

    fn emit(&self, value: &T) -> Result<(), ReactiveError> {
        let subscribers: SmallVec<[Subscriber<T>; 4]> =
            self.subscribers.borrow().values().cloned().collect();

        trace!(store = %self.id, subscribers = subscribers.len(), "emit");

        for subscriber in subscribers {
            // Skip subscribers removed by an earlier callback of this emission.
            if !self.subscribers.borrow().contains_key(&subscriber.id()) {
                continue;
            }
            subscriber.notify(value)?;
        }

        Ok(())
    }

    /// Register a subscriber without delivering the current value.
    ///
    /// Runs the start handler on the 0 -> 1 transition, before the subscriber
    /// is inserted.
    pub(crate) fn listen(self: &Rc<Self>, subscriber: Subscriber<T>) -> Unsubscribe {
        if self.subscribers.borrow().is_empty() {
            self.activate();
        }

        let id = subscriber.id();
        self.subscribers.borrow_mut().entry(id).or_insert(subscriber);

        let store = Rc::clone(self);
        Unsubscribe::new(move || store.detach(id))
    }

    /// Register a subscriber and hand it the current value.
    pub(crate) fn attach(self: &Rc<Self>, subscriber: Subscriber<T>) -> Unsubscribe {
        let handle = self.listen(subscriber.clone());

        if let Some(value) = self.peek() {
            let delivered = subscriber.notify(&value);
            // Only derived-store listeners are fallible here, and they fail only
            // through the derived store's own subscribers. A derived store
            // attaches to its sources while activating, before its first
            // subscriber is inserted, so there is nobody to fail.
            debug_assert!(delivered.is_ok(), "initial delivery failed: {delivered:?}");
        }

        handle
    }

    fn detach(&self, id: SubscriberId) {
        let removed = self.subscribers.borrow_mut().shift_remove(&id).is_some();
        if removed && self.subscribers.borrow().is_empty() {
            self.deactivate();
        }
    }

    fn activate(&self) {
        let start = self.start.borrow_mut().take();
        let Some(mut start) = start else {
            return;
        };

        debug!(store = %self.id, "activating store");
        let stop = start(Setter {
            store: self.this.clone(),
        });

        *self.start.borrow_mut() = Some(start);
        *self.stop.borrow_mut() = stop;
    }

    fn deactivate(&self) {
        let stop = self.stop.borrow_mut().take();
        if let Some(stop) = stop {
            debug!(store = %self.id, "deactivating store");
            stop();
        }
    }

    /// Read through a transient subscription when nobody is listening.
    pub(crate) fn read(self: &Rc<Self>) -> Option<T> {
        if !self.subscribers.borrow().is_empty() {
            return self.peek();
        }

        let handle = self.listen(Subscriber::new(|_: &T| {}));
        let value = self.peek();
        handle.unsubscribe();
        value
    }
}

/// Setter handed to a start handler.
///
/// It holds the store weakly, so a start handler that keeps its setter (in a
/// timer, an event callback) does not keep the store alive.
pub struct Setter<T> {
    store: Weak<StoreInner<T>>,
}

impl<T: Clone + 'static> Setter<T> {
    /// Set the store's value. A no-op once the store has been dropped.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        match self.store.upgrade() {
            Some(store) => store.set(value),
            None => Ok(()),
        }
    }

    /// Set the store's value from its current one. A no-op when the store
    /// has been dropped or holds no value yet.
    pub fn update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        match store.peek() {
            Some(current) => store.set(f(&current)),
            None => Ok(()),
        }
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            store: Weak::clone(&self.store),
        }
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("alive", &(self.store.strong_count() > 0))
            .finish()
    }
}

/// Read access shared by every kind of store.
///
/// # Example
///
/// ```rust,ignore
/// fn log_changes(store: &impl Readable<Value = i32>) -> Unsubscribe {
///     store.subscribe(|v| println!("now {v}"))
/// }
/// ```
pub trait Readable {
    /// The type of value held by the store.
    type Value: Clone + 'static;

    /// The underlying read-only store.
    fn as_readonly(&self) -> &ReadonlyStore<Self::Value>;

    /// Get the store's unique ID.
    fn id(&self) -> StoreId {
        self.as_readonly().inner.id()
    }

    /// Subscribe a callback. It is called right away with the current value
    /// and then on every change.
    fn subscribe<F>(&self, subscriber: F) -> Unsubscribe
    where
        F: Fn(&Self::Value) + 'static,
        Self: Sized,
    {
        self.subscribe_with(&Subscriber::new(subscriber))
    }

    /// Subscribe an existing [`Subscriber`]. Subscribing the same subscriber
    /// (or a clone of it) again does not add a second subscription.
    fn subscribe_with(&self, subscriber: &Subscriber<Self::Value>) -> Unsubscribe {
        self.as_readonly().inner.attach(subscriber.clone())
    }

    /// Get the number of active subscriptions.
    fn subscriber_count(&self) -> usize {
        self.as_readonly().inner.subscriber_count()
    }

    /// Get the current value, or `None` if the store never produced one.
    ///
    /// On a store without subscribers this runs the start handler and the
    /// stop handler once each.
    fn try_value(&self) -> Option<Self::Value> {
        self.as_readonly().inner.read()
    }

    /// Get the current value.
    ///
    /// # Panics
    ///
    /// Panics if the store was created without a value and its start handler
    /// did not set one synchronously.
    fn value(&self) -> Self::Value {
        self.try_value()
            .expect("store has no value: created empty and not set by its start handler")
    }

    /// Get the current value and, when called while an effect is running,
    /// make that effect re-run whenever this store changes.
    ///
    /// Outside effects this is the same as [`value`](Self::value).
    fn watch(&self) -> Self::Value {
        effect::track(self.as_readonly())
    }
}

/// A store whose value can only be changed by its start handler.
///
/// Cloning is cheap; clones share the value and the subscribers.
///
/// # Example
///
/// ```rust,ignore
/// let ticks = ReadonlyStore::with_start(0, |set| {
///     set.update(|n| n + 1).ok();
///     None
/// });
/// assert_eq!(ticks.value(), 1);
/// ```
pub struct ReadonlyStore<T> {
    pub(crate) inner: Rc<StoreInner<T>>,
}

impl<T: Clone + PartialEq + 'static> ReadonlyStore<T> {
    /// Create a store holding `value`.
    pub fn new(value: T) -> Self {
        Self::with_config(Some(value), StoreConfig::new())
    }

    /// Create a store holding `value` whose start handler runs whenever the
    /// store gains its first subscriber.
    pub fn with_start<F>(value: T, start: F) -> Self
    where
        F: FnMut(Setter<T>) -> Option<StopHandler> + 'static,
    {
        Self::with_config(Some(value), StoreConfig::new().start(start))
    }
}

impl<T: Clone + 'static> ReadonlyStore<T> {
    /// Create a store from a full configuration.
    ///
    /// `initial` may be `None` only if the start handler sets a value
    /// synchronously; reading such a store otherwise yields no value.
    pub fn with_config(initial: Option<T>, config: StoreConfig<T>) -> Self {
        Self {
            inner: StoreInner::new(initial, config),
        }
    }
}

impl<T: Clone + 'static> Readable for ReadonlyStore<T> {
    type Value = T;

    fn as_readonly(&self) -> &ReadonlyStore<T> {
        self
    }
}

impl<T> Clone for ReadonlyStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ReadonlyStore<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlyStore")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
