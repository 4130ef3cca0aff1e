//! Writable stores.
//!
//! [`Store`] is a [`ReadonlyStore`] that also exposes `set` and `update`.

use std::fmt;

use super::config::{StopHandler, StoreConfig};
use super::readonly::{Readable, ReadonlyStore, Setter};
use crate::error::ReactiveError;

/// A store that can be written to directly.
///
/// # Example
///
/// ```rust,ignore
/// let count = Store::new(0);
/// let _handle = count.subscribe(|v| println!("count: {v}"));  // prints 0
///
/// count.set(5)?;                // prints 5
/// count.set(5)?;                // equal value, nothing printed
/// count.update(|v| v * 2)?;     // prints 10
/// ```
pub struct Store<T> {
    readonly: ReadonlyStore<T>,
}

impl<T: Clone + PartialEq + 'static> Store<T> {
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

impl<T: Clone + 'static> Store<T> {
    /// Create a store from a full configuration.
    pub fn with_config(initial: Option<T>, config: StoreConfig<T>) -> Self {
        Self {
            readonly: ReadonlyStore::with_config(initial, config),
        }
    }

    /// Set a new value and notify subscribers.
    ///
    /// Nothing happens when the comparator finds the new value equal to the
    /// current one. Otherwise every subscriber is called synchronously, in
    /// subscription order. An effect re-run triggered by this change that
    /// fails makes `set` fail with its error.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        self.readonly.inner.set(value)
    }

    /// Update the value using a function of the current one.
    ///
    /// # Panics
    ///
    /// Panics if the store holds no value, like [`Readable::value`].
    pub fn update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.value();
        self.set(f(&current))
    }

    /// A read-only view sharing this store's state.
    pub fn readonly(&self) -> ReadonlyStore<T> {
        self.readonly.clone()
    }
}

impl<T: Clone + 'static> Readable for Store<T> {
    type Value = T;

    fn as_readonly(&self) -> &ReadonlyStore<T> {
        &self.readonly
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            readonly: self.readonly.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Store").field(&self.readonly).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
