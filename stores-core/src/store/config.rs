//! Store configuration.
//!
//! A store is configured with an optional start handler, run when the store
//! gains its first subscriber, and an equality comparator, used to suppress
//! notifications for values equal to the current one.

use std::fmt;
use std::rc::Rc;

use super::readonly::Setter;

/// Decides whether two values are equal. Equal values are not re-emitted.
pub type EqualityComparator<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Runs when the subscriber count drops back to zero.
pub type StopHandler = Box<dyn FnOnce()>;

/// Runs when the subscriber count goes from zero to one. The returned
/// [`StopHandler`], if any, runs on the matching transition back to zero.
pub type StartHandler<T> = Box<dyn FnMut(Setter<T>) -> Option<StopHandler>>;

/// Configuration for [`Store`](super::Store) and
/// [`ReadonlyStore`](super::ReadonlyStore).
///
/// # Example
///
/// ```rust,ignore
/// let config = StoreConfig::new()
///     .start(|set| {
///         set.set(Instant::now()).ok();
///         None
///     })
///     .comparator(|a, b| a.elapsed() == b.elapsed());
/// ```
pub struct StoreConfig<T> {
    pub(crate) start: Option<StartHandler<T>>,
    pub(crate) comparator: EqualityComparator<T>,
}

impl<T: PartialEq + 'static> StoreConfig<T> {
    /// No start handler, `PartialEq` comparison.
    pub fn new() -> Self {
        Self::with_comparator(|a: &T, b: &T| a == b)
    }
}

impl<T: PartialEq + 'static> Default for StoreConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> StoreConfig<T> {
    /// Start from a custom comparator; usable with types that are not
    /// `PartialEq`.
    pub fn with_comparator<C>(comparator: C) -> Self
    where
        C: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            start: None,
            comparator: Rc::new(comparator),
        }
    }

    pub(crate) fn from_comparator(comparator: EqualityComparator<T>) -> Self {
        Self {
            start: None,
            comparator,
        }
    }

    /// Treat every value as new: every `set` notifies.
    pub fn never_equal() -> Self {
        Self::with_comparator(|_, _| false)
    }

    /// Set the start handler.
    pub fn start<F>(mut self, start: F) -> Self
    where
        F: FnMut(Setter<T>) -> Option<StopHandler> + 'static,
    {
        self.start = Some(Box::new(start));
        self
    }

    /// Replace the comparator.
    pub fn comparator<C>(mut self, comparator: C) -> Self
    where
        C: Fn(&T, &T) -> bool + 'static,
    {
        self.comparator = Rc::new(comparator);
        self
    }
}

impl<T> fmt::Debug for StoreConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("has_start", &self.start.is_some())
            .finish()
    }
}

/// Configuration for derived stores.
pub struct DerivedStoreConfig<T> {
    pub(crate) comparator: EqualityComparator<T>,
}

impl<T: PartialEq + 'static> DerivedStoreConfig<T> {
    /// `PartialEq` comparison of derived values.
    pub fn new() -> Self {
        Self::with_comparator(|a: &T, b: &T| a == b)
    }
}

impl<T: PartialEq + 'static> Default for DerivedStoreConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> DerivedStoreConfig<T> {
    /// Compare derived values with a custom function.
    pub fn with_comparator<C>(comparator: C) -> Self
    where
        C: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            comparator: Rc::new(comparator),
        }
    }
}

impl<T> fmt::Debug for DerivedStoreConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedStoreConfig").finish_non_exhaustive()
    }
}
