//! Derived Stores
//!
//! A derived store is a read-only store whose value is computed from one or
//! more source stores.
//!
//! # How Derived Stores Work
//!
//! 1. While nobody subscribes, a derived store holds no subscriptions of its
//!    own. Reading it activates it just long enough to compute a value.
//!
//! 2. On activation it subscribes to every source. Each source reports its
//!    current value right away; values are cached per position.
//!
//! 3. Nothing is emitted until every source has reported at least once (the
//!    warm-up barrier). From then on, every report from any source recomputes
//!    the output from a fresh copy of the cache.
//!
//! 4. On deactivation it unsubscribes from all sources and resets the
//!    barrier, so the next activation warms up again.
//!
//! # Source Shapes
//!
//! The shape is fixed by the type passed to [`derive`]:
//!
//! | Sources                           | Shape   | Snapshot                  |
//! |-----------------------------------|---------|---------------------------|
//! | `Store<T>` / `ReadonlyStore<T>`   | single  | `T`                       |
//! | `(A, B, ..)` up to six stores     | ordered | `(A::Value, B::Value, ..)`|
//! | `Vec<S>`                          | ordered | `Vec<S::Value>`           |
//! | `IndexMap<String, S>`             | named   | `IndexMap<String, S::Value>` |
//! | `()`                              | ordered | `()`                      |
//!
//! With zero sources (`()`, an empty `Vec` or map) the map function runs once
//! per activation, without any subscription.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::trace;

use super::config::{DerivedStoreConfig, StopHandler, StoreConfig};
use super::readonly::{Readable, ReadonlyStore, Setter};
use super::subscriber::{Subscriber, Unsubscribe};
use super::writable::Store;
use crate::error::ReactiveError;

/// Subscriptions held by an active derived store, one per source.
pub type SourceHandles = SmallVec<[Unsubscribe; 4]>;

/// Called with the position of the source that just reported.
pub type OnReport = Rc<dyn Fn(usize) -> Result<(), ReactiveError>>;

/// How the sources of a derived store are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceShape {
    /// One store; the map function receives its value directly.
    Single,
    /// A fixed-size list; the map function receives values by position.
    Ordered,
    /// A name-keyed map; the map function receives values by name.
    Named,
}

mod sealed {
    pub trait Sealed {}
}

/// The sources a derived store can be built from.
///
/// Implemented for single stores, tuples, `Vec`s and `IndexMap`s of stores.
/// This trait is sealed.
pub trait Sources: sealed::Sealed + 'static {
    /// What the map function receives.
    type Snapshot: 'static;

    /// Latest value reported by each source.
    type Cache: 'static;

    /// The layout of these sources.
    fn shape(&self) -> SourceShape;

    /// Number of sources.
    fn len(&self) -> usize;

    /// Whether there are no sources at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A cache in which no source has reported.
    fn empty_cache(&self) -> Self::Cache;

    /// Copy the cache into an owned snapshot, or `None` while some source has
    /// not reported yet.
    fn snapshot(cache: &Self::Cache) -> Option<Self::Snapshot>;

    /// Subscribe to every source. Each report is written into `cache` and
    /// then announced through `on_report` with the source's position.
    fn listen_all(&self, cache: &Rc<RefCell<Self::Cache>>, on_report: &OnReport) -> SourceHandles;
}

fn listen_at<S, F>(source: &S, on_report: &OnReport, position: usize, write: F) -> Unsubscribe
where
    S: Readable,
    F: Fn(&S::Value) + 'static,
{
    let on_report = Rc::clone(on_report);
    source.as_readonly().inner.attach(Subscriber::fallible(move |value| {
        write(value);
        on_report(position)
    }))
}

// ----------------------------------------------------------------------------
// Single source
// ----------------------------------------------------------------------------

macro_rules! impl_single_source {
    ($store:ident) => {
        impl<T: Clone + 'static> sealed::Sealed for $store<T> {}

        impl<T: Clone + 'static> Sources for $store<T> {
            type Snapshot = T;
            type Cache = Option<T>;

            fn shape(&self) -> SourceShape {
                SourceShape::Single
            }

            fn len(&self) -> usize {
                1
            }

            fn empty_cache(&self) -> Option<T> {
                None
            }

            fn snapshot(cache: &Option<T>) -> Option<T> {
                cache.clone()
            }

            fn listen_all(&self, cache: &Rc<RefCell<Option<T>>>, on_report: &OnReport) -> SourceHandles {
                let cache = Rc::clone(cache);
                let mut handles = SourceHandles::new();
                handles.push(listen_at(self, on_report, 0, move |value: &T| {
                    *cache.borrow_mut() = Some(value.clone());
                }));
                handles
            }
        }
    };
}

impl_single_source!(Store);
impl_single_source!(ReadonlyStore);

// ----------------------------------------------------------------------------
// Ordered sources
// ----------------------------------------------------------------------------

impl sealed::Sealed for () {}

impl Sources for () {
    type Snapshot = ();
    type Cache = ();

    fn shape(&self) -> SourceShape {
        SourceShape::Ordered
    }

    fn len(&self) -> usize {
        0
    }

    fn empty_cache(&self) -> Self::Cache {}

    fn snapshot(_cache: &()) -> Option<()> {
        Some(())
    }

    fn listen_all(&self, _cache: &Rc<RefCell<()>>, _on_report: &OnReport) -> SourceHandles {
        SourceHandles::new()
    }
}

macro_rules! impl_tuple_sources {
    ($len:expr; $($S:ident $idx:tt),+) => {
        impl<$($S: Readable + 'static),+> sealed::Sealed for ($($S,)+) {}

        impl<$($S: Readable + 'static),+> Sources for ($($S,)+) {
            type Snapshot = ($(<$S as Readable>::Value,)+);
            type Cache = ($(Option<<$S as Readable>::Value>,)+);

            fn shape(&self) -> SourceShape {
                SourceShape::Ordered
            }

            fn len(&self) -> usize {
                $len
            }

            fn empty_cache(&self) -> Self::Cache {
                ($(None::<<$S as Readable>::Value>,)+)
            }

            fn snapshot(cache: &Self::Cache) -> Option<Self::Snapshot> {
                Some(($(cache.$idx.clone()?,)+))
            }

            fn listen_all(&self, cache: &Rc<RefCell<Self::Cache>>, on_report: &OnReport) -> SourceHandles {
                let mut handles = SourceHandles::new();
                $(
                    let slot = Rc::clone(cache);
                    handles.push(listen_at(&self.$idx, on_report, $idx, move |value: &<$S as Readable>::Value| {
                        slot.borrow_mut().$idx = Some(value.clone());
                    }));
                )+
                handles
            }
        }
    };
}

impl_tuple_sources!(1; A 0);
impl_tuple_sources!(2; A 0, B 1);
impl_tuple_sources!(3; A 0, B 1, C 2);
impl_tuple_sources!(4; A 0, B 1, C 2, D 3);
impl_tuple_sources!(5; A 0, B 1, C 2, D 3, E 4);
impl_tuple_sources!(6; A 0, B 1, C 2, D 3, E 4, F 5);

impl<S: Readable + 'static> sealed::Sealed for Vec<S> {}

impl<S: Readable + 'static> Sources for Vec<S> {
    type Snapshot = Vec<S::Value>;
    type Cache = Vec<Option<S::Value>>;

    fn shape(&self) -> SourceShape {
        SourceShape::Ordered
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn empty_cache(&self) -> Self::Cache {
        vec![None; Vec::len(self)]
    }

    fn snapshot(cache: &Self::Cache) -> Option<Self::Snapshot> {
        cache.iter().cloned().collect()
    }

    fn listen_all(&self, cache: &Rc<RefCell<Self::Cache>>, on_report: &OnReport) -> SourceHandles {
        self.iter()
            .enumerate()
            .map(|(position, source)| {
                let slot = Rc::clone(cache);
                listen_at(source, on_report, position, move |value: &S::Value| {
                    slot.borrow_mut()[position] = Some(value.clone());
                })
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Named sources
// ----------------------------------------------------------------------------

impl<S: Readable + 'static> sealed::Sealed for IndexMap<String, S> {}

impl<S: Readable + 'static> Sources for IndexMap<String, S> {
    type Snapshot = IndexMap<String, S::Value>;
    type Cache = IndexMap<String, Option<S::Value>>;

    fn shape(&self) -> SourceShape {
        SourceShape::Named
    }

    fn len(&self) -> usize {
        IndexMap::len(self)
    }

    fn empty_cache(&self) -> Self::Cache {
        self.keys().map(|name| (name.clone(), None)).collect()
    }

    fn snapshot(cache: &Self::Cache) -> Option<Self::Snapshot> {
        cache
            .iter()
            .map(|(name, value)| Some((name.clone(), value.clone()?)))
            .collect()
    }

    fn listen_all(&self, cache: &Rc<RefCell<Self::Cache>>, on_report: &OnReport) -> SourceHandles {
        self.values()
            .enumerate()
            .map(|(position, source)| {
                let slot = Rc::clone(cache);
                listen_at(source, on_report, position, move |value: &S::Value| {
                    if let Some((_, cached)) = slot.borrow_mut().get_index_mut(position) {
                        *cached = Some(value.clone());
                    }
                })
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Warm-up barrier
// ----------------------------------------------------------------------------

/// Tracks which sources have reported since activation.
#[derive(Debug)]
struct WarmUp {
    reported: SmallVec<[bool; 8]>,
    count: usize,
}

impl WarmUp {
    fn new(len: usize) -> Self {
        Self {
            reported: SmallVec::from_elem(false, len),
            count: 0,
        }
    }

    /// Record a report; returns whether every source has reported.
    fn report(&mut self, position: usize) -> bool {
        if let Some(flag) = self.reported.get_mut(position) {
            if !*flag {
                *flag = true;
                self.count += 1;
            }
        }
        self.is_warm()
    }

    fn is_warm(&self) -> bool {
        self.count == self.reported.len()
    }

    fn reset(&mut self) {
        self.reported.iter_mut().for_each(|flag| *flag = false);
        self.count = 0;
    }
}

// ----------------------------------------------------------------------------
// derive
// ----------------------------------------------------------------------------

/// Create a derived store, comparing outputs with `PartialEq`.
///
/// # Example
///
/// ```rust,ignore
/// let a = Store::new(7);
/// let b = Store::new(13);
/// let sum = derive((a.clone(), b.clone()), |(x, y)| x + y);
/// assert_eq!(sum.value(), 20);
///
/// a.set(1)?;
/// assert_eq!(sum.value(), 14);
/// ```
pub fn derive<S, U, F>(sources: S, map: F) -> ReadonlyStore<U>
where
    S: Sources,
    U: Clone + PartialEq + 'static,
    F: Fn(S::Snapshot) -> U + 'static,
{
    derive_with_config(sources, map, DerivedStoreConfig::new())
}

/// Create a derived store with a custom configuration.
pub fn derive_with_config<S, U, F>(sources: S, map: F, config: DerivedStoreConfig<U>) -> ReadonlyStore<U>
where
    S: Sources,
    U: Clone + 'static,
    F: Fn(S::Snapshot) -> U + 'static,
{
    let derivation = Rc::new(Derivation {
        cache: Rc::new(RefCell::new(sources.empty_cache())),
        warm_up: RefCell::new(WarmUp::new(sources.len())),
        map,
        sources,
    });

    let store_config = StoreConfig::from_comparator(config.comparator)
        .start(move |set| Derivation::activate(&derivation, set));

    ReadonlyStore::with_config(None, store_config)
}

/// State owned by a derived store: its sources, the per-source cache and the
/// warm-up barrier.
struct Derivation<S: Sources, F> {
    sources: S,
    cache: Rc<RefCell<S::Cache>>,
    warm_up: RefCell<WarmUp>,
    map: F,
}

impl<S, U, F> Derivation<S, F>
where
    S: Sources,
    U: Clone + 'static,
    F: Fn(S::Snapshot) -> U + 'static,
{
    fn activate(this: &Rc<Self>, set: Setter<U>) -> Option<StopHandler> {
        trace!(shape = ?this.sources.shape(), sources = this.sources.len(), "activating derived store");

        if this.sources.is_empty() {
            // Still activating: the store has no subscribers to fail.
            let published = this.emit(&set);
            debug_assert!(published.is_ok(), "zero-source publish failed: {published:?}");
            return None;
        }

        let on_report: OnReport = {
            let this = Rc::clone(this);
            Rc::new(move |position| {
                let warm = this.warm_up.borrow_mut().report(position);
                if warm {
                    this.emit(&set)
                } else {
                    Ok(())
                }
            })
        };

        let handles = this.sources.listen_all(&this.cache, &on_report);

        let this = Rc::clone(this);
        Some(Box::new(move || {
            for handle in &handles {
                handle.unsubscribe();
            }
            this.warm_up.borrow_mut().reset();
            *this.cache.borrow_mut() = this.sources.empty_cache();
        }))
    }

    fn emit(&self, set: &Setter<U>) -> Result<(), ReactiveError> {
        // The cache borrow ends here, so the map function and downstream
        // subscribers may set the sources again.
        let snapshot = S::snapshot(&self.cache.borrow());
        match snapshot {
            Some(snapshot) => set.set((self.map)(snapshot)),
            None => Ok(()),
        }
    }
}

impl<S: Sources, F> fmt::Debug for Derivation<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("shape", &self.sources.shape())
            .field("warm_up", &self.warm_up.borrow())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn derives_from_one_source() {
        let source = ReadonlyStore::new(1);
        let derived = derive(source, |x| x * 2);
        assert_eq!(derived.value(), 2);
    }

    #[test]
    fn derives_from_a_tuple_of_different_types() {
        let number = ReadonlyStore::new(7);
        let text = ReadonlyStore::new("13".to_string());
        let derived = derive((number, text), |(n, t)| n + t.parse::<i32>().unwrap_or(0));
        assert_eq!(derived.value(), 20);
    }

    #[test]
    fn derives_from_named_sources() {
        let mut sources = IndexMap::new();
        sources.insert("v1".to_string(), Store::new(7));
        sources.insert("v2".to_string(), Store::new(13));
        let v1 = sources["v1"].clone();

        let derived = derive(sources, |values| values["v1"] * values["v2"]);
        assert_eq!(derived.value(), 91);

        v1.set(5).unwrap();
        assert_eq!(derived.value(), 65);
    }

    #[test]
    fn derives_from_a_vec() {
        let sources = vec![Store::new(1), Store::new(2), Store::new(3)];
        let last = sources[2].clone();
        let derived = derive(sources, |values: Vec<i32>| values.iter().sum::<i32>());

        assert_eq!(derived.value(), 6);
        last.set(10).unwrap();
        assert_eq!(derived.value(), 13);
        assert_eq!(derived.subscriber_count(), 0);
    }

    #[test]
    fn zero_sources_map_once_per_activation() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let derived = derive((), move |()| {
            calls_clone.set(calls_clone.get() + 1);
            "hello"
        });

        assert_eq!(derived.value(), "hello");
        assert_eq!(calls.get(), 1);
        assert_eq!(derived.subscriber_count(), 0);

        let empty: Vec<Store<i32>> = Vec::new();
        let from_empty_vec = derive(empty, |values| values.len());
        assert_eq!(from_empty_vec.value(), 0);

        let no_names: IndexMap<String, Store<i32>> = IndexMap::new();
        let from_empty_map = derive(no_names, |values| values.is_empty());
        assert!(from_empty_map.value());
    }

    #[test]
    fn nothing_is_emitted_before_every_source_reported() {
        let ready = ReadonlyStore::new(1);
        let lazy = ReadonlyStore::with_config(None, StoreConfig::<i32>::new());
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let derived = derive((ready, lazy), move |(a, b)| {
            calls_clone.set(calls_clone.get() + 1);
            a + b
        });

        assert_eq!(derived.try_value(), None);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn warm_up_resets_on_deactivation() {
        let mut warm_up = WarmUp::new(2);
        assert!(!warm_up.report(0));
        assert!(!warm_up.report(0));
        assert!(warm_up.report(1));

        warm_up.reset();
        assert!(!warm_up.is_warm());
        assert!(!warm_up.report(1));
    }

    #[test]
    fn derived_subscription_activates_sources_once() {
        let starts = Rc::new(Cell::new(0));
        let starts_clone = starts.clone();
        let source = Store::with_start(2, move |_| {
            starts_clone.set(starts_clone.get() + 1);
            None
        });

        let double = derive(source.clone(), |x| x * 2);
        let triple = derive(source.clone(), |x| x * 3);

        let _a = double.subscribe(|_| {});
        let _b = triple.subscribe(|_| {});
        assert_eq!(starts.get(), 1);
        assert_eq!(source.subscriber_count(), 2);
    }

    #[test]
    fn activation_does_not_reach_failing_effects() {
        use crate::effect::ReactiveRoot;

        let source = Store::new(1);
        let doubled = derive(source.clone(), |x| x * 2);
        let root = ReactiveRoot::new();

        let d = doubled.clone();
        root.make_effect(move || {
            if d.watch() > 2 {
                Err(ReactiveError::effect("too big"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        // Activating new dependents of a watched store delivers only to them.
        let quadrupled = derive(doubled.clone(), |x| x * 2);
        assert_eq!(quadrupled.value(), 4);
        let constant = derive((), |()| 7);
        let _handle = constant.subscribe(|_| {});
        assert_eq!(constant.value(), 7);

        assert!(source.set(2).is_err());
        root.dispose().unwrap();
    }

    #[test]
    fn reports_shape() {
        assert_eq!(Store::new(1).shape(), SourceShape::Single);
        assert_eq!((Store::new(1), Store::new(2)).shape(), SourceShape::Ordered);
        assert_eq!(IndexMap::<String, Store<i32>>::new().shape(), SourceShape::Named);
    }
}
