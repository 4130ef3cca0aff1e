//! Reactive Roots
//!
//! A root owns effects. Disposing the root unsubscribes every one of its
//! effects from every store it watches, then runs their cleanups.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use super::cleanup::EffectOutput;
use super::runtime::{self, EffectFn, EffectRuntime, RootId};
use crate::error::ReactiveError;

/// Owner of a group of effects.
///
/// Dropping a root does not dispose it; call [`dispose`](Self::dispose).
///
/// # Example
///
/// ```rust,ignore
/// let root = make_reactive_root();
/// let count = Store::new(0);
///
/// let c = count.clone();
/// root.make_effect(move || {
///     println!("count is {}", c.watch());
/// })?;                 // prints "count is 0"
///
/// count.set(1)?;       // prints "count is 1"
/// root.dispose()?;
/// count.set(2)?;       // nothing printed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactiveRoot {
    id: RootId,
}

/// Create a new reactive root.
pub fn make_reactive_root() -> ReactiveRoot {
    ReactiveRoot::new()
}

impl ReactiveRoot {
    /// Create a new reactive root.
    pub fn new() -> Self {
        let id = EffectRuntime::with(|rt| rt.create_root());
        debug!(root = %id, "reactive root created");
        Self { id }
    }

    /// Get the root's unique ID.
    pub fn id(&self) -> RootId {
        self.id
    }

    /// Number of effects currently owned by this root.
    pub fn effect_count(&self) -> usize {
        EffectRuntime::with(|rt| rt.root_effect_count(self.id))
    }

    /// Register an effect and run it once, right away.
    ///
    /// Every store read with `watch` during a run becomes a dependency: when
    /// it changes, the cleanup returned by the previous run (if any) is
    /// called and the effect runs again.
    ///
    /// # Errors
    ///
    /// - [`ReactiveError::NestedEffect`] if another effect is running; nothing
    ///   is registered in that case.
    /// - The error of the first run, if it failed. The effect stays
    ///   registered with whatever dependencies it read before failing.
    pub fn make_effect<F, O>(&self, mut effect: F) -> Result<(), ReactiveError>
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let func: EffectFn = Rc::new(RefCell::new(move || effect().into_outcome()));

        let id = EffectRuntime::with(|rt| match rt.current_effect {
            Some(running) => Err(running),
            None => Ok(rt.register_effect(self.id, Rc::clone(&func))),
        })
        .map_err(|running| {
            warn!(root = %self.id, %running, "make_effect called inside an effect");
            ReactiveError::NestedEffect
        })?;

        debug!(root = %self.id, effect = %id, "effect created");
        runtime::execute(id, &func)
    }

    /// Dispose the root.
    ///
    /// All subscriptions are removed first, then every cleanup runs, even if
    /// some fail. Failures are returned together as
    /// [`ReactiveError::RootDispose`]. Disposing again is a no-op.
    pub fn dispose(&self) -> Result<(), ReactiveError> {
        let records = EffectRuntime::with(|rt| rt.release_root(self.id));
        if records.is_empty() {
            return Ok(());
        }

        debug!(root = %self.id, effects = records.len(), "disposing reactive root");

        for record in &records {
            for handle in record.dependencies.values() {
                handle.unsubscribe();
            }
        }

        let errors = records
            .into_iter()
            .filter_map(|record| record.cleanup)
            .filter_map(|mut cleanup| cleanup.run().err())
            .collect();

        ReactiveError::aggregate(errors, |errors| ReactiveError::RootDispose { errors })
    }
}

impl Default for ReactiveRoot {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{current_effect, runtime_stats, Cleanup};
    use crate::store::{Readable, Store};
    use std::cell::Cell;

    #[test]
    fn effect_runs_immediately_and_on_change() {
        let root = make_reactive_root();
        let store = Store::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (s, log) = (store.clone(), seen.clone());
        root.make_effect(move || log.borrow_mut().push(s.watch()))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![1]);

        store.set(2).unwrap();
        store.set(2).unwrap();
        store.set(3).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);

        root.dispose().unwrap();
        store.set(4).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn cleanup_runs_before_each_rerun() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (store.clone(), log.clone());
        root.make_effect(move || {
            let v = s.watch();
            l.borrow_mut().push(format!("run {v}"));
            let l = l.clone();
            Cleanup::new(move || l.borrow_mut().push(format!("cleanup {v}")))
        })
        .unwrap();

        store.set(1).unwrap();
        root.dispose().unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn nested_make_effect_fails_and_clears_marker() {
        let root = ReactiveRoot::new();
        let nested = Rc::new(RefCell::new(None));

        let (r, n) = (root.clone(), nested.clone());
        root.make_effect(move || {
            *n.borrow_mut() = Some(r.make_effect(|| {}));
        })
        .unwrap();

        assert!(matches!(
            nested.borrow_mut().take(),
            Some(Err(ReactiveError::NestedEffect))
        ));
        assert_eq!(current_effect(), None);
        assert_eq!(root.effect_count(), 1);

        assert!(root.make_effect(|| {}).is_ok());
        assert_eq!(root.effect_count(), 2);
        root.dispose().unwrap();
    }

    #[test]
    fn failing_first_run_stays_registered() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (store.clone(), runs.clone());
        let result = root.make_effect(move || {
            r.set(r.get() + 1);
            if s.watch() == 0 {
                Err(ReactiveError::effect("zero"))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(ReactiveError::Effect(_))));
        assert_eq!(root.effect_count(), 1);

        store.set(1).unwrap();
        assert_eq!(runs.get(), 2);
        root.dispose().unwrap();
    }

    #[test]
    fn rerun_error_reaches_the_setter() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);

        let s = store.clone();
        root.make_effect(move || {
            if s.watch() > 1 {
                Err(ReactiveError::effect("too big"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert!(store.set(1).is_ok());
        let err = store.set(2).unwrap_err();
        assert_eq!(err.to_string(), "too big");
        root.dispose().unwrap();
    }

    #[test]
    fn failing_cleanup_is_retried_on_dispose() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let attempts = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));

        let (s, a, r) = (store.clone(), attempts.clone(), runs.clone());
        root.make_effect(move || {
            s.watch();
            r.set(r.get() + 1);
            let a = a.clone();
            Cleanup::fallible(move || {
                a.set(a.get() + 1);
                Err(ReactiveError::effect("cleanup failed"))
            })
        })
        .unwrap();

        // The failing cleanup aborts the re-run.
        assert!(store.set(1).is_err());
        assert_eq!(runs.get(), 1);
        assert_eq!(attempts.get(), 1);

        let err = root.dispose().unwrap_err();
        assert!(matches!(err, ReactiveError::RootDispose { .. }));
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn dispose_twice_is_a_no_op() {
        let root = ReactiveRoot::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        root.make_effect(move || {
            let c = c.clone();
            Cleanup::new(move || c.set(c.get() + 1))
        })
        .unwrap();

        root.dispose().unwrap();
        root.dispose().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(root.effect_count(), 0);
    }

    #[test]
    fn self_triggering_effect_reruns_after_finishing() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (store.clone(), runs.clone());
        root.make_effect(move || {
            r.set(r.get() + 1);
            let v = s.watch();
            if v < 3 {
                s.set(v + 1)?;
            }
            Ok::<(), ReactiveError>(())
        })
        .unwrap();

        assert_eq!(store.value(), 3);
        assert_eq!(runs.get(), 4);
        root.dispose().unwrap();
        assert_eq!(runtime_stats().effects, 0);
    }

    #[test]
    fn failing_run_still_catches_up_with_its_own_change() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (s, log) = (store.clone(), seen.clone());
        root.make_effect(move || {
            let v = s.watch();
            log.borrow_mut().push(v);
            if v == 1 {
                s.set(2)?;
                return Err(ReactiveError::effect("failed after set"));
            }
            Ok(())
        })
        .unwrap();

        let err = store.set(1).unwrap_err();
        assert_eq!(err.to_string(), "failed after set");
        assert_eq!(store.value(), 2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        root.dispose().unwrap();
    }

    #[test]
    fn panicking_cleanup_does_not_stall_the_effect() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (store.clone(), runs.clone());
        root.make_effect(move || {
            let v = s.watch();
            r.set(r.get() + 1);
            Cleanup::new(move || {
                if v == 0 {
                    panic!("cleanup of the first run");
                }
            })
        })
        .unwrap();

        assert!(catch_unwind(AssertUnwindSafe(|| store.set(1))).is_err());
        assert_eq!(runs.get(), 1);
        assert_eq!(current_effect(), None);

        store.set(2).unwrap();
        store.set(3).unwrap();
        assert_eq!(runs.get(), 3);
        root.dispose().unwrap();
    }

    #[test]
    fn disposing_own_root_mid_run() {
        let root = ReactiveRoot::new();
        let store = Store::new(0);
        let cleanups = Rc::new(Cell::new(0));

        let (r, s, c) = (root.clone(), store.clone(), cleanups.clone());
        root.make_effect(move || {
            if s.watch() == 1 {
                r.dispose()?;
            }
            let c = c.clone();
            Ok::<_, ReactiveError>(Cleanup::new(move || c.set(c.get() + 1)))
        })
        .unwrap();

        store.set(1).unwrap();
        // One before the re-run, one for the cleanup the disposed run returned.
        assert_eq!(cleanups.get(), 2);
        assert_eq!(root.effect_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
    }
}
