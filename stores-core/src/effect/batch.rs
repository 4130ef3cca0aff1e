//! Batching
//!
//! Inside [`batch_effects`], re-runs triggered by store changes are queued
//! instead of executed. Each effect is queued at most once, so an effect
//! that depends on several stores changed in one batch runs once, after all
//! of them changed.

use tracing::debug;

use super::context::BatchScope;
use super::runtime::{self, EffectRuntime};
use crate::error::ReactiveError;

/// Run `action` with effect re-runs deferred until it returns.
///
/// Batches nest; only the outermost one runs the queued effects, in the
/// order they were first triggered. Every queued effect is attempted even if
/// `action` or an earlier effect failed. All failures are returned together
/// as [`ReactiveError::Batching`].
///
/// # Example
///
/// ```rust,ignore
/// batch_effects(|| {
///     first_name.set("Ada".into())?;
///     last_name.set("Lovelace".into())?;
///     Ok(())
/// })?; // an effect watching both names runs once, here
/// ```
pub fn batch_effects<F>(action: F) -> Result<(), ReactiveError>
where
    F: FnOnce() -> Result<(), ReactiveError>,
{
    let mut errors = Vec::new();

    let outermost = {
        let scope = BatchScope::enter();
        if let Err(err) = action() {
            errors.push(err);
        }
        scope.is_outermost()
    };

    if outermost {
        let pending = EffectRuntime::with(|rt| rt.take_pending());
        debug!(effects = pending.len(), "draining batched effects");

        for effect in pending {
            // Disposed while queued.
            if !EffectRuntime::with(|rt| rt.is_registered(effect)) {
                continue;
            }
            if let Err(err) = runtime::rerun(effect) {
                errors.push(err);
            }
        }
    }

    ReactiveError::aggregate(errors, |errors| ReactiveError::Batching { errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{runtime_stats, ReactiveRoot};
    use crate::store::{Readable, Store};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn empty_batch_is_ok() {
        assert!(batch_effects(|| Ok(())).is_ok());
        assert_eq!(runtime_stats().batch_depth, 0);
    }

    #[test]
    fn action_error_is_aggregated() {
        let err = batch_effects(|| Err(ReactiveError::effect("nope"))).unwrap_err();
        assert!(matches!(err, ReactiveError::Batching { .. }));
        assert_eq!(err.errors().len(), 1);
        assert_eq!(runtime_stats().batch_depth, 0);
    }

    #[test]
    fn inner_batch_does_not_drain() {
        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));
        let root = ReactiveRoot::new();

        let (s, r) = (store.clone(), runs.clone());
        root.make_effect(move || {
            s.watch();
            r.set(r.get() + 1);
        })
        .unwrap();

        batch_effects(|| {
            batch_effects(|| store.set(1))?;
            assert_eq!(runs.get(), 1);
            assert_eq!(runtime_stats().pending, 1);
            store.set(2)
        })
        .unwrap();

        assert_eq!(runs.get(), 2);
        root.dispose().unwrap();
    }

    #[test]
    fn panicking_batch_discards_its_queue() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));
        let root = ReactiveRoot::new();

        let (s, r) = (store.clone(), runs.clone());
        root.make_effect(move || {
            s.watch();
            r.set(r.get() + 1);
        })
        .unwrap();

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            batch_effects(|| {
                store.set(1)?;
                panic!("action failed mid-batch");
            })
        }));
        assert!(unwound.is_err());

        let stats = runtime_stats();
        assert_eq!((stats.pending, stats.batch_depth), (0, 0));

        // A later, unrelated batch does not run the abandoned re-run.
        batch_effects(|| Ok(())).unwrap();
        assert_eq!(runs.get(), 1);

        store.set(2).unwrap();
        assert_eq!(runs.get(), 2);
        root.dispose().unwrap();
    }

    #[test]
    fn effects_disposed_while_queued_are_skipped() {
        let store = Store::new(0);
        let runs = Rc::new(Cell::new(0));
        let root = ReactiveRoot::new();

        let (s, r) = (store.clone(), runs.clone());
        root.make_effect(move || {
            s.watch();
            r.set(r.get() + 1);
        })
        .unwrap();

        batch_effects(|| {
            store.set(1)?;
            root.dispose()
        })
        .unwrap();

        assert_eq!(runs.get(), 1);
    }
}
