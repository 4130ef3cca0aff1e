//! Effect Runtime
//!
//! The runtime is the bookkeeping shared by every effect on a thread: which
//! effect is running, which stores each effect depends on, which roots own
//! which effects, and which re-runs are waiting for a batch to finish.
//!
//! # How It Works
//!
//! 1. `make_effect` registers an effect and runs it once inside an
//!    [`EffectScope`], which marks it as the running effect.
//!
//! 2. While an effect runs, `watch` reports each store it reads. The first
//!    read of a store subscribes the effect to it; every later emission from
//!    that store triggers a re-run.
//!
//! 3. A triggered re-run either runs right away or, inside `batch_effects`,
//!    is queued once per effect until the outermost batch finishes.
//!
//! 4. Dependencies are captured again on every run. After a successful run,
//!    subscriptions to stores that were not read are dropped.
//!
//! # Thread Confinement
//!
//! The runtime lives in a thread local. Stores are `Rc`-based and cannot move
//! between threads, so every effect a store can trigger is registered with
//! the same runtime as the store's readers.
//!
//! The runtime is never borrowed while user code runs: every entry point
//! takes what it needs, releases the borrow, then calls out.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::cleanup::Cleanup;
use super::context::{EffectScope, RerunGuard};
use crate::error::ReactiveError;
use crate::store::{Readable, ReadonlyStore, StoreId, Subscriber, Unsubscribe};

thread_local! {
    static RUNTIME: RefCell<EffectRuntime> = RefCell::new(EffectRuntime::default());
}

/// Unique identifier for an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EffectId(u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// Unique identifier for a reactive root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RootId(u64);

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// A snapshot of the current thread's runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Registered effects.
    pub effects: usize,
    /// Roots that own at least one effect.
    pub roots: usize,
    /// Re-runs queued by the current batch.
    pub pending: usize,
    /// How many `batch_effects` calls are on the stack.
    pub batch_depth: usize,
}

/// Get a snapshot of the current thread's runtime.
pub fn runtime_stats() -> RuntimeStats {
    EffectRuntime::with(|rt| rt.stats())
}

/// The effect currently running on this thread, if any.
pub fn current_effect() -> Option<EffectId> {
    EffectRuntime::with(|rt| rt.current_effect)
}

/// Whether `watch` would record a dependency right now.
pub fn is_tracking() -> bool {
    current_effect().is_some()
}

pub(crate) type EffectFn = Rc<RefCell<dyn FnMut() -> Result<Option<Cleanup>, ReactiveError>>>;

pub(crate) struct EffectRecord {
    root: RootId,
    func: EffectFn,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) dependencies: IndexMap<StoreId, Unsubscribe>,
    /// Stores read during the current run.
    seen: SmallVec<[StoreId; 8]>,
    running: bool,
    rerun_requested: bool,
}

/// Outcome of [`EffectRuntime::finish_run`].
pub(crate) struct Finished {
    pub(crate) stale: SmallVec<[Unsubscribe; 4]>,
    pub(crate) rerun: bool,
    /// A cleanup returned by a run whose root was disposed meanwhile.
    pub(crate) orphan: Option<Cleanup>,
}

/// Outcome of [`EffectRuntime::prepare_rerun`].
pub(crate) enum Rerun {
    Missing,
    /// The effect is running; it will run again once it finishes.
    Deferred,
    Ready {
        func: EffectFn,
        cleanup: Option<Cleanup>,
    },
}

#[derive(Default)]
pub(crate) struct EffectRuntime {
    pub(crate) current_effect: Option<EffectId>,
    effect_count: u64,
    root_count: u64,
    pub(crate) batch_depth: usize,
    pending: IndexSet<EffectId>,
    effects: IndexMap<EffectId, EffectRecord>,
    roots: IndexMap<RootId, IndexSet<EffectId>>,
}

impl EffectRuntime {
    /// Borrow this thread's runtime.
    ///
    /// Must not be called from inside `f`.
    pub(crate) fn with<R>(f: impl FnOnce(&mut EffectRuntime) -> R) -> R {
        RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
    }

    /// Like [`with`](Self::with), but does nothing while the thread is being
    /// torn down.
    pub(crate) fn try_with(f: impl FnOnce(&mut EffectRuntime)) {
        let _ = RUNTIME.try_with(|rt| f(&mut rt.borrow_mut()));
    }

    pub(crate) fn create_root(&mut self) -> RootId {
        let id = RootId(self.root_count);
        self.root_count += 1;
        id
    }

    pub(crate) fn register_effect(&mut self, root: RootId, func: EffectFn) -> EffectId {
        let id = EffectId(self.effect_count);
        self.effect_count += 1;

        self.effects.insert(
            id,
            EffectRecord {
                root,
                func,
                cleanup: None,
                dependencies: IndexMap::new(),
                seen: SmallVec::new(),
                running: false,
                rerun_requested: false,
            },
        );
        self.roots.entry(root).or_default().insert(id);
        id
    }

    pub(crate) fn is_registered(&self, effect: EffectId) -> bool {
        self.effects.contains_key(&effect)
    }

    pub(crate) fn root_effect_count(&self, root: RootId) -> usize {
        self.roots.get(&root).map_or(0, IndexSet::len)
    }

    /// Mark `effect` as running and start a fresh dependency capture.
    pub(crate) fn begin_run(&mut self, effect: EffectId) -> Option<EffectId> {
        if let Some(record) = self.effects.get_mut(&effect) {
            record.running = true;
            record.seen.clear();
        }
        self.current_effect.replace(effect)
    }

    pub(crate) fn end_run(&mut self, effect: EffectId, previous: Option<EffectId>) {
        if let Some(record) = self.effects.get_mut(&effect) {
            record.running = false;
        }
        self.current_effect = previous;
    }

    /// Record that the running effect read `store`. Returns the effect when it
    /// is not yet subscribed to that store.
    fn record_read(&mut self, store: StoreId) -> Option<EffectId> {
        let effect = self.current_effect?;
        let record = self.effects.get_mut(&effect)?;

        if !record.seen.contains(&store) {
            record.seen.push(store);
        }
        if record.dependencies.contains_key(&store) {
            None
        } else {
            Some(effect)
        }
    }

    /// Store a new subscription. Hands it back if the effect is gone.
    fn add_dependency(&mut self, effect: EffectId, store: StoreId, handle: Unsubscribe) -> Option<Unsubscribe> {
        match self.effects.get_mut(&effect) {
            Some(record) => {
                record.dependencies.insert(store, handle);
                None
            }
            None => Some(handle),
        }
    }

    pub(crate) fn finish_run(&mut self, effect: EffectId, succeeded: bool, cleanup: Option<Cleanup>) -> Finished {
        let Some(record) = self.effects.get_mut(&effect) else {
            return Finished {
                stale: SmallVec::new(),
                rerun: false,
                orphan: cleanup,
            };
        };

        let mut stale = SmallVec::new();
        if succeeded {
            let unread: SmallVec<[StoreId; 4]> = record
                .dependencies
                .keys()
                .filter(|id| !record.seen.contains(*id))
                .copied()
                .collect();
            stale.extend(unread.iter().filter_map(|id| record.dependencies.shift_remove(id)));
        }

        record.cleanup = cleanup;
        record.seen.clear();

        Finished {
            stale,
            rerun: std::mem::take(&mut record.rerun_requested),
            orphan: None,
        }
    }

    fn prepare_rerun(&mut self, effect: EffectId) -> Rerun {
        let Some(record) = self.effects.get_mut(&effect) else {
            return Rerun::Missing;
        };

        if record.running {
            record.rerun_requested = true;
            return Rerun::Deferred;
        }

        // Held until the run finishes, so a trigger fired by the cleanup
        // itself is deferred too.
        record.running = true;
        Rerun::Ready {
            func: Rc::clone(&record.func),
            cleanup: record.cleanup.take(),
        }
    }

    /// Put back a cleanup that failed. A re-run requested meanwhile stays
    /// requested and is honored when the effect's next run finishes.
    fn restore_cleanup(&mut self, effect: EffectId, cleanup: Cleanup) -> Option<Cleanup> {
        match self.effects.get_mut(&effect) {
            Some(record) => {
                record.running = false;
                record.cleanup = Some(cleanup);
                None
            }
            None => Some(cleanup),
        }
    }

    /// Release an effect whose re-run was abandoned before its body ran.
    pub(crate) fn abandon_rerun(&mut self, effect: EffectId) {
        if let Some(record) = self.effects.get_mut(&effect) {
            record.running = false;
        }
    }

    /// Queue `effect` when a batch is open. Returns whether it was queued.
    fn enqueue_if_batching(&mut self, effect: EffectId) -> bool {
        if self.batch_depth == 0 {
            return false;
        }
        self.pending.insert(effect);
        true
    }

    pub(crate) fn take_pending(&mut self) -> IndexSet<EffectId> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Remove a root and all of its effects, returning their records.
    pub(crate) fn release_root(&mut self, root: RootId) -> Vec<EffectRecord> {
        let Some(effects) = self.roots.shift_remove(&root) else {
            return Vec::new();
        };

        effects
            .into_iter()
            .filter_map(|id| {
                self.pending.shift_remove(&id);
                self.effects.shift_remove(&id)
            })
            .inspect(|record| debug_assert_eq!(record.root, root))
            .collect()
    }

    fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            effects: self.effects.len(),
            roots: self.roots.len(),
            pending: self.pending.len(),
            batch_depth: self.batch_depth,
        }
    }
}

// ----------------------------------------------------------------------------
// Tracking and re-runs
// ----------------------------------------------------------------------------

/// Read `store`, subscribing the running effect to it if there is one.
pub(crate) fn track<T: Clone + 'static>(store: &ReadonlyStore<T>) -> T {
    let id = store.id();

    if let Some(effect) = EffectRuntime::with(|rt| rt.record_read(id)) {
        trace!(%effect, store = %id, "tracking dependency");
        // `listen` skips the initial delivery: this run already has the value.
        let handle = store.inner.listen(Subscriber::fallible(move |_| trigger(effect)));
        if let Some(orphan) = EffectRuntime::with(|rt| rt.add_dependency(effect, id, handle)) {
            orphan.unsubscribe();
        }
    }

    store.value()
}

/// React to an emission from one of `effect`'s dependencies.
fn trigger(effect: EffectId) -> Result<(), ReactiveError> {
    if EffectRuntime::with(|rt| rt.enqueue_if_batching(effect)) {
        trace!(%effect, "queued for the end of the batch");
        return Ok(());
    }
    rerun(effect)
}

/// Run `effect`'s cleanup, then the effect itself.
pub(crate) fn rerun(effect: EffectId) -> Result<(), ReactiveError> {
    let (func, cleanup) = match EffectRuntime::with(|rt| rt.prepare_rerun(effect)) {
        Rerun::Missing => return Err(ReactiveError::MissingEffect(effect)),
        Rerun::Deferred => {
            trace!(%effect, "re-run requested while running");
            return Ok(());
        }
        Rerun::Ready { func, cleanup } => (func, cleanup),
    };

    debug!(%effect, "re-running effect");

    if let Some(mut cleanup) = cleanup {
        let guard = RerunGuard::new(effect);
        let cleaned = cleanup.run();
        guard.release();

        if let Err(err) = cleaned {
            // Keep it for the next attempt; an orphan is simply dropped.
            EffectRuntime::with(|rt| rt.restore_cleanup(effect, cleanup));
            return Err(err);
        }
    }

    execute(effect, &func)
}

/// Run the body of a registered effect and store the outcome.
pub(crate) fn execute(effect: EffectId, func: &EffectFn) -> Result<(), ReactiveError> {
    let outcome = {
        let _scope = EffectScope::enter(effect);
        let mut body = func.borrow_mut();
        (&mut *body)()
    };

    let (result, cleanup) = match outcome {
        Ok(cleanup) => (Ok(()), cleanup),
        Err(err) => (Err(err), None),
    };

    let finished = EffectRuntime::with(|rt| rt.finish_run(effect, result.is_ok(), cleanup));

    for handle in &finished.stale {
        handle.unsubscribe();
    }

    let mut result = result;
    if let Some(mut orphan) = finished.orphan {
        // The root was disposed while this run was in progress.
        debug!(%effect, "running cleanup of a disposed effect");
        result = result.and(orphan.run());
    }

    // A dependency changed during this run; catch up even if the run failed.
    // The first failure wins.
    if finished.rerun {
        result = result.and(rerun(effect));
    }

    result
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
