//! Effect Context
//!
//! RAII guards over the runtime's ambient state: which effect is running and
//! how deep the current batch is. Both are restored when the guard drops, so
//! the state stays consistent even if user code panics.

use std::thread;

use tracing::warn;

use super::runtime::{EffectId, EffectRuntime};

/// Marks an effect as running for as long as the guard lives.
///
/// Scopes nest: an effect re-run triggered by a `set` inside another
/// effect's body enters its own scope, and the outer effect becomes current
/// again when it drops.
pub(crate) struct EffectScope {
    effect: EffectId,
    previous: Option<EffectId>,
}

impl EffectScope {
    pub(crate) fn enter(effect: EffectId) -> Self {
        let previous = EffectRuntime::with(|rt| rt.begin_run(effect));
        Self { effect, previous }
    }
}

impl Drop for EffectScope {
    fn drop(&mut self) {
        let (effect, previous) = (self.effect, self.previous);
        EffectRuntime::try_with(|rt| rt.end_run(effect, previous));
    }
}

/// Covers the window of a re-run between claiming the effect and entering
/// its [`EffectScope`], while the previous cleanup runs.
///
/// If the cleanup unwinds, the effect is released so later changes can run
/// it again.
pub(crate) struct RerunGuard {
    effect: EffectId,
    armed: bool,
}

impl RerunGuard {
    pub(crate) fn new(effect: EffectId) -> Self {
        Self { effect, armed: true }
    }

    /// The cleanup returned normally.
    pub(crate) fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for RerunGuard {
    fn drop(&mut self) {
        if self.armed {
            let effect = self.effect;
            warn!(%effect, "cleanup panicked; effect released");
            EffectRuntime::try_with(|rt| rt.abandon_rerun(effect));
        }
    }
}

/// Holds a batch open for as long as the guard lives.
pub(crate) struct BatchScope {
    outermost: bool,
}

impl BatchScope {
    pub(crate) fn enter() -> Self {
        let outermost = EffectRuntime::with(|rt| {
            rt.batch_depth += 1;
            rt.batch_depth == 1
        });
        Self { outermost }
    }

    /// Whether this is the batch that drains the queue.
    pub(crate) fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        // An unwinding outermost batch never reaches its drain; drop the queue
        // rather than leave it for an unrelated batch.
        let discard = self.outermost && thread::panicking();
        EffectRuntime::try_with(|rt| {
            rt.batch_depth -= 1;
            if discard {
                let discarded = rt.discard_pending();
                warn!(discarded, "batch unwound; queued effects dropped");
            }
        });
    }
}
