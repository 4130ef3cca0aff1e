//! Effects: side effects that re-run when the stores they watch change.
//!
//! - [`ReactiveRoot`] owns effects and disposes them together
//! - [`batch_effects`] defers re-runs until a group of changes is complete
//! - [`Cleanup`] runs before each re-run and on disposal

mod batch;
mod cleanup;
mod context;
mod root;
mod runtime;

pub use batch::batch_effects;
pub use cleanup::{Cleanup, EffectOutput};
pub use root::{make_reactive_root, ReactiveRoot};
pub use runtime::{current_effect, is_tracking, runtime_stats, EffectId, RootId, RuntimeStats};

pub(crate) use runtime::track;
