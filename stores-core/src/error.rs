//! Error types for the effect runtime.
//!
//! Stores themselves never produce errors: a panicking subscriber or
//! start/stop handler unwinds straight through `set`/`subscribe`. Everything
//! in this module originates in the effect layer, where several independent
//! steps (cleanups during disposal, queued re-runs during a batch) must all be
//! attempted and their failures folded into one value.

use thiserror::Error;

use crate::effect::EffectId;

/// Boxed user error carried by [`ReactiveError::Effect`].
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Errors raised by effects, reactive roots and batches.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// `make_effect` was called while another effect was running.
    #[error("make_effect called inside an effect")]
    NestedEffect,

    /// One or more cleanup functions failed while disposing a reactive root.
    #[error("{} of the registered cleanup functions failed", .errors.len())]
    RootDispose {
        /// Every failure, in the order the cleanups ran.
        errors: Vec<ReactiveError>,
    },

    /// The batched action and/or some of the queued effects failed.
    #[error("{} failures while running a batch of effects", .errors.len())]
    Batching {
        /// Every failure, the action's first, then queued re-runs in order.
        errors: Vec<ReactiveError>,
    },

    /// A tracked effect id no longer resolves to a registered effect.
    ///
    /// This indicates broken runtime bookkeeping rather than a user mistake.
    #[error("effect {0} is not registered with the runtime")]
    MissingEffect(EffectId),

    /// A failure raised by user code: an effect body, a cleanup or a batched
    /// action.
    #[error("{0}")]
    Effect(BoxError),
}

impl ReactiveError {
    /// Wrap any user error.
    pub fn effect(err: impl Into<BoxError>) -> Self {
        Self::Effect(err.into())
    }

    /// The underlying causes of an aggregate error.
    ///
    /// Returns an empty slice for the non-aggregate variants.
    pub fn errors(&self) -> &[ReactiveError] {
        match self {
            Self::RootDispose { errors } | Self::Batching { errors } => errors,
            _ => &[],
        }
    }

    /// Fold a list of failures into `Ok(())` or the aggregate built by `wrap`.
    pub(crate) fn aggregate(
        errors: Vec<ReactiveError>,
        wrap: impl FnOnce(Vec<ReactiveError>) -> Self,
    ) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(wrap(errors))
        }
    }
}
