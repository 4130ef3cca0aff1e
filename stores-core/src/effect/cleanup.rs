//! Cleanup functions and effect return values.

use std::fmt;

use crate::error::ReactiveError;

/// Runs before an effect's next run, and when its root is disposed.
///
/// A cleanup that fails is kept: the next attempt (a later re-run, or the
/// root's disposal) calls it again.
pub struct Cleanup(Box<dyn FnMut() -> Result<(), ReactiveError>>);

impl Cleanup {
    /// Wrap an infallible cleanup.
    pub fn new<F>(mut cleanup: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self(Box::new(move || {
            cleanup();
            Ok(())
        }))
    }

    /// Wrap a cleanup that can fail.
    pub fn fallible<F>(cleanup: F) -> Self
    where
        F: FnMut() -> Result<(), ReactiveError> + 'static,
    {
        Self(Box::new(cleanup))
    }

    pub(crate) fn run(&mut self) -> Result<(), ReactiveError> {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What an effect body may return.
///
/// | Return type                          | Cleanup | Failure |
/// |--------------------------------------|---------|---------|
/// | `()`                                 | none    | never   |
/// | `Cleanup` / `Option<Cleanup>`        | given   | never   |
/// | `Result<(), ReactiveError>`          | none    | `Err`   |
/// | `Result<Cleanup, ReactiveError>`     | given   | `Err`   |
/// | `Result<Option<Cleanup>, ReactiveError>` | given | `Err` |
pub trait EffectOutput {
    /// Split into the cleanup to keep and the run's outcome.
    fn into_outcome(self) -> Result<Option<Cleanup>, ReactiveError>;
}

impl EffectOutput for () {
    fn into_outcome(self) -> Result<Option<Cleanup>, ReactiveError> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_outcome(self) -> Result<Option<Cleanup>, ReactiveError> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_outcome(self) -> Result<Option<Cleanup>, ReactiveError> {
        Ok(self)
    }
}

impl<O: EffectOutput> EffectOutput for Result<O, ReactiveError> {
    fn into_outcome(self) -> Result<Option<Cleanup>, ReactiveError> {
        self?.into_outcome()
    }
}
