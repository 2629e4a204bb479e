//! Error types for loading and for loader construction.

use thiserror::Error;

/// The error half of a [`LoadFuture`][crate::LoadFuture] result.
///
/// `E` is the error type of the batch function. Errors produced by the batch
/// function, either for the batch as a whole or for a single key, are handed
/// back unchanged inside [`LoadError::Upstream`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The batch function returned a value list that doesn't line up with
    /// the keys it was given. Every key in the batch fails with this error.
    #[error("batch function returned an invalid result ({reason}); keys: {keys}; values: {values}")]
    InvalidResult {
        reason: String,
        keys: String,
        values: String,
    },

    /// An error from the batch function.
    #[error("{0}")]
    Upstream(E),

    /// The batch task was dropped by its scheduler before it could settle
    /// this key.
    #[error("batch was dropped before it was dispatched")]
    Canceled,
}

impl<E> LoadError<E> {
    /// Get the batch function's error, if this is an upstream error.
    pub fn upstream(&self) -> Option<&E> {
        match self {
            LoadError::Upstream(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_upstream(self) -> Option<E> {
        match self {
            LoadError::Upstream(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors raised while building a [`Loader`][crate::Loader]. These are
/// always reported by [`LoaderBuilder::build`][crate::LoaderBuilder::build],
/// before any key can be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid argument `{option}`: {reason}")]
    InvalidArgument {
        option: &'static str,
        reason: String,
    },

    /// No scheduler was configured, and there was no tokio runtime to fall
    /// back on.
    #[error("no scheduler was configured and no tokio runtime is running on this thread")]
    NoRuntime,
}
