//! Error types and the tagged completion result.
//!
//! Every terminal outcome in the crate flows through [`Completion`]: there is
//! no separate exception channel. Failures produced by the library itself
//! (cancellation, owner teardown, abandoned settable handles, panicking
//! transforms) and failures produced by user code share the one [`Error`]
//! type, so combinators can forward them without translation.
//!
//! [`Error`] is cheap to clone; fan-out dispatch hands every subscriber its
//! own copy of the terminal result.

use std::sync::Arc;

use thiserror::Error as ThisError;

/// The tagged terminal result of a future or channel.
pub type Completion<T> = Result<T, Error>;

/// The failure half of a [`Completion`].
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A cancellation token fired before natural completion.
    #[error("operation was cancelled")]
    Cancelled,

    /// The owning execution context was deallocated before the source
    /// completed.
    #[error("owning context was deallocated before completion")]
    ContextDeallocated,

    /// The settable handle was dropped without ever completing.
    #[error("settable handle was dropped without completing")]
    Abandoned,

    /// A user-supplied transform panicked; the panic was caught at the
    /// combinator boundary and converted into this failure.
    #[error("transform panicked: {0}")]
    HandlerPanicked(Arc<str>),

    /// A plain message failure.
    #[error("{0}")]
    Message(Arc<str>),

    /// An arbitrary user error.
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wraps an arbitrary error value.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(err))
    }

    /// Creates a message failure.
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(Arc::from(msg.into().into_boxed_str()))
    }

    /// Converts a caught panic payload into a failure.
    #[must_use]
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .map_or("opaque panic payload", String::as_str)
            },
            |s| *s,
        );
        Self::HandlerPanicked(Arc::from(msg))
    }

    /// Returns true if this failure came from a cancellation token.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this failure came from owner teardown.
    #[must_use]
    pub const fn is_context_deallocated(&self) -> bool {
        matches!(self, Self::ContextDeallocated)
    }

    /// Returns true if this failure came from an abandoned settable handle.
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

/// Runs a user transform, converting a panic into a failure completion.
pub(crate) fn catch_transform<T, U, F>(f: F, value: T) -> Completion<U>
where
    F: FnOnce(T) -> U,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || f(value))) {
        Ok(out) => Ok(out),
        Err(payload) => Err(Error::from_panic(payload.as_ref())),
    }
}

/// Runs a fallible user transform, converting a panic into a failure
/// completion and flattening the transform's own result.
pub(crate) fn catch_try_transform<T, U, F>(f: F, value: T) -> Completion<U>
where
    F: FnOnce(T) -> Completion<U>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || f(value))) {
        Ok(out) => out,
        Err(payload) => Err(Error::from_panic(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::Cancelled.to_string(), "operation was cancelled");
        assert_eq!(
            Error::ContextDeallocated.to_string(),
            "owning context was deallocated before completion"
        );
        assert_eq!(Error::message("boom").to_string(), "boom");
    }

    #[test]
    fn other_preserves_source_display() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::other(io);
        assert_eq!(err.to_string(), "missing");
    }

    #[test]
    fn predicates() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::ContextDeallocated.is_context_deallocated());
        assert!(Error::Abandoned.is_abandoned());
        assert!(!Error::message("x").is_cancelled());
    }

    #[test]
    fn panic_payload_str() {
        let err = Error::from_panic(&"bang");
        assert_eq!(err.to_string(), "transform panicked: bang");
    }

    #[test]
    fn clones_share_payload() {
        let err = Error::message("shared");
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }
}
