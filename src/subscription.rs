//! Handler registration handles.

/// A handle to a registered handler.
///
/// The core owns the callback itself, so dropping a `Subscription` merely
/// detaches the handle — the handler stays registered and will still fire.
/// Call [`unsubscribe`](Self::unsubscribe) to remove a handler that has not
/// fired yet.
#[must_use = "dropping a Subscription detaches it; call unsubscribe() to remove the handler"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A handle for a registration that already fired (nothing to remove).
    pub(crate) fn spent() -> Self {
        Self { remove: None }
    }

    /// Removes the handler if it has not fired yet.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.remove.is_some())
            .finish()
    }
}
