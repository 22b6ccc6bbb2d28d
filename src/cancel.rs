//! One-shot cancellation tokens.
//!
//! A [`CancellationToken`] is a shared, observable flag that transitions once
//! from live to cancelled. Cancellation is cooperative: registrants are asked
//! to cancel, work already running is not interrupted, and pending
//! completions resolve as [`Error::Cancelled`](crate::Error::Cancelled)
//! failures.
//!
//! Registrants are held weakly — the token never keeps an operation alive.
//! Registering against an already-cancelled token fires immediately rather
//! than being silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// An operation that can be asked to stop.
///
/// Implemented by the future and channel cores: cancelling force-completes
/// them with [`Error::Cancelled`](crate::Error::Cancelled). Closures
/// implement it too, for ad-hoc registrants.
pub trait Cancellable: Send + Sync {
    /// Requests cancellation. Must be idempotent.
    fn cancel(&self);
}

impl<F> Cancellable for F
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        self();
    }
}

struct TokenState {
    registrants: Vec<Weak<dyn Cancellable>>,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

struct TokenInner {
    cancelled: AtomicBool,
    state: Mutex<TokenState>,
}

/// A shared one-shot cancel signal with weak registrant tracking.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TokenState {
                    registrants: Vec::new(),
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers a weakly-held cancellable.
    ///
    /// If the token is already cancelled, the registrant is cancelled
    /// immediately instead of being stored.
    pub fn add(&self, registrant: Weak<dyn Cancellable>) {
        let fire_now = {
            let mut state = self.inner.state.lock().expect("token lock poisoned");
            if self.inner.cancelled.load(Ordering::Acquire) {
                true
            } else {
                // Opportunistically drop registrants that died on their own.
                state.registrants.retain(|weak| weak.strong_count() > 0);
                state.registrants.push(registrant.clone());
                false
            }
        };
        if fire_now {
            if let Some(registrant) = registrant.upgrade() {
                registrant.cancel();
            }
        }
    }

    /// Registers a one-shot notification callback.
    ///
    /// Fires immediately if the token is already cancelled.
    pub fn notify<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callback: Option<Box<dyn FnOnce() + Send>> = Some(Box::new(callback));
        {
            let mut state = self.inner.state.lock().expect("token lock poisoned");
            if !self.inner.cancelled.load(Ordering::Acquire) {
                state.callbacks.push(callback.take().expect("callback present"));
            }
        }
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Cancels the token.
    ///
    /// Idempotent: only the first call has any effect. Live registrants are
    /// cancelled, then notification callbacks run and are cleared. Both
    /// happen outside the token lock.
    pub fn cancel(&self) {
        let (registrants, callbacks) = {
            let mut state = self.inner.state.lock().expect("token lock poisoned");
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            (
                std::mem::take(&mut state.registrants),
                std::mem::take(&mut state.callbacks),
            )
        };

        for registrant in registrants {
            if let Some(registrant) = registrant.upgrade() {
                registrant.cancel();
            }
        }
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        cancels: AtomicUsize,
    }

    impl Cancellable for Probe {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn probe() -> Arc<Probe> {
        Arc::new(Probe {
            cancels: AtomicUsize::new(0),
        })
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        let registrant = probe();
        let notified = Arc::new(AtomicUsize::new(0));

        let weak: Weak<dyn Cancellable> = Arc::downgrade(&registrant) as Weak<dyn Cancellable>;
        token.add(weak);
        let n = Arc::clone(&notified);
        token.notify(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            token.cancel();
        }

        assert_eq!(registrant.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn late_registration_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let registrant = probe();
        token.add(Arc::downgrade(&registrant) as Weak<dyn Cancellable>);
        assert_eq!(registrant.cancels.load(Ordering::SeqCst), 1);

        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        token.notify(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registrants_are_not_kept_alive() {
        let token = CancellationToken::new();
        let registrant = probe();
        token.add(Arc::downgrade(&registrant) as Weak<dyn Cancellable>);
        drop(registrant);

        // Cancelling after the registrant died is a no-op, not a crash.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn closure_registrants() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let closure: Arc<dyn Cancellable> = Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        token.add(Arc::downgrade(&closure));
        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
