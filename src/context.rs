//! Owner-bound execution contexts.
//!
//! An [`ExecutionContext`] pairs a default executor with a release pool: a
//! list of teardown callbacks drained exactly once when the context is
//! dropped. Primitives bound to a context are force-failed with
//! [`Error::ContextDeallocated`] at teardown instead of hanging forever or
//! running handlers against a dead owner.
//!
//! The owner holds the context by value; handlers hold a [`WeakContext`] and
//! check liveness at fire time.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::channel::{Capacity, Channel, Producer};
use crate::error::Error;
use crate::executor::Executor;
use crate::future::{Future, Promise};

/// Something that can be force-failed when its owning context goes away.
pub(crate) trait Dependent: Send + Sync {
    /// Completes the dependent with `error` if it is still pending.
    fn force_fail(&self, error: Error);
}

struct ReleasePool {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    drained: bool,
}

pub(crate) struct ContextInner {
    executor: Executor,
    pool: Mutex<ReleasePool>,
}

/// An executor bound to an owner's lifetime.
///
/// Dropping the context drains its release pool exactly once, firing every
/// deinit notification and force-failing every registered dependent.
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a context whose handlers default to `executor`.
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                executor,
                pool: Mutex::new(ReleasePool {
                    callbacks: Vec::new(),
                    drained: false,
                }),
            }),
        }
    }

    /// The context's default executor.
    #[must_use]
    pub fn executor(&self) -> Executor {
        self.inner.executor.clone()
    }

    /// Registers a one-shot callback to run at teardown.
    ///
    /// If the pool has already been drained the callback runs immediately.
    pub fn notify_deinit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callback: Option<Box<dyn FnOnce() + Send>> = Some(Box::new(callback));
        {
            let mut pool = self.inner.pool.lock().expect("release pool lock poisoned");
            if !pool.drained {
                pool.callbacks.push(callback.take().expect("callback present"));
            }
        }
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Registers a dependent to force-fail with
    /// [`Error::ContextDeallocated`] at teardown.
    pub(crate) fn add_dependent(&self, dependent: Weak<dyn Dependent>) {
        self.notify_deinit(move || {
            if let Some(dependent) = dependent.upgrade() {
                dependent.force_fail(Error::ContextDeallocated);
            }
        });
    }

    /// A weak handle for liveness checks inside handlers.
    #[must_use]
    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A pending promise/future pair whose lifetime is bound to this context.
    #[must_use]
    pub fn promise<T>(&self) -> (Promise<T>, Future<T>)
    where
        T: Clone + Send + 'static,
    {
        let (tx, rx) = crate::future::promise();
        let core: Arc<dyn Dependent> = tx.core().clone();
        let weak: Weak<dyn Dependent> = Arc::downgrade(&core);
        self.add_dependent(weak);
        (tx, rx)
    }

    /// A producer/channel pair whose lifetime is bound to this context.
    #[must_use]
    pub fn channel<U, S>(&self, capacity: Capacity) -> (Producer<U, S>, Channel<U, S>)
    where
        U: Clone + Send + 'static,
        S: Clone + Send + 'static,
    {
        let (tx, rx) = crate::channel::channel(capacity);
        let core: Arc<dyn Dependent> = tx.core().clone();
        let weak: Weak<dyn Dependent> = Arc::downgrade(&core);
        self.add_dependent(weak);
        (tx, rx)
    }

    /// A context-bound future that completes with `value` after `delay`.
    #[must_use]
    pub fn future_after<T>(&self, delay: Duration, value: T) -> Future<T>
    where
        T: Clone + Send + 'static,
    {
        let (tx, rx) = self.promise();
        crate::time::driver().schedule_after(delay, move || {
            tx.succeed(value);
        });
        rx
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        let callbacks = {
            let mut pool = self.inner.pool.lock().expect("release pool lock poisoned");
            if pool.drained {
                return;
            }
            pool.drained = true;
            std::mem::take(&mut pool.callbacks)
        };
        if !callbacks.is_empty() {
            tracing::trace!(count = callbacks.len(), "draining execution context");
        }
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext").finish_non_exhaustive()
    }
}

/// Weak handle to an [`ExecutionContext`].
#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    /// Whether the owning context is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// The context's executor, if it is still alive.
    #[must_use]
    pub fn executor(&self) -> Option<Executor> {
        self.inner.upgrade().map(|inner| inner.executor.clone())
    }
}

impl std::fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakContext")
            .field("alive", &self.is_alive())
            .finish()
    }
}
