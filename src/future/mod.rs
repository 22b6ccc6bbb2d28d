//! Single-shot completable core.
//!
//! A [`promise`] call returns the two views over one shared core:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      PROMISE / FUTURE SPLIT                      │
//! │                                                                  │
//! │   Promise (settable)                 Future (observing)          │
//! │     │                                   │                        │
//! │     │── complete(Ok(v)) ──► core ◄───── on_completion(f)         │
//! │     │        exactly once    │                                   │
//! │     │                        └──► f(Ok(v)) on f's executor       │
//! │   (drop) ──► Err(Abandoned)                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Semantics
//!
//! - The terminal result is set at most once; concurrent `complete` calls
//!   race and exactly one wins. Losing calls are no-ops.
//! - Handlers registered before completion are stored and fired exactly once,
//!   in registration order, when completion happens. Handlers registered
//!   after completion fire immediately with the known result. The two are
//!   indistinguishable in outcome.
//! - State is mutated under the core lock; callbacks always run outside it,
//!   dispatched through their registered executor.
//! - Dropping the promise without completing force-completes the core with
//!   [`Error::Abandoned`], so an unobserved future can never hang its
//!   subscribers forever.
//!
//! Blocking [`Future::wait`] is an escape hatch for top-level glue and tests.
//! Never call it from inside a registered handler: if the handler's executor
//! is the serial queue the waiter blocks, the wait can deadlock.

mod combinators;

pub use combinators::zip;

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::cancel::Cancellable;
use crate::error::{Completion, Error};
use crate::executor::Executor;
use crate::subscription::Subscription;

/// Creates an incomplete core and returns its settable and observing views.
#[must_use]
pub fn promise<T>() -> (Promise<T>, Future<T>)
where
    T: Clone + Send + 'static,
{
    let core = Arc::new(FutureCore::new());
    (
        Promise {
            core: Arc::clone(&core),
        },
        Future { core },
    )
}

/// A future already completed with `value`.
#[must_use]
pub fn succeeded<T>(value: T) -> Future<T>
where
    T: Clone + Send + 'static,
{
    Future {
        core: Arc::new(FutureCore::completed(Ok(value))),
    }
}

/// A future already failed with `error`.
#[must_use]
pub fn failed<T>(error: Error) -> Future<T>
where
    T: Clone + Send + 'static,
{
    Future {
        core: Arc::new(FutureCore::completed(Err(error))),
    }
}

/// A future already failed with [`Error::Cancelled`].
#[must_use]
pub fn cancelled<T>() -> Future<T>
where
    T: Clone + Send + 'static,
{
    failed(Error::Cancelled)
}

/// A future that completes with `value` after `delay`.
#[must_use]
pub fn after<T>(delay: Duration, value: T) -> Future<T>
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = promise();
    crate::time::driver().schedule_after(delay, move || {
        tx.succeed(value);
    });
    rx
}

enum State<T> {
    Pending(Vec<HandlerEntry<T>>),
    Complete(Completion<T>),
}

struct HandlerEntry<T> {
    id: u64,
    executor: Executor,
    callback: Box<dyn FnOnce(Completion<T>) + Send>,
}

/// The shared core behind a [`Promise`]/[`Future`] pair.
pub(crate) struct FutureCore<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    next_id: std::sync::atomic::AtomicU64,
}

impl<T> FutureCore<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
            condvar: Condvar::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn completed(completion: Completion<T>) -> Self {
        Self {
            state: Mutex::new(State::Complete(completion)),
            condvar: Condvar::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + 'static> FutureCore<T> {
    /// Sets the terminal result if still pending. Returns whether this call
    /// won the transition.
    pub(crate) fn complete_from(
        &self,
        origin: Option<&Executor>,
        completion: Completion<T>,
    ) -> bool {
        let handlers = {
            let mut state = self.state.lock().expect("future lock poisoned");
            match &mut *state {
                State::Complete(_) => return false,
                State::Pending(handlers) => {
                    let handlers = std::mem::take(handlers);
                    *state = State::Complete(completion.clone());
                    handlers
                }
            }
        };
        self.condvar.notify_all();

        for entry in handlers {
            let completion = completion.clone();
            let callback = entry.callback;
            entry.executor.execute(origin, move || callback(completion));
        }
        true
    }

    /// Force-fails the core; used by cancellation and context teardown.
    pub(crate) fn fail_with(&self, error: Error) {
        let _ = self.complete_from(None, Err(error));
    }

    /// Registers a completion handler.
    ///
    /// Already complete: fires immediately on `executor` and returns `None`.
    /// Pending: stores the handler and returns its registration id.
    pub(crate) fn register<F>(&self, executor: Executor, callback: F) -> Option<u64>
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        let known = {
            let mut state = self.state.lock().expect("future lock poisoned");
            match &mut *state {
                State::Complete(completion) => Some(completion.clone()),
                State::Pending(handlers) => {
                    let id = self
                        .next_id
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    handlers.push(HandlerEntry {
                        id,
                        executor,
                        callback: Box::new(callback),
                    });
                    return Some(id);
                }
            }
        };
        if let Some(completion) = known {
            executor.execute(None, move || callback(completion));
        }
        None
    }

    /// Removes a pending handler by registration id.
    pub(crate) fn unregister(&self, id: u64) {
        let mut state = self.state.lock().expect("future lock poisoned");
        if let State::Pending(handlers) = &mut *state {
            handlers.retain(|entry| entry.id != id);
        }
    }

    /// Returns the terminal result if already complete.
    pub(crate) fn try_result(&self) -> Option<Completion<T>> {
        let state = self.state.lock().expect("future lock poisoned");
        match &*state {
            State::Complete(completion) => Some(completion.clone()),
            State::Pending(_) => None,
        }
    }

    fn wait_deadline(&self, deadline: Option<Instant>) -> Option<Completion<T>> {
        let mut state = self.state.lock().expect("future lock poisoned");
        loop {
            if let State::Complete(completion) = &*state {
                return Some(completion.clone());
            }
            match deadline {
                None => {
                    state = self.condvar.wait(state).expect("future lock poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (next, timeout) = self
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .expect("future lock poisoned");
                    state = next;
                    if timeout.timed_out() {
                        if let State::Complete(completion) = &*state {
                            return Some(completion.clone());
                        }
                        return None;
                    }
                }
            }
        }
    }
}

impl<T: Clone + Send + 'static> Cancellable for FutureCore<T> {
    fn cancel(&self) {
        self.fail_with(Error::Cancelled);
    }
}

impl<T: Clone + Send + 'static> crate::context::Dependent for FutureCore<T> {
    fn force_fail(&self, error: Error) {
        self.fail_with(error);
    }
}

/// The settable view of a completable core.
///
/// There is exactly one promise per core; dropping it without completing
/// fails the core with [`Error::Abandoned`].
pub struct Promise<T: Clone + Send + 'static> {
    core: Arc<FutureCore<T>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Sets the terminal result. Returns whether this call won the one-shot
    /// transition; losing calls are no-ops.
    pub fn complete(&self, completion: Completion<T>) -> bool {
        self.core.complete_from(None, completion)
    }

    /// Like [`complete`](Self::complete), passing the executor the caller is
    /// running on so downstream handlers may short-circuit synchronously.
    pub fn complete_from(&self, origin: Option<&Executor>, completion: Completion<T>) -> bool {
        self.core.complete_from(origin, completion)
    }

    /// Completes with a success value.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Completes with a failure.
    pub fn fail(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Returns true once the core has a terminal result.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.try_result().is_some()
    }

    /// Another observing view of the same core.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future {
            core: Arc::clone(&self.core),
        }
    }

    /// A weak cancellation registrant for this core.
    ///
    /// Registering it on a [`CancellationToken`](crate::CancellationToken)
    /// force-fails the core with [`Error::Cancelled`] when the token fires.
    #[must_use]
    pub fn as_cancellable(&self) -> Weak<dyn Cancellable> {
        let core: Arc<dyn Cancellable> = self.core.clone();
        let weak: Weak<dyn Cancellable> = Arc::downgrade(&core);
        weak
    }

    pub(crate) fn core(&self) -> &Arc<FutureCore<T>> {
        &self.core
    }
}

impl<T: Clone + Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        // No-op if the core already completed.
        self.core.fail_with(Error::Abandoned);
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

/// The observing view of a completable core.
pub struct Future<T: Clone + Send + 'static> {
    core: Arc<FutureCore<T>>,
}

impl<T: Clone + Send + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Registers a completion handler to run on `executor`.
    ///
    /// Registration before and after completion are indistinguishable in
    /// outcome: the handler runs exactly once with the terminal result.
    pub fn on_completion<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(Completion<T>) + Send + 'static,
    {
        match self.core.register(executor, callback) {
            Some(id) => {
                let core = Arc::downgrade(&self.core);
                Subscription::new(move || {
                    if let Some(core) = core.upgrade() {
                        core.unregister(id);
                    }
                })
            }
            None => Subscription::spent(),
        }
    }

    /// Registers a handler that only sees a success value.
    pub fn on_success<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_completion(executor, move |completion| {
            if let Ok(value) = completion {
                callback(value);
            }
        })
    }

    /// Registers a handler that only sees a failure.
    pub fn on_failure<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_completion(executor, move |completion| {
            if let Err(error) = completion {
                callback(error);
            }
        })
    }

    /// Returns the terminal result if already complete, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<Completion<T>> {
        self.core.try_result()
    }

    /// Blocks the calling thread until completion.
    ///
    /// For top-level glue and tests only; never call from inside a handler.
    #[must_use]
    pub fn wait(&self) -> Completion<T> {
        self.core
            .wait_deadline(None)
            .expect("unbounded wait returned without completion")
    }

    /// Blocks until completion or `timeout`, returning `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion<T>> {
        self.core.wait_deadline(Some(Instant::now() + timeout))
    }

    pub(crate) fn core(&self) -> &Arc<FutureCore<T>> {
        &self.core
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("completed", &self.try_result().is_some())
            .finish_non_exhaustive()
    }
}
