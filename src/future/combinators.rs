//! Derived futures.
//!
//! Every combinator here follows one shape: create a new promise/future
//! pair, register a single completion handler on the source, transform the
//! result inside that handler, and complete the new promise — inheriting the
//! exactly-once, lock-guarded completion guarantee from the core with no new
//! locking. A panicking transform is caught at the boundary and converted
//! into a failure completion.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::context::{Dependent, ExecutionContext};
use crate::error::{Completion, Error, catch_transform, catch_try_transform};
use crate::executor::Executor;

use super::{Future, promise};

impl<T: Clone + Send + 'static> Future<T> {
    /// Transforms a success value on `executor`.
    pub fn map<U, F>(&self, executor: Executor, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (tx, rx) = promise();
        let origin = executor.clone();
        self.core().register(executor, move |completion| {
            let result = completion.and_then(|value| catch_transform(f, value));
            tx.complete_from(Some(&origin), result);
        });
        rx
    }

    /// Transforms a success value with a fallible transform.
    pub fn try_map<U, F>(&self, executor: Executor, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        let (tx, rx) = promise();
        let origin = executor.clone();
        self.core().register(executor, move |completion| {
            let result = completion.and_then(|value| catch_try_transform(f, value));
            tx.complete_from(Some(&origin), result);
        });
        rx
    }

    /// Transforms a success value into another future and flattens it.
    pub fn flat_map<U, F>(&self, executor: Executor, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let (tx, rx) = promise();
        let origin = executor.clone();
        self.core().register(executor, move |completion| match completion {
            Ok(value) => match catch_transform(f, value) {
                Ok(inner) => {
                    inner.core().register(Executor::immediate(), move |result| {
                        tx.complete_from(Some(&origin), result);
                    });
                }
                Err(error) => {
                    tx.complete_from(Some(&origin), Err(error));
                }
            },
            Err(error) => {
                tx.complete_from(Some(&origin), Err(error));
            }
        });
        rx
    }

    /// Replaces a failure with a fallback success value.
    pub fn recover<F>(&self, executor: Executor, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        let (tx, rx) = promise();
        let origin = executor.clone();
        self.core().register(executor, move |completion| {
            let result = match completion {
                Ok(value) => Ok(value),
                Err(error) => catch_transform(f, error),
            };
            tx.complete_from(Some(&origin), result);
        });
        rx
    }

    /// Re-emits the terminal result `delay` after the source completes.
    #[must_use]
    pub fn delayed(&self, delay: Duration) -> Future<T> {
        let (tx, rx) = promise();
        self.core().register(Executor::immediate(), move |completion| {
            crate::time::driver().schedule_after(delay, move || {
                tx.complete(completion);
            });
        });
        rx
    }

    /// Context-bound transform.
    ///
    /// Runs on the context's executor. If the context is torn down before
    /// the source completes — or has died by the time the handler fires —
    /// the derived future fails with [`Error::ContextDeallocated`] instead
    /// of invoking the transform.
    pub fn map_ctx<U, F>(&self, ctx: &ExecutionContext, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (tx, rx) = promise();
        let core: Arc<dyn Dependent> = tx.core().clone();
        let weak: Weak<dyn Dependent> = Arc::downgrade(&core);
        ctx.add_dependent(weak);

        let weak_ctx = ctx.downgrade();
        let executor = ctx.executor();
        let origin = executor.clone();
        self.core().register(executor, move |completion| {
            if !weak_ctx.is_alive() {
                tx.complete_from(Some(&origin), Err(Error::ContextDeallocated));
                return;
            }
            let result = completion.and_then(|value| catch_transform(f, value));
            tx.complete_from(Some(&origin), result);
        });
        rx
    }
}

/// Pairs two futures, succeeding with both values or failing with the first
/// failure observed.
#[must_use]
pub fn zip<A, B>(a: &Future<A>, b: &Future<B>) -> Future<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    struct ZipState<A, B> {
        left: Option<A>,
        right: Option<B>,
    }

    let (tx, rx) = promise();
    let tx = Arc::new(tx);
    let state = Arc::new(Mutex::new(ZipState {
        left: None,
        right: None,
    }));

    {
        let tx = Arc::clone(&tx);
        let state = Arc::clone(&state);
        a.core().register(Executor::immediate(), move |completion| {
            match completion {
                Ok(value) => {
                    let mut guard = state.lock().expect("zip lock poisoned");
                    guard.left = Some(value);
                    if let (Some(left), Some(right)) = (guard.left.clone(), guard.right.clone()) {
                        drop(guard);
                        tx.complete(Ok((left, right)));
                    }
                }
                Err(error) => {
                    tx.complete(Err(error));
                }
            }
        });
    }
    {
        let state = Arc::clone(&state);
        b.core().register(Executor::immediate(), move |completion| {
            match completion {
                Ok(value) => {
                    let mut guard = state.lock().expect("zip lock poisoned");
                    guard.right = Some(value);
                    if let (Some(left), Some(right)) = (guard.left.clone(), guard.right.clone()) {
                        drop(guard);
                        tx.complete(Ok((left, right)));
                    }
                }
                Err(error) => {
                    tx.complete(Err(error));
                }
            }
        });
    }

    rx
}
