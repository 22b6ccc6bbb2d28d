//! Per-update async sub-operations with selectable reconciliation.
//!
//! Every upstream update is transformed into a future; the
//! [`FlatteningBehavior`] decides how sub-operation results map back onto the
//! ordered output stream. Superseded in-flight sub-operations are orphaned,
//! not cancelled: their eventual results are discarded by sequence checks,
//! but they still count toward the drain that gates the terminal completion.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, Producer, channel};
use crate::error::{Completion, catch_transform};
use crate::executor::Executor;
use crate::future::Future;

/// How sub-operation results are reconciled with upstream update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatteningBehavior {
    /// Emit each result as its sub-future completes, in completion order.
    KeepUnordered,
    /// Buffer out-of-order results and release them strictly in update
    /// order.
    OrderResults,
    /// Emit a result only if no later-indexed result has been emitted yet;
    /// stale results are silently discarded.
    DropResultsOutOfOrder,
    /// Only the most recently launched sub-operation's result is emitted;
    /// earlier pending ones are ignored on completion.
    KeepLatestTransform,
    /// Queue updates and launch the next sub-operation only after the
    /// previous result has been emitted.
    TransformSerially,
}

struct FlattenState<U, V, S> {
    next_seq: u64,
    /// Sub-futures launched and not yet resolved (discarded results count).
    outstanding: usize,
    upstream_success: Option<S>,
    /// TransformSerially: inputs waiting for their turn.
    queue: VecDeque<U>,
    /// TransformSerially: a sub-operation is currently active.
    in_flight: bool,
    /// OrderResults: completed results waiting for their turn.
    ready: BTreeMap<u64, Completion<V>>,
    /// OrderResults: next sequence number to release.
    emit_cursor: u64,
    /// DropResultsOutOfOrder: highest sequence number emitted so far.
    last_emitted: Option<u64>,
    /// KeepLatestTransform: sequence number of the newest launch.
    latest_seq: u64,
}

struct FlattenShared<U, V, S, F>
where
    U: Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: Clone + Send + 'static,
    F: Fn(U) -> Future<V> + Send + Sync + 'static,
{
    behavior: FlatteningBehavior,
    state: Mutex<FlattenState<U, V, S>>,
    tx: Producer<V, S>,
    transform: F,
}

/// Transforms each update into a future and flattens the results into a new
/// channel according to `behavior`.
///
/// The transform runs on `executor`. Sub-future failures (and panicking
/// transforms) fail the output channel; the upstream terminal completion is
/// forwarded once every launched sub-future has resolved, so discarded
/// results still count toward the drain.
#[must_use]
pub fn flat_map_future<U, V, S, F>(
    source: &Channel<U, S>,
    executor: Executor,
    behavior: FlatteningBehavior,
    transform: F,
) -> Channel<V, S>
where
    U: Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: Clone + Send + 'static,
    F: Fn(U) -> Future<V> + Send + Sync + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let shared = Arc::new(FlattenShared {
        behavior,
        state: Mutex::new(FlattenState {
            next_seq: 0,
            outstanding: 0,
            upstream_success: None,
            queue: VecDeque::new(),
            in_flight: false,
            ready: BTreeMap::new(),
            emit_cursor: 0,
            last_emitted: None,
            latest_seq: 0,
        }),
        tx,
        transform,
    });

    let handler_shared = Arc::clone(&shared);
    let _ = source.make_handler(executor, move |event| match event {
        Event::Update(value) => handler_shared.upstream_update(value),
        Event::Completion(Err(error)) => {
            handler_shared.tx.fail(error);
        }
        Event::Completion(Ok(success)) => handler_shared.upstream_success(success),
    });

    rx
}

impl<U, V, S, F> FlattenShared<U, V, S, F>
where
    U: Clone + Send + 'static,
    V: Clone + Send + 'static,
    S: Clone + Send + 'static,
    F: Fn(U) -> Future<V> + Send + Sync + 'static,
{
    fn upstream_update(self: &Arc<Self>, value: U) {
        let launch = {
            let mut st = self.state.lock().expect("flatten lock poisoned");
            match self.behavior {
                FlatteningBehavior::TransformSerially => {
                    if st.in_flight {
                        st.queue.push_back(value);
                        None
                    } else {
                        st.in_flight = true;
                        Some(Self::claim_seq(&mut st, value))
                    }
                }
                FlatteningBehavior::KeepLatestTransform => {
                    let claimed = Self::claim_seq(&mut st, value);
                    st.latest_seq = claimed.0;
                    Some(claimed)
                }
                _ => Some(Self::claim_seq(&mut st, value)),
            }
        };
        if let Some((seq, input)) = launch {
            self.launch(seq, input);
        }
    }

    fn claim_seq(st: &mut FlattenState<U, V, S>, value: U) -> (u64, U) {
        let seq = st.next_seq;
        st.next_seq += 1;
        st.outstanding += 1;
        (seq, value)
    }

    fn upstream_success(self: &Arc<Self>, success: S) {
        let mut st = self.state.lock().expect("flatten lock poisoned");
        st.upstream_success = Some(success.clone());
        if st.outstanding == 0 && st.queue.is_empty() {
            self.tx.succeed(success);
        }
    }

    fn launch(self: &Arc<Self>, seq: u64, input: U) {
        let future = match catch_transform(|value| (self.transform)(value), input) {
            Ok(future) => future,
            Err(error) => crate::future::failed(error),
        };
        let shared = Arc::clone(self);
        let _ = future.on_completion(Executor::immediate(), move |result| {
            shared.sub_completed(seq, result);
        });
    }

    /// Applies one resolved sub-future to the output.
    ///
    /// Emissions happen while the state lock is held so results reach the
    /// downstream in reconciliation order; launching the next serial
    /// sub-operation happens after release, because an already-completed
    /// future re-enters this method inline.
    fn sub_completed(self: &Arc<Self>, seq: u64, result: Completion<V>) {
        let mut st = self.state.lock().expect("flatten lock poisoned");
        st.outstanding -= 1;

        let mut failed = false;
        let mut next_launch: Option<(u64, U)> = None;

        match self.behavior {
            FlatteningBehavior::KeepUnordered => match result {
                Ok(value) => {
                    let _ = self.tx.update(value);
                }
                Err(error) => {
                    self.tx.fail(error);
                    failed = true;
                }
            },
            FlatteningBehavior::OrderResults => {
                st.ready.insert(seq, result);
                loop {
                    let cursor = st.emit_cursor;
                    let Some(next) = st.ready.remove(&cursor) else {
                        break;
                    };
                    st.emit_cursor += 1;
                    match next {
                        Ok(value) => {
                            let _ = self.tx.update(value);
                        }
                        Err(error) => {
                            self.tx.fail(error);
                            failed = true;
                            break;
                        }
                    }
                }
            }
            FlatteningBehavior::DropResultsOutOfOrder => {
                let fresh = st.last_emitted.map_or(true, |last| seq > last);
                if fresh {
                    match result {
                        Ok(value) => {
                            st.last_emitted = Some(seq);
                            let _ = self.tx.update(value);
                        }
                        Err(error) => {
                            self.tx.fail(error);
                            failed = true;
                        }
                    }
                }
            }
            FlatteningBehavior::KeepLatestTransform => {
                if seq == st.latest_seq {
                    match result {
                        Ok(value) => {
                            let _ = self.tx.update(value);
                        }
                        Err(error) => {
                            self.tx.fail(error);
                            failed = true;
                        }
                    }
                }
            }
            FlatteningBehavior::TransformSerially => {
                match result {
                    Ok(value) => {
                        let _ = self.tx.update(value);
                    }
                    Err(error) => {
                        self.tx.fail(error);
                        failed = true;
                    }
                }
                if !failed {
                    if let Some(input) = st.queue.pop_front() {
                        next_launch = Some(Self::claim_seq(&mut st, input));
                    } else {
                        st.in_flight = false;
                    }
                }
            }
        }

        if !failed && next_launch.is_none() && st.outstanding == 0 && st.queue.is_empty() {
            if let Some(success) = st.upstream_success.clone() {
                self.tx.succeed(success);
            }
        }
        drop(st);

        if let Some((seq, input)) = next_launch {
            self.launch(seq, input);
        }
    }
}
