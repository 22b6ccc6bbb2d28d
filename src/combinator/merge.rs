//! Arrival-order interleaving of channels.

use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, channel};
use crate::executor::Executor;

/// A value from one of two differently-typed merged channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    /// A value from the first channel.
    Left(L),
    /// A value from the second channel.
    Right(R),
}

struct MergeState<S> {
    successes: Vec<Option<S>>,
    remaining: usize,
}

/// Interleaves updates from every source as they arrive.
///
/// Updates from one source keep their relative order; interleaving across
/// sources reflects arrival timing. The merged channel succeeds with every
/// source's success (in source order) only once all sources have completed
/// successfully; a single failing source fails it immediately.
///
/// An empty source list completes immediately with an empty success vector.
#[must_use]
pub fn merge<U, S>(sources: Vec<Channel<U, S>>) -> Channel<U, Vec<S>>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let count = sources.len();
    if count == 0 {
        tx.succeed(Vec::new());
        return rx;
    }

    let state = Arc::new(Mutex::new(MergeState {
        successes: vec![None; count],
        remaining: count,
    }));

    for (index, source) in sources.into_iter().enumerate() {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        let _ = source.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let _ = tx.update(value);
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let combined = {
                    let mut guard = state.lock().expect("merge lock poisoned");
                    guard.successes[index] = Some(success);
                    guard.remaining -= 1;
                    if guard.remaining == 0 {
                        Some(
                            guard
                                .successes
                                .iter()
                                .map(|slot| slot.clone().expect("all sources succeeded"))
                                .collect::<Vec<_>>(),
                        )
                    } else {
                        None
                    }
                };
                if let Some(combined) = combined {
                    tx.succeed(combined);
                }
            }
        });
    }

    rx
}

/// Two-source merge of one update type with heterogeneous success types.
#[must_use]
pub fn merge2<U, SA, SB>(a: &Channel<U, SA>, b: &Channel<U, SB>) -> Channel<U, (SA, SB)>
where
    U: Clone + Send + 'static,
    SA: Clone + Send + 'static,
    SB: Clone + Send + 'static,
{
    merge_map(a, b, |value| value, |value| value)
}

/// Merges two channels of different update types, tagging each update with
/// its side.
#[must_use]
pub fn merge_either<A, B, SA, SB>(
    a: &Channel<A, SA>,
    b: &Channel<B, SB>,
) -> Channel<Either<A, B>, (SA, SB)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    SA: Clone + Send + 'static,
    SB: Clone + Send + 'static,
{
    merge_map(a, b, Either::Left, Either::Right)
}

struct Merge2State<SA, SB> {
    success_a: Option<SA>,
    success_b: Option<SB>,
}

fn merge_map<A, B, U, SA, SB, FA, FB>(
    a: &Channel<A, SA>,
    b: &Channel<B, SB>,
    wrap_a: FA,
    wrap_b: FB,
) -> Channel<U, (SA, SB)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    U: Clone + Send + 'static,
    SA: Clone + Send + 'static,
    SB: Clone + Send + 'static,
    FA: Fn(A) -> U + Send + Sync + 'static,
    FB: Fn(B) -> U + Send + Sync + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let state = Arc::new(Mutex::new(Merge2State::<SA, SB> {
        success_a: None,
        success_b: None,
    }));

    {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        let _ = a.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let _ = tx.update(wrap_a(value));
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let combined = {
                    let mut guard = state.lock().expect("merge lock poisoned");
                    guard.success_a = Some(success);
                    match (&guard.success_a, &guard.success_b) {
                        (Some(sa), Some(sb)) => Some((sa.clone(), sb.clone())),
                        _ => None,
                    }
                };
                if let Some(combined) = combined {
                    tx.succeed(combined);
                }
            }
        });
    }
    {
        let state = Arc::clone(&state);
        let _ = b.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let _ = tx.update(wrap_b(value));
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let combined = {
                    let mut guard = state.lock().expect("merge lock poisoned");
                    guard.success_b = Some(success);
                    match (&guard.success_a, &guard.success_b) {
                        (Some(sa), Some(sb)) => Some((sa.clone(), sb.clone())),
                        _ => None,
                    }
                };
                if let Some(combined) = combined {
                    tx.succeed(combined);
                }
            }
        });
    }

    rx
}
