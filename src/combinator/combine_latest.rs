//! N-ary latest-value join.

use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, channel};
use crate::executor::Executor;

struct LatestState<U, S> {
    latest: Vec<Option<U>>,
    successes: Vec<Option<S>>,
    remaining: usize,
}

/// Combines the most recent value of every source.
///
/// Nothing is emitted until every source has produced at least one update;
/// from then on, each update from any single source emits one combined
/// vector (in source order) built from the other sources' cached values.
/// Success requires every source to succeed; the first failure fails the
/// combined channel immediately.
///
/// An empty source list completes immediately with an empty success vector.
#[must_use]
pub fn combine_latest<U, S>(sources: Vec<Channel<U, S>>) -> Channel<Vec<U>, Vec<S>>
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

    let state = Arc::new(Mutex::new(LatestState {
        latest: vec![None; count],
        successes: vec![None; count],
        remaining: count,
    }));

    for (index, source) in sources.into_iter().enumerate() {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        // Emission happens under the state lock so combined vectors reach
        // the downstream in cache-transition order.
        let _ = source.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.latest[index] = Some(value);
                if guard.latest.iter().all(Option::is_some) {
                    let combined: Vec<U> = guard
                        .latest
                        .iter()
                        .map(|slot| slot.clone().expect("slot filled"))
                        .collect();
                    let _ = tx.update(combined);
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.successes[index] = Some(success);
                guard.remaining -= 1;
                if guard.remaining == 0 {
                    let combined: Vec<S> = guard
                        .successes
                        .iter()
                        .map(|slot| slot.clone().expect("all sources succeeded"))
                        .collect();
                    tx.succeed(combined);
                }
            }
        });
    }

    rx
}

struct Latest2State<A, B, SA, SB> {
    left: Option<A>,
    right: Option<B>,
    success_a: Option<SA>,
    success_b: Option<SB>,
}

/// Heterogeneous two-source [`combine_latest`].
#[must_use]
pub fn combine_latest2<A, B, SA, SB>(
    a: &Channel<A, SA>,
    b: &Channel<B, SB>,
) -> Channel<(A, B), (SA, SB)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    SA: Clone + Send + 'static,
    SB: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let state = Arc::new(Mutex::new(Latest2State::<A, B, SA, SB> {
        left: None,
        right: None,
        success_a: None,
        success_b: None,
    }));

    {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        let _ = a.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.left = Some(value);
                if let (Some(l), Some(r)) = (&guard.left, &guard.right) {
                    let combined = (l.clone(), r.clone());
                    let _ = tx.update(combined);
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.success_a = Some(success);
                if let (Some(sa), Some(sb)) = (&guard.success_a, &guard.success_b) {
                    let combined = (sa.clone(), sb.clone());
                    tx.succeed(combined);
                }
            }
        });
    }
    {
        let state = Arc::clone(&state);
        let _ = b.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.right = Some(value);
                if let (Some(l), Some(r)) = (&guard.left, &guard.right) {
                    let combined = (l.clone(), r.clone());
                    let _ = tx.update(combined);
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let mut guard = state.lock().expect("combine_latest lock poisoned");
                guard.success_b = Some(success);
                if let (Some(sa), Some(sb)) = (&guard.success_a, &guard.success_b) {
                    let combined = (sa.clone(), sb.clone());
                    tx.succeed(combined);
                }
            }
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex as StdMutex;

    fn collect<U, S>(source: &Channel<U, S>) -> Arc<StdMutex<Vec<U>>>
    where
        U: Clone + Send + 'static,
        S: Clone + Send + 'static,
    {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = source.on_update(Executor::immediate(), move |v| {
            s.lock().unwrap().push(v);
        });
        seen
    }

    #[test]
    fn silent_until_every_source_has_emitted() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_c, rx_c) = channel::<i32, ()>(Capacity::Unbounded);
        let combined = combine_latest(vec![rx_a, rx_b, rx_c]);
        let seen = collect(&combined);

        tx_a.update(1).unwrap();
        tx_b.update(2).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        tx_c.update(3).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn each_subsequent_update_emits_once() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
        let combined = combine_latest(vec![rx_a, rx_b]);
        let seen = collect(&combined);

        tx_a.update(1).unwrap();
        tx_b.update(10).unwrap();
        tx_a.update(2).unwrap();
        tx_b.update(20).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![1, 10], vec![2, 10], vec![2, 20]]
        );
    }

    #[test]
    fn all_successes_combine_in_source_order() {
        let (tx_a, rx_a) = channel::<i32, i32>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<i32, i32>(Capacity::Unbounded);
        let combined = combine_latest(vec![rx_a, rx_b]);

        tx_b.succeed(2);
        tx_a.succeed(1);
        assert_eq!(
            combined.completion().and_then(Result::ok),
            Some(vec![1, 2])
        );
    }

    #[test]
    fn one_failure_fails_the_join() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (_tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
        let combined = combine_latest(vec![rx_a, rx_b]);

        tx_a.fail(Error::Cancelled);
        assert!(matches!(combined.completion(), Some(Err(Error::Cancelled))));
    }

    #[test]
    fn heterogeneous_pair_combines_latest() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<char, ()>(Capacity::Unbounded);
        let combined = combine_latest2(&rx_a, &rx_b);
        let seen = collect(&combined);

        tx_a.update(1).unwrap();
        tx_b.update('a').unwrap();
        tx_a.update(2).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 'a'), (2, 'a')]);
    }
}
