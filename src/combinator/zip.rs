//! Pairwise join of two channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, channel};
use crate::executor::Executor;

struct ZipState<A, B, SA, SB> {
    queue_a: VecDeque<A>,
    queue_b: VecDeque<B>,
    success_a: Option<SA>,
    success_b: Option<SB>,
}

/// Pairs updates from two channels in arrival order.
///
/// Unpaired updates are buffered per side; a pair is emitted as soon as both
/// sides have at least one buffered value, consuming one from each. A failing
/// side fails the pair channel immediately; when both sides succeed the
/// combined `(SA, SB)` success is forwarded (by construction every pairable
/// update has already been emitted by then).
#[must_use]
pub fn zip<A, B, SA, SB>(a: &Channel<A, SA>, b: &Channel<B, SB>) -> Channel<(A, B), (SA, SB)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    SA: Clone + Send + 'static,
    SB: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let state = Arc::new(Mutex::new(ZipState::<A, B, SA, SB> {
        queue_a: VecDeque::new(),
        queue_b: VecDeque::new(),
        success_a: None,
        success_b: None,
    }));

    // Emissions happen while the pairing lock is held, so the downstream
    // sees pairs in pairing order even when both sides push concurrently.
    {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        let _ = a.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let mut guard = state.lock().expect("zip lock poisoned");
                match guard.queue_b.pop_front() {
                    Some(right) => {
                        let _ = tx.update((value, right));
                    }
                    None => guard.queue_a.push_back(value),
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let mut guard = state.lock().expect("zip lock poisoned");
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
                let mut guard = state.lock().expect("zip lock poisoned");
                match guard.queue_a.pop_front() {
                    Some(left) => {
                        let _ = tx.update((left, value));
                    }
                    None => guard.queue_b.push_back(value),
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(success)) => {
                let mut guard = state.lock().expect("zip lock poisoned");
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

    fn collect<A, B, S>(zipped: &Channel<(A, B), S>) -> Arc<StdMutex<Vec<(A, B)>>>
    where
        A: Clone + Send + 'static,
        B: Clone + Send + 'static,
        S: Clone + Send + 'static,
    {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = zipped.on_update(Executor::immediate(), move |pair| {
            s.lock().unwrap().push(pair);
        });
        seen
    }

    #[test]
    fn pairs_in_order_regardless_of_interleaving() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<char, ()>(Capacity::Unbounded);
        let zipped = zip(&rx_a, &rx_b);
        let seen = collect(&zipped);

        tx_a.update(1).unwrap();
        tx_a.update(2).unwrap();
        tx_b.update('x').unwrap();
        tx_a.update(3).unwrap();
        tx_b.update('y').unwrap();
        tx_b.update('z').unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 'x'), (2, 'y'), (3, 'z')]
        );
    }

    #[test]
    fn no_extra_pairs_are_invented() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
        let zipped = zip(&rx_a, &rx_b);
        let seen = collect(&zipped);

        tx_a.update(1).unwrap();
        tx_a.update(2).unwrap();
        tx_a.update(3).unwrap();
        tx_b.update(10).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 10)]);
    }

    #[test]
    fn dual_success_combines() {
        let (tx_a, rx_a) = channel::<i32, &'static str>(Capacity::Unbounded);
        let (tx_b, rx_b) = channel::<i32, i32>(Capacity::Unbounded);
        let zipped = zip(&rx_a, &rx_b);

        tx_a.succeed("left");
        assert!(zipped.completion().is_none());
        tx_b.succeed(2);
        assert_eq!(
            zipped.completion().and_then(Result::ok),
            Some(("left", 2))
        );
    }

    #[test]
    fn one_failure_fails_immediately() {
        let (tx_a, rx_a) = channel::<i32, ()>(Capacity::Unbounded);
        let (_tx_b, rx_b) = channel::<i32, ()>(Capacity::Unbounded);
        let zipped = zip(&rx_a, &rx_b);

        tx_a.fail(Error::Cancelled);
        assert!(matches!(zipped.completion(), Some(Err(Error::Cancelled))));
    }
}
