//! Gate-controlled buffering.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, channel};
use crate::executor::Executor;

struct SuspendState<U> {
    suspended: bool,
    buffer: VecDeque<U>,
}

/// Gates a channel behind a boolean control stream.
///
/// A gate update of `true` suspends the output: source updates are buffered
/// up to `buffer_limit`, oldest dropped first (a limit of 0 drops them
/// outright). A gate update of `false` resumes the output and flushes the
/// buffer in order.
///
/// The source's terminal completion is forwarded immediately, even while
/// suspended; whatever is still buffered at that point is discarded. A
/// failing gate fails the output; a gate that completes successfully simply
/// freezes the current state.
#[must_use]
pub fn suspendable<U, S, G>(
    source: &Channel<U, S>,
    gate: &Channel<bool, G>,
    initially_suspended: bool,
    buffer_limit: usize,
) -> Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
    G: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let state = Arc::new(Mutex::new(SuspendState {
        suspended: initially_suspended,
        buffer: VecDeque::new(),
    }));

    // Emissions hold the gate lock: a resume-flush and a live update racing
    // on different threads must not interleave out of order downstream.
    {
        let tx = tx.clone();
        let state = Arc::clone(&state);
        let _ = source.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                let mut st = state.lock().expect("suspendable lock poisoned");
                if st.suspended {
                    if buffer_limit > 0 {
                        if st.buffer.len() == buffer_limit {
                            st.buffer.pop_front();
                        }
                        st.buffer.push_back(value);
                    }
                } else {
                    let _ = tx.update(value);
                }
            }
            Event::Completion(completion) => {
                tx.complete(completion);
            }
        });
    }
    {
        let _ = gate.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(suspend) => {
                let mut st = state.lock().expect("suspendable lock poisoned");
                let resumed = st.suspended && !suspend;
                st.suspended = suspend;
                if resumed {
                    for value in st.buffer.drain(..) {
                        let _ = tx.update(value);
                    }
                }
            }
            Event::Completion(Err(error)) => {
                tx.fail(error);
            }
            Event::Completion(Ok(_)) => {
                // Gate frozen in its last state.
            }
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collect<U, S>(out: &Channel<U, S>) -> Arc<StdMutex<Vec<U>>>
    where
        U: Clone + Send + 'static,
        S: Clone + Send + 'static,
    {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _ = out.on_update(Executor::immediate(), move |v| {
            s.lock().unwrap().push(v);
        });
        seen
    }

    #[test]
    fn buffers_while_suspended_and_flushes_in_order() {
        let (tx, rx) = channel::<i32, ()>(Capacity::Unbounded);
        let (gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
        let out = suspendable(&rx, &gate_rx, true, 8);
        let seen = collect(&out);

        tx.update(1).unwrap();
        tx.update(2).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        gate_tx.update(false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        tx.update(3).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn oldest_dropped_beyond_buffer_limit() {
        let (tx, rx) = channel::<i32, ()>(Capacity::Unbounded);
        let (gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
        let out = suspendable(&rx, &gate_rx, true, 2);
        let seen = collect(&out);

        for i in 1..=5 {
            tx.update(i).unwrap();
        }
        gate_tx.update(false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
    }

    #[test]
    fn suspending_again_stops_flow() {
        let (tx, rx) = channel::<i32, ()>(Capacity::Unbounded);
        let (gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
        let out = suspendable(&rx, &gate_rx, false, 4);
        let seen = collect(&out);

        tx.update(1).unwrap();
        gate_tx.update(true).unwrap();
        tx.update(2).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        gate_tx.update(false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn completion_passes_through_while_suspended() {
        let (tx, rx) = channel::<i32, &'static str>(Capacity::Unbounded);
        let (_gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
        let out = suspendable(&rx, &gate_rx, true, 4);

        tx.update(1).unwrap();
        tx.succeed("done");
        assert_eq!(out.completion().and_then(Result::ok), Some("done"));
    }

    #[test]
    fn failing_gate_fails_output() {
        let (_tx, rx) = channel::<i32, ()>(Capacity::Unbounded);
        let (gate_tx, gate_rx) = channel::<bool, ()>(Capacity::Bounded(0));
        let out = suspendable(&rx, &gate_rx, false, 4);

        gate_tx.fail(crate::Error::message("gate broke"));
        assert!(matches!(
            out.completion(),
            Some(Err(crate::Error::Message(_)))
        ));
    }
}
