//! Time-windowed emission.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::channel::{Capacity, Channel, Event, Producer, channel};
use crate::error::Completion;
use crate::executor::Executor;

struct DebounceState<U> {
    pending: Option<U>,
    /// Bumped on every update; a timer fires only if its generation is still
    /// current when it lands.
    generation: u64,
    done: bool,
}

struct DebounceShared<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    state: Mutex<DebounceState<U>>,
    tx: Producer<U, S>,
}

/// Emits an update only after `interval` of quiescence.
///
/// Every incoming update replaces the pending value and restarts the window
/// timer. The terminal completion is forwarded immediately when it occurs; a
/// pending unfired update is dropped at that point.
#[must_use]
pub fn debounce<U, S>(source: &Channel<U, S>, interval: Duration) -> Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let shared = Arc::new(DebounceShared {
        state: Mutex::new(DebounceState {
            pending: None,
            generation: 0,
            done: false,
        }),
        tx,
    });

    let handler_shared = Arc::clone(&shared);
    let _ = source.make_handler(Executor::immediate(), move |event| match event {
        Event::Update(value) => {
            let generation = {
                let mut st = handler_shared.state.lock().expect("debounce lock poisoned");
                st.pending = Some(value);
                st.generation += 1;
                st.generation
            };
            let fire_shared = Arc::clone(&handler_shared);
            crate::time::driver().schedule_after(interval, move || {
                fire_shared.fire(generation);
            });
        }
        Event::Completion(completion) => {
            handler_shared.finish(completion);
        }
    });

    rx
}

impl<U, S> DebounceShared<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn fire(&self, generation: u64) {
        let value = {
            let mut st = self.state.lock().expect("debounce lock poisoned");
            if st.done || st.generation != generation {
                None
            } else {
                st.pending.take()
            }
        };
        if let Some(value) = value {
            let _ = self.tx.update(value);
        }
    }

    fn finish(&self, completion: Completion<S>) {
        {
            let mut st = self.state.lock().expect("debounce lock poisoned");
            st.done = true;
            st.pending = None;
        }
        self.tx.complete(completion);
    }
}

struct ThrottleState {
    last_emit: Option<Instant>,
}

/// Leading-edge rate limiting: at most one update per `interval`.
///
/// The first update of a window is forwarded immediately; updates arriving
/// inside the window are dropped. The terminal completion passes through
/// untouched.
#[must_use]
pub fn throttle<U, S>(source: &Channel<U, S>, interval: Duration) -> Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    let state = Arc::new(Mutex::new(ThrottleState { last_emit: None }));

    let _ = source.make_handler(Executor::immediate(), move |event| match event {
        Event::Update(value) => {
            let emit = {
                let mut st = state.lock().expect("throttle lock poisoned");
                let now = Instant::now();
                let open = st
                    .last_emit
                    .is_none_or(|last| now.duration_since(last) >= interval);
                if open {
                    st.last_emit = Some(now);
                }
                open
            };
            if emit {
                let _ = tx.update(value);
            }
        }
        Event::Completion(completion) => {
            tx.complete(completion);
        }
    });

    rx
}
