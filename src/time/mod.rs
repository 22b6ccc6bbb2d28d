//! Timer driver: delayed execution and interval channels.
//!
//! A single process-wide driver thread owns a deadline heap. Expired entries
//! are popped under the driver lock and invoked outside it; entries are
//! closures that re-submit the real job to its destination executor, so the
//! driver thread never runs user code for longer than a submission.
//!
//! Used by [`Executor::execute_after`](crate::Executor::execute_after),
//! [`future::after`](crate::future::after), the debounce/throttle windows,
//! and [`interval`].

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{Capacity, Channel, Producer};
use crate::executor::Job;

/// One scheduled callback.
struct Entry {
    deadline: Instant,
    /// Tie-break so equal deadlines fire in submission order.
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline
        // on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DriverState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// The deadline-heap timer driver.
pub(crate) struct TimerDriver {
    state: Mutex<DriverState>,
    condvar: Condvar,
}

impl TimerDriver {
    fn new() -> Self {
        Self {
            state: Mutex::new(DriverState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Schedules `job` to run after `delay`.
    pub(crate) fn schedule_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, job);
    }

    /// Schedules `job` to run at `deadline`.
    pub(crate) fn schedule_at<F>(&self, deadline: Instant, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline,
            seq,
            job: Box::new(job),
        });
        drop(state);
        self.condvar.notify_one();
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while state
                .heap
                .peek()
                .is_some_and(|entry| entry.deadline <= now)
            {
                due.push(state.heap.pop().expect("peeked entry"));
            }

            if !due.is_empty() {
                drop(state);
                for entry in due {
                    crate::executor::run_contained(entry.job);
                }
                state = self.state.lock();
                continue;
            }

            match state.heap.peek().map(|entry| entry.deadline) {
                Some(deadline) => {
                    let _ = self.condvar.wait_until(&mut state, deadline);
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }
}

/// The process-wide driver, spawned on first use.
pub(crate) fn driver() -> &'static TimerDriver {
    static DRIVER: OnceLock<&'static TimerDriver> = OnceLock::new();
    *DRIVER.get_or_init(|| {
        let driver: &'static TimerDriver = Box::leak(Box::new(TimerDriver::new()));
        thread::Builder::new()
            .name("conflux-timer".to_string())
            .spawn(move || driver.run())
            .expect("failed to spawn timer thread");
        driver
    })
}

/// A channel emitting the tick count (starting at 0) every `period`.
///
/// The channel is unbuffered (capacity 0): ticks reach live subscribers only,
/// the right discipline for a high-frequency live stream. Ticking stops when
/// the channel becomes unobservable (every consumer handle dropped and no
/// subscriber registered) or is completed externally.
#[must_use]
pub fn interval(period: Duration) -> Channel<u64, ()> {
    let (producer, channel) = crate::channel::channel(Capacity::Bounded(0));
    arm(producer, period, 0);
    channel
}

fn arm(producer: Producer<u64, ()>, period: Duration, tick: u64) {
    driver().schedule_after(period, move || {
        if !producer.is_observed() {
            tracing::trace!(tick, "interval channel unobserved; stopping");
            return;
        }
        if producer.update(tick).is_err() {
            return;
        }
        arm(producer, period, tick + 1);
    });
}
