//! Executors: strategies for running a callback, now or later, here or on
//! another thread.
//!
//! An [`Executor`] is a cheap-to-clone value wrapping a dispatch strategy:
//!
//! - **immediate**: run inline on the calling thread
//! - **serial**: a dedicated worker thread draining a FIFO queue
//! - **pool**: the process-wide worker pool, with a [`Priority`] lane
//! - **custom**: a user-supplied submission handler
//!
//! # Synchronous short-circuit
//!
//! [`Executor::execute`] takes an optional *origin* executor — the executor
//! the caller is currently running on. When this executor can immediately
//! execute from that origin (same serial queue, same pool, or the immediate
//! strategy), the job runs inline instead of being re-enqueued. Chained
//! inline executions are bounded by a per-thread nesting depth; past
//! [`MAX_SYNC_DEPTH`] the optimization is disabled and the job takes the
//! asynchronous path, so a chain of thousands of immediately-completing
//! transforms cannot overflow the stack.
//!
//! [`Executor::schedule`] always takes the asynchronous path, even for the
//! immediate strategy, where a hard asynchrony guarantee is needed.
//!
//! Scheduling itself cannot fail; failures travel through the completion
//! results of the futures and channels the jobs feed.

mod pool;
mod serial;

pub use pool::Priority;
pub(crate) use pool::run_job as run_contained;

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serial::SerialQueue;

/// A unit of work submitted to an executor.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Maximum depth of chained synchronous executions before the optimizer
/// forces the asynchronous path.
pub const MAX_SYNC_DEPTH: usize = 64;

thread_local! {
    static SYNC_DEPTH: Cell<usize> = const { Cell::new(0) };
}

enum Strategy {
    Immediate,
    Serial(SerialQueue),
    Pool(Priority),
    Custom(Arc<dyn Fn(Job) + Send + Sync + 'static>),
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Serial(_) => f.write_str("Serial"),
            Self::Pool(priority) => f.debug_tuple("Pool").field(priority).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// A dispatch strategy for running callbacks.
///
/// Immutable once constructed; clones share the same underlying strategy and
/// identity.
#[derive(Clone, Debug)]
pub struct Executor {
    strategy: Arc<Strategy>,
}

impl Executor {
    /// An executor that runs jobs inline on the calling thread.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            strategy: Arc::new(Strategy::Immediate),
        }
    }

    /// The process-wide worker pool at normal priority.
    #[must_use]
    pub fn pool() -> Self {
        Self::pool_with_priority(Priority::Normal)
    }

    /// The process-wide worker pool at the given priority.
    #[must_use]
    pub fn pool_with_priority(priority: Priority) -> Self {
        Self {
            strategy: Arc::new(Strategy::Pool(priority)),
        }
    }

    /// A new dedicated serial queue with its own worker thread.
    ///
    /// The worker drains pending jobs and exits once every clone of this
    /// executor has been dropped.
    #[must_use]
    pub fn serial() -> Self {
        Self {
            strategy: Arc::new(Strategy::Serial(SerialQueue::new())),
        }
    }

    /// An executor backed by a user-supplied submission handler.
    ///
    /// The handler receives each job and decides where to run it. Jobs must
    /// eventually be invoked exactly once; the handler is the asynchronous
    /// path for this strategy.
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(Box<dyn FnOnce() + Send + 'static>) + Send + Sync + 'static,
    {
        Self {
            strategy: Arc::new(Strategy::Custom(Arc::new(handler))),
        }
    }

    /// Runs `job`, inline when the optimizer allows it, otherwise through the
    /// strategy's asynchronous path.
    ///
    /// `origin` is the executor the caller is currently running on, if known;
    /// it enables the same-queue synchronous short-circuit.
    pub fn execute<F>(&self, origin: Option<&Self>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.can_execute_sync_from(origin) {
            let depth = SYNC_DEPTH.with(Cell::get);
            if depth < MAX_SYNC_DEPTH {
                SYNC_DEPTH.with(|d| d.set(depth + 1));
                pool::run_job(Box::new(job));
                SYNC_DEPTH.with(|d| d.set(depth));
                return;
            }
        }
        self.schedule(job);
    }

    /// Submits `job` through the asynchronous path unconditionally.
    ///
    /// For the immediate strategy this delegates to the shared pool, giving a
    /// hard asynchrony guarantee.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        match self.strategy.as_ref() {
            Strategy::Immediate => pool::shared().submit(Priority::Normal, job),
            Strategy::Serial(queue) => queue.enqueue(job),
            Strategy::Pool(priority) => pool::shared().submit(*priority, job),
            Strategy::Custom(handler) => handler(job),
        }
    }

    /// Schedules `job` to run on this executor after `delay`.
    pub fn execute_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let target = self.clone();
        crate::time::driver().schedule_after(delay, move || target.schedule(job));
    }

    /// Whether this executor may run a job inline for a caller arriving from
    /// `origin`.
    fn can_execute_sync_from(&self, origin: Option<&Self>) -> bool {
        match self.strategy.as_ref() {
            // Inline invocation is the immediate strategy; no origin needed.
            Strategy::Immediate => true,
            Strategy::Serial(queue) => origin.is_some_and(|o| self.same_identity(o)) && queue.is_current(),
            Strategy::Pool(_) => {
                origin.is_some_and(|o| matches!(o.strategy.as_ref(), Strategy::Pool(_)))
                    && pool::on_shared_worker()
            }
            Strategy::Custom(_) => false,
        }
    }

    /// Identity used to detect "already running on this logical queue".
    ///
    /// All pool executors share one identity regardless of priority; serial
    /// executors are identified by their queue; custom executors by their
    /// handler.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self.strategy.as_ref(), other.strategy.as_ref()) {
            (Strategy::Immediate, Strategy::Immediate)
            | (Strategy::Pool(_), Strategy::Pool(_)) => true,
            (Strategy::Serial(a), Strategy::Serial(b)) => a.same_queue(b),
            (Strategy::Custom(a), Strategy::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::pool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn immediate_runs_before_execute_returns() {
        let flag = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&flag);
        Executor::immediate().execute(None, move || {
            f.store(1, Ordering::SeqCst);
        });
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_on_immediate_is_asynchronous() {
        let flag = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        let f = Arc::clone(&flag);
        Executor::immediate().schedule(move || {
            f.store(1, Ordering::SeqCst);
            let _ = tx.send(());
        });
        // Scheduled work lands on the pool; it may or may not have run yet,
        // but it must complete without further action from this thread.
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nesting_depth_caps_inline_recursion() {
        fn chain(executor: Executor, remaining: usize, max_seen: Arc<AtomicUsize>, done: std::sync::mpsc::Sender<()>) {
            let depth = SYNC_DEPTH.with(Cell::get);
            max_seen.fetch_max(depth, Ordering::SeqCst);
            if remaining == 0 {
                let _ = done.send(());
                return;
            }
            let inner = executor.clone();
            executor.execute(None, move || chain(inner, remaining - 1, max_seen, done));
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let max_seen = Arc::new(AtomicUsize::new(0));
        chain(Executor::immediate(), 500, Arc::clone(&max_seen), tx);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= MAX_SYNC_DEPTH);
    }

    #[test]
    fn serial_same_queue_runs_inline_from_worker() {
        let executor = Executor::serial();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let (tx, rx) = std::sync::mpsc::channel();
        let exec = executor.clone();
        let obs = Arc::clone(&observed);
        executor.schedule(move || {
            obs.lock().unwrap().push("outer-start");
            let inner_obs = Arc::clone(&obs);
            let origin = exec.clone();
            exec.execute(Some(&origin), move || {
                inner_obs.lock().unwrap().push("inner");
            });
            obs.lock().unwrap().push("outer-end");
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Inline execution interleaves the inner job before outer-end.
        assert_eq!(
            *observed.lock().unwrap(),
            vec!["outer-start", "inner", "outer-end"]
        );
    }

    #[test]
    fn serial_without_origin_stays_asynchronous() {
        let executor = Executor::serial();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let (tx, rx) = std::sync::mpsc::channel();
        let exec = executor.clone();
        let obs = Arc::clone(&observed);
        executor.schedule(move || {
            obs.lock().unwrap().push("outer-start");
            let inner_obs = Arc::clone(&obs);
            let inner_tx = tx.clone();
            exec.execute(None, move || {
                inner_obs.lock().unwrap().push("inner");
                let _ = inner_tx.send(());
            });
            obs.lock().unwrap().push("outer-end");
        });

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            *observed.lock().unwrap(),
            vec!["outer-start", "outer-end", "inner"]
        );
    }

    #[test]
    fn custom_handler_receives_jobs() {
        let submitted = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&submitted);
        let executor = Executor::custom(move |job| {
            s.fetch_add(1, Ordering::SeqCst);
            job();
        });

        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        executor.execute(None, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(submitted.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn execute_after_respects_delay() {
        let (tx, rx) = std::sync::mpsc::channel();
        let start = Instant::now();
        Executor::pool().execute_after(Duration::from_millis(50), move || {
            let _ = tx.send(Instant::now());
        });
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(45));
    }

    #[test]
    fn same_identity_tracks_logical_queues() {
        let a = Executor::serial();
        let b = a.clone();
        let c = Executor::serial();
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
        // Every pool executor denotes the same shared pool.
        assert!(Executor::pool().same_identity(&Executor::pool_with_priority(Priority::High)));
        assert!(!Executor::pool().same_identity(&a));
    }
}
