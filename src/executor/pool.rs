//! Shared worker pool for asynchronous job execution.
//!
//! The pool manages a set of OS threads fed by three priority lanes. Jobs are
//! fire-and-forget closures; completion is observed through the futures and
//! channels the jobs complete, never through the pool itself.
//!
//! ## Thread Lifecycle
//!
//! Threads are spawned lazily up to `max_threads`. When idle beyond a
//! threshold, threads above `min_threads` are retired. This balances
//! responsiveness with resource usage.
//!
//! ## Panics
//!
//! A panicking job is caught and logged by the worker; it never takes the
//! worker thread down and never unwinds into unrelated jobs.

use crossbeam_queue::SegQueue;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use super::Job;

/// Default idle timeout before retiring excess threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatch priority for jobs submitted to the shared pool.
///
/// Higher priorities are drained first when workers pick up new jobs. Within a
/// single lane, jobs run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Latency-sensitive work.
    High,
    /// The default lane.
    #[default]
    Normal,
    /// Bulk or housekeeping work.
    Low,
}

impl Priority {
    const fn lane(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

thread_local! {
    static POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// The process-wide pool backing [`Executor::pool`](super::Executor::pool).
///
/// Initialized once on first use, read-only thereafter; it owns no resources
/// beyond its worker threads and is never torn down.
pub(crate) fn shared() -> &'static WorkerPool {
    static SHARED: OnceLock<WorkerPool> = OnceLock::new();
    SHARED.get_or_init(|| {
        let max = thread::available_parallelism().map_or(4, |n| n.get());
        WorkerPool::new(1, max.max(2))
    })
}

/// Returns true if the calling thread is a worker of the shared pool.
pub(crate) fn on_shared_worker() -> bool {
    POOL_WORKER.with(Cell::get)
}

/// A pool of worker threads draining prioritized job lanes.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_jobs",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

struct PoolInner {
    /// Minimum number of threads to keep alive.
    min_threads: usize,
    /// Maximum number of threads allowed.
    max_threads: usize,
    /// Current number of live worker threads.
    active_threads: AtomicUsize,
    /// Number of threads currently executing a job.
    busy_threads: AtomicUsize,
    /// Jobs queued across all lanes.
    pending_count: AtomicUsize,
    /// One injector queue per priority lane.
    lanes: [SegQueue<Job>; 3],
    /// Shutdown flag (used by locally constructed pools in tests).
    shutdown: AtomicBool,
    /// Condition variable for worker parking.
    condvar: Condvar,
    /// Mutex paired with the condvar.
    mutex: Mutex<()>,
    /// Idle timeout for excess threads.
    idle_timeout: Duration,
}

impl WorkerPool {
    /// Creates a pool with the given thread limits.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    pub(crate) fn new(min_threads: usize, max_threads: usize) -> Self {
        assert!(max_threads > 0, "max_threads must be at least 1");
        let max_threads = max_threads.max(min_threads);

        let inner = Arc::new(PoolInner {
            min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            lanes: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        });

        let pool = Self { inner };
        for _ in 0..min_threads {
            spawn_worker(&pool.inner);
        }
        pool
    }

    /// Submits a job to the given priority lane.
    pub(crate) fn submit(&self, priority: Priority, job: Job) {
        self.inner.lanes[priority.lane()].push(job);
        self.inner.pending_count.fetch_add(1, Ordering::Relaxed);

        maybe_spawn_worker(&self.inner);
        let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
        self.inner.condvar.notify_one();
    }

    /// Number of live worker threads.
    #[cfg(test)]
    pub(crate) fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Initiates shutdown and waits for workers to drain, up to `timeout`.
    ///
    /// Only meaningful for locally constructed pools; the shared pool lives
    /// for the whole process.
    #[cfg(test)]
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
            self.inner.condvar.notify_all();
        }

        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock().expect("pool lock poisoned");
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }
        true
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let inner = Arc::clone(inner);
    let id = inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let worker_inner = Arc::clone(&inner);
    let spawned = thread::Builder::new()
        .name(format!("conflux-pool-{id}"))
        .spawn(move || {
            POOL_WORKER.with(|flag| flag.set(true));
            tracing::trace!(worker = id, "pool worker started");
            worker_loop(&worker_inner);
            tracing::trace!(worker = id, "pool worker retired");
            worker_inner.active_threads.fetch_sub(1, Ordering::Relaxed);
        });
    if spawned.is_err() {
        inner.active_threads.fetch_sub(1, Ordering::Relaxed);
    }
}

fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Relaxed);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.pending_count.load(Ordering::Relaxed);

    // Scale up only when every live worker is occupied and work is waiting.
    if active < inner.max_threads && busy >= active && pending > 0 {
        spawn_worker(inner);
    }
}

fn pop_job(inner: &PoolInner) -> Option<Job> {
    inner.lanes.iter().find_map(SegQueue::pop)
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = pop_job(inner) {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            run_job(job);
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let active = inner.active_threads.load(Ordering::Relaxed);
        if active > inner.min_threads {
            let guard = inner.mutex.lock().expect("pool lock poisoned");
            let result = inner
                .condvar
                .wait_timeout(guard, inner.idle_timeout)
                .expect("pool lock poisoned");
            drop(result.0);
            if result.1.timed_out()
                && lanes_empty(inner)
                && inner.active_threads.load(Ordering::Relaxed) > inner.min_threads
            {
                break;
            }
        } else {
            let guard = inner.mutex.lock().expect("pool lock poisoned");
            let _guard = inner.condvar.wait(guard).expect("pool lock poisoned");
        }
    }
}

fn lanes_empty(inner: &PoolInner) -> bool {
    inner.lanes.iter().all(SegQueue::is_empty)
}

/// Runs a job, containing any panic inside it.
///
/// Shared by the pool workers, the serial queue workers, the timer thread,
/// and inline execution, so a panicking job can never unwind through
/// dispatch machinery.
pub(crate) fn run_job(job: Job) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
    if result.is_err() {
        tracing::error!("job panicked; panic contained by the executor");
    }
}
