//! Dedicated serial queue: one worker thread draining jobs in FIFO order.
//!
//! A serial queue provides the "same logical queue" identity used by the
//! synchronous-execution optimizer: a job already running on the queue's
//! worker thread may run follow-up work inline instead of re-enqueueing it,
//! because inline execution cannot reorder against the queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use super::Job;
use super::pool::run_job;

/// Shared state between the queue handle(s) and the worker thread.
pub(crate) struct SerialQueue {
    shared: Arc<SerialShared>,
}

struct SerialShared {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: AtomicBool,
    /// Identity of the worker thread, set once at startup.
    worker: std::sync::OnceLock<ThreadId>,
}

impl SerialQueue {
    /// Creates the queue and spawns its worker eagerly.
    pub(crate) fn new() -> Self {
        let shared = Arc::new(SerialShared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker: std::sync::OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("conflux-serial".to_string())
            .spawn(move || {
                let _ = worker_shared.worker.set(thread::current().id());
                worker_loop(&worker_shared);
            })
            .expect("failed to spawn serial queue worker");

        Self { shared }
    }

    /// Appends a job to the queue.
    pub(crate) fn enqueue(&self, job: Job) {
        let mut queue = self.shared.queue.lock();
        queue.push_back(job);
        drop(queue);
        self.shared.condvar.notify_one();
    }

    /// Returns true if the calling thread is this queue's worker.
    pub(crate) fn is_current(&self) -> bool {
        self.shared.worker.get().copied() == Some(thread::current().id())
    }

    /// Identity comparison for the sync-execution optimizer.
    pub(crate) fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Pending jobs are drained before the worker exits.
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.condvar.notify_one();
    }
}

fn worker_loop(shared: &SerialShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.condvar.wait(&mut queue);
            }
        };

        match job {
            Some(job) => run_job(job),
            None => {
                tracing::trace!("serial queue worker exiting");
                return;
            }
        }
    }
}
