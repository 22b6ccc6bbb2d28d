//! Multi-update stream core.
//!
//! A [`channel`] call returns the two views over one shared core:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                    PRODUCER / CHANNEL SPLIT                        │
//! │                                                                    │
//! │   Producer (push)                     Channel (observe)            │
//! │     │                                    │                         │
//! │     │── update(u) ───► ring buffer ◄──── on_update(f)              │
//! │     │                  │        │        iter()                    │
//! │     │── complete(r) ──►│        └──────► replay to late            │
//! │     │    exactly once  │                 subscribers               │
//! │   (drop) ──► Err(Abandoned)                                        │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Semantics
//!
//! - **Ordered**: updates carry a cumulative index; each subscriber and each
//!   iterator observes updates from one producer in push order.
//! - **Bounded replay**: the ring keeps the most recent `capacity` updates;
//!   late subscribers and lagging iterators see at most that much history.
//!   Capacity 0 disables buffering entirely — updates reach live subscribers
//!   only and are dropped when there are none.
//! - **One terminal completion**: same exactly-once discipline as the future
//!   core; updates after completion are rejected.
//! - **Fan-out**: every subscriber receives every accepted update on its own
//!   executor; update types are `Clone` for this reason.
//!
//! State is mutated under the core lock; subscriber callbacks always run
//! outside it. One consequence: a subscriber registered concurrently with a
//! racing update may observe its replayed history and that update slightly
//! out of order across *different* executors. Per-subscriber order on a
//! single serial executor is unaffected.

mod iter;

pub use iter::ChannelIter;

use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::cancel::Cancellable;
use crate::error::{Completion, Error};
use crate::executor::Executor;
use crate::future::Future;
use crate::subscription::Subscription;

/// Replay-buffer sizing for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Keep at most this many unconsumed updates; the oldest is evicted
    /// first. Zero disables buffering (live subscribers only).
    Bounded(usize),
    /// Keep the full update history. Test and utility scenarios only.
    Unbounded,
}

impl Capacity {
    /// The default replay depth for derived channels.
    pub const DEFAULT: Self = Self::Bounded(1);
}

impl Default for Capacity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One observable event of a channel.
#[derive(Debug, Clone)]
pub enum Event<U, S> {
    /// A non-terminal update.
    Update(U),
    /// The terminal completion.
    Completion(Completion<S>),
}

/// Error returned when pushing an update fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError<U> {
    /// The channel already has its terminal completion. The update is
    /// returned.
    Completed(U),
}

impl<U> std::fmt::Display for UpdateError<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(_) => write!(f, "updating a completed channel"),
        }
    }
}

impl<U: std::fmt::Debug> std::error::Error for UpdateError<U> {}

/// Creates a new channel, returning the push and observe halves.
#[must_use]
pub fn channel<U, S>(capacity: Capacity) -> (Producer<U, S>, Channel<U, S>)
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let core = Arc::new(ChannelCore {
        state: Mutex::new(ChannelState {
            buffer: VecDeque::new(),
            next_index: 0,
            completion: None,
            subscribers: SmallVec::new(),
            producer_count: 1,
            consumer_count: 1,
            next_subscriber_id: 0,
        }),
        condvar: Condvar::new(),
        capacity,
    });
    (
        Producer {
            core: Arc::clone(&core),
        },
        Channel { core },
    )
}

struct Slot<U> {
    value: U,
    /// Cumulative index of this update.
    index: u64,
}

struct SubscriberEntry<U, S> {
    id: u64,
    executor: Executor,
    callback: Arc<dyn Fn(Event<U, S>) + Send + Sync>,
}

impl<U, S> Clone for SubscriberEntry<U, S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            executor: self.executor.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

pub(crate) struct ChannelState<U, S> {
    buffer: VecDeque<Slot<U>>,
    /// Total number of updates ever accepted; also the index assigned to the
    /// next one.
    next_index: u64,
    completion: Option<Completion<S>>,
    subscribers: SmallVec<[SubscriberEntry<U, S>; 2]>,
    producer_count: usize,
    consumer_count: usize,
    next_subscriber_id: u64,
}

/// The shared core behind a [`Producer`]/[`Channel`] pair.
pub(crate) struct ChannelCore<U, S> {
    state: Mutex<ChannelState<U, S>>,
    condvar: Condvar,
    capacity: Capacity,
}

impl<U, S> ChannelCore<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    pub(crate) fn update_from(
        &self,
        origin: Option<&Executor>,
        value: U,
    ) -> Result<(), UpdateError<U>> {
        let subscribers = {
            let mut state = self.state.lock().expect("channel lock poisoned");
            if state.completion.is_some() {
                return Err(UpdateError::Completed(value));
            }

            match self.capacity {
                Capacity::Bounded(0) => {
                    if state.subscribers.is_empty() {
                        // No buffering and nobody listening: drop on the floor.
                        return Ok(());
                    }
                }
                Capacity::Bounded(max) => {
                    if state.buffer.len() == max {
                        state.buffer.pop_front();
                    }
                    let index = state.next_index;
                    state.buffer.push_back(Slot {
                        value: value.clone(),
                        index,
                    });
                }
                Capacity::Unbounded => {
                    let index = state.next_index;
                    state.buffer.push_back(Slot {
                        value: value.clone(),
                        index,
                    });
                }
            }

            state.next_index += 1;
            state.subscribers.clone()
        };
        self.condvar.notify_all();

        for entry in subscribers {
            let value = value.clone();
            let callback = Arc::clone(&entry.callback);
            entry
                .executor
                .execute(origin, move || callback(Event::Update(value)));
        }
        Ok(())
    }

    pub(crate) fn complete_from(&self, origin: Option<&Executor>, completion: Completion<S>) -> bool {
        let subscribers = {
            let mut state = self.state.lock().expect("channel lock poisoned");
            if state.completion.is_some() {
                return false;
            }
            state.completion = Some(completion.clone());
            std::mem::take(&mut state.subscribers)
        };
        self.condvar.notify_all();

        for entry in subscribers {
            let completion = completion.clone();
            let callback = Arc::clone(&entry.callback);
            entry
                .executor
                .execute(origin, move || callback(Event::Completion(completion)));
        }
        true
    }

    pub(crate) fn fail_with(&self, error: Error) {
        let _ = self.complete_from(None, Err(error));
    }

    /// Registers a subscriber, replaying buffered updates to it first.
    ///
    /// Returns `None` if the channel already completed (the replay and the
    /// completion event are still delivered).
    fn subscribe(
        &self,
        executor: Executor,
        callback: Arc<dyn Fn(Event<U, S>) + Send + Sync>,
    ) -> Option<u64> {
        let (replay, terminal, id) = {
            let mut state = self.state.lock().expect("channel lock poisoned");
            let replay: Vec<U> = state
                .buffer
                .iter()
                .map(|slot| slot.value.clone())
                .collect();

            match &state.completion {
                Some(completion) => (replay, Some(completion.clone()), None),
                None => {
                    let id = state.next_subscriber_id;
                    state.next_subscriber_id += 1;
                    state.subscribers.push(SubscriberEntry {
                        id,
                        executor: executor.clone(),
                        callback: Arc::clone(&callback),
                    });
                    (replay, None, Some(id))
                }
            }
        };

        for value in replay {
            let callback = Arc::clone(&callback);
            executor.execute(None, move || callback(Event::Update(value)));
        }
        if let Some(completion) = terminal {
            executor.execute(None, move || callback(Event::Completion(completion)));
        }
        id
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().expect("channel lock poisoned");
        state.subscribers.retain(|entry| entry.id != id);
    }

    pub(crate) fn completion(&self) -> Option<Completion<S>> {
        self.state
            .lock()
            .expect("channel lock poisoned")
            .completion
            .clone()
    }

    fn is_observed(&self) -> bool {
        let state = self.state.lock().expect("channel lock poisoned");
        state.consumer_count > 0 || !state.subscribers.is_empty()
    }

    fn retain_consumer(&self) {
        let mut state = self.state.lock().expect("channel lock poisoned");
        state.consumer_count += 1;
    }

    fn release_consumer(&self) {
        let mut state = self.state.lock().expect("channel lock poisoned");
        state.consumer_count -= 1;
    }

    pub(crate) fn lock_view(&self) -> std::sync::MutexGuard<'_, ChannelState<U, S>> {
        self.state.lock().expect("channel lock poisoned")
    }

    pub(crate) fn wait_on<'a>(
        &self,
        guard: std::sync::MutexGuard<'a, ChannelState<U, S>>,
    ) -> std::sync::MutexGuard<'a, ChannelState<U, S>> {
        self.condvar.wait(guard).expect("channel lock poisoned")
    }
}

impl<U, S> ChannelState<U, S> {
    pub(crate) fn buffer_front_index(&self) -> Option<u64> {
        self.buffer.front().map(|slot| slot.index)
    }

    pub(crate) fn buffer_get(&self, index: u64) -> Option<&U>
    where
        U: Clone,
    {
        let front = self.buffer.front()?.index;
        let offset = usize::try_from(index.checked_sub(front)?).ok()?;
        self.buffer.get(offset).map(|slot| &slot.value)
    }

    pub(crate) fn head_index(&self) -> u64 {
        self.next_index
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

impl<U, S> Cancellable for ChannelCore<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn cancel(&self) {
        self.fail_with(Error::Cancelled);
    }
}

impl<U, S> crate::context::Dependent for ChannelCore<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn force_fail(&self, error: Error) {
        self.fail_with(error);
    }
}

/// The push view of a channel. Cloneable for concurrent producers.
pub struct Producer<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    core: Arc<ChannelCore<U, S>>,
}

impl<U, S> Producer<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    /// Pushes an update to subscribers and the replay buffer.
    pub fn update(&self, value: U) -> Result<(), UpdateError<U>> {
        self.core.update_from(None, value)
    }

    /// Like [`update`](Self::update), passing the executor the caller is
    /// running on for downstream synchronous short-circuits.
    pub fn update_from(&self, origin: Option<&Executor>, value: U) -> Result<(), UpdateError<U>> {
        self.core.update_from(origin, value)
    }

    /// Sets the terminal completion. Returns whether this call won the
    /// one-shot transition.
    pub fn complete(&self, completion: Completion<S>) -> bool {
        self.core.complete_from(None, completion)
    }

    /// Origin-carrying variant of [`complete`](Self::complete).
    pub fn complete_from(&self, origin: Option<&Executor>, completion: Completion<S>) -> bool {
        self.core.complete_from(origin, completion)
    }

    /// Completes with a success value.
    pub fn succeed(&self, value: S) -> bool {
        self.complete(Ok(value))
    }

    /// Completes with a failure.
    pub fn fail(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Returns true once the channel has its terminal completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.completion().is_some()
    }

    /// Whether anything can still observe this channel: a consumer handle,
    /// an iterator, or a registered subscriber.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.core.is_observed()
    }

    /// Another observing view of the same core.
    #[must_use]
    pub fn channel(&self) -> Channel<U, S> {
        self.core.retain_consumer();
        Channel {
            core: Arc::clone(&self.core),
        }
    }

    /// A weak cancellation registrant for this core.
    #[must_use]
    pub fn as_cancellable(&self) -> Weak<dyn Cancellable> {
        let core: Arc<dyn Cancellable> = self.core.clone();
        let weak: Weak<dyn Cancellable> = Arc::downgrade(&core);
        weak
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore<U, S>> {
        &self.core
    }
}

impl<U, S> Clone for Producer<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        {
            let mut state = self.core.state.lock().expect("channel lock poisoned");
            state.producer_count += 1;
        }
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<U, S> Drop for Producer<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn drop(&mut self) {
        let last = {
            let mut state = self.core.state.lock().expect("channel lock poisoned");
            state.producer_count -= 1;
            state.producer_count == 0
        };
        if last {
            // No-op if the terminal completion was already set.
            self.core.fail_with(Error::Abandoned);
        }
    }
}

impl<U, S> std::fmt::Debug for Producer<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

/// The observing view of a channel.
pub struct Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    core: Arc<ChannelCore<U, S>>,
}

impl<U, S> Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    /// Registers a combined update-and-completion handler.
    ///
    /// Buffered updates are replayed to the handler first; if the channel
    /// already completed, the terminal event follows the replay.
    pub fn make_handler<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: Fn(Event<U, S>) + Send + Sync + 'static,
    {
        self.subscribe_arc(executor, Arc::new(callback))
    }

    /// Registers an update-only handler.
    pub fn on_update<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: Fn(U) + Send + Sync + 'static,
    {
        self.make_handler(executor, move |event| {
            if let Event::Update(value) = event {
                callback(value);
            }
        })
    }

    /// Registers a completion-only handler.
    pub fn on_completion<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(Completion<S>) + Send + 'static,
    {
        let callback = Mutex::new(Some(callback));
        self.make_handler(executor, move |event| {
            if let Event::Completion(completion) = event {
                if let Some(callback) = callback.lock().expect("handler lock poisoned").take() {
                    callback(completion);
                }
            }
        })
    }

    /// Registers a handler that only sees the terminal success value.
    pub fn on_success<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(S) + Send + 'static,
    {
        self.on_completion(executor, move |completion| {
            if let Ok(value) = completion {
                callback(value);
            }
        })
    }

    /// Registers a handler that only sees the terminal failure.
    pub fn on_failure<F>(&self, executor: Executor, callback: F) -> Subscription
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_completion(executor, move |completion| {
            if let Err(error) = completion {
                callback(error);
            }
        })
    }

    /// Context-bound update handler.
    ///
    /// The handler is skipped once the context dies, and the registration is
    /// removed at context teardown.
    pub fn on_update_ctx<F>(&self, ctx: &crate::context::ExecutionContext, callback: F)
    where
        F: Fn(U) + Send + Sync + 'static,
    {
        let weak_ctx = ctx.downgrade();
        let subscription = self.on_update(ctx.executor(), move |value| {
            if weak_ctx.is_alive() {
                callback(value);
            }
        });
        let slot = Mutex::new(Some(subscription));
        ctx.notify_deinit(move || {
            if let Some(subscription) = slot.lock().expect("handler lock poisoned").take() {
                subscription.unsubscribe();
            }
        });
    }

    /// The terminal result, if the channel has completed.
    #[must_use]
    pub fn completion(&self) -> Option<Completion<S>> {
        self.core.completion()
    }

    /// Blocks until the terminal completion.
    ///
    /// For top-level glue and tests only; never call from inside a handler.
    #[must_use]
    pub fn wait(&self) -> Completion<S> {
        let mut state = self.core.lock_view();
        loop {
            if let Some(completion) = state.completion.clone() {
                return completion;
            }
            state = self.core.wait_on(state);
        }
    }

    /// An independent blocking iterator over this channel's updates.
    ///
    /// The iterator starts at the oldest buffered update and tracks its own
    /// cursor; it requires a nonzero capacity to observe anything.
    #[must_use]
    pub fn iter(&self) -> ChannelIter<U, S> {
        ChannelIter::new(Arc::clone(&self.core))
    }

    /// A future of the first update.
    ///
    /// Fails with the channel's error if it fails first, or with a message
    /// failure if the channel completes successfully without any update.
    #[must_use]
    pub fn first(&self) -> Future<U> {
        let (tx, rx) = crate::future::promise();
        let tx = Arc::new(tx);
        let _ = self.make_handler(Executor::immediate(), move |event| match event {
            Event::Update(value) => {
                tx.succeed(value);
            }
            Event::Completion(completion) => {
                let error = match completion {
                    Ok(_) => Error::message("channel completed without updates"),
                    Err(error) => error,
                };
                tx.fail(error);
            }
        });
        rx
    }

    /// Element-wise transform of updates; the terminal completion passes
    /// through untouched.
    pub fn map_updates<V, F>(&self, executor: Executor, f: F) -> Channel<V, S>
    where
        V: Clone + Send + 'static,
        F: Fn(U) -> V + Send + Sync + 'static,
    {
        let (tx, rx) = channel(self.core.capacity);
        let origin = executor.clone();
        let _ = self.make_handler(executor, move |event| match event {
            Event::Update(value) => match crate::error::catch_transform(&f, value) {
                Ok(mapped) => {
                    let _ = tx.update_from(Some(&origin), mapped);
                }
                Err(error) => {
                    tx.complete_from(Some(&origin), Err(error));
                }
            },
            Event::Completion(completion) => {
                tx.complete_from(Some(&origin), completion);
            }
        });
        rx
    }

    /// Keeps only updates matching the predicate.
    pub fn filter_updates<F>(&self, executor: Executor, predicate: F) -> Channel<U, S>
    where
        F: Fn(&U) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = channel(self.core.capacity);
        let origin = executor.clone();
        let _ = self.make_handler(executor, move |event| match event {
            Event::Update(value) => {
                if predicate(&value) {
                    let _ = tx.update_from(Some(&origin), value);
                }
            }
            Event::Completion(completion) => {
                tx.complete_from(Some(&origin), completion);
            }
        });
        rx
    }

    fn subscribe_arc(
        &self,
        executor: Executor,
        callback: Arc<dyn Fn(Event<U, S>) + Send + Sync>,
    ) -> Subscription {
        match self.core.subscribe(executor, callback) {
            Some(id) => {
                let core = Arc::downgrade(&self.core);
                Subscription::new(move || {
                    if let Some(core) = core.upgrade() {
                        core.unsubscribe(id);
                    }
                })
            }
            None => Subscription::spent(),
        }
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore<U, S>> {
        &self.core
    }

    /// The channel's replay capacity.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.core.capacity
    }
}

impl<U, S> Clone for Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        self.core.retain_consumer();
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<U, S> Drop for Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.core.release_consumer();
    }
}

impl<U, S> std::fmt::Debug for Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("completed", &self.completion().is_some())
            .finish_non_exhaustive()
    }
}
