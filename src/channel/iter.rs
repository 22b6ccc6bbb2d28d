//! Blocking pull iteration over a channel.

use std::sync::Arc;

use crate::error::Completion;

use super::ChannelCore;

/// An independent blocking iterator over a channel's updates.
///
/// Each iterator holds its own cursor into the cumulative update sequence,
/// starting at the oldest buffered update. When it catches up to the head it
/// blocks until a new update or the terminal completion arrives; the
/// iteration ends at completion.
///
/// If the ring buffer overwrites entries faster than this iterator consumes
/// them, the cursor skips forward; the number of skipped updates is reported
/// by [`missed`](Self::missed).
pub struct ChannelIter<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    core: Arc<ChannelCore<U, S>>,
    cursor: u64,
    missed: u64,
    done: bool,
}

impl<U, S> ChannelIter<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    pub(crate) fn new(core: Arc<ChannelCore<U, S>>) -> Self {
        core.retain_consumer();
        let cursor = {
            let state = core.lock_view();
            state.buffer_front_index().unwrap_or_else(|| state.head_index())
        };
        Self {
            core,
            cursor,
            missed: 0,
            done: false,
        }
    }

    /// Number of updates this iterator skipped because the ring buffer
    /// overwrote them before they were consumed.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// The terminal result, once iteration has ended.
    #[must_use]
    pub fn completion(&self) -> Option<Completion<S>> {
        self.core.completion()
    }
}

impl<U, S> Iterator for ChannelIter<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    type Item = U;

    fn next(&mut self) -> Option<U> {
        if self.done {
            return None;
        }

        let mut state = self.core.lock_view();
        loop {
            // Catch up past anything the ring has already evicted.
            let oldest = state.buffer_front_index().unwrap_or_else(|| state.head_index());
            if self.cursor < oldest {
                self.missed += oldest - self.cursor;
                self.cursor = oldest;
            }

            if self.cursor < state.head_index() {
                let value = state
                    .buffer_get(self.cursor)
                    .cloned()
                    .expect("cursor within buffered range");
                self.cursor += 1;
                return Some(value);
            }

            if state.is_complete() {
                self.done = true;
                return None;
            }

            state = self.core.wait_on(state);
        }
    }
}

impl<U, S> Drop for ChannelIter<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.core.release_consumer();
    }
}

impl<U, S> std::fmt::Debug for ChannelIter<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelIter")
            .field("cursor", &self.cursor)
            .field("missed", &self.missed)
            .field("done", &self.done)
            .finish()
    }
}
