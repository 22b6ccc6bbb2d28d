//! Sequential concatenation of channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::{Capacity, Channel, Event, Producer, channel};
use crate::error::Error;
use crate::executor::Executor;

struct ConcatShared<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    remaining: Mutex<VecDeque<Channel<U, S>>>,
    tx: Producer<U, S>,
}

/// Drains a sequence of channels one at a time.
///
/// Subscribes to each source only after the previous one completed
/// successfully, forwards its updates, and completes with the *last*
/// source's success. The first failure encountered is forwarded and stops
/// the sequence. An empty source list fails with a message error.
#[must_use]
pub fn concat<U, S>(sources: Vec<Channel<U, S>>) -> Channel<U, S>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let (tx, rx) = channel(Capacity::DEFAULT);
    if sources.is_empty() {
        tx.fail(Error::message("concat requires at least one source"));
        return rx;
    }

    let shared = Arc::new(ConcatShared {
        remaining: Mutex::new(sources.into_iter().collect()),
        tx,
    });
    attach_next(&shared);
    rx
}

fn attach_next<U, S>(shared: &Arc<ConcatShared<U, S>>)
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let source = {
        let mut remaining = shared.remaining.lock().expect("concat lock poisoned");
        remaining.pop_front().expect("attach_next requires a source")
    };

    let handler_shared = Arc::clone(shared);
    let _ = source.make_handler(Executor::immediate(), move |event| match event {
        Event::Update(value) => {
            let _ = handler_shared.tx.update(value);
        }
        Event::Completion(Err(error)) => {
            handler_shared.tx.fail(error);
        }
        Event::Completion(Ok(success)) => {
            let has_more = {
                let remaining = handler_shared
                    .remaining
                    .lock()
                    .expect("concat lock poisoned");
                !remaining.is_empty()
            };
            if has_more {
                attach_next(&handler_shared);
            } else {
                handler_shared.tx.succeed(success);
            }
        }
    });
}
