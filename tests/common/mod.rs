//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use conflux::{Channel, Executor};

/// Initializes logging and announces the test phase.
pub fn init_test(name: &str) {
    conflux::test_utils::init_test_logging();
    conflux::test_phase!(name);
}

/// Subscribes an immediate-executor collector to a channel's updates.
pub fn collect_updates<U, S>(channel: &Channel<U, S>) -> Arc<Mutex<Vec<U>>>
where
    U: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _ = channel.on_update(Executor::immediate(), move |value| {
        sink.lock().unwrap().push(value);
    });
    seen
}
