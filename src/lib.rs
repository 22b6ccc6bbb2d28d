//! Conflux: composable single-shot futures and multi-update channels driven by
//! callback dispatch.
//!
//! # Overview
//!
//! Conflux is built around two completable cores and the machinery that feeds
//! them:
//!
//! - A **future** holds at most one terminal result (success or failure) and
//!   guarantees exactly-once transition from incomplete to complete. Handlers
//!   may be registered before or after completion with identical outcomes.
//! - A **channel** holds an ordered, optionally bounded buffer of updates plus
//!   one terminal completion, with concurrent producers, fan-out subscribers,
//!   and independent blocking iterators.
//! - An **executor** decides where a callback runs: inline, on a dedicated
//!   serial queue, on the shared worker pool, or through a user-supplied
//!   handler. Executors decouple "what code runs" from "where it runs".
//! - A **cancellation token** propagates a one-shot cancel signal to weakly
//!   registered cores.
//! - An **execution context** binds a default executor to an owner's lifetime
//!   so dependent primitives fail deterministically when the owner goes away.
//!
//! Combinators (zip, merge, combine-latest, the flattening disciplines,
//! debounce, throttle, suspendable, concat) are small state machines layered
//! strictly on top of the two cores; they inherit the exactly-once and replay
//! guarantees instead of re-implementing them.
//!
//! # Core Guarantees
//!
//! - **Exactly-once completion**: concurrent `complete` calls race; exactly one
//!   wins, the rest are no-ops.
//! - **Registration-order dispatch**: handlers registered before completion run
//!   in registration order; handlers registered after run immediately with the
//!   known result.
//! - **Locks never wrap user code**: every core mutates state under its own
//!   lock, then invokes callbacks outside it via the chosen executor.
//! - **Errors stay in-band**: transform panics and lifetime failures surface as
//!   tagged failure completions, never as unwinds through dispatch.
//!
//! # Module Structure
//!
//! - [`error`]: the tagged completion result and failure taxonomy
//! - [`executor`]: dispatch strategies and the shared worker pool
//! - [`cancel`]: one-shot cancellation tokens
//! - [`future`]: the single-shot completable core
//! - [`channel`]: the multi-update stream core
//! - [`combinator`]: operators joining and reshaping channels
//! - [`context`]: owner-bound executors and teardown propagation
//! - [`time`]: the timer driver, delays, and interval channels
//!
//! # Example
//!
//! ```
//! use conflux::{Executor, promise};
//!
//! let (tx, rx) = promise::<i32>();
//! let doubled = rx.map(Executor::immediate(), |v| v * 2);
//! tx.succeed(21);
//! assert_eq!(doubled.wait().ok(), Some(42));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod channel;
pub mod combinator;
pub mod context;
pub mod error;
pub mod executor;
pub mod future;
pub mod subscription;
pub mod test_utils;
pub mod time;

pub use cancel::{Cancellable, CancellationToken};
pub use channel::{Capacity, Channel, Event, Producer, channel};
pub use combinator::{
    Either, FlatteningBehavior, combine_latest, combine_latest2, concat, debounce,
    flat_map_future, merge, merge2, merge_either, suspendable, throttle, zip,
};
pub use context::ExecutionContext;
pub use error::{Completion, Error};
pub use executor::{Executor, Priority};
pub use future::{Future, Promise, promise};
pub use subscription::Subscription;
