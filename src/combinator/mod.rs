//! Channel combinators.
//!
//! Stateful operators built strictly on top of the future and channel cores.
//! Each combinator registers handlers on its upstream channel(s), keeps its
//! own lock-guarded state, and emits into a downstream channel it owns. The
//! handler closures hold the combinator state strongly, so the combinator
//! lives exactly as long as an upstream can still feed it; the caller holds
//! only the downstream channel.
//!
//! # Combinators
//!
//! ## Joining
//! - [`zip`]: pairwise join of two channels
//! - [`merge`] / [`merge2`] / [`merge_either`]: arrival-order interleave
//! - [`combine_latest`] / [`combine_latest2`]: N-ary latest-value join
//!
//! ## Flattening
//! - [`flat_map_future`]: per-update async sub-operations, reconciled by a
//!   [`FlatteningBehavior`]
//!
//! ## Time-windowed
//! - [`debounce`]: emit after a quiescence window
//! - [`throttle`]: at most one update per interval
//!
//! ## Flow control
//! - [`suspendable`]: gate-controlled buffering
//! - [`concat`]: sequential concatenation
//!
//! # Shared conventions
//!
//! - Internal handlers run on the immediate executor: upstream dispatch has
//!   already left the upstream lock, and combinator state transitions are
//!   cheap. Downstream subscribers still get their own executors.
//! - Where cross-source emission order must match the state transition that
//!   produced it (zip pairing, combine-latest snapshots, flatten
//!   reconciliation), the emission happens while the combinator's own lock
//!   is held. The downstream core still dispatches its subscribers outside
//!   its own lock. The one rule this imposes: an immediate-executor
//!   subscriber must not synchronously push back into the same combinator's
//!   upstream.
//! - Failure is fail-fast: the first failing upstream fails the downstream
//!   immediately; the exactly-once core discipline makes the race harmless.

mod combine_latest;
mod concat;
mod debounce;
mod flatten;
mod merge;
mod suspendable;
mod zip;

pub use combine_latest::{combine_latest, combine_latest2};
pub use concat::concat;
pub use debounce::{debounce, throttle};
pub use flatten::{FlatteningBehavior, flat_map_future};
pub use merge::{Either, merge, merge2, merge_either};
pub use suspendable::suspendable;
pub use zip::zip;
