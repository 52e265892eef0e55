//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] is shared top-down from a pipeline run to
//! every stage and backend process it spawns. Timeouts are child tokens
//! tripped by a deadline.

mod token;

pub use token::{CancelCallback, CancelReason, CancellationToken};
