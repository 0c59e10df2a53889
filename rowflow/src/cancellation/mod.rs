//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] is shared by every node and channel of a
//! run. Blocking channel operations re-check it at the poll interval and are
//! woken immediately through its callbacks.

mod token;

pub use token::{CancelCallback, CancelReason, CancellationToken};
