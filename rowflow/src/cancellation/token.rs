//! Run-wide cancellation flag.

use crate::core::NodeId;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Invoked once when the token is cancelled.
pub type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Why a run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancelReason {
    /// A caller asked for cancellation.
    Requested,
    /// A node failed while processing rows.
    NodeFailed {
        /// The failing node.
        node: NodeId,
    },
    /// A node failed to initialize.
    InitFailed {
        /// The failing node.
        node: NodeId,
    },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "cancellation requested"),
            Self::NodeFailed { node } => write!(f, "node {node} failed"),
            Self::InitFailed { node } => write!(f, "node {node} failed to initialize"),
        }
    }
}

/// Shared by every node, channel and the supervisor of one run.
///
/// The first reason wins. A separate stop flag asks sources to finish early
/// without cancelling anything.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    stop_requested: AtomicBool,
    reason: RwLock<Option<CancelReason>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl CancellationToken {
    /// An untouched token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the run with `reason`. Only the first call has any effect.
    ///
    /// Registered callbacks run on the calling thread, in registration order.
    pub fn cancel(&self, reason: CancelReason) {
        // Held across the flag flip so a concurrent `on_cancel` either lands
        // in the list before we drain it or sees the flag set.
        let mut callbacks = self.callbacks.write();
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.reason.write() = Some(reason);
        let drained = std::mem::take(&mut *callbacks);
        drop(callbacks);
        drained.iter().for_each(|callback| fire(callback.as_ref()));

        let _paused = self.paused.lock();
        self.resumed.notify_all();
    }

    /// Registers `callback` to run when the run is cancelled, or runs it
    /// right away if it already was.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write();
        if self.is_cancelled() {
            drop(callbacks);
            fire(&callback);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.read().clone()
    }

    /// Parks nodes at their next [`CancellationToken::wait_while_paused`].
    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    /// Releases every parked node.
    pub fn resume(&self) {
        let mut paused = self.paused.lock();
        *paused = false;
        self.resumed.notify_all();
    }

    /// Returns whether the run is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Blocks while paused, re-checking cancellation every `poll`.
    ///
    /// Returns false if the run was cancelled.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut paused = self.paused.lock();
        while *paused && !self.is_cancelled() {
            self.resumed.wait_for(&mut paused, poll);
        }
        !self.is_cancelled()
    }

    /// Asks source nodes to stop producing rows.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Returns whether a graceful stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// A panicking callback must not take the cancelling thread down with it.
fn fire(callback: &(dyn Fn() + Send + Sync)) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback));
    if let Err(payload) = outcome {
        warn!(
            panic = %crate::node::panic_message(payload.as_ref()),
            "cancel callback panicked"
        );
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("stop_requested", &self.is_stop_requested())
            .field("paused", &self.is_paused())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
