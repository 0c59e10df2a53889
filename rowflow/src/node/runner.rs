use super::NodeMetrics;
use crate::cancellation::{CancelReason, CancellationToken};
use crate::core::{NodeId, NodeOutcome, NodeState};
use crate::errors::{ErrorKind, InitError, StepError, TransformError};
use crate::events::{self, EventSink};
use crate::node::MetricsSnapshot;
use crate::stages::{Stage, StepContext};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How one node ended, returned by its thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    /// The node.
    pub node: NodeId,
    /// Why it stopped.
    pub outcome: NodeOutcome,
    /// Final lifecycle state.
    pub state: NodeState,
    /// Final counters.
    pub metrics: MetricsSnapshot,
    /// Whether the node has no output channels.
    pub terminal: bool,
    /// The failure, if the node errored.
    #[serde(skip)]
    pub failure: Option<NodeFailure>,
}

/// A failure recorded against a node.
#[derive(Debug, Clone)]
pub enum NodeFailure {
    /// `init` failed.
    Init(InitError),
    /// Processing failed.
    Transform(TransformError),
}

impl NodeFailure {
    /// The failure classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Init(_) => ErrorKind::Init,
            Self::Transform(e) => e.kind,
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Init(e) => e.to_string(),
            Self::Transform(e) => e.to_string(),
        }
    }
}

/// One running copy of a stage.
pub(crate) struct Node {
    id: NodeId,
    stage: Box<dyn Stage>,
    ctx: StepContext,
    state: NodeState,
    states: Arc<DashMap<NodeId, NodeState>>,
    metrics: Arc<NodeMetrics>,
    cancel: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
    terminal: bool,
    failure: Option<NodeFailure>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        stage: Box<dyn Stage>,
        ctx: StepContext,
        states: Arc<DashMap<NodeId, NodeState>>,
        metrics: Arc<NodeMetrics>,
        cancel: Arc<CancellationToken>,
        terminal: bool,
    ) -> Self {
        states.insert(id.clone(), NodeState::Created);
        Self {
            id,
            stage,
            ctx,
            state: NodeState::Created,
            states,
            metrics,
            cancel,
            sink: Arc::new(events::NoOpEventSink),
            terminal,
            failure: None,
        }
    }

    pub(crate) fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub(crate) fn context_mut(&mut self) -> &mut StepContext {
        &mut self.ctx
    }

    pub(crate) fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink;
    }

    fn set_state(&mut self, next: NodeState) {
        if !self.state.can_transition_to(next) {
            warn!(node = %self.id, from = %self.state, to = %next, "Unexpected state transition");
        }
        debug!(node = %self.id, from = %self.state, to = %next, "Node state change");
        self.state = next;
        self.states.insert(self.id.clone(), next);
    }

    /// Runs the stage's `init` hook. Returns false on failure.
    pub(crate) fn init(&mut self) -> bool {
        let Self { stage, ctx, .. } = self;
        let result = catch_unwind(AssertUnwindSafe(|| stage.init(ctx)));
        let message = match result {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("init returned false".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("init panicked: {}", panic_message(panic.as_ref()))),
        };

        match message {
            None => {
                self.set_state(NodeState::Initialized);
                self.sink.try_emit(
                    events::NODE_INITIALIZED,
                    Some(serde_json::json!({ "node": self.id.to_string() })),
                );
                true
            }
            Some(message) => {
                let err = InitError::new(self.id.clone(), message);
                error!(node = %self.id, error = %err, "Node failed to initialize");
                self.metrics.add_error();
                self.set_state(NodeState::Errored);
                self.sink.try_emit(
                    events::NODE_FAILED,
                    Some(serde_json::json!({
                        "node": self.id.to_string(),
                        "kind": ErrorKind::Init,
                        "error": err.to_string(),
                    })),
                );
                self.failure = Some(NodeFailure::Init(err));
                false
            }
        }
    }

    /// Disposes a node that will never run because the run was aborted.
    pub(crate) fn abort(mut self) -> NodeReport {
        let outcome = if self.failure.is_some() {
            NodeOutcome::Failed
        } else {
            NodeOutcome::Aborted
        };
        self.dispose();
        self.ctx.close_outputs();
        self.ctx.close_inputs();
        self.set_state(NodeState::Done);
        self.report(outcome)
    }

    /// The node thread body: transform until done, then finish and dispose.
    pub(crate) fn run(mut self) -> NodeReport {
        self.set_state(NodeState::Running);
        info!(node = %self.id, "Node started");

        let result = self.process();

        let outcome = match result {
            Ok(()) => {
                self.set_state(NodeState::Finishing);
                self.ctx.close_outputs();
                match self.ctx.drain_inputs() {
                    Ok(0) => {}
                    Ok(discarded) => {
                        debug!(node = %self.id, discarded, "Discarded rows after finishing early");
                    }
                    Err(err) => debug!(node = %self.id, error = %err, "Input drain interrupted"),
                }
                NodeOutcome::Completed
            }
            Err(StepError::Cancelled) => {
                debug!(node = %self.id, "Node cancelled");
                self.ctx.close_outputs();
                NodeOutcome::Cancelled
            }
            Err(err) => {
                let failure = TransformError::new(self.id.clone(), err.kind(), err.to_string());
                error!(node = %self.id, kind = ?err.kind(), error = %err, "Node failed");
                self.metrics.add_error();
                self.set_state(NodeState::Errored);
                self.cancel.cancel(CancelReason::NodeFailed {
                    node: self.id.clone(),
                });
                self.ctx.close_outputs();
                self.sink.try_emit(
                    events::NODE_FAILED,
                    Some(serde_json::json!({
                        "node": self.id.to_string(),
                        "kind": failure.kind,
                        "error": failure.message,
                    })),
                );
                self.failure = Some(NodeFailure::Transform(failure));
                NodeOutcome::Failed
            }
        };

        self.dispose();
        self.ctx.close_inputs();
        self.set_state(NodeState::Done);

        let metrics = self.metrics.snapshot();
        info!(
            node = %self.id,
            outcome = %outcome,
            rows_read = metrics.rows_read,
            rows_written = metrics.rows_written,
            rows_rejected = metrics.rows_rejected,
            "Node finished"
        );
        if !outcome.is_failure() {
            self.sink.try_emit(
                events::NODE_FINISHED,
                Some(serde_json::json!({
                    "node": self.id.to_string(),
                    "outcome": outcome,
                    "metrics": metrics,
                })),
            );
        }
        self.report(outcome)
    }

    fn process(&mut self) -> Result<(), StepError> {
        let Self {
            stage, ctx, cancel, ..
        } = self;
        loop {
            if ctx.is_source() && cancel.is_stop_requested() {
                debug!(node = %ctx.node(), "Stop requested, source finishing");
                return Ok(());
            }
            if cancel.is_paused() {
                debug!(node = %ctx.node(), "Node parked");
                if !cancel.wait_while_paused(ctx.poll_interval()) {
                    return Err(StepError::Cancelled);
                }
            }
            if cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            match catch_unwind(AssertUnwindSafe(|| stage.transform(ctx))) {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(panic) => return Err(StepError::Panicked(panic_message(panic.as_ref()))),
            }
        }
    }

    fn dispose(&mut self) {
        let Self { stage, ctx, id, .. } = self;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| stage.dispose(ctx))) {
            warn!(node = %id, panic = %panic_message(panic.as_ref()), "dispose panicked");
        }
    }

    fn report(self, outcome: NodeOutcome) -> NodeReport {
        NodeReport {
            node: self.id,
            outcome,
            state: self.state,
            metrics: self.metrics.snapshot(),
            terminal: self.terminal,
            failure: self.failure,
        }
    }
}
