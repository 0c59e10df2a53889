//! The run supervisor.
//!
//! An [`Engine`] is built from a validated [`GraphDescription`]: one node per
//! stage copy and one channel per connected copy pair. [`Engine::run`]
//! initializes every node, starts one named OS thread per node, joins them
//! and aggregates a [`RunResult`]. The supervisor never touches rows.
//!
//! ```rust,ignore
//! let desc = GraphBuilder::new("numbers")
//!     .stage("gen", RowGenerator::sequence("n", 1..=10))
//!     .stage("out", CollectorSink::new())
//!     .hop("gen", "out")
//!     .build()?;
//! let result = Engine::build(desc, EngineConfig::default())?.run()?;
//! assert!(result.success);
//! ```

mod config;
mod result;
mod wiring;

#[cfg(test)]
mod integration_tests;

pub use config::{
    EngineConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FEEDBACK_INTERVAL, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_ROWS_PER_INPUT_BLOCK,
};
pub use result::{FailureInfo, NodeSummary, RunResult};

use crate::cancellation::{CancelReason, CancellationToken};
use crate::channel::{Channel, ChannelStats};
use crate::core::{NodeId, NodeOutcome, NodeState};
use crate::errors::{BuildError, EngineError, ErrorKind, RowflowError, TransformError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::node::{MetricsSnapshot, Node, NodeFailure, NodeMetrics, NodeReport};
use crate::observability::run_summary;
use crate::pipeline::GraphDescription;
use crate::stages::RowListener;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use result::RunTiming;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Executes one graph, once.
pub struct Engine {
    run_id: Uuid,
    name: String,
    config: EngineConfig,
    cancel: Arc<CancellationToken>,
    nodes: Mutex<Option<Vec<Node>>>,
    channels: Vec<Arc<Channel>>,
    states: Arc<DashMap<NodeId, NodeState>>,
    metrics: Vec<(NodeId, Arc<NodeMetrics>)>,
    sink: RwLock<Arc<dyn EventSink>>,
    listeners: Mutex<Vec<(String, Arc<dyn RowListener>)>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("run_id", &self.run_id)
            .field("name", &self.name)
            .field("nodes", &self.metrics.len())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validates `desc` and `config`, then creates every node and channel.
    ///
    /// Nothing runs until [`Engine::run`].
    pub fn build(desc: GraphDescription, config: EngineConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let plan = desc.validate()?;

        let cancel = Arc::new(CancellationToken::new());
        let states = Arc::new(DashMap::new());
        let wired = wiring::wire(&desc, &plan, &config, &cancel, &states)?;

        let wake = wired.channels.clone();
        cancel.on_cancel(move || {
            for channel in &wake {
                channel.wake_all();
            }
        });

        let run_id = Uuid::new_v4();
        info!(
            pipeline = %desc.name,
            run_id = %run_id,
            nodes = wired.nodes.len(),
            channels = wired.channels.len(),
            "Engine built"
        );

        Ok(Self {
            run_id,
            name: desc.name,
            config,
            cancel,
            nodes: Mutex::new(Some(wired.nodes)),
            channels: wired.channels,
            states,
            metrics: wired.metrics,
            sink: RwLock::new(Arc::new(NoOpEventSink)),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// The run identity.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the lifecycle event sink. Takes effect for the next `run`.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = sink;
    }

    /// Attaches a row listener to every copy of `stage`.
    pub fn add_row_listener(
        &self,
        stage: &str,
        listener: Arc<dyn RowListener>,
    ) -> Result<(), BuildError> {
        if !self.metrics.iter().any(|(id, _)| id.stage == stage) {
            return Err(BuildError::no_such_listener_stage(stage));
        }
        self.listeners.lock().push((stage.to_string(), listener));
        Ok(())
    }

    /// Cancels the run. Every blocked node wakes within one poll interval.
    pub fn cancel(&self) {
        info!(pipeline = %self.name, run_id = %self.run_id, "Cancellation requested");
        self.cancel.cancel(CancelReason::Requested);
    }

    /// Asks source nodes to stop producing; the rest of the graph drains.
    pub fn safe_stop(&self) {
        info!(pipeline = %self.name, run_id = %self.run_id, "Graceful stop requested");
        self.cancel.request_stop();
    }

    /// Parks every node before its next `transform` call.
    ///
    /// Rows already handed to a stage are finished and buffered rows stay in
    /// their channels. A paused run stays paused, also after
    /// [`Engine::safe_stop`], until [`Engine::resume`] or [`Engine::cancel`].
    pub fn pause(&self) {
        info!(pipeline = %self.name, run_id = %self.run_id, "Run paused");
        self.cancel.pause();
    }

    /// Lets parked nodes continue.
    pub fn resume(&self) {
        info!(pipeline = %self.name, run_id = %self.run_id, "Run resumed");
        self.cancel.resume();
    }

    /// Returns whether the run is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.cancel.is_paused()
    }

    /// Returns whether the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current lifecycle state of every node, ordered by node id.
    #[must_use]
    pub fn node_states(&self) -> Vec<(NodeId, NodeState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Current counters of every node.
    #[must_use]
    pub fn node_metrics(&self) -> Vec<(NodeId, MetricsSnapshot)> {
        self.metrics
            .iter()
            .map(|(id, m)| (id.clone(), m.snapshot()))
            .collect()
    }

    /// Current occupancy and throughput of every channel.
    #[must_use]
    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(|c| c.stats()).collect()
    }

    /// Runs the graph to completion on the calling thread.
    ///
    /// Node failures do not make this return `Err`; they are reported in the
    /// [`RunResult`]. Errors are reserved for supervisor problems.
    pub fn run(&self) -> Result<RunResult, EngineError> {
        let mut nodes = self
            .nodes
            .lock()
            .take()
            .ok_or_else(|| EngineError::AlreadyStarted(self.name.clone()))?;

        let timing = RunTiming {
            run_id: self.run_id,
            pipeline: self.name.clone(),
            started_at: Utc::now(),
        };
        let sink = Arc::clone(&*self.sink.read());
        self.attach(&mut nodes, &sink);

        info!(pipeline = %self.name, run_id = %self.run_id, nodes = nodes.len(), "Run started");
        sink.try_emit(
            events::RUN_STARTED,
            Some(serde_json::json!({
                "pipeline": self.name,
                "run_id": self.run_id.to_string(),
                "nodes": nodes.len(),
            })),
        );

        let reports = match self.init_all(&mut nodes) {
            Some(failed) => {
                error!(pipeline = %self.name, node = %failed, "Initialization failed, aborting run");
                self.cancel.cancel(CancelReason::InitFailed { node: failed });
                nodes.into_iter().map(Node::abort).collect()
            }
            None => self.execute(nodes)?,
        };

        let result = RunResult::aggregate(
            timing,
            reports,
            self.cancel.reason(),
            self.cancel.is_stop_requested(),
        );
        if result.success {
            info!(
                pipeline = %self.name,
                run_id = %self.run_id,
                rows_read = result.rows_read,
                rows_written = result.rows_written,
                duration_ms = result.duration_ms,
                "Run completed"
            );
        } else {
            warn!(
                pipeline = %self.name,
                run_id = %self.run_id,
                errors = result.errors,
                cancelled = result.cancelled,
                "Run finished unsuccessfully"
            );
        }
        sink.try_emit(events::RUN_COMPLETED, Some(run_summary(&result)));
        Ok(result)
    }

    /// Runs the graph on tokio's blocking pool.
    pub async fn run_async(self: Arc<Self>) -> Result<RunResult, EngineError> {
        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }

    fn attach(&self, nodes: &mut [Node], sink: &Arc<dyn EventSink>) {
        let listeners = self.listeners.lock();
        for node in nodes.iter_mut() {
            let mine: Vec<_> = listeners
                .iter()
                .filter(|(stage, _)| *stage == node.id().stage)
                .map(|(_, l)| Arc::clone(l))
                .collect();
            if !mine.is_empty() {
                node.context_mut().set_listeners(mine);
            }
            node.set_event_sink(Arc::clone(sink));
        }
    }

    /// Initializes every node in order. Returns the first failed node.
    fn init_all(&self, nodes: &mut [Node]) -> Option<NodeId> {
        let mut first_failure = None;
        for node in nodes.iter_mut() {
            if !node.init() && first_failure.is_none() {
                first_failure = Some(node.id().clone());
            }
        }
        first_failure
    }

    fn execute(&self, nodes: Vec<Node>) -> Result<Vec<NodeReport>, EngineError> {
        let mut handles: Vec<(NodeId, bool, JoinHandle<NodeReport>)> =
            Vec::with_capacity(nodes.len());
        let mut pending = nodes.into_iter();

        while let Some(node) = pending.next() {
            let id = node.id().clone();
            let terminal = node.is_terminal();
            let spawned = thread::Builder::new()
                .name(format!("{}{}", self.config.thread_name_prefix, id))
                .spawn(move || node.run());
            match spawned {
                Ok(handle) => {
                    debug!(node = %id, "Node thread started");
                    handles.push((id, terminal, handle));
                }
                Err(source) => {
                    error!(node = %id, error = %source, "Failed to spawn node thread");
                    self.cancel.cancel(CancelReason::Requested);
                    self.settle_after_spawn_failure(pending.by_ref(), handles);
                    return Err(EngineError::Spawn { node: id, source });
                }
            }
        }

        Ok(handles
            .into_iter()
            .map(|(id, terminal, handle)| self.join(id, terminal, handle))
            .collect())
    }

    /// Aborts nodes that never got a thread and joins the ones that did.
    /// Every report is logged since the run ends in an error, not a result.
    fn settle_after_spawn_failure(
        &self,
        unstarted: impl Iterator<Item = Node>,
        started: Vec<(NodeId, bool, JoinHandle<NodeReport>)>,
    ) -> Vec<NodeReport> {
        let mut reports: Vec<NodeReport> = unstarted.map(Node::abort).collect();
        reports.extend(
            started
                .into_iter()
                .map(|(id, terminal, handle)| self.join(id, terminal, handle)),
        );
        for report in &reports {
            warn!(
                node = %report.node,
                outcome = %report.outcome,
                rows_read = report.metrics.rows_read,
                rows_written = report.metrics.rows_written,
                errors = report.metrics.errors,
                "Node settled after spawn failure"
            );
        }
        reports
    }

    /// Joins one node thread. A panic that escaped the node is recorded as a
    /// failure of that node.
    fn join(&self, id: NodeId, terminal: bool, handle: JoinHandle<NodeReport>) -> NodeReport {
        match handle.join() {
            Ok(report) => report,
            Err(panic) => {
                let message = crate::node::panic_message(panic.as_ref());
                error!(node = %id, panic = %message, "Node thread panicked");
                self.cancel.cancel(CancelReason::NodeFailed { node: id.clone() });
                self.states.insert(id.clone(), NodeState::Done);
                let metrics = self
                    .metrics
                    .iter()
                    .find(|(n, _)| *n == id)
                    .map(|(_, m)| {
                        m.add_error();
                        m.snapshot()
                    })
                    .unwrap_or_default();
                NodeReport {
                    node: id.clone(),
                    outcome: NodeOutcome::Failed,
                    state: NodeState::Done,
                    metrics,
                    terminal,
                    failure: Some(NodeFailure::Transform(TransformError::new(
                        id,
                        ErrorKind::Transform,
                        format!("thread panicked: {message}"),
                    ))),
                }
            }
        }
    }
}

/// Builds and runs `desc` with `config`, turning an unsuccessful run into an
/// error.
pub fn run_graph(desc: GraphDescription, config: EngineConfig) -> Result<RunResult, RowflowError> {
    let engine = Engine::build(desc, config)?;
    engine.run()?.into_result()
}

impl BuildError {
    /// A row listener names a stage the graph does not contain.
    pub(crate) fn no_such_listener_stage(stage: &str) -> Self {
        Self::coded(
            "ENGINE-UNKNOWN-STAGE",
            format!("No stage named '{stage}' to attach a row listener to"),
        )
        .detail("stage", stage)
    }
}
