//! The per-node API handed to stage code.

use super::input::{InputHandle, InputSet};
use super::{RowListener, StageMeta};
use crate::cancellation::CancellationToken;
use crate::channel::{Channel, PopOutcome};
use crate::core::{NodeId, Row, RowShape};
use crate::errors::{ChannelError, SchemaError, StepError};
use crate::node::NodeMetrics;
use crate::routing::{error_shape, ErrorHandling, RowError, Router, TargetHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Engine settings a node needs while running.
#[derive(Debug, Clone)]
pub(crate) struct NodeSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) rows_per_block: usize,
    pub(crate) feedback_interval: u64,
    pub(crate) safe_mode: bool,
}

/// Everything the wiring pass hands to a new context.
pub(crate) struct ContextParts {
    pub(crate) node: NodeId,
    pub(crate) meta: Arc<dyn StageMeta>,
    pub(crate) inputs: Vec<Arc<Channel>>,
    pub(crate) router: Router,
    pub(crate) planned_input: Option<Arc<RowShape>>,
    pub(crate) error_handling: ErrorHandling,
    pub(crate) metrics: Arc<NodeMetrics>,
    pub(crate) cancel: Arc<CancellationToken>,
    pub(crate) settings: NodeSettings,
}

/// Per-node runtime state and the row API used by stages.
///
/// A context belongs to exactly one node copy and is only touched by that
/// node's thread.
pub struct StepContext {
    node: NodeId,
    meta: Arc<dyn StageMeta>,
    all_inputs: Vec<Arc<Channel>>,
    default_input: InputSet,
    dedicated: Vec<InputSet>,
    router: Router,
    planned_input: Option<Arc<RowShape>>,
    input_shape: Option<Arc<RowShape>>,
    output_shape: Option<Arc<RowShape>>,
    error_shape: Option<Arc<RowShape>>,
    first_row_checked: bool,
    error_handling: ErrorHandling,
    metrics: Arc<NodeMetrics>,
    cancel: Arc<CancellationToken>,
    listeners: Vec<Arc<dyn RowListener>>,
    settings: NodeSettings,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("node", &self.node)
            .field("inputs", &self.all_inputs.len())
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .finish_non_exhaustive()
    }
}

impl StepContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            default_input: InputSet::new(None, parts.inputs.clone()),
            all_inputs: parts.inputs,
            node: parts.node,
            meta: parts.meta,
            dedicated: Vec::new(),
            router: parts.router,
            planned_input: parts.planned_input,
            input_shape: None,
            output_shape: None,
            error_shape: None,
            first_row_checked: false,
            error_handling: parts.error_handling,
            metrics: parts.metrics,
            cancel: parts.cancel,
            listeners: Vec::new(),
            settings: parts.settings,
        }
    }

    pub(crate) fn set_listeners(&mut self, listeners: Vec<Arc<dyn RowListener>>) {
        self.listeners = listeners;
    }

    /// The node this context belongs to.
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Copy index of this node.
    #[must_use]
    pub fn copy(&self) -> usize {
        self.node.copy
    }

    /// Returns true if the node has no input channels.
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.all_inputs.is_empty()
    }

    /// Returns true once the run is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once a graceful stop was requested. Sources should stop
    /// producing.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_stop_requested() || self.cancel.is_cancelled()
    }

    /// Reads the next row from the default inputs.
    ///
    /// Returns `Ok(None)` once every default input is exhausted. The first row
    /// fixes the input shape, validates referenced fields and derives the
    /// output shape.
    pub fn get_row(&mut self) -> Result<Option<Row>, StepError> {
        let row = self.default_input.next(
            self.settings.rows_per_block,
            self.settings.poll_interval,
            &self.cancel,
        )?;
        let Some(row) = row else {
            return Ok(None);
        };

        if !self.first_row_checked {
            self.input_shape = self
                .default_input
                .shape()
                .cloned()
                .or_else(|| self.planned_input.clone());
            self.check_first_row()?;
        }
        if self.settings.safe_mode {
            if let Some(shape) = &self.input_shape {
                shape.validate_row(&row)?;
            }
        }

        self.on_read(&row, None);
        Ok(Some(row))
    }

    /// Takes every channel fed by `source` out of the default rotation.
    ///
    /// Rows from that stage are then only returned by
    /// [`StepContext::get_row_from`]. Taking the same source twice returns
    /// the same handle.
    pub fn take_input(&mut self, source: &str) -> Result<InputHandle, StepError> {
        if let Some(index) = self.dedicated.iter().position(|s| s.stage() == Some(source)) {
            return Ok(InputHandle(index));
        }
        let set = self.default_input.split_off(source);
        if set.is_empty() {
            return Err(StepError::Routing(format!(
                "stage '{}' has no input from '{source}'",
                self.node.stage
            )));
        }
        debug!(node = %self.node, source = %source, "Took dedicated input stream");
        self.dedicated.push(set);
        Ok(InputHandle(self.dedicated.len() - 1))
    }

    /// Reads the next row from a dedicated input stream.
    pub fn get_row_from(&mut self, handle: InputHandle) -> Result<Option<Row>, StepError> {
        let set = self
            .dedicated
            .get_mut(handle.0)
            .ok_or_else(|| StepError::Routing(format!("input handle {} is unknown", handle.0)))?;
        let row = set.next(
            self.settings.rows_per_block,
            self.settings.poll_interval,
            &self.cancel,
        )?;
        let Some(row) = row else {
            return Ok(None);
        };
        let shape = set.shape().cloned();
        if self.settings.safe_mode {
            if let Some(shape) = &shape {
                shape.validate_row(&row)?;
            }
        }
        self.on_read(&row, shape.as_deref());
        Ok(Some(row))
    }

    /// The shape of a dedicated input stream, known after its first row.
    #[must_use]
    pub fn input_shape_of(&self, handle: InputHandle) -> Option<&Arc<RowShape>> {
        self.dedicated.get(handle.0).and_then(InputSet::shape)
    }

    /// Sends a row along every default hop.
    ///
    /// The row must match the frozen output shape by arity and type. A node
    /// without outputs counts the row as written and drops it. Listeners
    /// hear about the row only once it was delivered.
    pub fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        let shape = self.ensure_output_shape()?;
        shape.validate_row(&row)?;
        let announced = self.has_listeners().then(|| row.clone());
        self.router.send(row)?;
        if let Some(row) = announced {
            self.notify_written(&shape, &row);
        }
        self.on_written();
        Ok(())
    }

    /// Resolves a declared target name.
    pub fn target(&self, name: &str) -> Result<TargetHandle, StepError> {
        self.router.resolve(name).ok_or_else(|| {
            StepError::Routing(format!(
                "stage '{}' has no target named '{name}'",
                self.node.stage
            ))
        })
    }

    /// Sends a row to one named target.
    ///
    /// Rows sent to an unconfigured target are dropped, not counted and not
    /// reported to listeners.
    pub fn put_row_to(&mut self, handle: TargetHandle, row: Row) -> Result<(), StepError> {
        let shape = self.ensure_output_shape()?;
        shape.validate_row(&row)?;
        let announced = self.has_listeners().then(|| row.clone());
        if self.router.send_to(handle, row)? {
            if let Some(row) = announced {
                self.notify_written(&shape, &row);
            }
            self.on_written();
        }
        Ok(())
    }

    /// Rejects a row to the error hop.
    ///
    /// The row must have the node's input shape (output shape for sources).
    /// Fails the node once a configured rejection limit is crossed.
    pub fn put_error(&mut self, row: Row, error: RowError) -> Result<(), StepError> {
        if !self.router.has_error_hop() {
            return Err(StepError::Routing(format!(
                "stage '{}' has no error hop",
                self.node.stage
            )));
        }
        if self.error_shape.is_none() {
            let base = match &self.input_shape {
                Some(shape) => Arc::clone(shape),
                None => self.ensure_output_shape()?,
            };
            let shape = Arc::new(error_shape(&base)?);
            self.router.bind_error_shape(&shape)?;
            self.error_shape = Some(shape);
        }

        for listener in &self.listeners {
            listener.error_row(&self.node, &row, &error);
        }
        self.router.send_error(error.annotate(&row))?;
        let rejected = self.metrics.add_rejected();
        self.error_handling
            .check(rejected, self.metrics.rows_read())
    }

    /// The input shape, once known.
    #[must_use]
    pub fn input_shape(&self) -> Option<&Arc<RowShape>> {
        self.input_shape.as_ref().or(self.planned_input.as_ref())
    }

    /// The output shape, derived on first use.
    pub fn output_shape(&mut self) -> Result<Arc<RowShape>, StepError> {
        self.ensure_output_shape()
    }

    /// Position of a field in the input shape.
    pub fn field_index(&self, name: &str) -> Result<usize, SchemaError> {
        match self.input_shape() {
            Some(shape) => shape.require(name),
            None => Err(SchemaError::new(format!(
                "Field '{name}' requested before the input shape of '{}' is known",
                self.node.stage
            ))),
        }
    }

    /// Rows read so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.metrics.rows_read()
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.metrics.rows_written()
    }

    /// Rows rejected so far.
    #[must_use]
    pub fn rows_rejected(&self) -> u64 {
        self.metrics.rows_rejected()
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// Closes the producer side of every output.
    pub(crate) fn close_outputs(&self) {
        self.router.close();
    }

    /// Discards rows until every input is done, so producers still sending
    /// to a node that finished early can complete normally.
    ///
    /// Returns the number of discarded rows.
    pub(crate) fn drain_inputs(&self) -> Result<u64, ChannelError> {
        let mut open: Vec<&Arc<Channel>> = self.all_inputs.iter().collect();
        let mut discarded = 0;
        while !open.is_empty() {
            let mut idle = true;
            let mut i = 0;
            while i < open.len() {
                match open[i].try_pop()? {
                    PopOutcome::Row(_) => {
                        discarded += 1;
                        idle = false;
                        i += 1;
                    }
                    PopOutcome::Empty => i += 1,
                    PopOutcome::Done => {
                        open.swap_remove(i);
                        idle = false;
                    }
                }
            }
            if idle {
                match open[0].pop_timeout(self.settings.poll_interval)? {
                    PopOutcome::Row(_) => discarded += 1,
                    PopOutcome::Empty => {}
                    PopOutcome::Done => {
                        open.swap_remove(0);
                    }
                }
            }
        }
        Ok(discarded)
    }

    /// Tears down the consumer side of every input.
    pub(crate) fn close_inputs(&self) {
        for channel in &self.all_inputs {
            channel.close_consumer();
        }
    }

    fn check_first_row(&mut self) -> Result<(), StepError> {
        self.first_row_checked = true;
        if let Some(shape) = &self.input_shape {
            for field in self.meta.referenced_fields() {
                shape.require(&field)?;
            }
        }
        self.ensure_output_shape()?;
        Ok(())
    }

    fn ensure_output_shape(&mut self) -> Result<Arc<RowShape>, StepError> {
        if let Some(shape) = &self.output_shape {
            return Ok(Arc::clone(shape));
        }
        let input = self.input_shape().cloned();
        let shape = Arc::new(self.meta.output_shape(input.as_deref())?);
        self.router.bind_shape(&shape)?;
        debug!(node = %self.node, shape = %shape, "Output shape frozen");
        self.output_shape = Some(Arc::clone(&shape));
        Ok(shape)
    }

    fn on_read(&self, row: &Row, shape: Option<&RowShape>) {
        let read = self.metrics.add_read();
        for listener in &self.listeners {
            listener.row_read(&self.node, shape.or(self.input_shape.as_deref()), row);
        }
        self.feedback(read, "read");
    }

    fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    fn notify_written(&self, shape: &RowShape, row: &Row) {
        for listener in &self.listeners {
            listener.row_written(&self.node, shape, row);
        }
    }

    fn on_written(&self) {
        let written = self.metrics.add_written();
        if self.is_source() {
            self.feedback(written, "written");
        }
    }

    fn feedback(&self, count: u64, what: &str) {
        let interval = self.settings.feedback_interval;
        if interval > 0 && count % interval == 0 {
            info!(
                node = %self.node,
                rows_read = self.metrics.rows_read(),
                rows_written = self.metrics.rows_written(),
                rows_rejected = self.metrics.rows_rejected(),
                "{} rows {what}",
                count
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn settings() -> NodeSettings {
        NodeSettings {
            poll_interval: Duration::from_millis(5),
            rows_per_block: 500,
            feedback_interval: 0,
            safe_mode: true,
        }
    }

    pub(crate) fn context(
        meta: Arc<dyn StageMeta>,
        inputs: Vec<Arc<Channel>>,
        router: Router,
        cancel: Arc<CancellationToken>,
    ) -> StepContext {
        StepContext::new(ContextParts {
            node: NodeId::new("test", 0),
            meta,
            inputs,
            router,
            planned_input: None,
            error_handling: ErrorHandling::default(),
            metrics: Arc::new(NodeMetrics::new()),
            cancel,
            settings: settings(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::channel::{ChannelId, PopOutcome};
    use crate::core::{FieldMeta, Value, ValueType};
    use crate::routing::{Distribution, OutputGroup};
    use crate::row;
    use crate::stages::{CollectingRowListener, FnStage, RowEventKind};
    use std::num::NonZeroUsize;

    fn channel(from: &str, to: &str, cancel: &Arc<CancellationToken>) -> Arc<Channel> {
        Arc::new(Channel::new(
            ChannelId::new(from, 0, to, 0),
            NonZeroUsize::new(64).unwrap(),
            Arc::clone(cancel),
            Duration::from_millis(5),
        ))
    }

    fn id_shape() -> Arc<RowShape> {
        Arc::new(
            RowShape::builder()
                .field("id", ValueType::Integer)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_first_row_freezes_output_shape() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        let output = channel("test", "dst", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row![1]).unwrap();
        input.close_producer();

        let meta = Arc::new(
            FnStage::new(|row: &Row| Ok(Some(row.extended([Value::from(2)]))))
                .with_output_field(FieldMeta::new("double", ValueType::Integer)),
        );
        let router = Router::default_flow(vec![OutputGroup::new(
            "dst",
            vec![Arc::clone(&output)],
            Distribution::RoundRobin,
        )]);
        let mut ctx = context(meta, vec![input], router, cancel);

        let row = ctx.get_row().unwrap().unwrap();
        assert_eq!(ctx.field_index("id").unwrap(), 0);
        ctx.put_row(row.extended([Value::from(2)])).unwrap();
        assert!(ctx.get_row().unwrap().is_none());

        let frozen = output.shape().unwrap();
        assert_eq!(frozen.names().collect::<Vec<_>>(), vec!["id", "double"]);
        assert_eq!(ctx.rows_read(), 1);
        assert_eq!(ctx.rows_written(), 1);
    }

    #[test]
    fn test_missing_referenced_field_fails_first_row() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row![1]).unwrap();

        let meta = Arc::new(
            FnStage::new(|row: &Row| Ok(Some(row.clone()))).with_referenced_field("amount"),
        );
        let mut ctx = context(meta, vec![input], Router::default_flow(Vec::new()), cancel);
        assert!(matches!(ctx.get_row(), Err(StepError::Schema(_))));
    }

    #[test]
    fn test_safe_mode_rejects_wrong_type() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row!["not a number"]).unwrap();

        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, vec![input], Router::default_flow(Vec::new()), cancel);
        assert!(matches!(ctx.get_row(), Err(StepError::Schema(_))));
    }

    #[test]
    fn test_failed_send_is_not_reported_to_listeners() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row![1]).unwrap();
        input.push(row![2]).unwrap();
        input.close_producer();
        let output = channel("test", "dst", &cancel);

        let router = Router::default_flow(vec![OutputGroup::new(
            "dst",
            vec![Arc::clone(&output)],
            Distribution::RoundRobin,
        )]);
        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, vec![input], router, cancel);
        let listener = Arc::new(CollectingRowListener::new());
        ctx.set_listeners(vec![listener.clone() as Arc<dyn RowListener>]);

        let first = ctx.get_row().unwrap().unwrap();
        ctx.put_row(first).unwrap();
        output.close_consumer();
        let second = ctx.get_row().unwrap().unwrap();
        assert!(ctx.put_row(second).is_err());

        assert_eq!(listener.rows(RowEventKind::Written), vec![row![1]]);
        assert_eq!(ctx.rows_written(), 1);
    }

    #[test]
    fn test_put_row_rejects_wrong_type() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row![1]).unwrap();

        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, vec![input], Router::default_flow(Vec::new()), cancel);
        ctx.settings.safe_mode = false;

        ctx.get_row().unwrap().unwrap();
        assert!(matches!(ctx.put_row(row!["one"]), Err(StepError::Schema(_))));
        assert_eq!(ctx.rows_written(), 0);
    }

    #[test]
    fn test_drain_inputs_discards_until_done() {
        let cancel = Arc::new(CancellationToken::new());
        let quiet = channel("quiet", "test", &cancel);
        quiet.close_producer();
        let busy = Arc::new(Channel::new(
            ChannelId::new("busy", 0, "test", 0),
            NonZeroUsize::new(1).unwrap(),
            Arc::clone(&cancel),
            Duration::from_millis(5),
        ));
        let producer = {
            let busy = Arc::clone(&busy);
            std::thread::spawn(move || {
                for i in 0..50 {
                    busy.push(row![i]).unwrap();
                }
                busy.close_producer();
            })
        };

        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let ctx = context(meta, vec![quiet, busy], Router::default_flow(Vec::new()), cancel);

        assert_eq!(ctx.drain_inputs().unwrap(), 50);
        producer.join().unwrap();
        assert_eq!(ctx.rows_read(), 0);
    }

    #[test]
    fn test_put_error_without_hop() {
        let cancel = Arc::new(CancellationToken::new());
        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, Vec::new(), Router::default_flow(Vec::new()), cancel);
        assert!(matches!(
            ctx.put_error(row![], RowError::new("bad")),
            Err(StepError::Routing(_))
        ));
    }

    #[test]
    fn test_put_error_appends_fields() {
        let cancel = Arc::new(CancellationToken::new());
        let input = channel("src", "test", &cancel);
        input.freeze_shape(&id_shape()).unwrap();
        input.push(row![7]).unwrap();
        let errors = channel("test", "errors", &cancel);

        let router = Router::default_flow(Vec::new()).with_error_group(OutputGroup::new(
            "errors",
            vec![Arc::clone(&errors)],
            Distribution::RoundRobin,
        ));
        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, vec![input], router, cancel);

        let row = ctx.get_row().unwrap().unwrap();
        ctx.put_error(row, RowError::new("odd id").with_code("ODD"))
            .unwrap();

        let PopOutcome::Row(rejected) = errors.try_pop().unwrap() else {
            panic!("expected an error row");
        };
        assert_eq!(rejected.len(), 5);
        assert_eq!(rejected[4].as_str(), Some("ODD"));
        assert_eq!(ctx.rows_rejected(), 1);
        assert_eq!(errors.shape().unwrap().len(), 5);
    }

    #[test]
    fn test_take_input_twice_returns_same_handle() {
        let cancel = Arc::new(CancellationToken::new());
        let main = channel("main", "test", &cancel);
        let lookup = channel("lookup", "test", &cancel);
        lookup.push(row![1]).unwrap();
        lookup.close_producer();
        main.close_producer();

        let meta = Arc::new(FnStage::new(|row: &Row| Ok(Some(row.clone()))));
        let mut ctx = context(meta, vec![main, lookup], Router::default_flow(Vec::new()), cancel);

        let a = ctx.take_input("lookup").unwrap();
        let b = ctx.take_input("lookup").unwrap();
        assert_eq!(a, b);
        assert!(ctx.take_input("nowhere").is_err());

        assert!(ctx.get_row().unwrap().is_none());
        assert_eq!(ctx.get_row_from(a).unwrap(), Some(row![1]));
        assert_eq!(ctx.get_row_from(a).unwrap(), None);
    }
}
