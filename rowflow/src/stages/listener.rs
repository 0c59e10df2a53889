use crate::core::{NodeId, Row, RowShape};
use crate::routing::RowError;
use parking_lot::Mutex;

/// Observes rows flowing through a node.
///
/// Hooks run on the node's thread, inline with row processing.
pub trait RowListener: Send + Sync {
    /// A row was read from an input channel.
    fn row_read(&self, _node: &NodeId, _shape: Option<&RowShape>, _row: &Row) {}

    /// A row was handed to the router.
    fn row_written(&self, _node: &NodeId, _shape: &RowShape, _row: &Row) {}

    /// A row was rejected to the error hop.
    fn error_row(&self, _node: &NodeId, _row: &Row, _error: &RowError) {}
}

/// Which hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEventKind {
    /// `row_read`.
    Read,
    /// `row_written`.
    Written,
    /// `error_row`.
    Rejected,
}

/// A listener that records every row it sees.
#[derive(Debug, Default)]
pub struct CollectingRowListener {
    rows: Mutex<Vec<(NodeId, RowEventKind, Row)>>,
}

impl CollectingRowListener {
    /// Creates an empty listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows recorded for `kind`, in arrival order.
    #[must_use]
    pub fn rows(&self, kind: RowEventKind) -> Vec<Row> {
        self.rows
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, row)| row.clone())
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    fn record(&self, node: &NodeId, kind: RowEventKind, row: &Row) {
        self.rows.lock().push((node.clone(), kind, row.clone()));
    }
}

impl RowListener for CollectingRowListener {
    fn row_read(&self, node: &NodeId, _shape: Option<&RowShape>, row: &Row) {
        self.record(node, RowEventKind::Read, row);
    }

    fn row_written(&self, node: &NodeId, _shape: &RowShape, row: &Row) {
        self.record(node, RowEventKind::Written, row);
    }

    fn error_row(&self, node: &NodeId, row: &Row, _error: &RowError) {
        self.record(node, RowEventKind::Rejected, row);
    }
}
