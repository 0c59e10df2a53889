//! Reusable stages for tests and demos.

use crate::core::{FieldMeta, Row, RowShape, Value, ValueType};
use crate::errors::{SchemaError, StepError};
use crate::routing::{RowError, TargetHandle};
use crate::stages::{Stage, StageMeta, StepContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Rows {
    Fixed(Arc<Vec<Row>>),
    Counter,
}

/// A source that emits a fixed list of rows, or counts forever.
///
/// Every copy emits the full list.
#[derive(Debug, Clone)]
pub struct RowGenerator {
    shape: RowShape,
    rows: Rows,
    delay: Option<Duration>,
}

impl RowGenerator {
    /// One integer field named `field`, one row per value.
    pub fn sequence(field: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            shape: RowShape::from_fields(vec![FieldMeta::new(field, ValueType::Integer)])
                .unwrap_or_default(),
            rows: Rows::Fixed(Arc::new(
                values.into_iter().map(|v| Row::new(vec![Value::Integer(v)])).collect(),
            )),
            delay: None,
        }
    }

    /// Emits `rows`, which must match `shape`.
    pub fn from_rows(shape: RowShape, rows: Vec<Row>) -> Self {
        Self {
            shape,
            rows: Rows::Fixed(Arc::new(rows)),
            delay: None,
        }
    }

    /// Counts upwards from 0 in an integer field until stopped or
    /// cancelled.
    pub fn infinite(field: impl Into<String>) -> Self {
        Self {
            rows: Rows::Counter,
            ..Self::sequence(field, std::iter::empty())
        }
    }

    /// Sleeps before every row.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl StageMeta for RowGenerator {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(GeneratorCopy {
            rows: self.rows.clone(),
            delay: self.delay,
            next: 0,
        })
    }

    fn output_shape(&self, _input: Option<&RowShape>) -> Result<RowShape, SchemaError> {
        Ok(self.shape.clone())
    }
}

struct GeneratorCopy {
    rows: Rows,
    delay: Option<Duration>,
    next: usize,
}

impl Stage for GeneratorCopy {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let row = match &self.rows {
            Rows::Fixed(rows) => match rows.get(self.next) {
                Some(row) => row.clone(),
                None => return Ok(false),
            },
            Rows::Counter => Row::new(vec![Value::Integer(
                i64::try_from(self.next).unwrap_or(i64::MAX),
            )]),
        };
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.next += 1;
        ctx.put_row(row)?;
        Ok(true)
    }
}

/// Records every row it reads and forwards it.
///
/// Clones share the same buffer, so keep one clone to inspect after the
/// run.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    rows: Arc<Mutex<Vec<Row>>>,
    delay: Option<Duration>,
}

impl CollectorSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps after every row, to simulate a slow consumer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Rows collected so far, in arrival order.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    /// Number of rows collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Integer values at `index`, sorted.
    #[must_use]
    pub fn sorted_ints(&self, index: usize) -> Vec<i64> {
        let mut values: Vec<i64> = self
            .rows
            .lock()
            .iter()
            .filter_map(|r| r.get(index).and_then(Value::as_i64))
            .collect();
        values.sort_unstable();
        values
    }
}

impl StageMeta for CollectorSink {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

impl Stage for CollectorSink {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        self.rows.lock().push(row.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        ctx.put_row(row)?;
        Ok(true)
    }
}

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

/// Sends rows to target `"true"` or `"false"` depending on one field.
#[derive(Clone)]
pub struct PredicateFilter {
    field: String,
    predicate: Arc<Predicate>,
}

impl PredicateFilter {
    /// Tests `field` of every row with `predicate`.
    pub fn new<F>(field: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for PredicateFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateFilter")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

impl StageMeta for PredicateFilter {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(FilterCopy {
            field: self.field.clone(),
            predicate: Arc::clone(&self.predicate),
            handles: None,
            index: None,
        })
    }

    fn targets(&self) -> Vec<String> {
        vec!["true".to_string(), "false".to_string()]
    }

    fn referenced_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

struct FilterCopy {
    field: String,
    predicate: Arc<Predicate>,
    handles: Option<(TargetHandle, TargetHandle)>,
    index: Option<usize>,
}

impl Stage for FilterCopy {
    fn init(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        self.handles = Some((ctx.target("true")?, ctx.target("false")?));
        Ok(true)
    }

    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        let index = match self.index {
            Some(index) => index,
            None => *self.index.insert(ctx.field_index(&self.field)?),
        };
        let (yes, no) = self
            .handles
            .ok_or_else(|| StepError::Routing("filter targets not resolved".into()))?;
        let matched = row.get(index).is_some_and(|v| (self.predicate)(v));
        ctx.put_row_to(if matched { yes } else { no }, row)?;
        Ok(true)
    }
}

/// Rejects rows whose field fails a check to the error hop.
#[derive(Clone)]
pub struct RowValidator {
    field: String,
    check: Arc<Predicate>,
    code: String,
}

impl RowValidator {
    /// Rows where `check(field)` is false are rejected with `code`.
    pub fn new<F>(field: impl Into<String>, code: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            field: field.into(),
            check: Arc::new(check),
            code: code.into(),
        }
    }
}

impl std::fmt::Debug for RowValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowValidator")
            .field("field", &self.field)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl StageMeta for RowValidator {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn referenced_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

impl Stage for RowValidator {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        let index = ctx.field_index(&self.field)?;
        if row.get(index).is_some_and(|v| (self.check)(v)) {
            ctx.put_row(row)?;
        } else {
            let error = RowError::new(format!("{} is invalid", self.field))
                .with_fields([self.field.as_str()])
                .with_code(self.code.as_str());
            ctx.put_error(row, error)?;
        }
        Ok(true)
    }
}

/// Forwards rows and fails on the `n`-th row it reads (1-based).
///
/// Rows before the failing one are forwarded normally.
#[derive(Debug, Clone, Copy)]
pub struct FailOnRow {
    n: u64,
}

impl FailOnRow {
    /// Fails on row `n`.
    #[must_use]
    pub fn new(n: u64) -> Self {
        Self { n }
    }
}

impl StageMeta for FailOnRow {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(*self)
    }
}

impl Stage for FailOnRow {
    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row()? else {
            return Ok(false);
        };
        if ctx.rows_read() == self.n {
            return Err(StepError::failed(format!("refusing row {}", self.n)));
        }
        ctx.put_row(row)?;
        Ok(true)
    }
}

/// Counts lifecycle hook calls across all copies of a stage.
#[derive(Debug, Default)]
pub struct LifecycleCounts {
    inits: AtomicUsize,
    transforms: AtomicUsize,
    disposes: AtomicUsize,
}

impl LifecycleCounts {
    /// `init` calls.
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// `transform` calls.
    pub fn transforms(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }

    /// `dispose` calls.
    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }
}

/// A pass-through stage that counts its hooks and can fail `init`.
#[derive(Debug, Clone, Default)]
pub struct LifecycleRecorder {
    counts: Arc<LifecycleCounts>,
    fail_init: bool,
}

impl LifecycleRecorder {
    /// A recorder whose `init` succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose `init` returns an error.
    #[must_use]
    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    /// Hook counters shared by every copy.
    #[must_use]
    pub fn counts(&self) -> Arc<LifecycleCounts> {
        Arc::clone(&self.counts)
    }
}

impl StageMeta for LifecycleRecorder {
    fn create(&self, _copy: usize) -> Box<dyn Stage> {
        Box::new(self.clone())
    }
}

impl Stage for LifecycleRecorder {
    fn init(&mut self, _ctx: &mut StepContext) -> Result<bool, StepError> {
        self.counts.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(StepError::failed("init configured to fail"));
        }
        Ok(true)
    }

    fn transform(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        self.counts.transforms.fetch_add(1, Ordering::SeqCst);
        match ctx.get_row()? {
            Some(row) => {
                ctx.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dispose(&mut self, _ctx: &mut StepContext) {
        self.counts.disposes.fetch_add(1, Ordering::SeqCst);
    }
}
