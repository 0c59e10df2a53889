use crate::cancellation::CancellationToken;
use crate::channel::{Channel, PopOutcome};
use crate::core::{Row, RowShape};
use crate::errors::StepError;
use std::sync::Arc;
use std::time::Duration;

/// Handle to an input stream taken out of the default rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputHandle(pub(crate) usize);

/// A set of input channels read in rotation.
///
/// The reader sticks to one channel for up to `block` rows, moves on as soon
/// as that channel stays empty for one wait period, and drops channels whose
/// producer is done.
#[derive(Debug)]
pub(crate) struct InputSet {
    stage: Option<String>,
    channels: Vec<Arc<Channel>>,
    current: usize,
    in_block: usize,
    shape: Option<Arc<RowShape>>,
}

impl InputSet {
    pub(crate) fn new(stage: Option<String>, channels: Vec<Arc<Channel>>) -> Self {
        Self {
            stage,
            channels,
            current: 0,
            in_block: 0,
            shape: None,
        }
    }

    pub(crate) fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub(crate) fn shape(&self) -> Option<&Arc<RowShape>> {
        self.shape.as_ref()
    }

    /// Moves every channel fed by `stage` into a new set.
    pub(crate) fn split_off(&mut self, stage: &str) -> Self {
        let (taken, kept) = self
            .channels
            .drain(..)
            .partition(|c| c.id().from_stage == stage);
        self.channels = kept;
        self.current = 0;
        self.in_block = 0;
        Self::new(Some(stage.to_string()), taken)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Reads the next row, or `None` once every channel is exhausted.
    pub(crate) fn next(
        &mut self,
        block: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StepError> {
        loop {
            if cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            if self.channels.is_empty() {
                return Ok(None);
            }
            if self.in_block >= block {
                self.rotate();
            }

            let channel = &self.channels[self.current];
            match channel.pop_timeout(wait)? {
                PopOutcome::Row(row) => {
                    self.in_block += 1;
                    if self.shape.is_none() {
                        self.shape = channel.shape();
                    }
                    return Ok(Some(row));
                }
                PopOutcome::Done => {
                    self.channels.remove(self.current);
                    if self.current >= self.channels.len() {
                        self.current = 0;
                    }
                    self.in_block = 0;
                }
                PopOutcome::Empty => self.rotate(),
            }
        }
    }

    fn rotate(&mut self) {
        self.in_block = 0;
        if !self.channels.is_empty() {
            self.current = (self.current + 1) % self.channels.len();
        }
    }
}
