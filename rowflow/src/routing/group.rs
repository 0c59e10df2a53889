use super::Distribution;
use crate::channel::Channel;
use crate::core::{Row, RowShape};
use crate::errors::{ChannelError, SchemaError};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

/// The channels of one outgoing hop, one per consuming copy in scope.
#[derive(Debug)]
pub struct OutputGroup {
    stage: String,
    channels: Vec<Arc<Channel>>,
    distribution: Distribution,
    partition_index: Option<usize>,
    next: usize,
}

impl OutputGroup {
    /// Creates a group over `channels`.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        channels: Vec<Arc<Channel>>,
        distribution: Distribution,
    ) -> Self {
        Self {
            stage: stage.into(),
            channels,
            distribution,
            partition_index: None,
            next: 0,
        }
    }

    /// The consuming stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The channels of this group.
    #[must_use]
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// Freezes `shape` on every channel and resolves the partitioning field.
    pub fn bind_shape(&mut self, shape: &Arc<RowShape>) -> Result<(), ChannelError> {
        for channel in &self.channels {
            channel.freeze_shape(shape)?;
        }
        if let Distribution::Partitioned { field } = &self.distribution {
            self.partition_index = Some(shape.require(field)?);
        }
        Ok(())
    }

    /// Sends `row` according to the distribution. Returns the channels written.
    pub fn send(&mut self, row: Row) -> Result<usize, ChannelError> {
        match self.channels.len() {
            0 => Ok(0),
            1 => {
                self.channels[0].push(row)?;
                Ok(1)
            }
            n => match &self.distribution {
                Distribution::RoundRobin => {
                    let target = self.next;
                    self.next = (self.next + 1) % n;
                    self.channels[target].push(row)?;
                    Ok(1)
                }
                Distribution::CopyToAll => {
                    for channel in &self.channels {
                        channel.push(row.clone())?;
                    }
                    Ok(n)
                }
                Distribution::Partitioned { field } => {
                    let index = self
                        .partition_index
                        .ok_or_else(|| SchemaError::new(format!(
                            "Partitioning field '{field}' has not been resolved"
                        )))?;
                    let target = partition_of(&row, index, n);
                    self.channels[target].push(row)?;
                    Ok(1)
                }
            },
        }
    }

    /// Closes the producer side of every channel.
    pub fn close(&self) {
        for channel in &self.channels {
            channel.close_producer();
        }
    }
}

/// The copy receiving `row` when partitioning by the value at `index`.
#[must_use]
pub fn partition_of(row: &Row, index: usize, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    if let Some(value) = row.get(index) {
        value.hash_into(&mut hasher);
    }
    let partitions = u64::try_from(partitions.max(1)).unwrap_or(u64::MAX);
    usize::try_from(hasher.finish() % partitions).unwrap_or(0)
}
