use super::OutputGroup;
use crate::channel::Channel;
use crate::core::{Row, RowShape};
use crate::errors::{ChannelError, StepError};
use std::sync::Arc;

/// Pre-resolved reference to a named target.
///
/// Obtained once through the step context; sending through a handle never
/// compares strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetHandle(usize);

impl TargetHandle {
    /// Position of the target in the stage's declared target list.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Output mode of a node, fixed at build time.
#[derive(Debug)]
pub enum RouterMode {
    /// Every row goes to every default hop.
    Default(Vec<OutputGroup>),
    /// Rows go only to explicitly selected targets. `None` marks an
    /// unconfigured target.
    Named {
        /// Declared target names, indexed by [`TargetHandle`].
        names: Vec<String>,
        /// The resolved hop of each target.
        groups: Vec<Option<OutputGroup>>,
    },
}

/// Per-node dispatch of produced rows to output channels.
#[derive(Debug)]
pub struct Router {
    mode: RouterMode,
    error: Option<OutputGroup>,
}

impl Router {
    /// A router in default mode.
    #[must_use]
    pub fn default_flow(groups: Vec<OutputGroup>) -> Self {
        Self {
            mode: RouterMode::Default(groups),
            error: None,
        }
    }

    /// A router in named-target mode.
    #[must_use]
    pub fn named(targets: Vec<(String, Option<OutputGroup>)>) -> Self {
        let (names, groups) = targets.into_iter().unzip();
        Self {
            mode: RouterMode::Named { names, groups },
            error: None,
        }
    }

    /// Attaches the error hop.
    #[must_use]
    pub fn with_error_group(mut self, group: OutputGroup) -> Self {
        self.error = Some(group);
        self
    }

    /// The output mode.
    #[must_use]
    pub fn mode(&self) -> &RouterMode {
        &self.mode
    }

    /// Returns true if rows can leave this node through any channel.
    #[must_use]
    pub fn has_outputs(&self) -> bool {
        self.error.is_some() || self.data_groups().next().is_some()
    }

    /// Returns true if an error hop is attached.
    #[must_use]
    pub fn has_error_hop(&self) -> bool {
        self.error.is_some()
    }

    /// Resolves a declared target name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<TargetHandle> {
        match &self.mode {
            RouterMode::Named { names, .. } => names.iter().position(|n| n == name).map(TargetHandle),
            RouterMode::Default(_) => None,
        }
    }

    /// Freezes the output shape on every data channel.
    pub fn bind_shape(&mut self, shape: &Arc<RowShape>) -> Result<(), ChannelError> {
        for group in self.data_groups_mut() {
            group.bind_shape(shape)?;
        }
        Ok(())
    }

    /// Freezes the error-row shape on the error channels.
    pub fn bind_error_shape(&mut self, shape: &Arc<RowShape>) -> Result<(), ChannelError> {
        match &mut self.error {
            Some(group) => group.bind_shape(shape),
            None => Ok(()),
        }
    }

    /// Sends a row along every default hop.
    ///
    /// Returns the number of channels written; zero means the row was
    /// dropped at a terminal node.
    pub fn send(&mut self, row: Row) -> Result<usize, StepError> {
        let RouterMode::Default(groups) = &mut self.mode else {
            return Err(StepError::Routing(
                "put_row on a stage that routes to named targets".to_string(),
            ));
        };
        let mut written = 0;
        if let Some((last, rest)) = groups.split_last_mut() {
            for group in rest {
                written += group.send(row.clone())?;
            }
            written += last.send(row)?;
        }
        Ok(written)
    }

    /// Sends a row to one named target. Returns false if the target is
    /// unconfigured and the row was dropped.
    pub fn send_to(&mut self, handle: TargetHandle, row: Row) -> Result<bool, StepError> {
        let RouterMode::Named { groups, .. } = &mut self.mode else {
            return Err(StepError::Routing(
                "put_row_to on a stage without named targets".to_string(),
            ));
        };
        match groups.get_mut(handle.0) {
            Some(Some(group)) => Ok(group.send(row)? > 0),
            Some(None) => Ok(false),
            None => Err(StepError::Routing(format!(
                "target handle {} is out of range",
                handle.0
            ))),
        }
    }

    /// Sends an annotated row to the error hop.
    pub fn send_error(&mut self, row: Row) -> Result<(), StepError> {
        match &mut self.error {
            Some(group) => {
                group.send(row)?;
                Ok(())
            }
            None => Err(StepError::Routing(
                "put_error on a stage without an error hop".to_string(),
            )),
        }
    }

    /// Closes the producer side of every output channel.
    pub fn close(&self) {
        for group in self.data_groups() {
            group.close();
        }
        if let Some(group) = &self.error {
            group.close();
        }
    }

    /// Every output channel, error channels included.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.data_groups()
            .chain(self.error.iter())
            .flat_map(|g| g.channels().iter().cloned())
            .collect()
    }

    fn data_groups(&self) -> Box<dyn Iterator<Item = &OutputGroup> + '_> {
        match &self.mode {
            RouterMode::Default(groups) => Box::new(groups.iter()),
            RouterMode::Named { groups, .. } => Box::new(groups.iter().flatten()),
        }
    }

    fn data_groups_mut(&mut self) -> Box<dyn Iterator<Item = &mut OutputGroup> + '_> {
        match &mut self.mode {
            RouterMode::Default(groups) => Box::new(groups.iter_mut()),
            RouterMode::Named { groups, .. } => Box::new(groups.iter_mut().flatten()),
        }
    }
}
