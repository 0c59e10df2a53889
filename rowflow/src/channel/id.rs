use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a channel: one producer endpoint, one consumer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    /// Producing stage.
    pub from_stage: String,
    /// Producing copy.
    pub from_copy: usize,
    /// Consuming stage.
    pub to_stage: String,
    /// Consuming copy.
    pub to_copy: usize,
    /// Logical target name, for named-target and error hops.
    pub target: Option<String>,
}

impl ChannelId {
    /// Creates a channel id for a default hop.
    #[must_use]
    pub fn new(
        from_stage: impl Into<String>,
        from_copy: usize,
        to_stage: impl Into<String>,
        to_copy: usize,
    ) -> Self {
        Self {
            from_stage: from_stage.into(),
            from_copy,
            to_stage: to_stage.into(),
            to_copy,
            target: None,
        }
    }

    /// Sets the logical target name.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from_stage, self.from_copy, self.to_stage, self.to_copy
        )?;
        if let Some(target) = &self.target {
            write!(f, " [{target}]")?;
        }
        Ok(())
    }
}
