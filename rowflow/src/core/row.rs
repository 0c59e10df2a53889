//! Immutable rows.

use super::Value;
use std::ops::Index;
use std::sync::Arc;

/// An ordered, fixed-arity tuple of values.
///
/// Rows are cheap to clone: the values are shared. Any mutation goes through
/// copy-on-write, so a row handed to a channel is never changed under the
/// consumer's feet even when the same row was forked to several targets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Arc<Vec<Value>>,
}

impl Row {
    /// Creates a row from values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// All values in order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Replaces the value at `index`, copying the storage if it is shared.
    ///
    /// Returns false if `index` is out of range.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match Arc::make_mut(&mut self.values).get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Returns a new row with `extra` appended.
    #[must_use]
    pub fn extended(&self, extra: impl IntoIterator<Item = Value>) -> Self {
        let mut values = Vec::clone(&self.values);
        values.extend(extra);
        Self::new(values)
    }

    /// Consumes the row and returns its values, copying only if shared.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        Arc::try_unwrap(self.values).unwrap_or_else(|shared| Vec::clone(&shared))
    }

    /// Returns true if both rows share the same storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Builds a [`Row`] from expressions convertible into [`Value`].
///
/// ```rust,ignore
/// let r = row![1, "ann", true];
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::core::Row::default()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::core::Row::new(vec![$($crate::core::Value::from($value)),+])
    };
}
