//! Error-row construction and rejection limits for error hops.

use crate::core::{FieldMeta, Row, RowShape, Value, ValueType};
use crate::errors::{SchemaError, StepError};
use serde::{Deserialize, Serialize};

/// Name of the appended error-count field.
pub const ERROR_COUNT_FIELD: &str = "error_count";
/// Name of the appended error-description field.
pub const ERROR_DESCRIPTIONS_FIELD: &str = "error_descriptions";
/// Name of the appended offending-fields field.
pub const ERROR_FIELDS_FIELD: &str = "error_fields";
/// Name of the appended error-code field.
pub const ERROR_CODES_FIELD: &str = "error_codes";

/// A row-level error reported by a stage through `put_error`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowError {
    /// Number of problems found in the row.
    pub count: i64,
    /// Human-readable description.
    pub description: String,
    /// Offending field names.
    pub fields: Vec<String>,
    /// Machine-readable code.
    pub code: String,
}

impl RowError {
    /// A single problem with a description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            count: 1,
            description: description.into(),
            fields: Vec::new(),
            code: String::new(),
        }
    }

    /// Sets the offending fields.
    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Sets the problem count.
    #[must_use]
    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Returns `row` with the four error fields appended.
    #[must_use]
    pub fn annotate(&self, row: &Row) -> Row {
        row.extended([
            Value::Integer(self.count),
            Value::String(self.description.clone()),
            Value::String(self.fields.join(",")),
            Value::String(self.code.clone()),
        ])
    }
}

/// The shape of error rows derived from `base`.
pub fn error_shape(base: &RowShape) -> Result<RowShape, SchemaError> {
    let mut shape = base.clone();
    shape.add_field(FieldMeta::new(ERROR_COUNT_FIELD, ValueType::Integer))?;
    shape.add_field(FieldMeta::new(ERROR_DESCRIPTIONS_FIELD, ValueType::String))?;
    shape.add_field(FieldMeta::new(ERROR_FIELDS_FIELD, ValueType::String))?;
    shape.add_field(FieldMeta::new(ERROR_CODES_FIELD, ValueType::String))?;
    Ok(shape)
}

/// Limits on rows rejected to an error hop.
///
/// Crossing a limit fails the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorHandling {
    /// Maximum rejected rows before failing.
    #[serde(default)]
    pub max_errors: Option<u64>,
    /// Maximum rejected rows as a percentage of rows read.
    #[serde(default)]
    pub max_percent_errors: Option<u8>,
    /// Rows that must be read before the percentage limit applies.
    #[serde(default)]
    pub min_rows_for_percent: u64,
}

impl ErrorHandling {
    /// No limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the absolute limit.
    #[must_use]
    pub fn with_max_errors(mut self, max: u64) -> Self {
        self.max_errors = Some(max);
        self
    }

    /// Sets the percentage limit.
    #[must_use]
    pub fn with_max_percent_errors(mut self, percent: u8, min_rows: u64) -> Self {
        self.max_percent_errors = Some(percent);
        self.min_rows_for_percent = min_rows;
        self
    }

    /// Checks the limits after a rejection.
    pub fn check(&self, rejected: u64, read: u64) -> Result<(), StepError> {
        if let Some(max) = self.max_errors {
            if rejected > max {
                return Err(StepError::TooManyRejected {
                    rejected,
                    limit: max.to_string(),
                });
            }
        }
        if let Some(percent) = self.max_percent_errors {
            if read > 0 && read >= self.min_rows_for_percent {
                let ratio = rejected.saturating_mul(100) / read;
                if ratio > u64::from(percent) {
                    return Err(StepError::TooManyRejected {
                        rejected,
                        limit: format!("{percent}% of {read} rows"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_annotate_appends_fields() {
        let err = RowError::new("negative amount")
            .with_fields(["amount"])
            .with_code("NEG");
        let annotated = err.annotate(&row![1, -5]);
        assert_eq!(annotated.len(), 6);
        assert_eq!(annotated[2], Value::Integer(1));
        assert_eq!(annotated[3].as_str(), Some("negative amount"));
        assert_eq!(annotated[4].as_str(), Some("amount"));
        assert_eq!(annotated[5].as_str(), Some("NEG"));
    }

    #[test]
    fn test_error_shape() {
        let base = RowShape::builder()
            .field("id", ValueType::Integer)
            .build()
            .unwrap();
        let shape = error_shape(&base).unwrap();
        assert_eq!(
            shape.names().collect::<Vec<_>>(),
            vec!["id", "error_count", "error_descriptions", "error_fields", "error_codes"]
        );
        assert!(shape.validate_row(&RowError::new("x").annotate(&row![1])).is_ok());
    }

    #[test]
    fn test_absolute_limit() {
        let limits = ErrorHandling::new().with_max_errors(2);
        assert!(limits.check(2, 10).is_ok());
        assert!(matches!(
            limits.check(3, 10),
            Err(StepError::TooManyRejected { rejected: 3, .. })
        ));
    }

    #[test]
    fn test_percent_limit_waits_for_min_rows() {
        let limits = ErrorHandling::new().with_max_percent_errors(10, 100);
        assert!(limits.check(5, 10).is_ok());
        assert!(limits.check(10, 100).is_ok());
        assert!(limits.check(11, 100).is_err());
    }
}
