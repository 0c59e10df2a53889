//! Row shapes: the field-name/type contract for rows on one link.

use super::{Row, Value};
use crate::errors::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Boolean field.
    Boolean,
    /// Integer field.
    Integer,
    /// Floating point field.
    Number,
    /// String field.
    String,
    /// Timestamp field.
    Date,
    /// Binary field.
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Date => write!(f, "date"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Descriptor of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Field name, unique within a shape.
    pub name: String,
    /// Semantic type.
    pub value_type: ValueType,
    /// Display length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Display precision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Conversion mask (date or number format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Name of the stage that introduced the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl FieldMeta {
    /// Creates a new field descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
            format: None,
            origin: None,
        }
    }

    /// Sets the display length.
    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the display precision.
    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Sets the conversion mask.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Sets the originating stage.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Ordered list of field descriptors.
///
/// Two shapes are *compatible* when they agree positionally on field names
/// and types; display metadata is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowShape {
    fields: Vec<FieldMeta>,
}

impl RowShape {
    /// Creates an empty shape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a shape builder.
    #[must_use]
    pub fn builder() -> RowShapeBuilder {
        RowShapeBuilder::default()
    }

    /// Builds a shape from field descriptors, rejecting duplicate names.
    pub fn from_fields(fields: Vec<FieldMeta>) -> Result<Self, SchemaError> {
        let mut shape = Self::new();
        for field in fields {
            shape.add_field(field)?;
        }
        Ok(shape)
    }

    /// Appends a field.
    pub fn add_field(&mut self, field: FieldMeta) -> Result<(), SchemaError> {
        if self.index_of(&field.name).is_some() {
            return Err(SchemaError::duplicate_field(&field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Returns a new shape with `other`'s fields appended.
    pub fn merged(&self, other: &Self) -> Result<Self, SchemaError> {
        let mut shape = self.clone();
        for field in &other.fields {
            shape.add_field(field.clone())?;
        }
        Ok(shape)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the shape has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in order.
    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Position of the named field.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the named field, or a schema error naming it.
    pub fn require(&self, name: &str) -> Result<usize, SchemaError> {
        self.index_of(name)
            .ok_or_else(|| SchemaError::missing_field(name, self))
    }

    /// Returns true if both shapes agree positionally on names and types.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && a.value_type == b.value_type)
    }

    /// Checks arity only.
    pub fn check_arity(&self, row: &Row) -> Result<(), SchemaError> {
        if row.len() == self.fields.len() {
            Ok(())
        } else {
            Err(SchemaError::arity(self.fields.len(), row.len()))
        }
    }

    /// Checks arity and that every non-null value matches its field type.
    pub fn validate_row(&self, row: &Row) -> Result<(), SchemaError> {
        self.check_arity(row)?;
        for (field, value) in self.fields.iter().zip(row.values()) {
            if !value.fits(field.value_type) {
                return Err(SchemaError::type_mismatch(
                    &field.name,
                    field.value_type,
                    value.value_type(),
                ));
            }
        }
        Ok(())
    }

    /// Returns the value of the named field in `row`.
    #[must_use]
    pub fn value_of<'r>(&self, row: &'r Row, name: &str) -> Option<&'r Value> {
        self.index_of(name).and_then(|i| row.get(i))
    }
}

impl fmt::Display for RowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", field.name, field.value_type)?;
        }
        write!(f, "]")
    }
}

/// Fluent builder for [`RowShape`].
#[derive(Debug, Default)]
pub struct RowShapeBuilder {
    fields: Vec<FieldMeta>,
}

impl RowShapeBuilder {
    /// Adds a plain field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.fields.push(FieldMeta::new(name, value_type));
        self
    }

    /// Adds a fully described field.
    #[must_use]
    pub fn meta(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    /// Builds the shape, rejecting duplicate names.
    pub fn build(self) -> Result<RowShape, SchemaError> {
        RowShape::from_fields(self.fields)
    }
}
