//! Logical schema of a time-series table.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::sensors::{DType, Field, Value};

/// Every table is keyed by this column.
pub const TIME_COLUMN: &str = "time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }

    pub fn time() -> Self {
        Self::new(TIME_COLUMN, DType::Timestamp)
    }
}

impl From<&Field> for Column {
    fn from(field: &Field) -> Self {
        Self::new(field.name, field.dtype)
    }
}

/// Query result, one ordered series per column.
pub type ColumnData = BTreeMap<String, Vec<Value>>;
