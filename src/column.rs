/// Column storage for base tables.
///
/// A Column is an array-like random-access container indexed by integer.
/// Every column has a declared type; nullable columns may also hold
/// `Value::Null`.

use crate::error::{Result, ViewError};
use crate::value::{ColumnType, Value};
use std::fmt::Debug;

pub struct Column {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    values: Vec<Value>,
}

impl Column {
    pub fn new(name: String, column_type: ColumnType, nullable: bool) -> Self {
        Column {
            name,
            column_type,
            nullable,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Validate a value against the column's type and nullability
    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(ViewError::NotNullable(self.name.clone()));
            }
            return Ok(());
        }

        if !self.column_type.accepts(value) {
            return Err(ViewError::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type.name().to_string(),
                got: value.type_name().to_string(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(ViewError::RowOutOfRange {
            index,
            len: self.values.len(),
        })
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<Value> {
        self.validate(&value)?;
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ViewError::RowOutOfRange { index, len })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Append a value. Callers validate first so that a failing row leaves
    /// every column untouched.
    pub(crate) fn append_unchecked(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn delete(&mut self, index: usize) -> Result<Value> {
        if index >= self.values.len() {
            return Err(ViewError::RowOutOfRange {
                index,
                len: self.values.len(),
            });
        }
        Ok(self.values.remove(index))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.values.iter()
    }
}

impl Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {:?}, nullable: {}, len: {} }}",
            self.name,
            self.column_type,
            self.nullable,
            self.len()
        )
    }
}
