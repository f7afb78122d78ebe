/// Scalar values stored in tables and produced by views.
///
/// A `Value` is nullable by construction: `Value::Null` is a regular member
/// of the domain and flows through arithmetic instead of failing it.

use crate::error::{Result, ViewError};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    String,
    Bool,
    /// Milliseconds since the Unix epoch
    Timestamp,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
            ColumnType::Bool => "BOOL",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Returns true if a non-null `value` can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Int, Value::Int(_))
                | (ColumnType::Float, Value::Float(_))
                | (ColumnType::String, Value::String(_))
                | (ColumnType::Bool, Value::Bool(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
        )
    }
}

/// Value enum covering every supported scalar type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Timestamp(i64),
    Null,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Int(_) => Some(ColumnType::Int),
            Value::Float(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::String),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Null => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.column_type().map_or("NULL", |t| t.name())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; ints are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Apply an arithmetic operator. NULL on either side yields NULL, and so
    /// does division by zero.
    pub fn arith(&self, op: ArithOp, rhs: &Value) -> Result<Value> {
        let overflow = || ViewError::Overflow(op.symbol());

        match (self, rhs) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),

            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    ArithOp::Add => a.checked_add(*b),
                    ArithOp::Sub => a.checked_sub(*b),
                    ArithOp::Mul => a.checked_mul(*b),
                    ArithOp::Div => {
                        if *b == 0 {
                            return Ok(Value::Null);
                        }
                        a.checked_div(*b)
                    }
                };
                result.map(Value::Int).ok_or_else(overflow)
            }

            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                // Both sides are numeric here
                let a = self.as_f64().unwrap_or_default();
                let b = rhs.as_f64().unwrap_or_default();
                let result = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => {
                        if b == 0.0 {
                            return Ok(Value::Null);
                        }
                        a / b
                    }
                };
                Ok(Value::Float(result))
            }

            (Value::Timestamp(t), Value::Int(ms)) => match op {
                ArithOp::Add => t.checked_add(*ms).map(Value::Timestamp).ok_or_else(overflow),
                ArithOp::Sub => t.checked_sub(*ms).map(Value::Timestamp).ok_or_else(overflow),
                _ => Err(self.invalid_operands(op, rhs)),
            },
            (Value::Int(ms), Value::Timestamp(t)) if op == ArithOp::Add => {
                t.checked_add(*ms).map(Value::Timestamp).ok_or_else(overflow)
            }
            (Value::Timestamp(a), Value::Timestamp(b)) if op == ArithOp::Sub => {
                a.checked_sub(*b).map(Value::Int).ok_or_else(overflow)
            }

            _ => Err(self.invalid_operands(op, rhs)),
        }
    }

    pub fn negate(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Int(v) => v.checked_neg().map(Value::Int).ok_or(ViewError::Overflow("-")),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(ViewError::InvalidOperands {
                op: "unary -",
                left: other.type_name().to_string(),
                right: "(none)".to_string(),
            }),
        }
    }

    /// SQL comparison: `None` when either side is NULL or the types cannot be
    /// compared. Ints and floats compare numerically.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn invalid_operands(&self, op: ArithOp, rhs: &Value) -> ViewError {
        ViewError::InvalidOperands {
            op: op.symbol(),
            left: self.type_name().to_string(),
            right: rhs.type_name().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "'{}'", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "@{}", v),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
