/// Aggregate functions and their running accumulators.
///
/// NULL inputs are skipped by every function except `COUNT(*)`. A function
/// that has seen no non-null input finishes as NULL, except the counts which
/// finish as 0.

use crate::error::{Result, ViewError};
use crate::value::{ArithOp, Value};
use std::cmp::Ordering;

/// Supported aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// `COUNT(*)`: every row in the group
    CountStar,
    /// `COUNT(expr)`: rows where `expr` is not NULL
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::CountStar | AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Count(i64),
    Sum { total: Value, non_null: usize },
    Extremum { best: Value, keep: Ordering },
    Avg { sum: f64, count: usize },
}

/// Running state of one aggregate over one group
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunction,
    state: State,
}

impl Accumulator {
    pub fn new(func: AggregateFunction) -> Self {
        let state = match func {
            AggregateFunction::CountStar | AggregateFunction::Count => State::Count(0),
            AggregateFunction::Sum => State::Sum {
                total: Value::Null,
                non_null: 0,
            },
            AggregateFunction::Min => State::Extremum {
                best: Value::Null,
                keep: Ordering::Less,
            },
            AggregateFunction::Max => State::Extremum {
                best: Value::Null,
                keep: Ordering::Greater,
            },
            AggregateFunction::Avg => State::Avg { sum: 0.0, count: 0 },
        };
        Accumulator { func, state }
    }

    pub fn function(&self) -> AggregateFunction {
        self.func
    }

    /// Fold one row's argument value into the accumulator.
    /// For `COUNT(*)` the value is ignored.
    pub fn update(&mut self, value: &Value) -> Result<()> {
        if value.is_null() && self.func != AggregateFunction::CountStar {
            return Ok(());
        }

        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Sum { total, non_null } => {
                *total = if total.is_null() {
                    check_numeric(self.func, value)?;
                    value.clone()
                } else {
                    total.arith(ArithOp::Add, value)?
                };
                *non_null += 1;
            }
            State::Extremum { best, keep } => {
                if best.is_null() {
                    *best = value.clone();
                } else {
                    let ordering = value
                        .sql_cmp(best)
                        .ok_or_else(|| incomparable(self.func, value, best))?;
                    if ordering == *keep {
                        *best = value.clone();
                    }
                }
            }
            State::Avg { sum, count } => {
                *sum += value
                    .as_f64()
                    .ok_or_else(|| incomparable(self.func, value, &Value::Float(0.0)))?;
                *count += 1;
            }
        }
        Ok(())
    }

    /// Remove one previously folded value. Returns `Ok(false)` when the
    /// accumulator cannot express the removal exactly and must be rebuilt
    /// from the group's remaining rows: an extremum losing its current best
    /// value, or any float sum or average, where subtraction does not undo
    /// an earlier addition.
    pub fn retract(&mut self, value: &Value) -> Result<bool> {
        if value.is_null() && self.func != AggregateFunction::CountStar {
            return Ok(true);
        }

        match &mut self.state {
            State::Count(n) => *n -= 1,
            State::Sum { total, .. }
                if matches!(total, Value::Float(_)) || matches!(value, Value::Float(_)) =>
            {
                return Ok(false);
            }
            State::Sum { total, non_null } => {
                *non_null -= 1;
                *total = if *non_null == 0 {
                    Value::Null
                } else {
                    total.arith(ArithOp::Sub, value)?
                };
            }
            State::Extremum { best, .. } => {
                if value.sql_cmp(best) == Some(Ordering::Equal) {
                    return Ok(false);
                }
            }
            State::Avg { .. } => return Ok(false),
        }
        Ok(true)
    }

    /// Reduced value of the group
    pub fn finish(&self) -> Value {
        match &self.state {
            State::Count(n) => Value::Int(*n),
            State::Sum { total, .. } => total.clone(),
            State::Extremum { best, .. } => best.clone(),
            State::Avg { count: 0, .. } => Value::Null,
            State::Avg { sum, count } => Value::Float(*sum / *count as f64),
        }
    }
}

fn check_numeric(func: AggregateFunction, value: &Value) -> Result<()> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(()),
        other => Err(incomparable(func, other, &Value::Int(0))),
    }
}

fn incomparable(func: AggregateFunction, value: &Value, other: &Value) -> ViewError {
    ViewError::InvalidOperands {
        op: func.name(),
        left: value.type_name().to_string(),
        right: other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(func: AggregateFunction, values: &[Value]) -> Value {
        let mut acc = Accumulator::new(func);
        for v in values {
            acc.update(v).unwrap();
        }
        acc.finish()
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(run(AggregateFunction::CountStar, &[]), Value::Int(0));
        assert_eq!(run(AggregateFunction::Count, &[]), Value::Int(0));
        assert_eq!(run(AggregateFunction::Sum, &[]), Value::Null);
        assert_eq!(run(AggregateFunction::Min, &[]), Value::Null);
        assert_eq!(run(AggregateFunction::Max, &[]), Value::Null);
        assert_eq!(run(AggregateFunction::Avg, &[]), Value::Null);
    }

    #[test]
    fn test_nulls_are_skipped() {
        let values = [Value::Int(2), Value::Null, Value::Int(3)];
        assert_eq!(run(AggregateFunction::CountStar, &values), Value::Int(3));
        assert_eq!(run(AggregateFunction::Count, &values), Value::Int(2));
        assert_eq!(run(AggregateFunction::Sum, &values), Value::Int(5));
        assert_eq!(run(AggregateFunction::Avg, &values), Value::Float(2.5));

        // All NULL sums to NULL
        assert_eq!(run(AggregateFunction::Sum, &[Value::Null, Value::Null]), Value::Null);
    }

    #[test]
    fn test_extremum() {
        let values = [Value::Int(6), Value::Int(7), Value::Null];
        assert_eq!(run(AggregateFunction::Min, &values), Value::Int(6));
        assert_eq!(run(AggregateFunction::Max, &values), Value::Int(7));

        let names = [Value::from("B"), Value::from("A")];
        assert_eq!(run(AggregateFunction::Min, &names), Value::from("A"));
    }

    #[test]
    fn test_type_errors() {
        let mut acc = Accumulator::new(AggregateFunction::Sum);
        assert!(acc.update(&Value::from("x")).is_err());

        let mut acc = Accumulator::new(AggregateFunction::Max);
        acc.update(&Value::Int(1)).unwrap();
        assert!(acc.update(&Value::from("x")).is_err());
    }

    #[test]
    fn test_retract() {
        let mut sum = Accumulator::new(AggregateFunction::Sum);
        sum.update(&Value::Int(100)).unwrap();
        sum.update(&Value::Int(150)).unwrap();
        assert!(sum.retract(&Value::Int(100)).unwrap());
        assert_eq!(sum.finish(), Value::Int(150));
        assert!(sum.retract(&Value::Int(150)).unwrap());
        assert_eq!(sum.finish(), Value::Null);

        let mut max = Accumulator::new(AggregateFunction::Max);
        max.update(&Value::Int(1)).unwrap();
        max.update(&Value::Int(5)).unwrap();
        assert!(max.retract(&Value::Int(1)).unwrap());
        assert!(!max.retract(&Value::Int(5)).unwrap());
    }

    #[test]
    fn test_float_sum_and_avg_refuse_retract() {
        let mut sum = Accumulator::new(AggregateFunction::Sum);
        sum.update(&Value::Float(1e16)).unwrap();
        sum.update(&Value::Float(1.0)).unwrap();
        assert!(!sum.retract(&Value::Float(1e16)).unwrap());

        // A float value never retracts from an int total either
        let mut sum = Accumulator::new(AggregateFunction::Sum);
        sum.update(&Value::Int(3)).unwrap();
        assert!(!sum.retract(&Value::Float(3.0)).unwrap());

        let mut avg = Accumulator::new(AggregateFunction::Avg);
        avg.update(&Value::Int(2)).unwrap();
        avg.update(&Value::Int(4)).unwrap();
        assert!(!avg.retract(&Value::Int(2)).unwrap());

        // NULLs were never folded in, so removing one is exact
        assert!(avg.retract(&Value::Null).unwrap());
    }
}
