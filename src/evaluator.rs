/// Aggregate view evaluation.
///
/// `materialize` turns a compiled view and a snapshot of base rows into an
/// ordered `ResultSet`:
///
/// 1. the filter is applied to each row (three-valued: only TRUE qualifies);
/// 2. qualifying rows are partitioned by grouping key, in order of each
///    group's first qualifying row;
/// 3. every aggregate slot is reduced per group;
/// 4. output expressions combine the reduced scalars, with NULL propagating
///    through arithmetic.
///
/// An ungrouped aggregate view always yields one row, even over zero rows.
/// The current time is an explicit argument, so evaluation is a pure
/// function of `(rows, now)`.

use crate::aggregate::Accumulator;
use crate::config::EvaluatorConfig;
use crate::definition::{CompiledView, ViewMode};
use crate::error::{Result, ViewError};
use crate::expr::{eval_expr, eval_predicate, EvalContext};
use crate::table::{Row, Table};
use crate::value::Value;
use log::{debug, trace};
use serde::Serialize;
use std::cell::Cell;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Clock
// ============================================================================

/// Source of the "current time" seen by `NOW()`
pub trait Clock {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        }
    }
}

/// Manually driven clock for deterministic evaluation
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    now: Cell<i64>,
}

impl FixedClock {
    pub fn new(now_millis: i64) -> Self {
        FixedClock {
            now: Cell::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.set(now_millis);
    }

    pub fn advance(&self, millis: i64) {
        self.now.set(self.now.get() + millis);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.get()
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultRow {
    values: Vec<Value>,
}

impl ResultRow {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Ordered rows of a materialized view
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&ResultRow> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Value of column `name` in row `index`
    pub fn get(&self, index: usize, name: &str) -> Result<&Value> {
        let col = self
            .column_index(name)
            .ok_or_else(|| ViewError::ColumnNotFound(name.to_string()))?;
        self.rows
            .get(index)
            .and_then(|row| row.get(col))
            .ok_or(ViewError::NoCurrentRow)
    }

    /// Export as a pretty-printed JSON array of objects.
    pub fn to_json(&self) -> Result<String> {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.values())
                    .map(|(name, value)| -> Result<(String, serde_json::Value)> {
                        Ok((name.clone(), serde_json::to_value(value)?))
                    })
                    .collect::<Result<serde_json::Map<_, _>>>()
            })
            .collect::<Result<_>>()?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

// ============================================================================
// Grouping state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    Timestamp(i64),
    /// NULL key; carries a per-row id when NULLs must stay distinct
    Null(u64),
}

type GroupKey = Vec<KeyPart>;

#[derive(Debug, Clone)]
struct Group {
    /// Values of the view's carried columns, taken from the first row
    first_row: Vec<Value>,
    accumulators: Vec<Accumulator>,
    rows: usize,
}

/// Running evaluation state of one view: groups in first-occurrence order,
/// or projected rows for a view without aggregates.
#[derive(Debug, Clone, Default)]
pub(crate) struct Grouping {
    groups: Vec<Group>,
    index: HashMap<GroupKey, usize>,
    projected: Vec<ResultRow>,
    next_null_id: u64,
}

impl Grouping {
    pub(crate) fn clear(&mut self) {
        self.groups.clear();
        self.index.clear();
        self.projected.clear();
    }

    fn group_key(
        &mut self,
        view: &CompiledView,
        lookup: &dyn Fn(&str) -> Option<Value>,
        config: &EvaluatorConfig,
    ) -> GroupKey {
        let mut null_id = None;
        view.group_by
            .iter()
            .map(|name| match lookup(name).unwrap_or(Value::Null) {
                Value::Int(v) => KeyPart::Int(v),
                // -0.0 and 0.0 are the same key
                Value::Float(v) => KeyPart::Float(if v == 0.0 { 0 } else { v.to_bits() }),
                Value::String(v) => KeyPart::Str(v),
                Value::Bool(v) => KeyPart::Bool(v),
                Value::Timestamp(v) => KeyPart::Timestamp(v),
                Value::Null if config.null_keys_distinct => {
                    let id = *null_id.get_or_insert_with(|| {
                        self.next_null_id += 1;
                        self.next_null_id
                    });
                    KeyPart::Null(id)
                }
                Value::Null => KeyPart::Null(0),
            })
            .collect()
    }

    /// Fold one base row into the state. Returns false when the row does not
    /// pass the filter.
    pub(crate) fn add_row(
        &mut self,
        view: &CompiledView,
        lookup: &dyn Fn(&str) -> Option<Value>,
        now: i64,
        config: &EvaluatorConfig,
    ) -> Result<bool> {
        let ctx = EvalContext {
            lookup,
            aggregates: &[],
            now,
        };
        if let Some(filter) = &view.filter {
            if !eval_predicate(filter, &ctx)? {
                return Ok(false);
            }
        }

        if view.mode() == ViewMode::Projection {
            let values = view
                .outputs
                .iter()
                .map(|output| eval_expr(output, &ctx))
                .collect::<Result<Vec<_>>>()?;
            self.projected.push(ResultRow { values });
            return Ok(true);
        }

        let key = self.group_key(view, lookup, config);
        let group_idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let first_row = view
                    .carried
                    .iter()
                    .map(|name| lookup(name).unwrap_or(Value::Null))
                    .collect();
                self.groups.push(Group {
                    first_row,
                    accumulators: view.slots.iter().map(|s| Accumulator::new(s.func)).collect(),
                    rows: 0,
                });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[group_idx];
        for (slot, acc) in view.slots.iter().zip(group.accumulators.iter_mut()) {
            let value = match &slot.arg {
                Some(arg) => eval_expr(arg, &ctx)?,
                None => Value::Null,
            };
            acc.update(&value)?;
        }
        group.rows += 1;
        Ok(true)
    }

    /// Remove one base row from an ungrouped aggregate. Returns false when
    /// the removal cannot be applied in place and the state must be rebuilt.
    pub(crate) fn retract_row(
        &mut self,
        view: &CompiledView,
        lookup: &dyn Fn(&str) -> Option<Value>,
        now: i64,
    ) -> Result<bool> {
        // Grouped views may reorder or drop groups; projections shift rows;
        // carried first-row values may change. All of these rebuild.
        if view.mode() != ViewMode::Aggregate || view.is_grouped() || !view.carried.is_empty() {
            return Ok(false);
        }

        let ctx = EvalContext {
            lookup,
            aggregates: &[],
            now,
        };
        if let Some(filter) = &view.filter {
            if !eval_predicate(filter, &ctx)? {
                return Ok(true);
            }
        }

        let group = match self.groups.first_mut() {
            Some(group) => group,
            None => return Ok(false),
        };
        for (slot, acc) in view.slots.iter().zip(group.accumulators.iter_mut()) {
            let value = match &slot.arg {
                Some(arg) => eval_expr(arg, &ctx)?,
                None => Value::Null,
            };
            if !acc.retract(&value)? {
                return Ok(false);
            }
        }
        group.rows -= 1;
        if group.rows == 0 {
            self.clear();
        }
        Ok(true)
    }

    /// Rebuild from every row of `table`.
    pub(crate) fn load_table(
        &mut self,
        view: &CompiledView,
        table: &Table,
        now: i64,
        config: &EvaluatorConfig,
    ) -> Result<()> {
        self.clear();
        let schema = table.schema();
        for row in 0..table.len() {
            let lookup = |name: &str| {
                schema
                    .get_column_index(name)
                    .and_then(|col| table.cell(row, col))
                    .cloned()
            };
            self.add_row(view, &lookup, now, config)?;
        }
        Ok(())
    }

    /// Produce the result rows for the current state.
    pub(crate) fn finish(&self, view: &CompiledView, now: i64) -> Result<ResultSet> {
        let columns = view.columns().to_vec();

        if view.mode() == ViewMode::Projection {
            return Ok(ResultSet {
                columns,
                rows: self.projected.clone(),
            });
        }

        let empty;
        let groups: &[Group] = if self.groups.is_empty() && !view.is_grouped() {
            // The empty-aggregate row
            empty = [Group {
                first_row: vec![Value::Null; view.carried.len()],
                accumulators: view.slots.iter().map(|s| Accumulator::new(s.func)).collect(),
                rows: 0,
            }];
            &empty
        } else {
            &self.groups
        };

        let rows = groups
            .iter()
            .map(|group| {
                let aggregates: Vec<Value> =
                    group.accumulators.iter().map(Accumulator::finish).collect();
                let lookup = |name: &str| {
                    view.carried
                        .iter()
                        .position(|c| c == name)
                        .and_then(|i| group.first_row.get(i))
                        .cloned()
                };
                let ctx = EvalContext {
                    lookup: &lookup,
                    aggregates: &aggregates,
                    now,
                };
                let values = view
                    .outputs
                    .iter()
                    .map(|output| eval_expr(output, &ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResultRow { values })
            })
            .collect::<Result<Vec<_>>>()?;

        trace!("view '{}': {} groups finished", view.name(), rows.len());
        Ok(ResultSet { columns, rows })
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Evaluate `view` over `rows` at time `now` (milliseconds since the epoch).
/// Columns missing from a row read as NULL.
pub fn materialize<'r, I>(
    view: &CompiledView,
    rows: I,
    now: i64,
    config: &EvaluatorConfig,
) -> Result<ResultSet>
where
    I: IntoIterator<Item = &'r Row>,
{
    let mut grouping = Grouping::default();
    let mut scanned = 0usize;
    for row in rows {
        let lookup = |name: &str| Some(row.get(name).cloned().unwrap_or(Value::Null));
        grouping.add_row(view, &lookup, now, config)?;
        scanned += 1;
    }

    let result = grouping.finish(view, now)?;
    debug!(
        "materialized view '{}': {} result rows from {} base rows",
        view.name(),
        result.len(),
        scanned
    );
    Ok(result)
}

/// Evaluate `view` over the current contents of `table`.
pub fn materialize_table(
    view: &CompiledView,
    table: &Table,
    now: i64,
    config: &EvaluatorConfig,
) -> Result<ResultSet> {
    let mut grouping = Grouping::default();
    grouping.load_table(view, table, now, config)?;
    let result = grouping.finish(view, now)?;
    debug!(
        "materialized view '{}' over table '{}': {} result rows",
        view.name(),
        table.name(),
        result.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ViewDefinition;
    use crate::table::Schema;
    use crate::value::ColumnType;

    fn schema() -> Schema {
        Schema::new(vec![
            ("name".to_string(), ColumnType::String, true),
            ("cost".to_string(), ColumnType::Int, true),
        ])
    }

    fn row(name: Option<&str>, cost: Option<i64>) -> Row {
        let mut row = HashMap::new();
        row.insert("name".to_string(), Value::from(name));
        row.insert("cost".to_string(), Value::from(cost));
        row
    }

    fn totals() -> CompiledView {
        ViewDefinition::new("totals")
            .column("name", "name")
            .unwrap()
            .column("s", "SUM(cost)")
            .unwrap()
            .group_by("name")
            .compile(&schema())
            .unwrap()
    }

    #[test]
    fn test_groups_follow_first_occurrence() {
        let rows = vec![
            row(Some("B"), Some(50)),
            row(Some("A"), Some(100)),
            row(Some("B"), Some(5)),
        ];
        let result = materialize(&totals(), &rows, 0, &EvaluatorConfig::default()).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0, "name").unwrap(), &Value::from("B"));
        assert_eq!(result.get(0, "s").unwrap(), &Value::Int(55));
        assert_eq!(result.get(1, "name").unwrap(), &Value::from("A"));
    }

    #[test]
    fn test_grouped_view_over_no_rows_is_empty() {
        let rows: Vec<Row> = Vec::new();
        let result = materialize(&totals(), &rows, 0, &EvaluatorConfig::default()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_null_keys() {
        let rows = vec![row(None, Some(1)), row(None, Some(2)), row(Some("A"), Some(3))];

        // Distinct by default
        let result = materialize(&totals(), &rows, 0, &EvaluatorConfig::default()).unwrap();
        assert_eq!(result.len(), 3);

        let config = EvaluatorConfig {
            null_keys_distinct: false,
            ..EvaluatorConfig::default()
        };
        let result = materialize(&totals(), &rows, 0, &config).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.get(0, "name").unwrap().is_null());
        assert_eq!(result.get(0, "s").unwrap(), &Value::Int(3));
    }

    #[test]
    fn test_partial_null_sum_ignores_nulls() {
        // Mixed NULL / non-NULL inputs follow SQL: NULLs are skipped
        let view = ViewDefinition::new("v")
            .column("s", "SUM(cost)")
            .unwrap()
            .compile(&schema())
            .unwrap();
        let rows = vec![row(None, Some(4)), row(None, None)];
        let result = materialize(&view, &rows, 0, &EvaluatorConfig::default()).unwrap();
        assert_eq!(result.get(0, "s").unwrap(), &Value::Int(4));
    }

    #[test]
    fn test_projection_view() {
        let view = ViewDefinition::new("v")
            .column("name", "name")
            .unwrap()
            .column("double", "cost * 2")
            .unwrap()
            .filter("cost > 60")
            .unwrap()
            .compile(&schema())
            .unwrap();
        let rows = vec![row(Some("A"), Some(100)), row(Some("B"), Some(50))];
        let result = materialize(&view, &rows, 0, &EvaluatorConfig::default()).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0, "double").unwrap(), &Value::Int(200));
    }

    #[test]
    fn test_result_set_lookup_errors() {
        let rows: Vec<Row> = Vec::new();
        let result = materialize(&totals(), &rows, 0, &EvaluatorConfig::default()).unwrap();
        assert_eq!(result.get(0, "s"), Err(ViewError::NoCurrentRow));
        assert_eq!(
            result.get(0, "nope"),
            Err(ViewError::ColumnNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_to_json() {
        let rows = vec![row(Some("A"), Some(100))];
        let result = materialize(&totals(), &rows, 0, &EvaluatorConfig::default()).unwrap();
        let json = result.to_json().unwrap();
        assert!(json.contains("\"s\": 100"));
        assert!(json.contains("\"name\": \"A\""));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(0);
        assert_eq!(clock.now_millis(), 0);
        assert!(SystemClock.now_millis() > 0);
    }
}
