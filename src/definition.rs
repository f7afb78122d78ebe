/// View definitions.
///
/// A `ViewDefinition` is the declarative form of
/// `SELECT <exprs> FROM <table> [WHERE <filter>] [GROUP BY <keys>]`, built
/// from expression strings. Compiling it against a table schema validates
/// every column reference and lowers each aggregate call into a numbered
/// slot, so that group evaluation reduces each aggregate once and then
/// combines the reduced scalars.
///
/// # Examples
///
/// ```
/// use aggview::{ColumnType, Schema, ViewDefinition};
///
/// let schema = Schema::new(vec![
///     ("name".to_string(), ColumnType::String, true),
///     ("cost".to_string(), ColumnType::Int, true),
/// ]);
///
/// let view = ViewDefinition::new("totals")
///     .column("name", "name").unwrap()
///     .column("s", "SUM(cost)").unwrap()
///     .group_by("name")
///     .compile(&schema)
///     .unwrap();
///
/// assert!(view.is_aggregate());
/// assert_eq!(view.columns(), &["name".to_string(), "s".to_string()]);
/// ```

use crate::aggregate::AggregateFunction;
use crate::error::{Result, ViewError};
use crate::expr::{self, parse_expr, Expr};
use crate::table::Schema;
use std::collections::HashSet;

/// One output column of a view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewColumn {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    name: String,
    columns: Vec<ViewColumn>,
    filter: Option<Expr>,
    group_by: Vec<String>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        ViewDefinition {
            name: name.into(),
            columns: Vec::new(),
            filter: None,
            group_by: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an output column parsed from `expression`.
    pub fn column(self, name: impl Into<String>, expression: &str) -> Result<Self> {
        Ok(self.column_expr(name, parse_expr(expression)?))
    }

    pub fn column_expr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.columns.push(ViewColumn {
            name: name.into(),
            expr,
        });
        self
    }

    /// Set the WHERE predicate parsed from `expression`.
    pub fn filter(self, expression: &str) -> Result<Self> {
        Ok(self.filter_expr(parse_expr(expression)?))
    }

    pub fn filter_expr(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Validate against `schema` and lower aggregates into slots.
    pub fn compile(&self, schema: &Schema) -> Result<CompiledView> {
        if self.columns.is_empty() {
            return Err(invalid(format!("view '{}' has no columns", self.name)));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate output column '{}'", column.name)));
            }
        }

        let mut seen = HashSet::new();
        for key in &self.group_by {
            if !schema.contains(key) {
                return Err(ViewError::ColumnNotFound(key.clone()));
            }
            if !seen.insert(key.as_str()) {
                return Err(invalid(format!("duplicate grouping key '{}'", key)));
            }
        }

        if let Some(filter) = &self.filter {
            if expr::contains_aggregate(filter) {
                return Err(invalid("aggregates are not allowed in the filter".to_string()));
            }
            check_columns(filter, schema)?;
        }

        let mut slots = Vec::new();
        let mut outputs = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            check_columns(&column.expr, schema)?;
            outputs.push(lower(&column.expr, &mut slots)?);
        }

        let mode = if slots.is_empty() && self.group_by.is_empty() {
            ViewMode::Projection
        } else {
            ViewMode::Aggregate
        };

        let mut carried = Vec::new();
        for output in &outputs {
            for name in expr::extract_columns(output) {
                if !carried.contains(&name) {
                    carried.push(name);
                }
            }
        }

        let time_dependent = self.filter.as_ref().is_some_and(expr::references_now)
            || self.columns.iter().any(|c| expr::references_now(&c.expr));

        Ok(CompiledView {
            name: self.name.clone(),
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            outputs,
            filter: self.filter.clone(),
            group_by: self.group_by.clone(),
            slots,
            carried,
            mode,
            time_dependent,
        })
    }
}

fn invalid(message: String) -> ViewError {
    ViewError::InvalidDefinition(message)
}

fn check_columns(expr: &Expr, schema: &Schema) -> Result<()> {
    match expr::extract_columns(expr)
        .into_iter()
        .find(|name| !schema.contains(name))
    {
        Some(missing) => Err(ViewError::ColumnNotFound(missing)),
        None => Ok(()),
    }
}

/// Replace every aggregate call in `expr` with a reference to its slot.
/// Identical calls share one slot.
fn lower(expr: &Expr, slots: &mut Vec<AggregateSlot>) -> Result<Expr> {
    let lowered = match expr {
        Expr::Aggregate { func, arg } => {
            let arg = arg.as_deref().cloned();
            if arg.as_ref().is_some_and(expr::contains_aggregate) {
                return Err(invalid(format!("nested aggregate in {}", expr)));
            }
            let slot = AggregateSlot { func: *func, arg };
            let index = match slots.iter().position(|s| *s == slot) {
                Some(index) => index,
                None => {
                    slots.push(slot);
                    slots.len() - 1
                }
            };
            Expr::AggregateRef(index)
        }
        Expr::Negate(inner) => Expr::Negate(Box::new(lower(inner, slots)?)),
        Expr::IsNull(inner) => Expr::IsNull(Box::new(lower(inner, slots)?)),
        Expr::IsNotNull(inner) => Expr::IsNotNull(Box::new(lower(inner, slots)?)),
        Expr::Not(inner) => Expr::Not(Box::new(lower(inner, slots)?)),
        Expr::Arith { op, left, right } => Expr::Arith {
            op: *op,
            left: Box::new(lower(left, slots)?),
            right: Box::new(lower(right, slots)?),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op: *op,
            left: Box::new(lower(left, slots)?),
            right: Box::new(lower(right, slots)?),
        },
        Expr::And(left, right) => {
            Expr::And(Box::new(lower(left, slots)?), Box::new(lower(right, slots)?))
        }
        Expr::Or(left, right) => {
            Expr::Or(Box::new(lower(left, slots)?), Box::new(lower(right, slots)?))
        }
        Expr::Column(_) | Expr::Literal(_) | Expr::Now | Expr::AggregateRef(_) => expr.clone(),
    };
    Ok(lowered)
}

/// An aggregate call reduced once per group
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSlot {
    pub func: AggregateFunction,
    /// Per-row argument; `None` for `COUNT(*)`
    pub arg: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// One result row per group (or exactly one for an ungrouped view)
    Aggregate,
    /// One result row per qualifying base row
    Projection,
}

/// A view definition validated against a schema, ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledView {
    name: String,
    columns: Vec<String>,
    pub(crate) outputs: Vec<Expr>,
    pub(crate) filter: Option<Expr>,
    pub(crate) group_by: Vec<String>,
    pub(crate) slots: Vec<AggregateSlot>,
    /// Columns read outside aggregates; a group reports them from its first row
    pub(crate) carried: Vec<String>,
    mode: ViewMode,
    time_dependent: bool,
}

impl CompiledView {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output column names in definition order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn slots(&self) -> &[AggregateSlot] {
        &self.slots
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_aggregate(&self) -> bool {
        self.mode == ViewMode::Aggregate
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// True when the result depends on the evaluation time
    pub fn is_time_dependent(&self) -> bool {
        self.time_dependent
    }
}
