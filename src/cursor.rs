/// Read cursor over a live aggregate view.
///
/// A cursor holds a snapshot of the view's result rows and a position within
/// it. `first()` and `last()` take a fresh snapshot; `next()` and
/// `previous()` move within the current one. `count()` evaluates the view
/// without disturbing either.
///
/// # Examples
///
/// ```
/// use aggview::{
///     AggregateView, ColumnType, EvaluatorConfig, FixedClock, Schema, Table, Value,
///     ViewCursor, ViewDefinition,
/// };
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let schema = Schema::new(vec![("f".to_string(), ColumnType::Int, true)]);
/// let table = Rc::new(RefCell::new(Table::new("t".to_string(), schema)));
///
/// let definition = ViewDefinition::new("sums").column("s", "SUM(f)").unwrap();
/// let view = AggregateView::new(table.clone(), &definition, EvaluatorConfig::default()).unwrap();
/// let mut cursor = ViewCursor::new(Rc::new(RefCell::new(view)), Rc::new(FixedClock::new(0)));
///
/// // An ungrouped aggregate always has one row
/// assert_eq!(cursor.count().unwrap(), 1);
/// cursor.first().unwrap();
/// assert!(cursor.get("s").unwrap().is_null());
/// ```

use crate::error::{Result, ViewError};
use crate::evaluator::{Clock, ResultRow, ResultSet};
use crate::value::Value;
use crate::view::AggregateView;
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

pub struct ViewCursor {
    view: Rc<RefCell<AggregateView>>,
    clock: Rc<dyn Clock>,
    snapshot: Option<ResultSet>,
    position: Option<usize>,
}

impl ViewCursor {
    pub fn new(view: Rc<RefCell<AggregateView>>, clock: Rc<dyn Clock>) -> Self {
        ViewCursor {
            view,
            clock,
            snapshot: None,
            position: None,
        }
    }

    fn read(&self) -> Result<ResultSet> {
        let now = self.clock.now_millis();
        self.view.borrow_mut().result(now)
    }

    /// Number of result rows right now. The snapshot and position are unchanged.
    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Re-read the view and move to its first row.
    /// Returns `Ok(false)` when the view has no rows.
    pub fn try_first(&mut self) -> Result<bool> {
        let snapshot = self.read()?;
        self.position = if snapshot.is_empty() { None } else { Some(0) };
        self.snapshot = Some(snapshot);
        Ok(self.position.is_some())
    }

    /// Re-read the view and move to its first row, failing with
    /// `NoCurrentRow` when there is none.
    pub fn first(&mut self) -> Result<()> {
        if self.try_first()? {
            Ok(())
        } else {
            Err(ViewError::NoCurrentRow)
        }
    }

    pub fn try_last(&mut self) -> Result<bool> {
        let snapshot = self.read()?;
        self.position = snapshot.len().checked_sub(1);
        self.snapshot = Some(snapshot);
        Ok(self.position.is_some())
    }

    pub fn last(&mut self) -> Result<()> {
        if self.try_last()? {
            Ok(())
        } else {
            Err(ViewError::NoCurrentRow)
        }
    }

    /// Advance within the current snapshot. At the end, returns false and
    /// keeps the position.
    ///
    /// Not an `Iterator`: the cursor stays on a row after moving and exposes
    /// it through `get`, so `next` only reports whether it moved.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        match (self.position, self.snapshot.as_ref()) {
            (Some(pos), Some(snapshot)) if pos + 1 < snapshot.len() => {
                self.position = Some(pos + 1);
                true
            }
            _ => false,
        }
    }

    /// Step back within the current snapshot. At the start, returns false and
    /// keeps the position.
    pub fn previous(&mut self) -> bool {
        match self.position {
            Some(pos) if pos > 0 => {
                self.position = Some(pos - 1);
                true
            }
            _ => false,
        }
    }

    /// Re-read the view, staying at the current position if it still exists.
    fn reread(&mut self) -> Result<bool> {
        let snapshot = self.read()?;
        self.position = self.position.filter(|&pos| pos < snapshot.len());
        self.snapshot = Some(snapshot);
        Ok(self.position.is_some())
    }

    /// Run a command string of `-` (first), `+` (last), `>` (next),
    /// `<` (previous) and `=` (re-read). Commands are tried in order until
    /// one succeeds; returns whether any did.
    pub fn navigate(&mut self, commands: &str) -> Result<bool> {
        if commands.chars().any(|c| !"-+><=".contains(c)) {
            return Err(ViewError::InvalidNavigation(commands.to_string()));
        }

        for command in commands.chars() {
            let moved = match command {
                '-' => self.try_first()?,
                '+' => self.try_last()?,
                '>' => self.next(),
                '<' => self.previous(),
                _ => self.reread()?,
            };
            trace!("cursor '{}' at {:?}", command, self.position);
            if moved {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn current(&self) -> Option<&ResultRow> {
        let pos = self.position?;
        self.snapshot.as_ref()?.row(pos)
    }

    /// Named column of the current row
    pub fn get(&self, name: &str) -> Result<&Value> {
        let snapshot = self.snapshot.as_ref().ok_or(ViewError::NoCurrentRow)?;
        let col = snapshot
            .column_index(name)
            .ok_or_else(|| ViewError::ColumnNotFound(name.to_string()))?;
        self.current()
            .and_then(|row| row.get(col))
            .ok_or(ViewError::NoCurrentRow)
    }

    pub fn columns(&self) -> Vec<String> {
        self.view.borrow().definition().columns().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorConfig;
    use crate::definition::ViewDefinition;
    use crate::evaluator::FixedClock;
    use crate::table::{Schema, Table};
    use crate::value::ColumnType;
    use std::collections::HashMap;

    fn setup(names: &[&str]) -> (Rc<RefCell<Table>>, ViewCursor) {
        let schema = Schema::new(vec![
            ("name".to_string(), ColumnType::String, true),
            ("cost".to_string(), ColumnType::Int, true),
        ]);
        let table = Rc::new(RefCell::new(Table::new("orders".to_string(), schema)));
        for name in names {
            let mut row = HashMap::new();
            row.insert("name".to_string(), Value::from(*name));
            row.insert("cost".to_string(), Value::Int(1));
            table.borrow_mut().insert(row).unwrap();
        }

        let definition = ViewDefinition::new("by_name")
            .column("name", "name")
            .unwrap()
            .column("n", "COUNT(*)")
            .unwrap()
            .group_by("name");
        let view =
            AggregateView::new(table.clone(), &definition, EvaluatorConfig::default()).unwrap();
        let cursor = ViewCursor::new(Rc::new(RefCell::new(view)), Rc::new(FixedClock::new(0)));
        (table, cursor)
    }

    #[test]
    fn test_first_on_empty_grouped_view() {
        let (_table, mut cursor) = setup(&[]);
        assert_eq!(cursor.count().unwrap(), 0);
        assert_eq!(cursor.first(), Err(ViewError::NoCurrentRow));
        assert!(!cursor.try_first().unwrap());
        assert_eq!(cursor.get("n"), Err(ViewError::NoCurrentRow));
    }

    #[test]
    fn test_walk_forward_and_back() {
        let (_table, mut cursor) = setup(&["A", "B", "A", "C"]);
        cursor.first().unwrap();
        assert_eq!(cursor.get("name").unwrap(), &Value::from("A"));
        assert_eq!(cursor.get("n").unwrap(), &Value::Int(2));

        assert!(cursor.next());
        assert!(cursor.next());
        assert_eq!(cursor.get("name").unwrap(), &Value::from("C"));

        // End of snapshot keeps the position
        assert!(!cursor.next());
        assert_eq!(cursor.position(), Some(2));

        assert!(cursor.previous());
        assert_eq!(cursor.get("name").unwrap(), &Value::from("B"));
        assert_eq!(
            cursor.get("missing"),
            Err(ViewError::ColumnNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_count_does_not_move_or_refresh_snapshot() {
        let (table, mut cursor) = setup(&["A", "B"]);
        cursor.first().unwrap();
        assert!(cursor.next());

        let mut row = HashMap::new();
        row.insert("name".to_string(), Value::from("C"));
        table.borrow_mut().insert(row).unwrap();

        assert_eq!(cursor.count().unwrap(), 3);
        assert_eq!(cursor.position(), Some(1));
        // Still walking the snapshot taken by first()
        assert!(!cursor.next());
    }

    #[test]
    fn test_navigate() {
        let (_table, mut cursor) = setup(&["A", "B", "C"]);

        assert!(cursor.navigate("+").unwrap());
        assert_eq!(cursor.position(), Some(2));

        // '>' fails at the end, '<' succeeds
        assert!(cursor.navigate("><").unwrap());
        assert_eq!(cursor.position(), Some(1));

        assert!(cursor.navigate("=").unwrap());
        assert_eq!(cursor.position(), Some(1));

        assert!(cursor.navigate("-").unwrap());
        assert_eq!(cursor.position(), Some(0));
        assert!(!cursor.navigate("<").unwrap());
    }

    #[test]
    fn test_invalid_navigation_does_not_move() {
        let (_table, mut cursor) = setup(&["A", "B"]);
        cursor.first().unwrap();

        let err = cursor.navigate(">x").unwrap_err();
        assert!(matches!(err, ViewError::InvalidNavigation(_)));
        assert!(err.to_string().contains("Invalid navigation command"));
        assert_eq!(cursor.position(), Some(0));
    }
}
