/// aggview - Aggregate Views over In-Memory Tables
///
/// Declarative `SELECT ... [WHERE ...] [GROUP BY ...]` views over a columnar
/// table. Views are compiled against the table schema, kept up to date from
/// the table's changeset, and read through a cursor over an ordered snapshot
/// of their result rows.

pub mod error;
pub mod value;
pub mod column;
pub mod table;
pub mod changeset;
pub mod expr;
pub mod aggregate;
pub mod config;
pub mod definition;
pub mod evaluator;
pub mod view;
pub mod cursor;

pub use error::{Result, ViewError};
pub use value::{ArithOp, ColumnType, Value};
pub use column::Column;
pub use table::{Row, RowBuffer, Schema, Table};
pub use changeset::{Changeset, IncrementalView, TableChange};
pub use expr::{parse_expr, CompareOp, Expr};
pub use aggregate::{Accumulator, AggregateFunction};
pub use config::EvaluatorConfig;
pub use definition::{AggregateSlot, CompiledView, ViewColumn, ViewDefinition, ViewMode};
pub use evaluator::{
    materialize, materialize_table, Clock, FixedClock, ResultRow, ResultSet, SystemClock,
};
pub use view::AggregateView;
pub use cursor::ViewCursor;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fields_table() -> Rc<RefCell<Table>> {
        let schema = Schema::new(vec![
            ("f".to_string(), ColumnType::Int, true),
            ("f1".to_string(), ColumnType::Int, true),
            ("f2".to_string(), ColumnType::Int, true),
        ]);
        Rc::new(RefCell::new(Table::new("fields".to_string(), schema)))
    }

    fn cursor(table: &Rc<RefCell<Table>>, definition: ViewDefinition) -> ViewCursor {
        let view =
            AggregateView::new(table.clone(), &definition, EvaluatorConfig::default()).unwrap();
        ViewCursor::new(Rc::new(RefCell::new(view)), Rc::new(FixedClock::new(0)))
    }

    /// Insert through the working row: set fields, insert, clear.
    fn insert(table: &Rc<RefCell<Table>>, fields: &[(&str, i64)]) {
        let mut t = table.borrow_mut();
        let mut buffer = RowBuffer::new(t.schema());
        for (name, value) in fields {
            buffer.set_value(name, *value).unwrap();
        }
        t.insert_buffer(&buffer).unwrap();
        buffer.clear();
    }

    #[test]
    fn test_empty_table_aggregates() {
        init_logging();
        let table = fields_table();
        let mut cursor = cursor(
            &table,
            ViewDefinition::new("empty")
                .column("count", "COUNT(*)")
                .unwrap()
                .column("sum", "SUM(f)")
                .unwrap()
                .column("min", "MIN(f)")
                .unwrap()
                .column("max", "MAX(f)")
                .unwrap(),
        );

        assert_eq!(cursor.count().unwrap(), 1);
        cursor.first().unwrap();
        assert_eq!(cursor.get("count").unwrap(), &Value::Int(0));
        assert!(cursor.get("sum").unwrap().is_null());
        assert!(cursor.get("min").unwrap().is_null());
        assert!(cursor.get("max").unwrap().is_null());
        assert!(!cursor.next());
    }

    #[test]
    fn test_sum_with_arithmetic_over_aggregate() {
        init_logging();
        let table = fields_table();
        let mut cursor = cursor(
            &table,
            ViewDefinition::new("sums")
                .column("s", "SUM(f)")
                .unwrap()
                .column("plus", "SUM(f) + 1")
                .unwrap()
                .column("minus", "SUM(f) - 1")
                .unwrap(),
        );

        // Before any rows, arithmetic over a NULL aggregate stays NULL
        cursor.first().unwrap();
        assert!(cursor.get("plus").unwrap().is_null());

        insert(&table, &[("f", 4)]);
        cursor.first().unwrap();
        assert_eq!(cursor.get("s").unwrap(), &Value::Int(4));
        assert_eq!(cursor.get("plus").unwrap(), &Value::Int(5));
        assert_eq!(cursor.get("minus").unwrap(), &Value::Int(3));
    }

    #[test]
    fn test_sum_of_row_expression_propagates_null() {
        init_logging();
        let table = fields_table();
        let mut cursor = cursor(
            &table,
            ViewDefinition::new("pair").column("s", "SUM(f1 + f2)").unwrap(),
        );

        insert(&table, &[("f1", 1)]);
        insert(&table, &[("f2", 1)]);
        insert(&table, &[]);
        cursor.first().unwrap();
        assert!(cursor.get("s").unwrap().is_null());

        insert(&table, &[("f1", 2), ("f2", 3)]);
        cursor.first().unwrap();
        assert_eq!(cursor.get("s").unwrap(), &Value::Int(5));
    }

    #[test]
    fn test_min_max_and_combined_views() {
        init_logging();
        let table = fields_table();
        insert(&table, &[("f1", 1), ("f2", 5)]);
        insert(&table, &[("f1", 5), ("f2", 2)]);

        let mut single = cursor(
            &table,
            ViewDefinition::new("single")
                .column("min_f1", "MIN(f1)")
                .unwrap()
                .column("max_f1", "MAX(f1)")
                .unwrap()
                .column("min_sum", "MIN(f1 + f2)")
                .unwrap()
                .column("max_sum", "MAX(f1 + f2)")
                .unwrap()
                .column("min_plus_min", "MIN(f1) + MIN(f2)")
                .unwrap(),
        );
        single.first().unwrap();
        assert_eq!(single.get("min_f1").unwrap(), &Value::Int(1));
        assert_eq!(single.get("max_f1").unwrap(), &Value::Int(5));
        assert_eq!(single.get("min_sum").unwrap(), &Value::Int(6));
        assert_eq!(single.get("max_sum").unwrap(), &Value::Int(7));
        assert_eq!(single.get("min_plus_min").unwrap(), &Value::Int(3));

        let mut combined = cursor(
            &table,
            ViewDefinition::new("combined")
                .column("count", "COUNT(*)")
                .unwrap()
                .column("max_f1", "MAX(f1)")
                .unwrap()
                .column("min_f2", "MIN(f2)")
                .unwrap(),
        );
        combined.first().unwrap();
        assert_eq!(combined.get("count").unwrap(), &Value::Int(2));
        assert_eq!(combined.get("max_f1").unwrap(), &Value::Int(5));
        assert_eq!(combined.get("min_f2").unwrap(), &Value::Int(2));
    }

    fn orders() -> Rc<RefCell<Table>> {
        let schema = Schema::new(vec![
            ("name".to_string(), ColumnType::String, true),
            ("cost".to_string(), ColumnType::Int, true),
        ]);
        let table = Rc::new(RefCell::new(Table::new("orders".to_string(), schema)));
        for (name, cost) in [("A", 100), ("A", 150), ("B", 50)] {
            let mut t = table.borrow_mut();
            let mut buffer = RowBuffer::new(t.schema());
            buffer.set_value("name", name).unwrap();
            buffer.set_value("cost", cost).unwrap();
            t.insert_buffer(&buffer).unwrap();
        }
        table
    }

    #[test]
    fn test_grouped_view_in_insertion_order() {
        init_logging();
        let table = orders();
        let mut totals = cursor(
            &table,
            ViewDefinition::new("totals")
                .column("name", "name")
                .unwrap()
                .column("total", "SUM(cost)")
                .unwrap()
                .group_by("name"),
        );

        assert_eq!(totals.count().unwrap(), 2);
        totals.first().unwrap();
        assert_eq!(totals.get("name").unwrap(), &Value::from("A"));
        assert_eq!(totals.get("total").unwrap(), &Value::Int(250));
        assert!(totals.next());
        assert_eq!(totals.get("name").unwrap(), &Value::from("B"));
        assert_eq!(totals.get("total").unwrap(), &Value::Int(50));
        assert!(!totals.next());

        // Without aggregates a group reports its first row
        let mut distinct = cursor(
            &table,
            ViewDefinition::new("distinct")
                .column("name", "name")
                .unwrap()
                .column("cost", "cost")
                .unwrap()
                .group_by("name"),
        );
        distinct.first().unwrap();
        assert_eq!(distinct.get("cost").unwrap(), &Value::Int(100));
        assert_eq!(distinct.count().unwrap(), 2);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        init_logging();
        let table = orders();
        let view = ViewDefinition::new("totals")
            .column("name", "name")
            .unwrap()
            .column("avg", "AVG(cost)")
            .unwrap()
            .group_by("name")
            .compile(table.borrow().schema())
            .unwrap();

        let config = EvaluatorConfig::default();
        let first = materialize_table(&view, &table.borrow(), 0, &config).unwrap();
        let second = materialize_table(&view, &table.borrow(), 0, &config).unwrap();
        assert_eq!(first, second);

        let rows: Vec<Row> = table.borrow().iter_rows().collect();
        assert_eq!(materialize(&view, &rows, 0, &config).unwrap(), first);
    }

    #[test]
    fn test_time_relative_filter_uses_injected_clock() {
        init_logging();
        let schema = Schema::new(vec![("date".to_string(), ColumnType::Timestamp, true)]);
        let table = Rc::new(RefCell::new(Table::new("events".to_string(), schema)));
        for date in [DAY, 3 * DAY, 5 * DAY] {
            let mut t = table.borrow_mut();
            let mut buffer = RowBuffer::new(t.schema());
            buffer.set_value("date", Value::Timestamp(date)).unwrap();
            t.insert_buffer(&buffer).unwrap();
        }

        let definition = ViewDefinition::new("upcoming")
            .column("n", "COUNT(*)")
            .unwrap()
            .filter("date > NOW()")
            .unwrap();
        let view =
            AggregateView::new(table.clone(), &definition, EvaluatorConfig::default()).unwrap();
        let clock = Rc::new(FixedClock::new(2 * DAY));
        let mut cursor = ViewCursor::new(Rc::new(RefCell::new(view)), clock.clone());

        cursor.first().unwrap();
        assert_eq!(cursor.get("n").unwrap(), &Value::Int(2));

        clock.advance(2 * DAY);
        cursor.first().unwrap();
        assert_eq!(cursor.get("n").unwrap(), &Value::Int(1));

        // A row in the past does not count
        {
            let mut t = table.borrow_mut();
            let mut buffer = RowBuffer::new(t.schema());
            buffer.set_value("date", Value::Timestamp(0)).unwrap();
            t.insert_buffer(&buffer).unwrap();
        }
        cursor.first().unwrap();
        assert_eq!(cursor.get("n").unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_delete_all_resets_view() {
        init_logging();
        let table = orders();
        let mut totals = cursor(
            &table,
            ViewDefinition::new("totals")
                .column("name", "name")
                .unwrap()
                .column("total", "SUM(cost)")
                .unwrap()
                .group_by("name"),
        );
        assert_eq!(totals.count().unwrap(), 2);

        table.borrow_mut().delete_all();
        assert_eq!(totals.count().unwrap(), 0);
        assert_eq!(totals.first(), Err(ViewError::NoCurrentRow));
    }
}
