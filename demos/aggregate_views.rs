/// Aggregate Views Example
///
/// This example demonstrates:
/// - Filling a table through the working row buffer
/// - Grouped and ungrouped aggregate views
/// - Walking results with a cursor and navigation commands
/// - A time-relative filter driven by an injected clock
///
/// Run with `RUST_LOG=debug` to see view rebuilds and syncs.

use aggview::{
    AggregateView, ColumnType, EvaluatorConfig, FixedClock, RowBuffer, Schema, Table, Value,
    ViewCursor, ViewDefinition,
};
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

const DAY: i64 = 24 * 60 * 60 * 1000;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("=== aggview Aggregate Views Example ===\n");

    // 1. Create an orders table
    println!("1. Creating orders table...");
    let schema = Schema::new(vec![
        ("customer".to_string(), ColumnType::String, false),
        ("cost".to_string(), ColumnType::Int, true),
        ("due".to_string(), ColumnType::Timestamp, true),
    ]);
    let table = Rc::new(RefCell::new(Table::new("orders".to_string(), schema)));

    {
        let mut t = table.borrow_mut();
        let mut buffer = RowBuffer::new(t.schema());
        let orders = [
            ("Acme", Some(100), 1),
            ("Acme", Some(150), 4),
            ("Globex", Some(50), 6),
            ("Initech", None, 2),
        ];
        for (customer, cost, due_day) in orders {
            buffer.set_value("customer", customer)?;
            buffer.set_value("cost", cost.map(Value::Int))?;
            buffer.set_value("due", Value::Timestamp(due_day * DAY))?;
            t.insert_buffer(&buffer)?;
            buffer.clear();
        }
        println!("   Inserted {} rows\n", t.len());
    }

    let clock = Rc::new(FixedClock::new(3 * DAY));

    // 2. Totals per customer
    println!("2. SUM(cost) GROUP BY customer:");
    let totals = ViewDefinition::new("totals")
        .column("customer", "customer")?
        .column("orders", "COUNT(*)")?
        .column("total", "SUM(cost)")?
        .group_by("customer");
    let view = AggregateView::new(table.clone(), &totals, EvaluatorConfig::default())?;
    let mut cursor = ViewCursor::new(Rc::new(RefCell::new(view)), clock.clone());

    if cursor.try_first()? {
        loop {
            println!(
                "   {:<8} orders={} total={}",
                cursor.get("customer")?,
                cursor.get("orders")?,
                cursor.get("total")?
            );
            if !cursor.next() {
                break;
            }
        }
    }
    println!();

    // 3. Ungrouped summary with arithmetic over aggregates
    println!("3. Summary over all orders:");
    let summary = ViewDefinition::new("summary")
        .column("count", "COUNT(*)")?
        .column("priced", "COUNT(cost)")?
        .column("avg", "AVG(cost)")?
        .column("spread", "MAX(cost) - MIN(cost)")?;
    let view = AggregateView::new(table.clone(), &summary, EvaluatorConfig::default())?;
    let mut summary = ViewCursor::new(Rc::new(RefCell::new(view)), clock.clone());
    summary.first()?;
    for column in summary.columns() {
        println!("   {} = {}", column, summary.get(&column)?);
    }
    println!();

    // 4. Orders due after "now"
    println!("4. Orders due after day 3:");
    let upcoming = ViewDefinition::new("upcoming")
        .column("n", "COUNT(*)")?
        .filter("due > NOW()")?;
    let view = AggregateView::new(table.clone(), &upcoming, EvaluatorConfig::default())?;
    let mut upcoming = ViewCursor::new(Rc::new(RefCell::new(view)), clock.clone());
    upcoming.first()?;
    println!("   upcoming = {}", upcoming.get("n")?);

    clock.advance(2 * DAY);
    upcoming.first()?;
    println!("   after two days: upcoming = {}\n", upcoming.get("n")?);

    // 5. Navigation commands and live updates
    println!("5. Navigating the totals view:");
    cursor.navigate("+")?;
    println!("   last:  {}", cursor.get("customer")?);
    cursor.navigate("<")?;
    println!("   prev:  {}", cursor.get("customer")?);

    table.borrow_mut().delete_all();
    println!("   after delete_all: {} groups", cursor.count()?);

    // 6. Export
    println!("\n6. Summary as JSON:");
    let result = summary_view_json(&table)?;
    println!("{}", result);

    println!("\n=== Example Complete ===");
    Ok(())
}

fn summary_view_json(table: &Rc<RefCell<Table>>) -> Result<String, Box<dyn Error>> {
    let view = ViewDefinition::new("summary")
        .column("count", "COUNT(*)")?
        .column("total", "SUM(cost)")?
        .compile(table.borrow().schema())?;
    let result =
        aggview::materialize_table(&view, &table.borrow(), 0, &EvaluatorConfig::default())?;
    Ok(result.to_json()?)
}
