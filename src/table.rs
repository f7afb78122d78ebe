/// Base table implementation.
///
/// A Table is a collection of typed columns with a schema. It is the mutable
/// side of the crate: rows are inserted, deleted or cleared here, and every
/// mutation is recorded in the table's changeset so that views can catch up
/// incrementally.
///
/// # Examples
///
/// ```
/// use aggview::{ColumnType, RowBuffer, Schema, Table, Value};
///
/// let schema = Schema::new(vec![
///     ("name".to_string(), ColumnType::String, true),
///     ("cost".to_string(), ColumnType::Int, true),
/// ]);
/// let mut table = Table::new("orders".to_string(), schema);
///
/// // Set fields on the working row, insert, clear
/// let mut buffer = RowBuffer::new(table.schema());
/// buffer.set_value("name", Value::from("A")).unwrap();
/// buffer.set_value("cost", Value::Int(100)).unwrap();
/// table.insert_buffer(&buffer).unwrap();
/// buffer.clear();
///
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.get_value(0, "cost").unwrap(), &Value::Int(100));
/// ```

use crate::changeset::{Changeset, TableChange};
use crate::column::Column;
use crate::error::{Result, ViewError};
use crate::value::{ColumnType, Value};
use log::debug;
use std::collections::HashMap;

/// A row as a mapping from column name to value
pub type Row = HashMap<String, Value>;

/// Schema definition with column names and types.
///
/// ```
/// use aggview::{ColumnType, Schema};
///
/// let schema = Schema::new(vec![
///     ("id".to_string(), ColumnType::Int, false),     // Required
///     ("date".to_string(), ColumnType::Timestamp, true), // Nullable
/// ]);
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.get_column_index("date"), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, ColumnType, bool)>, // (name, type, nullable)
}

impl Schema {
    /// Creates a new schema from `(column_name, column_type, is_nullable)` triples.
    pub fn new(columns: Vec<(String, ColumnType, bool)>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _, _)| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_column_index(name).is_some()
    }

    /// Returns `(name, type, nullable)` for the column at `index`.
    pub fn get_column_info(&self, index: usize) -> Option<(&str, ColumnType, bool)> {
        self.columns
            .get(index)
            .map(|(name, ty, nullable)| (name.as_str(), *ty, *nullable))
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, ty, _)| *ty)
    }
}

/// Working row: assign fields one by one, hand it to `Table::insert_buffer`,
/// then `clear()` it for the next row. Unset fields insert as NULL.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    schema: Schema,
    values: Row,
}

impl RowBuffer {
    pub fn new(schema: &Schema) -> Self {
        RowBuffer {
            schema: schema.clone(),
            values: HashMap::new(),
        }
    }

    pub fn set_value(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        if !self.schema.contains(column) {
            return Err(ViewError::ColumnNotFound(column.to_string()));
        }
        self.values.insert(column.to_string(), value.into());
        Ok(())
    }

    /// Current value of a field; unset fields read as NULL.
    pub fn get_value(&self, column: &str) -> Result<&Value> {
        if !self.schema.contains(column) {
            return Err(ViewError::ColumnNotFound(column.to_string()));
        }
        Ok(self.values.get(column).unwrap_or(&Value::Null))
    }

    /// Reset every field to NULL
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn values(&self) -> &Row {
        &self.values
    }
}

/// Root table owning its data.
pub struct Table {
    name: String,
    schema: Schema,
    columns: Vec<Column>,
    row_count: usize,
    /// Tracks changes for incremental view propagation
    changeset: Changeset,
}

impl Table {
    pub fn new(name: String, schema: Schema) -> Self {
        let columns = schema
            .columns
            .iter()
            .map(|(col_name, col_type, nullable)| {
                Column::new(col_name.clone(), *col_type, *nullable)
            })
            .collect();

        Table {
            name,
            schema,
            columns,
            row_count: 0,
            changeset: Changeset::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .get_column_index(column)
            .ok_or_else(|| ViewError::ColumnNotFound(column.to_string()))
    }

    pub fn get_value(&self, row: usize, column: &str) -> Result<&Value> {
        let col_idx = self.column_index(column)?;
        self.columns[col_idx].get(row)
    }

    pub fn set_value(&mut self, row: usize, column: &str, value: Value) -> Result<()> {
        let col_idx = self.column_index(column)?;
        let old_value = self.columns[col_idx].set(row, value.clone())?;

        self.changeset.push(TableChange::CellUpdated {
            row,
            column: column.to_string(),
            old_value,
            new_value: value,
        });
        Ok(())
    }

    pub fn get_row(&self, row: usize) -> Result<Row> {
        if row >= self.row_count {
            return Err(ViewError::RowOutOfRange {
                index: row,
                len: self.row_count,
            });
        }

        let mut result = HashMap::with_capacity(self.columns.len());
        for col in &self.columns {
            result.insert(col.name().to_string(), col.get(row)?.clone());
        }
        Ok(result)
    }

    /// Complete `row` with NULLs for missing columns and validate it against
    /// the schema, without touching the table.
    fn normalize_row(&self, mut row: Row) -> Result<Row> {
        if let Some(unknown) = row.keys().find(|name| !self.schema.contains(name)) {
            return Err(ViewError::ColumnNotFound(unknown.clone()));
        }
        for col in &self.columns {
            let value = row.entry(col.name().to_string()).or_insert(Value::Null);
            col.validate(value)?;
        }
        Ok(row)
    }

    /// Append a row. Columns missing from `row` are stored as NULL.
    pub fn insert(&mut self, row: Row) -> Result<()> {
        let row = self.normalize_row(row)?;
        let index = self.row_count;

        for col in self.columns.iter_mut() {
            // normalize_row filled every column
            let value = row.get(col.name()).cloned().unwrap_or(Value::Null);
            col.append_unchecked(value);
        }
        self.row_count += 1;

        self.changeset.push(TableChange::RowInserted { index, data: row });
        Ok(())
    }

    /// Insert the working row held by `buffer`.
    pub fn insert_buffer(&mut self, buffer: &RowBuffer) -> Result<()> {
        self.insert(buffer.values().clone())
    }

    /// Append multiple rows. Every row is validated before any is inserted.
    pub fn insert_rows(&mut self, rows: Vec<Row>) -> Result<usize> {
        let rows = rows
            .into_iter()
            .map(|row| self.normalize_row(row))
            .collect::<Result<Vec<_>>>()?;

        let count = rows.len();
        for row in rows {
            self.insert(row)?;
        }
        Ok(count)
    }

    pub fn delete_row(&mut self, index: usize) -> Result<Row> {
        if index >= self.row_count {
            return Err(ViewError::RowOutOfRange {
                index,
                len: self.row_count,
            });
        }

        let mut result = HashMap::with_capacity(self.columns.len());
        for col in self.columns.iter_mut() {
            result.insert(col.name().to_string(), col.delete(index)?);
        }
        self.row_count -= 1;

        self.changeset.push(TableChange::RowDeleted {
            index,
            data: result.clone(),
        });
        Ok(result)
    }

    /// Remove every row.
    pub fn delete_all(&mut self) {
        let rows = self.row_count;
        for col in self.columns.iter_mut() {
            col.clear();
        }
        self.row_count = 0;

        debug!("table '{}': deleted all {} rows", self.name, rows);
        self.changeset.push(TableChange::Cleared { rows });
    }

    pub fn iter_rows(&self) -> TableRowIterator<'_> {
        TableRowIterator {
            table: self,
            index: 0,
        }
    }

    /// Look up a column value of `row` without building a `Row` map.
    pub(crate) fn cell(&self, row: usize, col_idx: usize) -> Option<&Value> {
        self.columns.get(col_idx).and_then(|col| col.get(row).ok())
    }

    // === Changeset API for incremental view propagation ===

    pub fn changeset(&self) -> &Changeset {
        &self.changeset
    }

    /// Absolute position one past the newest recorded change
    pub fn changeset_end(&self) -> u64 {
        self.changeset.end()
    }

    /// Drop recorded changes before the absolute position `up_to`.
    /// Views that have not consumed them yet will rebuild on next sync.
    pub fn compact_changeset(&mut self, up_to: u64) {
        self.changeset.compact(up_to);
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changeset.is_empty()
    }

    /// Export the table as a pretty-printed JSON array of objects.
    pub fn to_json(&self) -> Result<String> {
        let names = self.schema.get_column_names();
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = (0..self.row_count)
            .map(|row| {
                names
                    .iter()
                    .enumerate()
                    .map(|(col_idx, name)| -> Result<(String, serde_json::Value)> {
                        let value = self.cell(row, col_idx).unwrap_or(&Value::Null);
                        Ok((name.to_string(), serde_json::to_value(value)?))
                    })
                    .collect::<Result<serde_json::Map<_, _>>>()
            })
            .collect::<Result<_>>()?;

        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

pub struct TableRowIterator<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Iterator for TableRowIterator<'a> {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.table.len() {
            return None;
        }
        let row = self.table.get_row(self.index).ok();
        self.index += 1;
        row
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Table {{ name: '{}', columns: {}, rows: {} }}",
            self.name,
            self.columns.len(),
            self.row_count
        )
    }
}
