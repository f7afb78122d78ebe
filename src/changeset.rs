/// Changeset - Incremental Change Propagation
///
/// Tables record every mutation as a `TableChange`. Views remember the
/// absolute position of the last change they consumed and replay only what
/// came after it, instead of re-reading the whole table.
///
/// # Change Types
///
/// - `RowInserted`: A new row was added at a specific index
/// - `RowDeleted`: A row was removed from a specific index
/// - `CellUpdated`: A single cell value changed
/// - `Cleared`: Every row was removed at once
///
/// Positions are absolute: compacting the buffer drops old entries but never
/// renumbers the remaining ones. A view whose position falls behind the
/// compacted prefix must rebuild.

use crate::table::Row;
use crate::value::Value;

/// Represents a single change to a table
#[derive(Debug, Clone)]
pub enum TableChange {
    /// A row was inserted at the given index
    RowInserted { index: usize, data: Row },

    /// A row was deleted from the given index
    RowDeleted { index: usize, data: Row },

    /// A cell value was updated
    CellUpdated {
        row: usize,
        column: String,
        old_value: Value,
        new_value: Value,
    },

    /// All rows were removed
    Cleared { rows: usize },
}

impl TableChange {
    /// Returns true if this change is an append at the end of the table,
    /// which never reorders existing rows
    pub fn is_append(&self, len_before: usize) -> bool {
        matches!(self, TableChange::RowInserted { index, .. } if *index == len_before)
    }
}

/// Buffer of changes addressed by absolute position
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<TableChange>,
    /// Absolute position of `changes[0]`
    base: u64,
}

impl Changeset {
    pub fn new() -> Self {
        Changeset::default()
    }

    /// Add a change to the changeset
    pub fn push(&mut self, change: TableChange) {
        self.changes.push(change);
    }

    /// Returns all buffered changes
    pub fn changes(&self) -> &[TableChange] {
        &self.changes
    }

    /// Absolute position one past the newest change
    pub fn end(&self) -> u64 {
        self.base + self.changes.len() as u64
    }

    /// Changes recorded at or after `position`, or `None` when part of that
    /// range has already been compacted away
    pub fn since(&self, position: u64) -> Option<&[TableChange]> {
        if position < self.base {
            return None;
        }
        let offset = usize::try_from(position - self.base).ok()?;
        Some(self.changes.get(offset..).unwrap_or(&[]))
    }

    /// Drop every change before `up_to` (absolute position)
    pub fn compact(&mut self, up_to: u64) {
        let up_to = up_to.min(self.end());
        if up_to <= self.base {
            return;
        }
        let drop = (up_to - self.base) as usize;
        self.changes.drain(..drop);
        self.base = up_to;
    }

    /// Returns true if there are no buffered changes
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of buffered changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Trait for views that support incremental updates
pub trait IncrementalView {
    /// Apply a set of changes from the parent table
    /// Returns true if the view was modified, false if no changes affected this view
    fn apply_changes(&mut self, changes: &[TableChange]) -> bool;

    /// Absolute changeset position this view has consumed up to
    fn synced_position(&self) -> u64;

    /// Force a full rebuild (fallback when incremental isn't possible)
    fn rebuild(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn inserted(index: usize) -> TableChange {
        TableChange::RowInserted {
            index,
            data: HashMap::new(),
        }
    }

    #[test]
    fn test_changeset_basic() {
        let mut cs = Changeset::new();
        assert!(cs.is_empty());
        assert_eq!(cs.end(), 0);

        cs.push(inserted(0));
        cs.push(TableChange::Cleared { rows: 1 });
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.end(), 2);
        assert_eq!(cs.changes().len(), 2);
    }

    #[test]
    fn test_since_and_compact() {
        let mut cs = Changeset::new();
        for i in 0..4 {
            cs.push(inserted(i));
        }

        assert_eq!(cs.since(0).map(|c| c.len()), Some(4));
        assert_eq!(cs.since(3).map(|c| c.len()), Some(1));
        assert_eq!(cs.since(4).map(|c| c.len()), Some(0));

        cs.compact(2);
        assert_eq!(cs.len(), 2);
        assert!(cs.since(1).is_none());
        assert!(matches!(
            cs.since(2).map(|c| &c[0]),
            Some(TableChange::RowInserted { index: 2, .. })
        ));
        assert_eq!(cs.end(), 4);
    }

    #[test]
    fn test_is_append() {
        assert!(inserted(3).is_append(3));
        assert!(!inserted(1).is_append(3));
        assert!(!TableChange::Cleared { rows: 3 }.is_append(3));
    }
}
