/// Live aggregate views.
///
/// An `AggregateView` binds a compiled view definition to a shared table and
/// keeps its group state in step with the table's changeset. Appends fold
/// straight into the group accumulators; deletes from an ungrouped view are
/// retracted in place when every accumulator can express the removal. All
/// other changes, and views whose filter or outputs read `NOW()`, fall back
/// to a rebuild from the table.

use crate::changeset::{IncrementalView, TableChange};
use crate::config::EvaluatorConfig;
use crate::definition::{CompiledView, ViewDefinition};
use crate::error::Result;
use crate::evaluator::{Grouping, ResultSet};
use crate::table::Table;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::rc::Rc;

pub struct AggregateView {
    name: String,
    table: Rc<RefCell<Table>>,
    view: CompiledView,
    config: EvaluatorConfig,
    grouping: Grouping,
    /// Absolute changeset position consumed so far
    synced_position: u64,
    /// Table length as of `synced_position`
    table_len: usize,
    /// Time the group state was evaluated at
    built_at: i64,
    /// Group state no longer reflects the table and must be rebuilt
    stale: bool,
}

impl AggregateView {
    /// Compile `definition` against the table's schema and build the
    /// initial group state.
    pub fn new(
        table: Rc<RefCell<Table>>,
        definition: &ViewDefinition,
        config: EvaluatorConfig,
    ) -> Result<Self> {
        let view = definition.compile(table.borrow().schema())?;
        let time_dependent = view.is_time_dependent();

        let mut live = AggregateView {
            name: definition.name().to_string(),
            table,
            view,
            config,
            grouping: Grouping::default(),
            synced_position: 0,
            table_len: 0,
            built_at: 0,
            stale: true,
        };

        // Time-dependent views are built on first read, at the read time
        if !time_dependent {
            live.reload(0)?;
        }
        Ok(live)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &CompiledView {
        &self.view
    }

    pub fn table(&self) -> &Rc<RefCell<Table>> {
        &self.table
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    fn reload(&mut self, now: i64) -> Result<()> {
        let table = self.table.borrow();
        let loaded = self
            .grouping
            .load_table(&self.view, &table, now, &self.config);

        self.synced_position = table.changeset_end();
        self.table_len = table.len();
        self.built_at = now;
        self.stale = loaded.is_err();

        debug!(
            "view '{}': rebuilt from {} rows of '{}'",
            self.name,
            table.len(),
            table.name()
        );
        loaded
    }

    /// Catch up with the table's changeset.
    /// Returns true if the view state changed.
    pub fn sync(&mut self) -> bool {
        let table = self.table.borrow();
        let end = table.changeset_end();
        if end == self.synced_position {
            return false;
        }

        if self.view.is_time_dependent() {
            drop(table);
            self.stale = true;
            self.synced_position = end;
            return true;
        }

        let pending = match table.changeset().since(self.synced_position) {
            Some(changes)
                if self.config.incremental
                    && changes.len() <= self.config.max_pending_changes =>
            {
                Some(changes.to_vec())
            }
            Some(changes) => {
                trace!(
                    "view '{}': {} pending changes, rebuilding",
                    self.name,
                    changes.len()
                );
                None
            }
            None => {
                debug!(
                    "view '{}': changeset compacted past position {}, rebuilding",
                    self.name, self.synced_position
                );
                None
            }
        };
        drop(table);

        let changes = match pending {
            Some(changes) => changes,
            None => {
                self.rebuild();
                return true;
            }
        };

        let modified = self.apply_changes(&changes);
        self.synced_position = end;
        if self.stale {
            self.rebuild();
            return true;
        }
        modified
    }

    /// Rebuild the group state from the table at time `now`.
    pub fn refresh(&mut self, now: i64) -> Result<()> {
        self.reload(now)
    }

    /// Current result rows, evaluated at `now` (milliseconds since the epoch).
    pub fn result(&mut self, now: i64) -> Result<ResultSet> {
        self.sync();
        if self.stale || (self.view.is_time_dependent() && now != self.built_at) {
            self.reload(now)?;
        }
        self.grouping.finish(&self.view, now)
    }
}

impl IncrementalView for AggregateView {
    fn apply_changes(&mut self, changes: &[TableChange]) -> bool {
        let mut modified = false;

        for change in changes {
            if self.stale && !matches!(change, TableChange::Cleared { .. }) {
                continue;
            }

            match change {
                TableChange::RowInserted { data, .. } => {
                    if !change.is_append(self.table_len) {
                        self.stale = true;
                        continue;
                    }
                    self.table_len += 1;
                    let lookup = |name: &str| data.get(name).cloned();
                    match self
                        .grouping
                        .add_row(&self.view, &lookup, self.built_at, &self.config)
                    {
                        Ok(qualified) => modified |= qualified,
                        Err(e) => {
                            warn!("view '{}': insert not applied: {}", self.name, e);
                            self.stale = true;
                        }
                    }
                }

                TableChange::RowDeleted { data, .. } => {
                    self.table_len = self.table_len.saturating_sub(1);
                    let lookup = |name: &str| data.get(name).cloned();
                    match self.grouping.retract_row(&self.view, &lookup, self.built_at) {
                        Ok(true) => modified = true,
                        Ok(false) => self.stale = true,
                        Err(e) => {
                            warn!("view '{}': delete not applied: {}", self.name, e);
                            self.stale = true;
                        }
                    }
                }

                TableChange::CellUpdated { .. } => {
                    self.stale = true;
                }

                TableChange::Cleared { .. } => {
                    self.grouping.clear();
                    self.table_len = 0;
                    self.stale = false;
                    modified = true;
                }
            }
        }

        trace!(
            "view '{}': applied {} changes (stale: {})",
            self.name,
            changes.len(),
            self.stale
        );
        modified || self.stale
    }

    fn synced_position(&self) -> u64 {
        self.synced_position
    }

    fn rebuild(&mut self) {
        if let Err(e) = self.reload(self.built_at) {
            warn!("view '{}': rebuild failed: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for AggregateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateView")
            .field("name", &self.name)
            .field("columns", &self.view.columns())
            .field("synced_position", &self.synced_position)
            .field("stale", &self.stale)
            .finish()
    }
}
