//! Tablet ownership: which `(table, object-id range)` slices this master
//! serves, and the per-table counters that make versions and object ids
//! monotone across every tablet of a table.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletState {
    Normal,
    Recovering,
    LockedForMigration,
}

#[derive(Debug, Default)]
struct TableCounters {
    next_object_id: u64,
    /// Highest version ever issued in this table; versions start at 1, so 0
    /// means none issued yet.
    version_counter: u64,
}

/// Per-table state shared by every tablet of the table. The handle survives
/// `set_tablets` replacements as long as some tablet of the table remains, so
/// allocators and version counters are never reset mid-service.
#[derive(Debug)]
pub struct Table {
    table_id: u32,
    counters: Mutex<TableCounters>,
}

impl Table {
    fn new(table_id: u32) -> Self {
        Self {
            table_id,
            counters: Mutex::new(TableCounters::default()),
        }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn allocate_object_id(&self) -> u64 {
        let mut counters = self.counters.lock();
        let id = counters.next_object_id;
        counters.next_object_id += 1;
        id
    }

    /// Issues the version for a new object revision:
    /// `max(current, counter) + 1`, advancing the counter to the result.
    pub fn assign_version(&self, current: u64) -> u64 {
        let mut counters = self.counters.lock();
        let version = current.max(counters.version_counter) + 1;
        counters.version_counter = version;
        version
    }

    /// Raises the counter to at least `version`. Replay calls this for every
    /// accepted entry so recreated objects outpace everything recovered.
    pub fn raise_version(&self, version: u64) {
        let mut counters = self.counters.lock();
        counters.version_counter = counters.version_counter.max(version);
    }

    pub fn version_counter(&self) -> u64 {
        self.counters.lock().version_counter
    }
}

/// Wire-facing description of one tablet, as the coordinator hands it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletSpec {
    pub table_id: u32,
    pub start: u64,
    pub end: u64,
    pub state: TabletState,
}

impl TabletSpec {
    pub fn normal(table_id: u32, start: u64, end: u64) -> Self {
        Self {
            table_id,
            start,
            end,
            state: TabletState::Normal,
        }
    }
}

/// One owned object-id range `[start, end]` (inclusive bounds) within a table.
#[derive(Debug, Clone)]
pub struct Tablet {
    table_id: u32,
    start: u64,
    end: u64,
    state: TabletState,
    table: Arc<Table>,
}

impl Tablet {
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn state(&self) -> TabletState {
        self.state
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn covers(&self, object_id: u64) -> bool {
        self.start <= object_id && object_id <= self.end
    }

    fn matches(&self, spec: &TabletSpec) -> bool {
        self.table_id == spec.table_id && self.start == spec.start && self.end == spec.end
    }
}

/// The ordered set of tablets this master owns.
#[derive(Debug, Default)]
pub struct TabletTable {
    tablets: Vec<Tablet>,
}

impl TabletTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tablet> {
        self.tablets.iter()
    }

    pub fn len(&self) -> usize {
        self.tablets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablets.is_empty()
    }

    /// The tablet covering `(table_id, object_id)`, regardless of its state.
    /// Callers gate on the state themselves; only `Normal` serves traffic.
    pub fn find(&self, table_id: u32, object_id: u64) -> Option<&Tablet> {
        self.tablets
            .iter()
            .find(|t| t.table_id == table_id && t.covers(object_id))
    }

    /// Atomically replaces the owned set. Per-table handles are preserved for
    /// table ids present in both the old and new sets; everything else is
    /// dropped or created fresh.
    pub fn set_tablets(&mut self, specs: &[TabletSpec]) -> Result<(), TabletConfigError> {
        validate_disjoint(specs)?;
        let mut handles = self.handle_map();
        self.tablets = specs
            .iter()
            .map(|spec| build_tablet(spec, &mut handles))
            .collect();
        Ok(())
    }

    /// Adds the tablets of a recovery partition in `Recovering` state. They
    /// must not overlap anything already owned.
    pub fn install_recovering(&mut self, specs: &[TabletSpec]) -> Result<(), TabletConfigError> {
        validate_disjoint(specs)?;
        for spec in specs {
            if let Some(existing) = self
                .tablets
                .iter()
                .find(|t| t.table_id == spec.table_id && t.start <= spec.end && spec.start <= t.end)
            {
                return Err(TabletConfigError::InvalidTablets {
                    table_id: existing.table_id,
                });
            }
        }
        let mut handles = self.handle_map();
        for spec in specs {
            let mut tablet = build_tablet(spec, &mut handles);
            tablet.state = TabletState::Recovering;
            self.tablets.push(tablet);
        }
        Ok(())
    }

    /// Flips the listed tablets to `Normal`. Tablets the coordinator has since
    /// taken away are silently skipped.
    pub fn mark_normal(&mut self, specs: &[TabletSpec]) {
        for tablet in &mut self.tablets {
            if specs.iter().any(|spec| tablet.matches(spec)) {
                tablet.state = TabletState::Normal;
            }
        }
    }

    /// Discards the listed tablets, releasing their state.
    pub fn drop_tablets(&mut self, specs: &[TabletSpec]) {
        self.tablets
            .retain(|tablet| !specs.iter().any(|spec| tablet.matches(spec)));
    }

    fn handle_map(&self) -> HashMap<u32, Arc<Table>> {
        self.tablets
            .iter()
            .map(|t| (t.table_id, Arc::clone(&t.table)))
            .collect()
    }
}

fn build_tablet(spec: &TabletSpec, handles: &mut HashMap<u32, Arc<Table>>) -> Tablet {
    let table = handles
        .entry(spec.table_id)
        .or_insert_with(|| Arc::new(Table::new(spec.table_id)));
    Tablet {
        table_id: spec.table_id,
        start: spec.start,
        end: spec.end,
        state: spec.state,
        table: Arc::clone(table),
    }
}

fn validate_disjoint(specs: &[TabletSpec]) -> Result<(), TabletConfigError> {
    for (i, a) in specs.iter().enumerate() {
        if a.start > a.end {
            return Err(TabletConfigError::InvalidTablets {
                table_id: a.table_id,
            });
        }
        for b in &specs[i + 1..] {
            if a.table_id == b.table_id && a.start <= b.end && b.start <= a.end {
                return Err(TabletConfigError::InvalidTablets {
                    table_id: a.table_id,
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TabletConfigError {
    #[error("tablet ranges for table {table_id} overlap or are inverted")]
    InvalidTablets { table_id: u32 },
}
