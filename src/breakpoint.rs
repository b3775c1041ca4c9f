//! Breakpoint manager (spec.md §4.5).
//!
//! Owns the table of server-verified breakpoints and the data-breakpoint
//! set. Verification and commit are split in two steps because the server
//! reports candidate locations first (`bp-location`) and only commits a
//! condition once the caller picks which of the candidates to keep.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointRecord {
    pub id: u32,
    pub filename: String,
    pub line_num: u64,
    pub column_num: u64,
    pub valid: bool,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataBreakpointRecord {
    pub instance_id: u64,
    pub var_name: String,
    pub condition: Option<String>,
}

/// Everything the breakpoint manager needs from the current break context
/// to key a data breakpoint to "the instance's current breakpoint id"
/// (spec.md §4.5).
pub trait CurrentBreakpointLookup {
    fn breakpoint_id_for_instance(&self, instance_id: u64) -> Option<u64>;
}

#[derive(Default)]
pub struct BreakpointManager {
    by_id: IndexMap<u32, BreakpointRecord>,
    data: Vec<DataBreakpointRecord>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a server-verified location (spec.md §4.5 `verify`). The
    /// caller is expected to have already sent `type: "bp-location"` and
    /// collected the response entries; this just updates local state and
    /// reports what was inserted.
    pub fn record_verified(&mut self, entries: Vec<BreakpointRecord>) -> Vec<BreakpointRecord> {
        for entry in &entries {
            self.by_id.insert(entry.id, entry.clone());
        }
        entries
    }

    /// Attach a condition to an already-verified id (spec.md §4.5
    /// `setById`).
    pub fn set_condition(&mut self, id: u32, condition: Option<String>) -> Option<&BreakpointRecord> {
        if let Some(record) = self.by_id.get_mut(&id) {
            record.condition = condition;
            Some(record)
        } else {
            None
        }
    }

    /// Drop every breakpoint in `path` (absolute) and return their ids, for
    /// the caller to also tell the server (`type: "breakpoint", action:
    /// "remove"`). Re-verification policy (spec.md §4.5 policy 1): the IDE
    /// resending `setBreakpoints` for a file clears that file first.
    pub fn clear_by_file(&mut self, path: &str) -> Vec<u32> {
        let ids: Vec<u32> = self
            .by_id
            .iter()
            .filter(|(_, r)| r.filename == path)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.by_id.shift_remove(id);
        }
        ids
    }

    pub fn remove_by_id(&mut self, id: u32) -> Option<BreakpointRecord> {
        self.by_id.shift_remove(&id)
    }

    /// Column numbers with a breakpoint at `(file, line)`, for the UI's
    /// inline markers (spec.md §4.5 `getLocations`).
    pub fn get_locations(&self, file: &str, line: u64) -> HashSet<u64> {
        self.by_id
            .values()
            .filter(|r| r.filename == file && r.line_num == line)
            .map(|r| r.column_num)
            .collect()
    }

    /// Pick which of a batch of just-verified ids at the same `(file,
    /// line)` to report back to the UI (spec.md §4.5 policy 2): a single
    /// column unless the caller asked for one explicitly.
    pub fn select_reported<'a>(
        &self,
        candidates: &'a [BreakpointRecord],
        requested_column: Option<u64>,
    ) -> Vec<&'a BreakpointRecord> {
        match requested_column {
            Some(_) => candidates.iter().collect(),
            None => {
                let first_column = candidates.iter().map(|r| r.column_num).min();
                candidates
                    .iter()
                    .filter(|r| Some(r.column_num) == first_column)
                    .take(1)
                    .collect()
            }
        }
    }

    pub fn list_normal(&self) -> Vec<&BreakpointRecord> {
        self.by_id.values().collect()
    }

    pub fn list_data(&self) -> &[DataBreakpointRecord] {
        &self.data
    }

    /// Data breakpoints are keyed to the instance's *current* breakpoint
    /// id, looked up via the break context (spec.md §4.5). `add` fails
    /// (returns `false`) if no such id is known.
    pub fn add_data_breakpoint(
        &mut self,
        lookup: &dyn CurrentBreakpointLookup,
        instance_id: u64,
        var_name: String,
        condition: Option<String>,
    ) -> bool {
        if lookup.breakpoint_id_for_instance(instance_id).is_none() {
            return false;
        }
        self.data.push(DataBreakpointRecord {
            instance_id,
            var_name,
            condition,
        });
        true
    }

    pub fn validate_data_breakpoint(
        &self,
        lookup: &dyn CurrentBreakpointLookup,
        instance_id: u64,
    ) -> bool {
        lookup.breakpoint_id_for_instance(instance_id).is_some()
    }

    pub fn clear_data_breakpoints(&mut self) {
        self.data.clear();
    }
}

/// Simple in-memory lookup used by tests; production code backs this with
/// `SessionState`.
pub struct StaticLookup(pub HashMap<u64, u64>);

impl CurrentBreakpointLookup for StaticLookup {
    fn breakpoint_id_for_instance(&self, instance_id: u64) -> Option<u64> {
        self.0.get(&instance_id).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(id: u32, file: &str, line: u64, col: u64) -> BreakpointRecord {
        BreakpointRecord {
            id,
            filename: file.to_string(),
            line_num: line,
            column_num: col,
            valid: true,
            condition: None,
        }
    }

    #[test]
    fn clear_by_file_only_removes_matching_file() {
        let mut mgr = BreakpointManager::new();
        mgr.record_verified(vec![
            record(1, "/a.sv", 1, 1),
            record(2, "/b.sv", 1, 1),
        ]);
        let removed = mgr.clear_by_file("/a.sv");
        assert_eq!(removed, vec![1]);
        assert_eq!(mgr.list_normal().len(), 1);
        assert_eq!(mgr.list_normal()[0].id, 2);
    }

    #[test]
    fn select_reported_picks_first_column_without_explicit_column() {
        let mgr = BreakpointManager::new();
        let candidates = vec![record(1, "/a.sv", 5, 10), record(2, "/a.sv", 5, 4)];
        let reported = mgr.select_reported(&candidates, None);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].id, 2);
    }

    #[test]
    fn select_reported_returns_all_with_explicit_column() {
        let mgr = BreakpointManager::new();
        let candidates = vec![record(1, "/a.sv", 5, 10), record(2, "/a.sv", 5, 4)];
        let reported = mgr.select_reported(&candidates, Some(4));
        assert_eq!(reported.len(), 2);
    }

    #[test]
    fn data_breakpoint_requires_known_instance() {
        let mut mgr = BreakpointManager::new();
        let lookup = StaticLookup(HashMap::from([(1u64, 9u64)]));
        assert!(mgr.add_data_breakpoint(&lookup, 1, "a.b".into(), None));
        assert!(!mgr.add_data_breakpoint(&lookup, 2, "a.b".into(), None));
        assert_eq!(mgr.list_data().len(), 1);
    }

    #[test]
    fn get_locations_returns_columns_at_file_line() {
        let mut mgr = BreakpointManager::new();
        mgr.record_verified(vec![record(1, "/a.sv", 5, 4), record(2, "/a.sv", 5, 10)]);
        let cols = mgr.get_locations("/a.sv", 5);
        assert_eq!(cols, HashSet::from([4, 10]));
    }
}
