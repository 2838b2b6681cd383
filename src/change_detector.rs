//! Finds rows that appeared between two snapshots.

use crate::protocol::{RawRecord, Snapshot};

/// Rows keyed in `current` but not in `previous`, in ascending row order.
/// Removed rows are ignored and values are never compared.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<RawRecord> {
    current
        .iter()
        .filter(|(row_id, _)| !previous.contains_key(row_id))
        .map(|(_, record)| record.clone())
        .collect()
}

/// Remembers the last snapshot so each tick only reports new rows.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<Snapshot>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Returns the new rows in `current` and makes it the next baseline.
    ///
    /// The first snapshot observed only becomes the baseline, so history that
    /// predates startup is never replayed.
    pub fn observe(&mut self, current: Snapshot) -> Vec<RawRecord> {
        let new_rows = match &self.previous {
            Some(previous) => diff(previous, &current),
            None => Vec::new(),
        };
        self.previous = Some(current);
        new_rows
    }
}
