//! Captures the watched history collections once per tick.

use std::sync::Arc;

use crate::media_library_db::MediaLibrarySource;
use crate::protocol::Snapshot;

pub struct SnapshotPoller {
    source: Arc<dyn MediaLibrarySource>,
    collections: Vec<String>,
}

impl SnapshotPoller {
    pub fn new(source: Arc<dyn MediaLibrarySource>, collections: Vec<String>) -> Self {
        Self {
            source,
            collections,
        }
    }

    /// Reads every watched row. An error means "try again next tick": djay
    /// holds short exclusive locks while it writes.
    pub fn poll(&self) -> Result<Snapshot, String> {
        let rows = self.source.rows_in_collections(&self.collections)?;
        Ok(rows.into_iter().map(|row| (row.row_id, row)).collect())
    }
}
