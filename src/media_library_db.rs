//! Read-only access to djay's `MediaLibrary.db`.
//!
//! djay keeps the database open while it runs and takes short exclusive locks
//! for its own writes. Every query here opens a fresh read-only connection
//! with a bounded busy timeout and drops it before returning, so nothing is
//! held between polls.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};

use crate::protocol::RawRecord;

/// The two query shapes the pipeline needs from the library.
pub trait MediaLibrarySource: Send + Sync {
    /// Query A: every row of the given collections.
    fn rows_in_collections(&self, collections: &[String]) -> Result<Vec<RawRecord>, String>;

    /// Query B: the payload of every row in one collection.
    fn payloads_in_collection(&self, collection: &str) -> Result<Vec<Vec<u8>>, String>;
}

/// rusqlite-backed [`MediaLibrarySource`].
#[derive(Debug, Clone)]
pub struct MediaLibraryDb {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl MediaLibraryDb {
    pub fn new(db_path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            db_path,
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn query_rows(&self, collections: &[String]) -> Result<Vec<RawRecord>, rusqlite::Error> {
        let conn = self.open()?;
        let placeholders = vec!["?"; collections.len()].join(",");
        let sql = format!(
            "SELECT rowid, collection, data FROM database2 WHERE collection IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let row_iter = stmt.query_map(params_from_iter(collections.iter()), |row| {
            Ok(RawRecord {
                row_id: row.get(0)?,
                collection: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                payload: payload_bytes(row, 2)?,
            })
        })?;

        let mut rows = Vec::new();
        for row in row_iter {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn query_payloads(&self, collection: &str) -> Result<Vec<Vec<u8>>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT data FROM database2 WHERE collection = ?1")?;
        let payload_iter = stmt.query_map([collection], |row| payload_bytes(row, 0))?;

        let mut payloads = Vec::new();
        for payload in payload_iter {
            payloads.push(payload?);
        }
        Ok(payloads)
    }
}

/// Accepts BLOB or TEXT payloads; anything else reads as empty.
fn payload_bytes(row: &Row<'_>, index: usize) -> Result<Vec<u8>, rusqlite::Error> {
    Ok(match row.get_ref(index)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
        _ => Vec::new(),
    })
}

impl MediaLibrarySource for MediaLibraryDb {
    fn rows_in_collections(&self, collections: &[String]) -> Result<Vec<RawRecord>, String> {
        if collections.is_empty() {
            return Ok(Vec::new());
        }
        self.query_rows(collections).map_err(|err| {
            format!(
                "failed to read collections from {}: {}",
                self.db_path.display(),
                err
            )
        })
    }

    fn payloads_in_collection(&self, collection: &str) -> Result<Vec<Vec<u8>>, String> {
        self.query_payloads(collection).map_err(|err| {
            format!(
                "failed to read {} from {}: {}",
                collection,
                self.db_path.display(),
                err
            )
        })
    }
}

/// Writable scratch copy of the djay schema for pipeline tests.
#[cfg(test)]
pub(crate) mod fixture {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use rusqlite::{params, Connection};

    pub struct FixtureLibrary {
        pub path: PathBuf,
        conn: Connection,
    }

    impl FixtureLibrary {
        pub fn create(name: &str) -> Self {
            let nonce = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time should be valid")
                .as_nanos();
            let path = std::env::temp_dir().join(format!("deckwatch_{name}_{nonce}.db"));
            let conn = Connection::open(&path).expect("fixture db should open");
            conn.execute(
                "CREATE TABLE database2 (collection TEXT, key TEXT, data BLOB)",
                [],
            )
            .expect("fixture schema should apply");
            Self { path, conn }
        }

        pub fn insert(&self, collection: &str, data: &[u8]) -> i64 {
            self.conn
                .execute(
                    "INSERT INTO database2 (collection, key, data) VALUES (?1, ?2, ?3)",
                    params![collection, "k", data],
                )
                .expect("fixture row should insert");
            self.conn.last_insert_rowid()
        }

        pub fn delete(&self, row_id: i64) {
            self.conn
                .execute("DELETE FROM database2 WHERE rowid = ?1", params![row_id])
                .expect("fixture row should delete");
        }
    }

    impl Drop for FixtureLibrary {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
