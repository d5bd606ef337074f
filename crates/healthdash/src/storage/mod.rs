//! Storage layer for healthdash.
//!
//! This module provides `SQLite`-based persistent storage for health records,
//! including de-duplication by gateway id, per-method sync cursors, range
//! queries and pruning.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{format_timestamp, parse_timestamp, HealthRecord};

const RECORD_COLUMNS: &str =
    "record_key, record_id, start_at, end_at, app, data_json, ingested_at";

/// Storage engine for health records.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

/// Outcome of writing a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Records whose key was not stored before.
    pub inserted: usize,
    /// Records that replaced an existing row with the same key.
    pub updated: usize,
}

impl UpsertSummary {
    /// Total rows written.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write records for `method`, replacing rows that share a key.
    ///
    /// The batch is applied in one transaction and in order, so when the
    /// batch itself repeats a key the last occurrence is what remains.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_records(&self, method: &str, records: &[HealthRecord]) -> Result<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut exists = tx.prepare_cached(
                "SELECT 1 FROM records WHERE method = ?1 AND record_key = ?2",
            )?;
            let mut upsert = tx.prepare_cached(
                r"
                INSERT INTO records
                    (method, record_key, record_id, start_at, end_at, app, data_json, ingested_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(method, record_key) DO UPDATE SET
                    record_id = excluded.record_id,
                    start_at = excluded.start_at,
                    end_at = excluded.end_at,
                    app = excluded.app,
                    data_json = excluded.data_json,
                    ingested_at = excluded.ingested_at
                ",
            )?;

            for record in records {
                let known = exists
                    .query_row(params![method, record.key], |_| Ok(()))
                    .optional()?
                    .is_some();

                upsert.execute(params![
                    method,
                    record.key,
                    record.id,
                    record.start.map(format_timestamp),
                    record.end.map(format_timestamp),
                    record.app,
                    record.data.to_string(),
                    format_timestamp(record.ingested_at),
                ])?;

                if known {
                    summary.updated += 1;
                } else {
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        debug!(
            method,
            inserted = summary.inserted,
            updated = summary.updated,
            "Stored records"
        );
        Ok(summary)
    }

    /// All records of a method, oldest start first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn records(&self, method: &str) -> Result<Vec<HealthRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE method = ?1 ORDER BY start_at ASC, id ASC"
        ))?;
        let records = stmt
            .query_map([method], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records of a method whose start is at or after `cutoff`, oldest first.
    ///
    /// Records without a start time are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn records_since(&self, method: &str, cutoff: DateTime<Utc>) -> Result<Vec<HealthRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {RECORD_COLUMNS} FROM records
            WHERE method = ?1 AND start_at IS NOT NULL AND start_at >= ?2
            ORDER BY start_at ASC, id ASC
            "
        ))?;
        let records = stmt
            .query_map(params![method, format_timestamp(cutoff)], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Count records, for one method or overall.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, method: Option<&str>) -> Result<i64> {
        let count: i64 = match method {
            Some(m) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE method = ?1",
                [m],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Methods that have stored records, alphabetically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn methods(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT method FROM records ORDER BY method")?;
        let methods = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(methods)
    }

    /// The stored sync cursor for a method.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_cursor(&self, method: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_since FROM sync_state WHERE method = ?1",
                [method],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|s| {
            let parsed = parse_timestamp(&s);
            if parsed.is_none() {
                warn!(method, value = %s, "Ignoring unparsable sync cursor");
            }
            parsed
        }))
    }

    /// Persist the sync cursor for a method.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_sync_cursor(&self, method: &str, since: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO sync_state (method, last_since, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(method) DO UPDATE SET
                last_since = excluded.last_since,
                updated_at = excluded.updated_at
            ",
            params![method, format_timestamp(since), format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    /// Per-method overview for status output.
    ///
    /// Methods with a cursor but no records are included with a zero count.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn method_stats(&self) -> Result<Vec<MethodStats>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT m.method,
                   (SELECT COUNT(*) FROM records r WHERE r.method = m.method),
                   (SELECT MIN(start_at) FROM records r WHERE r.method = m.method),
                   (SELECT MAX(start_at) FROM records r WHERE r.method = m.method),
                   (SELECT MAX(ingested_at) FROM records r WHERE r.method = m.method),
                   s.last_since
            FROM (SELECT method FROM records UNION SELECT method FROM sync_state) m
            LEFT JOIN sync_state s ON s.method = m.method
            ORDER BY m.method
            ",
        )?;

        let parse = |v: Option<String>| v.as_deref().and_then(parse_timestamp);
        let stats = stmt
            .query_map([], |row| {
                Ok(MethodStats {
                    method: row.get(0)?,
                    records: row.get(1)?,
                    first_start: parse(row.get(2)?),
                    last_start: parse(row.get(3)?),
                    last_ingested: parse(row.get(4)?),
                    cursor: parse(row.get(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    /// Delete records whose start is older than `max_age`.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimeSpec`] if `max_age` reaches past the
    /// earliest representable instant, or an error if the database
    /// operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .ok_or_else(|| Error::InvalidTimeSpec {
                input: format!("{}d", max_age.num_days()),
            })?;
        let cutoff = format_timestamp(cutoff);
        let affected = self.conn.execute(
            "DELETE FROM records WHERE start_at IS NOT NULL AND start_at < ?1",
            [cutoff],
        )?;

        if affected > 0 {
            info!("Pruned {} old records", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_records = self.count(None)?;
        let methods = self.methods()?.len();

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(start_at), MAX(start_at) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_records,
            methods,
            oldest_record: oldest.as_deref().and_then(parse_timestamp),
            newest_record: newest.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HealthRecord> {
        let key: String = row.get(0)?;
        let start: Option<String> = row.get(2)?;
        let end: Option<String> = row.get(3)?;
        let data_json: String = row.get(5)?;
        let ingested_at: String = row.get(6)?;

        let data = serde_json::from_str(&data_json).unwrap_or_else(|e| {
            warn!(key = %key, "Stored data_json is not valid JSON: {}", e);
            serde_json::Value::Object(serde_json::Map::new())
        });

        Ok(HealthRecord {
            id: row.get(1)?,
            start: start.as_deref().and_then(parse_timestamp),
            end: end.as_deref().and_then(parse_timestamp),
            app: row.get(4)?,
            data,
            ingested_at: parse_timestamp(&ingested_at).unwrap_or_default(),
            key,
        })
    }
}

/// Per-method storage overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodStats {
    /// Method name.
    pub method: String,
    /// Stored record count.
    pub records: i64,
    /// Earliest record start.
    pub first_start: Option<DateTime<Utc>>,
    /// Latest record start.
    pub last_start: Option<DateTime<Utc>>,
    /// Most recent ingest time.
    pub last_ingested: Option<DateTime<Utc>>,
    /// Sync cursor used for the next fetch.
    pub cursor: Option<DateTime<Utc>>,
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of records stored.
    pub total_records: i64,
    /// Number of methods with records.
    pub methods: usize,
    /// Start of the oldest record.
    pub oldest_record: Option<DateTime<Utc>>,
    /// Start of the newest record.
    pub newest_record: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
