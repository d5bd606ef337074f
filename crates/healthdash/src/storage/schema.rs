//! `SQLite` schema definitions for healthdash.

/// Health records, one row per (method, gateway id).
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    record_key TEXT NOT NULL,
    record_id TEXT,
    start_at TEXT,
    end_at TEXT,
    app TEXT,
    data_json TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    UNIQUE(method, record_key)
)
";

/// Range scans per method by start time.
pub const CREATE_METHOD_START_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_method_start ON records(method, start_at)
";

/// Per-method incremental sync cursor.
pub const CREATE_SYNC_STATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sync_state (
    method TEXT PRIMARY KEY,
    last_since TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_RECORDS_TABLE,
    CREATE_METHOD_START_INDEX,
    CREATE_SYNC_STATE_TABLE,
    CREATE_METADATA_TABLE,
];
