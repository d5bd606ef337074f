//! CSV import and export.
//!
//! One file per method, with the columns
//! `_id,id,start,end,app,data_json,ingested_at`. This is the layout the
//! gateway collector used before records moved into `SQLite`, so existing
//! CSV archives can be imported and exports stay readable by the same tools.

use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::{ReaderBuilder, Writer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{format_timestamp, parse_timestamp, HealthRecord};
use crate::storage::{Storage, UpsertSummary};

const CSV_HEADER: [&str; 7] = ["_id", "id", "start", "end", "app", "data_json", "ingested_at"];

/// One CSV row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "_id")]
    key: Option<String>,
    id: Option<String>,
    start: Option<String>,
    end: Option<String>,
    app: Option<String>,
    data_json: Option<String>,
    ingested_at: Option<String>,
}

impl From<&HealthRecord> for CsvRow {
    fn from(record: &HealthRecord) -> Self {
        Self {
            key: Some(record.key.clone()),
            id: record.id.clone(),
            start: record.start.map(format_timestamp),
            end: record.end.map(format_timestamp),
            app: record.app.clone(),
            data_json: Some(record.data.to_string()),
            ingested_at: Some(format_timestamp(record.ingested_at)),
        }
    }
}

/// A file written by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    /// Method exported.
    pub method: String,
    /// Path of the CSV file.
    pub path: PathBuf,
    /// Data rows written.
    pub rows: usize,
}

/// Result of importing one CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Method the rows were stored under.
    pub method: String,
    /// Data rows read.
    pub rows: usize,
    /// How the rows landed in storage.
    pub summary: UpsertSummary,
    /// Rows whose `data_json` could not be parsed and were stored as `{}`.
    pub warnings: usize,
}

/// Method name implied by a CSV path (its file stem).
#[must_use]
pub fn method_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Write all stored records of `method` to `<dir>/<method>.csv`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, the file cannot be
/// written, or the records cannot be read.
pub fn export_method_csv(storage: &Storage, method: &str, dir: &Path) -> Result<ExportedFile> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let path = dir.join(format!("{method}.csv"));
    let records = storage.records(method)?;

    let mut writer = Writer::from_path(&path)?;
    if records.is_empty() {
        // serialize() only emits the header alongside the first row
        writer.write_record(CSV_HEADER)?;
    }
    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }
    writer.flush()?;

    debug!(method, rows = records.len(), path = %path.display(), "Exported CSV");
    Ok(ExportedFile {
        method: method.to_string(),
        path,
        rows: records.len(),
    })
}

/// Export every stored method into `dir`.
///
/// # Errors
///
/// Returns an error on the first method that fails to export.
pub fn export_all(storage: &Storage, dir: &Path) -> Result<Vec<ExportedFile>> {
    let mut files = Vec::new();
    for method in storage.methods()? {
        files.push(export_method_csv(storage, &method, dir)?);
    }
    info!(files = files.len(), dir = %dir.display(), "Export finished");
    Ok(files)
}

/// Import a CSV file into storage under `method`.
///
/// When `method` is `None` the file stem is used. Rows sharing an `_id` keep
/// the last occurrence. A row without `_id` gets a key derived from its
/// content.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed as CSV, or the
/// method cannot be determined.
pub fn import_csv(storage: &Storage, method: Option<&str>, path: &Path) -> Result<ImportReport> {
    let method = match method {
        Some(m) => m.to_string(),
        None => method_from_path(path).ok_or_else(|| {
            Error::internal(format!("cannot derive a method name from {}", path.display()))
        })?,
    };

    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let now = Utc::now();
    let mut records = Vec::new();
    let mut warnings = 0;

    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row?;
        let (record, clean) = row_to_record(row, now);
        if !clean {
            warnings += 1;
            warn!(
                method = %method,
                row = line + 1,
                key = %record.key,
                "Unparsable data_json, storing empty object"
            );
        }
        records.push(record);
    }

    let summary = storage.upsert_records(&method, &records)?;
    info!(
        method = %method,
        rows = records.len(),
        inserted = summary.inserted,
        updated = summary.updated,
        warnings,
        "Imported {}",
        path.display()
    );

    Ok(ImportReport {
        method,
        rows: records.len(),
        summary,
        warnings,
    })
}

/// Convert a row; the flag is false when `data_json` was present but invalid.
fn row_to_record(row: CsvRow, now: chrono::DateTime<Utc>) -> (HealthRecord, bool) {
    let (data, clean) = match row.data_json.as_deref().map(str::trim) {
        None | Some("") => (json!({}), true),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Null) => (json!({}), true),
            Ok(value) => (value, true),
            Err(_) => (json!({}), false),
        },
    };

    let key = row.key.clone().filter(|k| !k.is_empty()).unwrap_or_else(|| {
        HealthRecord::compute_key(&json!({
            "id": row.id,
            "start": row.start,
            "end": row.end,
            "app": row.app,
            "data": data,
        }))
    });

    let record = HealthRecord {
        key,
        id: row.id,
        start: row.start.as_deref().and_then(parse_timestamp),
        end: row.end.as_deref().and_then(parse_timestamp),
        app: row.app,
        data,
        ingested_at: row
            .ingested_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now),
    };
    (record, clean)
}
