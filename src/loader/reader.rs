use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::LoadError;
use crate::types::record::MetricRecord;

/// What to do with a row that fails schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRowPolicy {
    /// A malformed row fails the whole file. The default.
    Fail,
    /// A malformed row is dropped and counted; the rest of the file loads.
    Skip,
}

/// Names of the columns carrying the minimal schema. Every other column
/// is passed through as string metadata.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub timestamp: String,
    pub series: String,
    pub value: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            timestamp: "timestamp".to_string(),
            series: "series".to_string(),
            value: "value".to_string(),
        }
    }
}

/// Parsed contents of one CSV file.
#[derive(Debug, Clone)]
pub struct FileRows {
    pub records: Vec<MetricRecord>,
    /// Rows dropped under `BadRowPolicy::Skip`.
    pub rows_skipped: usize,
}

/// Parse one CSV file into typed records.
///
/// The header must contain the three mapped columns; a missing column is
/// a file-level `ParseError` regardless of the row policy. The value
/// field must parse as a finite number and the timestamp as epoch
/// seconds, RFC 3339, `%Y-%m-%d %H:%M:%S`, or `%Y-%m-%d`.
pub fn read_file(
    path: &Path,
    columns: &ColumnMap,
    policy: BadRowPolicy,
) -> Result<FileRows, LoadError> {
    let source_file = file_label(path);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let idx_timestamp = require_column(path, &headers, &columns.timestamp)?;
    let idx_series = require_column(path, &headers, &columns.series)?;
    let idx_value = require_column(path, &headers, &columns.value)?;

    let meta_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx_timestamp && *i != idx_series && *i != idx_value)
        .map(|(i, name)| (i, name.to_string()))
        .collect();

    let mut records = Vec::new();
    let mut rows_skipped = 0usize;

    for (row_index, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            // An I/O failure mid-file is not a row problem; bail either way.
            Err(err) if err.is_io_error() => return Err(csv_error(path, err)),
            Err(err) => match policy {
                BadRowPolicy::Fail => return Err(csv_error(path, err)),
                BadRowPolicy::Skip => {
                    debug!(file = %path.display(), "skipping unreadable row: {err}");
                    rows_skipped += 1;
                    continue;
                }
            },
        };

        let line = row
            .position()
            .map(|p| p.line())
            .unwrap_or(row_index as u64 + 2);

        match parse_row(&row, line, idx_timestamp, idx_series, idx_value, &meta_columns) {
            Ok((series_id, timestamp, value, metadata)) => records.push(MetricRecord {
                series_id,
                timestamp,
                value,
                metadata,
                source_file: source_file.clone(),
            }),
            Err(message) => match policy {
                BadRowPolicy::Fail => {
                    return Err(LoadError::Parse {
                        file: path.to_path_buf(),
                        message,
                    })
                }
                BadRowPolicy::Skip => {
                    debug!(file = %path.display(), "skipping malformed row: {message}");
                    rows_skipped += 1;
                }
            },
        }
    }

    Ok(FileRows {
        records,
        rows_skipped,
    })
}

fn parse_row(
    row: &csv::StringRecord,
    line: u64,
    idx_timestamp: usize,
    idx_series: usize,
    idx_value: usize,
    meta_columns: &[(usize, String)],
) -> Result<(String, i64, f64, HashMap<String, String>), String> {
    let raw_timestamp = row
        .get(idx_timestamp)
        .ok_or_else(|| format!("line {line}: missing timestamp field"))?;
    let raw_series = row
        .get(idx_series)
        .ok_or_else(|| format!("line {line}: missing series field"))?;
    let raw_value = row
        .get(idx_value)
        .ok_or_else(|| format!("line {line}: missing value field"))?;

    let series_id = raw_series.trim();
    if series_id.is_empty() {
        return Err(format!("line {line}: empty series identifier"));
    }

    let timestamp = parse_timestamp(raw_timestamp)
        .ok_or_else(|| format!("line {line}: unparseable timestamp {raw_timestamp:?}"))?;

    let value: f64 = raw_value
        .trim()
        .parse()
        .map_err(|_| format!("line {line}: value {raw_value:?} is not numeric"))?;
    if !value.is_finite() {
        return Err(format!("line {line}: value {raw_value:?} is not finite"));
    }

    let metadata: HashMap<String, String> = meta_columns
        .iter()
        .filter_map(|(i, name)| row.get(*i).map(|v| (name.clone(), v.to_string())))
        .collect();

    Ok((series_id.to_string(), timestamp, value, metadata))
}

/// Accepts epoch seconds or a few common datetime formats, normalized to
/// epoch seconds (UTC).
fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    None
}

fn require_column(
    path: &Path,
    headers: &csv::StringRecord,
    name: &str,
) -> Result<usize, LoadError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| LoadError::Parse {
            file: path.to_path_buf(),
            message: format!("missing required column {name:?}"),
        })
}

fn csv_error(path: &Path, err: csv::Error) -> LoadError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => LoadError::Io {
            file: path.to_path_buf(),
            source,
        },
        _ => LoadError::Parse {
            file: path.to_path_buf(),
            message,
        },
    }
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
