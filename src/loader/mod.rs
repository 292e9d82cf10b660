pub mod cache;
pub mod reader;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::LoadError;
use crate::types::record::MetricRecord;
use crate::types::summary::LoadSummary;
use cache::{TileCache, TileKey};
use reader::{BadRowPolicy, ColumnMap, FileRows};

/// How the loader materializes records. Resolved exactly once at load
/// start; downstream code sees the same `Dataset` contract either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Pick streaming when the folder's total CSV size exceeds
    /// `STREAMING_BYTES_THRESHOLD`.
    #[default]
    Auto,
    Eager,
    Streaming,
}

/// Above this total on-disk size, `Auto` switches to streaming.
pub const STREAMING_BYTES_THRESHOLD: u64 = 64 * 1024 * 1024;

pub struct LoaderConfig {
    pub folder: PathBuf,
    /// Best-effort cap on rows read. The file being read when the cap
    /// is hit is still finished, so the total may overshoot by up to
    /// one file; it never cuts mid-record.
    pub sample: Option<usize>,
    pub max_files: Option<usize>,
    /// Continue past files that fail to parse instead of aborting.
    pub skip_bad_files: bool,
    pub bad_row_policy: BadRowPolicy,
    pub strategy: LoadStrategy,
    pub columns: ColumnMap,
    pub cache: Option<TileCache>,
}

impl LoaderConfig {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            sample: None,
            max_files: None,
            skip_bad_files: false,
            bad_row_policy: BadRowPolicy::Fail,
            strategy: LoadStrategy::Auto,
            columns: ColumnMap::default(),
            cache: None,
        }
    }
}

/// An ordered sequence of records plus the load summary. Eager datasets
/// are fully materialized; streaming datasets hold an unread file cursor
/// and produce records one file at a time during `materialize`.
pub struct Dataset {
    source: DatasetSource,
    summary: LoadSummary,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset").field("summary", &self.summary).finish()
    }
}

enum DatasetSource {
    Materialized(Vec<MetricRecord>),
    Streaming(FileCursor),
}

impl Dataset {
    pub fn is_streaming(&self) -> bool {
        matches!(self.source, DatasetSource::Streaming(_))
    }

    /// Summary so far. Complete for eager loads; a streaming load
    /// finishes its counts during `materialize`.
    pub fn summary(&self) -> &LoadSummary {
        &self.summary
    }

    /// Consume the dataset, returning every surviving record and the
    /// completed load summary.
    pub fn materialize(self) -> Result<(Vec<MetricRecord>, LoadSummary), LoadError> {
        match self.source {
            DatasetSource::Materialized(records) => Ok((records, self.summary)),
            DatasetSource::Streaming(cursor) => {
                let mut summary = self.summary;
                let records = cursor.drain(&mut summary)?;
                if summary.is_empty() {
                    warn!("no rows loaded; the report will be empty");
                }
                Ok((records, summary))
            }
        }
    }
}

/// Load every CSV file under `config.folder` (recursively), in
/// lexicographic path order so sampling is reproducible.
pub fn load_metrics(config: LoaderConfig) -> Result<Dataset, LoadError> {
    if !config.folder.is_dir() {
        return Err(LoadError::FolderNotFound(config.folder.clone()));
    }

    let mut files = collect_csv_files(&config.folder)?;
    files.sort();

    let mut summary = LoadSummary::default();

    if let Some(max) = config.max_files {
        if files.len() > max {
            info!(
                "file limit of {max} reached; ignoring {} file(s)",
                files.len() - max
            );
            files.truncate(max);
            summary.truncated = true;
        }
    }

    let streaming = match config.strategy {
        LoadStrategy::Eager => false,
        LoadStrategy::Streaming => true,
        LoadStrategy::Auto => total_size(&files) > STREAMING_BYTES_THRESHOLD,
    };
    summary.streaming = streaming;

    let cursor = FileCursor {
        files,
        sample: config.sample,
        skip_bad_files: config.skip_bad_files,
        bad_row_policy: config.bad_row_policy,
        columns: config.columns,
        cache: config.cache,
    };

    if streaming {
        info!(
            "streaming load enabled for {} ({} files); records are produced one file at a time",
            config.folder.display(),
            cursor.files.len()
        );
        Ok(Dataset {
            source: DatasetSource::Streaming(cursor),
            summary,
        })
    } else {
        let records = cursor.drain(&mut summary)?;
        info!(
            "loaded {} rows eagerly from {} file(s)",
            summary.rows_read, summary.files_succeeded
        );
        if summary.is_empty() {
            warn!(
                "no rows loaded from {}; the report will be empty",
                config.folder.display()
            );
        }
        Ok(Dataset {
            source: DatasetSource::Materialized(records),
            summary,
        })
    }
}

struct FileCursor {
    files: Vec<PathBuf>,
    sample: Option<usize>,
    skip_bad_files: bool,
    bad_row_policy: BadRowPolicy,
    columns: ColumnMap,
    cache: Option<TileCache>,
}

impl FileCursor {
    fn drain(self, summary: &mut LoadSummary) -> Result<Vec<MetricRecord>, LoadError> {
        let mut records = Vec::new();
        let total = self.files.len();

        for (index, path) in self.files.iter().enumerate() {
            if let Some(cap) = self.sample {
                if records.len() >= cap {
                    info!(
                        "sample cap of {cap} rows reached; leaving {} file(s) unread",
                        total - index
                    );
                    summary.truncated = true;
                    break;
                }
            }

            summary.files_attempted += 1;
            match self.read_one(path, summary) {
                Ok(rows) => {
                    summary.files_succeeded += 1;
                    summary.rows_skipped += rows.rows_skipped;
                    summary.rows_read += rows.records.len();
                    records.extend(rows.records);
                }
                Err(err) if self.skip_bad_files => {
                    warn!("skipping {}: {err}", path.display());
                    summary.files_skipped += 1;
                    summary.truncated = true;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(records)
    }

    fn read_one(&self, path: &Path, summary: &mut LoadSummary) -> Result<FileRows, LoadError> {
        if let Some(cache) = &self.cache {
            let fingerprint = parse_fingerprint(&self.columns, self.bad_row_policy);
            if let Some(key) = TileKey::for_file(path, &fingerprint) {
                if let Some((records, rows_skipped)) = cache.lookup(path, &key) {
                    summary.cache_hits += 1;
                    return Ok(FileRows {
                        records,
                        rows_skipped,
                    });
                }
                let rows = reader::read_file(path, &self.columns, self.bad_row_policy)?;
                cache.store(path, &key, &rows.records, rows.rows_skipped);
                return Ok(rows);
            }
        }
        reader::read_file(path, &self.columns, self.bad_row_policy)
    }
}

/// Tiles answer only for the parse configuration that produced them.
fn parse_fingerprint(columns: &ColumnMap, policy: BadRowPolicy) -> String {
    format!(
        "{}|{}|{}|{:?}",
        columns.timestamp, columns.series, columns.value, policy
    )
}

fn collect_csv_files(folder: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    let mut pending = vec![folder.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|source| LoadError::Io {
            file: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| LoadError::Io {
                file: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().map_or(false, |ext| ext == "csv") {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn total_size(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|f| std::fs::metadata(f).ok())
        .map(|m| m.len())
        .sum()
}
