use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::record::MetricRecord;

pub type CachePool = Pool<SqliteConnectionManager>;

/// Identity of a source file at parse time. A key mismatch on lookup is
/// a miss, so edits and truncations invalidate tiles without any
/// explicit eviction. `config` fingerprints the parse configuration
/// (column mapping, row policy): a tile parsed under one configuration
/// must not answer for another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileKey {
    pub mtime: i64,
    pub size: i64,
    pub config: String,
}

impl TileKey {
    /// Key for the file as it exists on disk right now.
    pub fn for_file(path: &Path, config: &str) -> Option<TileKey> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_secs() as i64;
        Some(TileKey {
            mtime,
            size: meta.len() as i64,
            config: config.to_string(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TileRef<'a> {
    rows_skipped: usize,
    records: &'a [MetricRecord],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tile {
    rows_skipped: usize,
    records: Vec<MetricRecord>,
}

/// Per-file parsed tiles in SQLite. Purely a memoization layer: every
/// failure here degrades to a re-parse, never to a run failure.
pub struct TileCache {
    pool: CachePool,
}

impl TileCache {
    pub fn open(db_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(4).build(manager)?;

        // WAL mode for concurrent readers, same as the main state db
        let conn = pool.get()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS tiles (
                path TEXT PRIMARY KEY,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL,
                config TEXT NOT NULL DEFAULT '',
                tile TEXT NOT NULL,
                cached_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;

        Ok(Self { pool })
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .expect("Could not determine home directory")
            .join(".driftwatch")
            .join("cache")
            .join("tiles.sqlite")
    }

    /// Fetch the tile for `path` if its key still matches the file on
    /// disk. Stale keys, corrupt tiles, and cache I/O errors are all
    /// misses.
    pub fn lookup(&self, path: &Path, key: &TileKey) -> Option<(Vec<MetricRecord>, usize)> {
        match self.lookup_inner(path, key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("tile cache lookup failed for {}: {e}", path.display());
                None
            }
        }
    }

    fn lookup_inner(
        &self,
        path: &Path,
        key: &TileKey,
    ) -> Result<Option<(Vec<MetricRecord>, usize)>, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let row: Option<(i64, i64, String, String)> = conn
            .query_row(
                "SELECT mtime, size, config, tile FROM tiles WHERE path = ?1",
                [path_key(path)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| e.to_string())?;

        let Some((mtime, size, config, tile_json)) = row else {
            return Ok(None);
        };
        if mtime != key.mtime || size != key.size || config != key.config {
            return Ok(None);
        }

        let tile: Tile = serde_json::from_str(&tile_json)
            .map_err(|e| format!("corrupt tile, rebuilding: {e}"))?;
        Ok(Some((tile.records, tile.rows_skipped)))
    }

    /// Best-effort store; failures are logged and ignored.
    pub fn store(&self, path: &Path, key: &TileKey, records: &[MetricRecord], rows_skipped: usize) {
        if let Err(e) = self.store_inner(path, key, records, rows_skipped) {
            warn!("tile cache store failed for {}: {e}", path.display());
        }
    }

    fn store_inner(
        &self,
        path: &Path,
        key: &TileKey,
        records: &[MetricRecord],
        rows_skipped: usize,
    ) -> Result<(), String> {
        let tile_json = serde_json::to_string(&TileRef {
            rows_skipped,
            records,
        })
        .map_err(|e| e.to_string())?;

        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO tiles (path, mtime, size, config, tile) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                 mtime = ?2, size = ?3, config = ?4, tile = ?5, cached_at = datetime('now')",
            rusqlite::params![path_key(path), key.mtime, key.size, key.config, tile_json],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Tiles are keyed on the canonical absolute path so relative
/// invocations from different working directories share entries.
fn path_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_records() -> Vec<MetricRecord> {
        vec![MetricRecord {
            series_id: "total_count".to_string(),
            timestamp: 100,
            value: 42.0,
            metadata: Default::default(),
            source_file: "m.csv".to_string(),
        }]
    }

    #[test]
    fn default_path_ends_with_tiles_db() {
        let path = TileCache::default_path();
        assert!(path.ends_with(".driftwatch/cache/tiles.sqlite"));
    }

    #[test]
    fn store_and_lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::open(&dir.path().join("tiles.sqlite")).unwrap();
        let source = dir.path().join("m.csv");
        fs::write(&source, "data").unwrap();
        let key = TileKey::for_file(&source, "default").unwrap();

        cache.store(&source, &key, &sample_records(), 3);
        let (records, rows_skipped) = cache.lookup(&source, &key).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 42.0);
        assert_eq!(rows_skipped, 3);
    }

    #[test]
    fn lookup_misses_when_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::open(&dir.path().join("tiles.sqlite")).unwrap();
        let source = dir.path().join("m.csv");
        fs::write(&source, "data").unwrap();
        let key = TileKey::for_file(&source, "default").unwrap();
        cache.store(&source, &key, &sample_records(), 0);

        let grown = TileKey {
            size: key.size + 1,
            ..key
        };
        assert!(cache.lookup(&source, &grown).is_none());
    }

    #[test]
    fn lookup_misses_when_parse_config_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::open(&dir.path().join("tiles.sqlite")).unwrap();
        let source = dir.path().join("m.csv");
        fs::write(&source, "data").unwrap();
        let key = TileKey::for_file(&source, "strict").unwrap();
        cache.store(&source, &key, &sample_records(), 0);

        let lenient = TileKey::for_file(&source, "lenient").unwrap();
        assert!(cache.lookup(&source, &lenient).is_none());
        assert!(cache.lookup(&source, &key).is_some());
    }

    #[test]
    fn lookup_misses_on_unknown_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::open(&dir.path().join("tiles.sqlite")).unwrap();
        let key = TileKey {
            mtime: 1,
            size: 1,
            config: String::new(),
        };
        assert!(cache.lookup(Path::new("/nope.csv"), &key).is_none());
    }

    #[test]
    fn corrupt_tile_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tiles.sqlite");
        let cache = TileCache::open(&db_path).unwrap();
        let source = dir.path().join("m.csv");
        fs::write(&source, "data").unwrap();
        let key = TileKey::for_file(&source, "default").unwrap();

        let conn = cache.pool.get().unwrap();
        conn.execute(
            "INSERT INTO tiles (path, mtime, size, config, tile) VALUES (?1, ?2, ?3, ?4, 'not-json')",
            rusqlite::params![path_key(&source), key.mtime, key.size, key.config],
        )
        .unwrap();
        drop(conn);

        assert!(cache.lookup(&source, &key).is_none());
    }

    #[test]
    fn store_replaces_existing_tile() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::open(&dir.path().join("tiles.sqlite")).unwrap();
        let source = dir.path().join("m.csv");
        fs::write(&source, "data").unwrap();
        let key = TileKey::for_file(&source, "default").unwrap();

        cache.store(&source, &key, &sample_records(), 0);
        let mut updated = sample_records();
        updated[0].value = 99.0;
        cache.store(&source, &key, &updated, 1);

        let (records, rows_skipped) = cache.lookup(&source, &key).unwrap();
        assert_eq!(records[0].value, 99.0);
        assert_eq!(rows_skipped, 1);
    }
}
