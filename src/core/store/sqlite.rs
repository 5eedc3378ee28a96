//! SQLite store for persistent, resumable scans.

use super::{CachedHash, MetadataStore, StateCounts};
use crate::core::record::{
    ContentHash, FileKey, FileRecord, MediaKind, ProcessingState, RecordUpdate, SourceId,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const RECORD_COLUMNS: &str =
    "source_id, path, size, modified, media_kind, state, partial_hash, full_hash, failure";

/// SQLite-backed metadata store
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while writes happen.
/// Grouping queries are answered by indexed GROUP BY counting.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create a store database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::create_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                source_id TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified INTEGER,
                media_kind TEXT NOT NULL,
                state TEXT NOT NULL,
                partial_hash BLOB,
                full_hash BLOB,
                failure TEXT,
                PRIMARY KEY (source_id, path)
            );
            CREATE INDEX IF NOT EXISTS idx_files_state_size ON files(state, size);
            CREATE INDEX IF NOT EXISTS idx_files_size_partial ON files(size, partial_hash);
            CREATE INDEX IF NOT EXISTS idx_files_full_hash ON files(full_hash);

            CREATE TABLE IF NOT EXISTS hash_cache (
                source_id TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                full_hash BLOB NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (source_id, path)
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                written_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Corrupted {
            path: self.db_path.clone(),
        })
    }

    fn hash_to_blob(hash: Option<ContentHash>) -> Option<Vec<u8>> {
        hash.map(|h| h.as_bytes().to_vec())
    }

    fn blob_to_hash(blob: Option<Vec<u8>>) -> Option<ContentHash> {
        blob.and_then(|b| ContentHash::from_slice(&b))
    }

    fn from_timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
        secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
        let state: String = row.get(5)?;
        let kind: String = row.get(4)?;
        Ok(FileRecord {
            key: FileKey::new(SourceId::new(row.get::<_, String>(0)?), row.get::<_, String>(1)?),
            size: row.get::<_, i64>(2)? as u64,
            modified: Self::from_timestamp(row.get(3)?),
            media_kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Photo),
            state: ProcessingState::parse(&state).unwrap_or(ProcessingState::Discovered),
            partial_hash: Self::blob_to_hash(row.get(6)?),
            full_hash: Self::blob_to_hash(row.get(7)?),
            failure: row.get(8)?,
        })
    }

    /// `source_id IN (..) AND state IN (..)` plus the values to bind
    fn scope(sources: &[SourceId], states: &[ProcessingState]) -> (String, Vec<String>) {
        let marks = |n: usize| vec!["?"; n].join(", ");
        let clause = format!(
            "source_id IN ({}) AND state IN ({})",
            marks(sources.len()),
            marks(states.len())
        );
        let values = sources
            .iter()
            .map(|s| s.as_str().to_string())
            .chain(states.iter().map(|s| s.as_str().to_string()))
            .collect();
        (clause, values)
    }

    fn query_records(&self, sql: &str, values: Vec<String>) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Runs a collision query whose scope clause appears twice
    fn query_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
        sql: impl FnOnce(&str) -> String,
    ) -> Result<Vec<FileRecord>, StoreError> {
        if sources.is_empty() || states.is_empty() {
            return Ok(Vec::new());
        }
        let (clause, values) = Self::scope(sources, states);
        let doubled = values.iter().chain(values.iter()).cloned().collect();
        self.query_records(&sql(&clause), doubled)
    }

    fn upsert_with(conn: &Connection, record: &FileRecord) -> Result<(), StoreError> {
        conn.execute(
            &format!(
                "INSERT INTO files ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source_id, path) DO UPDATE SET
                    size = excluded.size,
                    modified = excluded.modified,
                    media_kind = excluded.media_kind,
                    state = excluded.state,
                    partial_hash = excluded.partial_hash,
                    full_hash = excluded.full_hash,
                    failure = excluded.failure"
            ),
            params![
                record.key.source_id.as_str(),
                record.key.path,
                record.size as i64,
                record.modified.map(|m| m.timestamp()),
                record.media_kind.as_str(),
                record.state.as_str(),
                Self::hash_to_blob(record.partial_hash),
                Self::hash_to_blob(record.full_hash),
                record.failure,
            ],
        )?;
        Ok(())
    }
}

impl MetadataStore for SqliteStore {
    fn upsert(&self, record: &FileRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::upsert_with(&conn, record)
    }

    fn upsert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            Self::upsert_with(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, key: &FileKey) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM files WHERE source_id = ? AND path = ?"),
                params![key.source_id.as_str(), key.path],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn update(&self, key: &FileKey, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut record = tx
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM files WHERE source_id = ? AND path = ?"),
                params![key.source_id.as_str(), key.path],
                Self::row_to_record,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;

        update.apply_to(&mut record)?;

        tx.execute(
            "UPDATE files SET state = ?, partial_hash = ?, full_hash = ?, failure = ?
             WHERE source_id = ? AND path = ?",
            params![
                record.state.as_str(),
                Self::hash_to_blob(record.partial_hash),
                Self::hash_to_blob(record.full_hash),
                record.failure,
                key.source_id.as_str(),
                key.path,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn size_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.query_collisions(sources, states, |scope| {
            format!(
                "SELECT {RECORD_COLUMNS} FROM files
                 WHERE {scope}
                   AND size IN (
                       SELECT size FROM files WHERE {scope}
                       GROUP BY size HAVING COUNT(*) >= 2)
                 ORDER BY source_id, path"
            )
        })
    }

    fn partial_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.query_collisions(sources, states, |scope| {
            format!(
                "SELECT {RECORD_COLUMNS} FROM files
                 WHERE {scope}
                   AND partial_hash IS NOT NULL
                   AND (size, partial_hash) IN (
                       SELECT size, partial_hash FROM files
                       WHERE {scope} AND partial_hash IS NOT NULL
                       GROUP BY size, partial_hash HAVING COUNT(*) >= 2)
                 ORDER BY source_id, path"
            )
        })
    }

    fn full_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.query_collisions(sources, states, |scope| {
            format!(
                "SELECT {RECORD_COLUMNS} FROM files
                 WHERE {scope}
                   AND full_hash IN (
                       SELECT full_hash FROM files
                       WHERE {scope} AND full_hash IS NOT NULL
                       GROUP BY full_hash HAVING COUNT(*) >= 2)
                 ORDER BY source_id, path"
            )
        })
    }

    fn records_in_state(
        &self,
        sources: &[SourceId],
        state: ProcessingState,
    ) -> Result<Vec<FileRecord>, StoreError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let (scope, values) = Self::scope(sources, &[state]);
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM files WHERE {scope} ORDER BY source_id, path"),
            values,
        )
    }

    fn transition_state(
        &self,
        sources: &[SourceId],
        from: ProcessingState,
        to: ProcessingState,
    ) -> Result<usize, StoreError> {
        if from == to {
            return Ok(0);
        }
        if !from.can_advance_to(to) {
            return Err(StoreError::IllegalTransition {
                key: "*".to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if sources.is_empty() {
            return Ok(0);
        }
        let (scope, values) = Self::scope(sources, &[from]);
        let conn = self.lock()?;
        let moved = conn.execute(
            &format!("UPDATE files SET state = ? WHERE {scope}"),
            params_from_iter(std::iter::once(to.as_str().to_string()).chain(values)),
        )?;
        Ok(moved)
    }

    fn clear_source(&self, source_id: &SourceId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM files WHERE source_id = ?",
            params![source_id.as_str()],
        )?;
        Ok(removed)
    }

    fn state_counts(&self, sources: &[SourceId]) -> Result<StateCounts, StoreError> {
        let mut counts = StateCounts::default();
        if sources.is_empty() {
            return Ok(counts);
        }
        let marks = vec!["?"; sources.len()].join(", ");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT state, COUNT(*) FROM files WHERE source_id IN ({marks}) GROUP BY state"
        ))?;
        let rows = stmt.query_map(params_from_iter(sources.iter().map(|s| s.as_str())), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (state, count) = row?;
            if let Some(state) = ProcessingState::parse(&state) {
                counts.add(state, count as usize);
            }
        }
        Ok(counts)
    }

    fn remember_hash(&self, entry: &CachedHash) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO hash_cache
                (source_id, path, size, modified, full_hash, cached_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.key.source_id.as_str(),
                entry.key.path,
                entry.size as i64,
                entry.modified.timestamp(),
                entry.full_hash.as_bytes().to_vec(),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn cached_hash(
        &self,
        key: &FileKey,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<Option<ContentHash>, StoreError> {
        if modified.is_none() {
            return Ok(None);
        }
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT size, modified, full_hash FROM hash_cache
                 WHERE source_id = ? AND path = ?",
                params![key.source_id.as_str(), key.path],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((cached_size, cached_modified, blob)) = entry else {
            return Ok(None);
        };
        let (Some(cached_modified), Some(full_hash)) = (
            DateTime::<Utc>::from_timestamp(cached_modified, 0),
            ContentHash::from_slice(&blob),
        ) else {
            return Ok(None);
        };

        let cached = CachedHash {
            key: key.clone(),
            size: cached_size as u64,
            modified: cached_modified,
            full_hash,
        };
        Ok(cached.is_valid_for(size, modified).then_some(full_hash))
    }

    fn write_checkpoint(&self, session_id: &str, payload: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (session_id, payload, written_at) VALUES (?, ?, ?)",
            params![session_id, payload, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn read_checkpoint(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM checkpoints WHERE session_id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn delete_checkpoint(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM checkpoints WHERE session_id = ?",
            params![session_id],
        )?;
        Ok(())
    }
}
