//! Metadata store trait definition.

use super::{CachedHash, StateCounts};
use crate::core::record::{ContentHash, FileKey, FileRecord, ProcessingState, RecordUpdate, SourceId};
use crate::error::StoreError;

/// Persistent table of file records, the backbone of resumable scans.
///
/// Grouping and state queries are scoped to a set of sources, so sessions over
/// different sources can share one store. Bucket cardinality is counted over
/// records of those sources in the given states only. The hash cache outlives
/// sessions.
pub trait MetadataStore: Send + Sync {
    /// Insert a record, replacing any existing record with the same key
    fn upsert(&self, record: &FileRecord) -> Result<(), StoreError>;

    /// Insert many records in one transaction
    fn upsert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    fn get(&self, key: &FileKey) -> Result<Option<FileRecord>, StoreError>;

    /// Update state, hash or failure fields by key.
    ///
    /// Backward state changes fail with `IllegalTransition`.
    fn update(&self, key: &FileKey, update: &RecordUpdate) -> Result<(), StoreError>;

    /// Records whose size is shared by at least two records
    fn size_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError>;

    /// Records whose (size, partial hash) is shared by at least two records
    fn partial_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError>;

    /// Records whose full hash is shared by at least two records
    fn full_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError>;

    fn records_in_state(
        &self,
        sources: &[SourceId],
        state: ProcessingState,
    ) -> Result<Vec<FileRecord>, StoreError>;

    /// Move every record of `sources` in `from` to `to`; returns how many moved
    fn transition_state(
        &self,
        sources: &[SourceId],
        from: ProcessingState,
        to: ProcessingState,
    ) -> Result<usize, StoreError>;

    /// Drop all records of a source ahead of a rescan
    fn clear_source(&self, source_id: &SourceId) -> Result<usize, StoreError>;

    fn state_counts(&self, sources: &[SourceId]) -> Result<StateCounts, StoreError>;

    /// Remember a full hash for reuse by later scans
    fn remember_hash(&self, entry: &CachedHash) -> Result<(), StoreError>;

    /// Previously computed full hash, if size and modification time still match.
    ///
    /// Files without a modification time never hit.
    fn cached_hash(
        &self,
        key: &FileKey,
        size: u64,
        modified: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Option<ContentHash>, StoreError>;

    fn write_checkpoint(&self, session_id: &str, payload: &str) -> Result<(), StoreError>;

    fn read_checkpoint(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    fn delete_checkpoint(&self, session_id: &str) -> Result<(), StoreError>;
}
