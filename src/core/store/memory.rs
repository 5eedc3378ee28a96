//! In-memory store for tests and ephemeral scans.

use super::{CachedHash, MetadataStore, StateCounts};
use crate::core::record::{
    ContentHash, FileKey, FileRecord, ProcessingState, RecordUpdate, SourceId,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    records: BTreeMap<FileKey, FileRecord>,
    hash_cache: HashMap<FileKey, CachedHash>,
    checkpoints: HashMap<String, String>,
}

/// In-memory metadata store
///
/// Useful for testing and scenarios where persistence isn't needed.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Corrupted {
            path: PathBuf::from("memory"),
        })
    }

    /// Records in `states` whose bucket (by `bucket_of`) holds two or more of them
    fn collisions<K, F>(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
        bucket_of: F,
    ) -> Result<Vec<FileRecord>, StoreError>
    where
        K: Eq + Hash,
        F: Fn(&FileRecord) -> Option<K>,
    {
        let tables = self.read()?;
        let in_scope =
            |r: &&FileRecord| sources.contains(&r.key.source_id) && states.contains(&r.state);
        let mut counts: HashMap<K, usize> = HashMap::new();
        for record in tables.records.values().filter(in_scope) {
            if let Some(bucket) = bucket_of(record) {
                *counts.entry(bucket).or_default() += 1;
            }
        }

        Ok(tables
            .records
            .values()
            .filter(in_scope)
            .filter(|r| {
                bucket_of(r)
                    .and_then(|bucket| counts.get(&bucket))
                    .is_some_and(|count| *count >= 2)
            })
            .cloned()
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for InMemoryStore {
    fn upsert(&self, record: &FileRecord) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn get(&self, key: &FileKey) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.read()?.records.get(key).cloned())
    }

    fn update(&self, key: &FileKey, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let record = tables
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
        update.apply_to(record)
    }

    fn size_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.collisions(sources, states, |r| Some(r.size))
    }

    fn partial_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.collisions(sources, states, |r| r.partial_hash.map(|hash| (r.size, hash)))
    }

    fn full_hash_collisions(
        &self,
        sources: &[SourceId],
        states: &[ProcessingState],
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.collisions(sources, states, |r| r.full_hash)
    }

    fn records_in_state(
        &self,
        sources: &[SourceId],
        state: ProcessingState,
    ) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|r| r.state == state && sources.contains(&r.key.source_id))
            .cloned()
            .collect())
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
        let mut tables = self.write()?;
        let mut moved = 0;
        for record in tables
            .records
            .values_mut()
            .filter(|r| r.state == from && sources.contains(&r.key.source_id))
        {
            record.state = to;
            moved += 1;
        }
        Ok(moved)
    }

    fn clear_source(&self, source_id: &SourceId) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        let before = tables.records.len();
        tables.records.retain(|key, _| &key.source_id != source_id);
        Ok(before - tables.records.len())
    }

    fn state_counts(&self, sources: &[SourceId]) -> Result<StateCounts, StoreError> {
        let tables = self.read()?;
        let mut counts = StateCounts::default();
        for record in tables
            .records
            .values()
            .filter(|r| sources.contains(&r.key.source_id))
        {
            counts.add(record.state, 1);
        }
        Ok(counts)
    }

    fn remember_hash(&self, entry: &CachedHash) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.hash_cache.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn cached_hash(
        &self,
        key: &FileKey,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<Option<ContentHash>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .hash_cache
            .get(key)
            .filter(|entry| entry.is_valid_for(size, modified))
            .map(|entry| entry.full_hash))
    }

    fn write_checkpoint(&self, session_id: &str, payload: &str) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables
            .checkpoints
            .insert(session_id.to_string(), payload.to_string());
        Ok(())
    }

    fn read_checkpoint(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.checkpoints.get(session_id).cloned())
    }

    fn delete_checkpoint(&self, session_id: &str) -> Result<(), StoreError> {
        self.write()?.checkpoints.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::MediaKind;

    fn local() -> Vec<SourceId> {
        vec![SourceId::new("local")]
    }

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord::discovered(
            FileKey::new(SourceId::new("local"), path),
            size,
            None,
            MediaKind::Photo,
        )
    }

    #[test]
    fn size_collisions_ignore_singletons() {
        let store = InMemoryStore::new();
        store.upsert(&record("a.jpg", 10)).unwrap();
        store.upsert(&record("b.jpg", 10)).unwrap();
        store.upsert(&record("c.jpg", 11)).unwrap();

        let hits = store
            .size_collisions(&local(), &[ProcessingState::Discovered])
            .unwrap();
        let paths: Vec<_> = hits.iter().map(|r| r.key.path.as_str()).collect();
        assert_eq!(paths, vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn partial_collisions_require_matching_size() {
        let store = InMemoryStore::new();
        let hash = ContentHash::from(blake3::hash(b"head"));
        for (path, size) in [("a.jpg", 10), ("b.jpg", 10), ("c.jpg", 20)] {
            let mut rec = record(path, size);
            rec.state = ProcessingState::SizeCandidate;
            rec.partial_hash = Some(hash);
            store.upsert(&rec).unwrap();
        }

        let hits = store
            .partial_hash_collisions(&local(), &[ProcessingState::SizeCandidate])
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.size == 10));
    }

    #[test]
    fn update_unknown_key_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.update(
            &FileKey::new(SourceId::new("x"), "y.jpg"),
            &RecordUpdate::state(ProcessingState::Unique),
        );
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn transition_state_moves_all_matching() {
        let store = InMemoryStore::new();
        store.upsert(&record("a.jpg", 1)).unwrap();
        store.upsert(&record("b.jpg", 2)).unwrap();

        let moved = store
            .transition_state(&local(), ProcessingState::Discovered, ProcessingState::Unique)
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(store.state_counts(&local()).unwrap().unique, 2);
    }

    #[test]
    fn clear_source_only_touches_that_source() {
        let store = InMemoryStore::new();
        store.upsert(&record("a.jpg", 1)).unwrap();
        store
            .upsert(&FileRecord::discovered(
                FileKey::new(SourceId::new("other"), "a.jpg"),
                1,
                None,
                MediaKind::Photo,
            ))
            .unwrap();

        assert_eq!(store.clear_source(&SourceId::new("local")).unwrap(), 1);
        assert_eq!(store.state_counts(&local()).unwrap().total(), 0);
        assert_eq!(
            store.state_counts(&[SourceId::new("other")]).unwrap().total(),
            1
        );
    }

    #[test]
    fn queries_only_see_the_sources_asked_for() {
        let store = InMemoryStore::new();
        let other = SourceId::new("other");
        store.upsert(&record("a.jpg", 10)).unwrap();
        store.upsert(&record("b.jpg", 10)).unwrap();
        store
            .upsert(&FileRecord::discovered(
                FileKey::new(other.clone(), "c.jpg"),
                10,
                None,
                MediaKind::Photo,
            ))
            .unwrap();

        let mine = store
            .size_collisions(&[other.clone()], &[ProcessingState::Discovered])
            .unwrap();
        assert!(mine.is_empty());

        let moved = store
            .transition_state(&[other.clone()], ProcessingState::Discovered, ProcessingState::Unique)
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(
            store
                .records_in_state(&local(), ProcessingState::Discovered)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.state_counts(&[other]).unwrap().unique, 1);
    }

    #[test]
    fn checkpoints_round_trip() {
        let store = InMemoryStore::new();
        assert_eq!(store.read_checkpoint("s1").unwrap(), None);
        store.write_checkpoint("s1", "{}").unwrap();
        assert_eq!(store.read_checkpoint("s1").unwrap().as_deref(), Some("{}"));
        store.delete_checkpoint("s1").unwrap();
        assert_eq!(store.read_checkpoint("s1").unwrap(), None);
    }
}
