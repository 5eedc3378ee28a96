//! # Store Module
//!
//! Persists file records, hash-reuse entries and session checkpoints.
//!
//! ## Backends
//! - `InMemoryStore` - fast, ephemeral (tests and one-off scans)
//! - `SqliteStore` - persistent, survives restarts (default)

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::MetadataStore;

use crate::core::record::{ContentHash, FileKey, ProcessingState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full hash remembered across scans
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHash {
    pub key: FileKey,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub full_hash: ContentHash,
}

impl CachedHash {
    /// Whether this entry still describes a file with the given metadata.
    ///
    /// Compared at second precision, the resolution the SQLite store keeps.
    pub fn is_valid_for(&self, size: u64, modified: Option<DateTime<Utc>>) -> bool {
        match modified {
            Some(modified) => {
                self.size == size && self.modified.timestamp() == modified.timestamp()
            }
            None => false,
        }
    }
}

/// Number of records per processing state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub discovered: usize,
    pub size_candidate: usize,
    pub partial_hash_candidate: usize,
    pub full_hashed: usize,
    pub duplicate_confirmed: usize,
    pub unique: usize,
}

impl StateCounts {
    pub fn add(&mut self, state: ProcessingState, count: usize) {
        match state {
            ProcessingState::Discovered => self.discovered += count,
            ProcessingState::SizeCandidate => self.size_candidate += count,
            ProcessingState::PartialHashCandidate => self.partial_hash_candidate += count,
            ProcessingState::FullHashed => self.full_hashed += count,
            ProcessingState::DuplicateConfirmed => self.duplicate_confirmed += count,
            ProcessingState::Unique => self.unique += count,
        }
    }

    pub fn get(&self, state: ProcessingState) -> usize {
        match state {
            ProcessingState::Discovered => self.discovered,
            ProcessingState::SizeCandidate => self.size_candidate,
            ProcessingState::PartialHashCandidate => self.partial_hash_candidate,
            ProcessingState::FullHashed => self.full_hashed,
            ProcessingState::DuplicateConfirmed => self.duplicate_confirmed,
            ProcessingState::Unique => self.unique,
        }
    }

    pub fn total(&self) -> usize {
        ProcessingState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Records still somewhere in the middle of the pipeline
    pub fn unresolved(&self) -> usize {
        self.total() - self.duplicate_confirmed - self.unique
    }
}
