//! # Groups Module
//!
//! Confirmed duplicate groups and their resolution.
//!
//! A group is identified by the hex of its members' full hash. Members share
//! the same size and full hash, and a group always has two or more members.

mod builder;

pub use builder::GroupBuilder;

use crate::core::record::{ContentHash, FileKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Group identity: lowercase hex of the shared full hash
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<ContentHash> for GroupId {
    fn from(hash: ContentHash) -> Self {
        Self(hash.to_hex())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of files with identical content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub full_hash: ContentHash,
    /// Size of each member in bytes
    pub size: u64,
    pub members: BTreeSet<FileKey>,
    /// `size * members.len()`
    pub total_size: u64,
}

impl DuplicateGroup {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members beyond the first copy
    pub fn duplicate_count(&self) -> usize {
        self.members.len().saturating_sub(1)
    }

    /// Bytes freed by keeping a single copy
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size * self.duplicate_count() as u64
    }

    pub fn contains(&self, key: &FileKey) -> bool {
        self.members.contains(key)
    }
}

/// Outcome of a valid `resolve` call, for the external deletion step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub group_id: GroupId,
    pub keep: BTreeSet<FileKey>,
    /// Members minus the keep set
    pub remove: BTreeSet<FileKey>,
}

impl Resolution {
    pub fn reclaimed_bytes(&self, group: &DuplicateGroup) -> u64 {
        group.size * self.remove.len() as u64
    }
}
