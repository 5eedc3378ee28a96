//! Folds full-hash buckets into validated duplicate groups.

use super::{DuplicateGroup, GroupId};
use crate::core::record::FileRecord;
use crate::error::SessionError;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Builds groups and remembers which ids were already emitted this session
#[derive(Debug, Default)]
pub struct GroupBuilder {
    emitted: HashSet<GroupId>,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate members and fold them into a group.
    ///
    /// Does not mark the group emitted; see [`GroupBuilder::mark_emitted`].
    pub fn fold(&self, members: &[FileRecord]) -> Result<DuplicateGroup, SessionError> {
        let first = members
            .first()
            .ok_or_else(|| SessionError::InvalidGroup("group has no members".into()))?;
        let full_hash = first.full_hash.ok_or_else(|| {
            SessionError::InvalidGroup(format!("{} has no full hash", first.key))
        })?;

        if members.len() < 2 {
            return Err(SessionError::InvalidGroup(format!(
                "group {} has a single member",
                GroupId::from(full_hash)
            )));
        }

        for record in members {
            if record.size != first.size {
                return Err(SessionError::InvalidGroup(format!(
                    "{} has size {} but the group size is {}",
                    record.key, record.size, first.size
                )));
            }
            if record.full_hash != Some(full_hash) {
                return Err(SessionError::InvalidGroup(format!(
                    "{} does not share the group hash",
                    record.key
                )));
            }
        }

        let keys: BTreeSet<_> = members.iter().map(|r| r.key.clone()).collect();
        if keys.len() != members.len() {
            return Err(SessionError::InvalidGroup(
                "group lists the same file twice".into(),
            ));
        }

        Ok(DuplicateGroup {
            id: GroupId::from(full_hash),
            full_hash,
            size: first.size,
            total_size: first.size * keys.len() as u64,
            members: keys,
        })
    }

    /// Record an emission. Returns false if the id was already emitted.
    pub fn mark_emitted(&mut self, group: &DuplicateGroup) -> bool {
        let fresh = self.emitted.insert(group.id.clone());
        if fresh {
            debug!(group = %group.id, members = group.member_count(), "Group confirmed");
        }
        fresh
    }

    pub fn was_emitted(&self, id: &GroupId) -> bool {
        self.emitted.contains(id)
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted.len()
    }

    /// Forget everything, as when a session is cancelled
    pub fn reset(&mut self) {
        self.emitted.clear();
    }
}
