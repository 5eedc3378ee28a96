//! Tracks (size, partial hash) buckets through the full-hash phase.

use crate::core::record::{ContentHash, FileKey, FileRecord};
use std::collections::{BTreeMap, HashMap};

type BucketKey = (u64, ContentHash);

struct Bucket {
    members: Vec<FileRecord>,
    pending: usize,
}

/// A bucket whose members all have a full hash (or dropped out)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedBucket {
    /// Full-hash sub-buckets with two or more members
    pub duplicates: Vec<Vec<FileRecord>>,
    /// Members whose full hash nobody else shares
    pub unique: Vec<FileRecord>,
}

/// Releases each bucket once its last member is hashed
pub struct BucketTracker {
    buckets: HashMap<BucketKey, Bucket>,
    bucket_of: HashMap<FileKey, BucketKey>,
}

impl BucketTracker {
    /// Records without a partial hash are ignored
    pub fn new(records: Vec<FileRecord>) -> Self {
        let mut buckets: HashMap<BucketKey, Bucket> = HashMap::new();
        let mut bucket_of = HashMap::new();

        for record in records {
            let Some(partial) = record.partial_hash else {
                continue;
            };
            let key = (record.size, partial);
            bucket_of.insert(record.key.clone(), key);
            let bucket = buckets.entry(key).or_insert_with(|| Bucket {
                members: Vec::new(),
                pending: 0,
            });
            if record.full_hash.is_none() {
                bucket.pending += 1;
            }
            bucket.members.push(record);
        }

        Self { buckets, bucket_of }
    }

    /// Remove and resolve every bucket with nothing left to hash
    pub fn take_ready(&mut self) -> Vec<ResolvedBucket> {
        let ready: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|(_, bucket)| bucket.pending == 0)
            .map(|(key, _)| *key)
            .collect();

        ready
            .into_iter()
            .filter_map(|key| self.release(&key))
            .collect()
    }

    /// A member's full hash arrived
    pub fn record_hash(&mut self, key: &FileKey, hash: ContentHash) -> Option<ResolvedBucket> {
        let bucket_key = *self.bucket_of.get(key)?;
        let bucket = self.buckets.get_mut(&bucket_key)?;
        let member = bucket.members.iter_mut().find(|m| &m.key == key)?;
        if member.full_hash.is_none() {
            bucket.pending = bucket.pending.saturating_sub(1);
        }
        member.full_hash = Some(hash);
        self.release_if_done(&bucket_key)
    }

    /// A member became unreadable and leaves its bucket
    pub fn record_failure(&mut self, key: &FileKey) -> Option<ResolvedBucket> {
        let bucket_key = self.bucket_of.remove(key)?;
        let bucket = self.buckets.get_mut(&bucket_key)?;
        let position = bucket.members.iter().position(|m| &m.key == key)?;
        let member = bucket.members.remove(position);
        if member.full_hash.is_none() {
            bucket.pending = bucket.pending.saturating_sub(1);
        }
        self.release_if_done(&bucket_key)
    }

    /// Buckets still waiting on at least one member
    pub fn pending_buckets(&self) -> usize {
        self.buckets.values().filter(|b| b.pending > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn release_if_done(&mut self, key: &BucketKey) -> Option<ResolvedBucket> {
        if self.buckets.get(key)?.pending == 0 {
            self.release(key)
        } else {
            None
        }
    }

    fn release(&mut self, key: &BucketKey) -> Option<ResolvedBucket> {
        let bucket = self.buckets.remove(key)?;
        let mut by_hash: BTreeMap<ContentHash, Vec<FileRecord>> = BTreeMap::new();
        for member in bucket.members {
            self.bucket_of.remove(&member.key);
            if let Some(hash) = member.full_hash {
                by_hash.entry(hash).or_default().push(member);
            }
        }

        let mut resolved = ResolvedBucket::default();
        for (_, mut members) in by_hash {
            if members.len() >= 2 {
                members.sort_by(|a, b| a.key.cmp(&b.key));
                resolved.duplicates.push(members);
            } else {
                resolved.unique.extend(members);
            }
        }
        Some(resolved)
    }
}
