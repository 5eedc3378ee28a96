//! # Grouping Module
//!
//! Narrows the discovered file set phase by phase using store queries.
//!
//! ## Phases
//! 1. **Size** - records sharing an exact size become `SizeCandidate`, the rest `Unique`
//! 2. **Partial hash** - records sharing (size, partial hash) become
//!    `PartialHashCandidate`, the rest `Unique`
//! 3. **Full hash** - tracked per (size, partial hash) bucket by [`BucketTracker`]
//!    so groups are emitted as soon as a bucket is fully hashed
//!
//! Each phase counts bucket cardinality over the records of the given sources
//! still in play, so re-running a phase after an interruption gives the same
//! result and records owned by other sessions are left alone.

mod buckets;

pub use buckets::{BucketTracker, ResolvedBucket};

use crate::core::config::ScanConfig;
use crate::core::hashing::{HashJob, HashJobKind};
use crate::core::record::{FileRecord, ProcessingState, RecordUpdate, SourceId};
use crate::core::source::SourceKind;
use crate::core::store::MetadataStore;
use crate::error::StoreError;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

/// Counts from one grouping phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingOutcome {
    /// Records promoted to the next candidate state
    pub promoted: usize,
    /// Records that left the pipeline as `Unique`
    pub eliminated: usize,
}

/// Size phase: bucket `Discovered` records by exact size
#[instrument(skip_all)]
pub fn group_by_size(
    store: &dyn MetadataStore,
    sources: &[SourceId],
) -> Result<GroupingOutcome, StoreError> {
    use ProcessingState::{Discovered, SizeCandidate, Unique};

    let colliding = store.size_collisions(sources, &[Discovered, SizeCandidate])?;
    let mut promoted = 0;
    for record in colliding.iter().filter(|r| r.state == Discovered) {
        store.update(&record.key, &RecordUpdate::state(SizeCandidate))?;
        promoted += 1;
    }
    let eliminated = store.transition_state(sources, Discovered, Unique)?;

    info!(promoted, eliminated, "Size grouping finished");
    Ok(GroupingOutcome {
        promoted,
        eliminated,
    })
}

/// Partial fingerprint jobs for every `SizeCandidate` still lacking one.
///
/// The chunk size is chosen per size bucket: any remote member switches the
/// whole bucket to the remote chunk size. A bucket where only some members
/// were fingerprinted (an interrupted run) is fingerprinted again in full, so
/// every member of a bucket shares one chunk size.
pub fn plan_partial_hashing(
    store: &dyn MetadataStore,
    sources: &[SourceId],
    kinds: &HashMap<SourceId, SourceKind>,
    config: &ScanConfig,
) -> Result<Vec<HashJob>, StoreError> {
    let candidates = store.records_in_state(sources, ProcessingState::SizeCandidate)?;

    let mut by_size: BTreeMap<u64, Vec<FileRecord>> = BTreeMap::new();
    for record in candidates {
        by_size.entry(record.size).or_default().push(record);
    }

    let mut jobs = Vec::new();
    for (size, members) in by_size {
        let any_remote = members
            .iter()
            .any(|r| kinds.get(r.source_id()) == Some(&SourceKind::RemoteProtocol));
        let chunk_size = if any_remote {
            config.remote_partial_chunk_size
        } else {
            config.partial_chunk_size
        };
        let derive_full = config.fast_scan && size <= chunk_size as u64;

        let hashed = members.iter().filter(|r| r.partial_hash.is_some()).count();
        if hashed == members.len() {
            continue;
        }
        if hashed > 0 {
            debug!(size, hashed, total = members.len(), "Refingerprinting partially hashed bucket");
        }

        jobs.extend(members.into_iter().map(|record| HashJob {
            key: record.key,
            size,
            kind: HashJobKind::Partial {
                chunk_size,
                derive_full,
            },
        }));
    }

    Ok(jobs)
}

/// Partial-hash phase: bucket fingerprinted `SizeCandidate` records by (size, partial hash)
#[instrument(skip_all)]
pub fn group_by_partial_hash(
    store: &dyn MetadataStore,
    sources: &[SourceId],
) -> Result<GroupingOutcome, StoreError> {
    use ProcessingState::{PartialHashCandidate, SizeCandidate, Unique};

    let colliding =
        store.partial_hash_collisions(sources, &[SizeCandidate, PartialHashCandidate])?;
    let mut promoted = 0;
    for record in colliding.iter().filter(|r| r.state == SizeCandidate) {
        store.update(&record.key, &RecordUpdate::state(PartialHashCandidate))?;
        promoted += 1;
    }
    let eliminated = store.transition_state(sources, SizeCandidate, Unique)?;

    info!(promoted, eliminated, "Partial-hash grouping finished");
    Ok(GroupingOutcome {
        promoted,
        eliminated,
    })
}

/// Work for the full-hash phase
pub struct FullHashPlan {
    pub jobs: Vec<HashJob>,
    pub tracker: BucketTracker,
}

/// Full-hash jobs for candidates without a full hash, plus their bucket tracker.
///
/// Records already carrying a full hash (from a cached earlier scan, a fast-scan
/// partial read or an interrupted run) are never queued again.
pub fn plan_full_hashing(
    store: &dyn MetadataStore,
    sources: &[SourceId],
) -> Result<FullHashPlan, StoreError> {
    let mut records = store.records_in_state(sources, ProcessingState::PartialHashCandidate)?;
    records.extend(store.records_in_state(sources, ProcessingState::FullHashed)?);

    let jobs = records
        .iter()
        .filter(|r| r.full_hash.is_none())
        .map(|r| HashJob {
            key: r.key.clone(),
            size: r.size,
            kind: HashJobKind::Full,
        })
        .collect::<Vec<_>>();

    debug!(
        candidates = records.len(),
        to_hash = jobs.len(),
        "Planned full hashing"
    );

    Ok(FullHashPlan {
        jobs,
        tracker: BucketTracker::new(records),
    })
}
