//! State shared by the session handle and its driver thread.

use super::checkpoint::ScanCheckpoint;
use super::state::{ScanPhase, SessionState};
use super::SessionSummary;
use crate::core::config::ScanConfig;
use crate::core::control::ScanControl;
use crate::core::groups::{DuplicateGroup, GroupBuilder, GroupId};
use crate::core::hashing::SourceMap;
use crate::core::record::{ContentHash, FileRecord, ProcessingState, SourceId};
use crate::core::source::{MediaSource, SourceKind};
use crate::core::store::MetadataStore;
use crate::error::{ErrorRecord, ScannerError};
use crate::events::{
    Event, EventSender, PhaseProgress, ProgressSnapshot, SnapshotSender, TotalEstimate,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Mutable session state. Every state change goes through this lock.
pub(super) struct Shared {
    pub state: SessionState,
    pub checkpoint: ScanCheckpoint,
    pub builder: GroupBuilder,
    pub groups: BTreeMap<GroupId, DuplicateGroup>,
    pub resolved: HashSet<GroupId>,
    pub errors: Vec<ErrorRecord>,
    pub current_source: Option<SourceId>,
    pub current_path: Option<String>,
    pub phase_progress: Option<PhaseProgress>,
    pub started: Option<Instant>,
}

impl Shared {
    pub fn new(state: SessionState, checkpoint: ScanCheckpoint) -> Self {
        Self {
            state,
            checkpoint,
            builder: GroupBuilder::new(),
            groups: BTreeMap::new(),
            resolved: HashSet::new(),
            errors: Vec::new(),
            current_source: None,
            current_path: None,
            phase_progress: None,
            started: None,
        }
    }
}

pub(super) struct SessionContext {
    pub id: String,
    pub config: ScanConfig,
    pub sources: Vec<Arc<dyn MediaSource>>,
    pub source_map: SourceMap,
    pub store: Arc<dyn MetadataStore>,
    pub control: ScanControl,
    pub events: EventSender,
    pub snapshots: SnapshotSender,
    shared: Mutex<Shared>,
}

impl SessionContext {
    pub fn new(
        id: String,
        config: ScanConfig,
        sources: Vec<Arc<dyn MediaSource>>,
        store: Arc<dyn MetadataStore>,
        events: EventSender,
        snapshots: SnapshotSender,
        shared: Shared,
    ) -> Self {
        let source_map = sources
            .iter()
            .map(|source| (source.id().clone(), Arc::clone(source)))
            .collect();
        Self {
            id,
            config,
            sources,
            source_map,
            store,
            control: ScanControl::new(),
            events,
            snapshots,
            shared: Mutex::new(shared),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id().clone()).collect()
    }

    pub fn source_kinds(&self) -> HashMap<SourceId, SourceKind> {
        self.sources
            .iter()
            .map(|s| (s.id().clone(), s.kind()))
            .collect()
    }

    pub fn snapshot_of(&self, shared: &Shared) -> ProgressSnapshot {
        let checkpoint = &shared.checkpoint;
        let media_found = if checkpoint.enumeration_settled() {
            TotalEstimate::Final(checkpoint.media_found)
        } else {
            TotalEstimate::LowerBound(checkpoint.media_found)
        };
        ProgressSnapshot {
            session_id: self.id.clone(),
            state: shared.state,
            files_scanned: checkpoint.files_scanned,
            media_found,
            current_source: shared.current_source.clone(),
            current_path: shared.current_path.clone(),
            groups_found: shared.groups.len(),
            bytes_hashed: checkpoint.bytes_hashed,
            phase_progress: shared.phase_progress,
            error_count: shared.errors.len(),
            paused: shared.state == SessionState::Paused,
        }
    }

    pub fn publish(&self, shared: &Shared) {
        self.snapshots.publish(self.snapshot_of(shared));
    }

    /// Move to `to`, announcing the change
    pub fn set_state(&self, shared: &mut Shared, to: SessionState) {
        let from = shared.state;
        if from == to {
            return;
        }
        shared.state = to;
        debug!(session = %self.id, %from, %to, "Session state changed");
        self.events.send(Event::StateChanged {
            session_id: self.id.clone(),
            from,
            to,
        });
        self.publish(shared);
    }

    /// Enter `phase` unless a pause, stop or cancel is pending
    pub fn advance_to(&self, phase: ScanPhase) -> bool {
        let mut shared = self.lock();
        if self.control.should_stop_scheduling() {
            return false;
        }
        shared.phase_progress = None;
        shared.current_path = None;
        self.set_state(&mut shared, phase.state());
        true
    }

    pub fn begin_progress(&self, total: usize) {
        let mut shared = self.lock();
        shared.phase_progress = Some(PhaseProgress {
            completed: 0,
            total: total as u64,
        });
        self.publish(&shared);
    }

    /// One hashing item finished, successfully or not
    pub fn item_hashed(&self, record_path: &str, source: &SourceId, bytes: u64) {
        let mut shared = self.lock();
        shared.checkpoint.bytes_hashed += bytes;
        shared.current_source = Some(source.clone());
        shared.current_path = Some(record_path.to_string());
        if let Some(progress) = shared.phase_progress.as_mut() {
            progress.completed += 1;
        }
        self.publish(&shared);
    }

    pub fn record_error(&self, record: ErrorRecord) {
        let mut shared = self.lock();
        shared.errors.push(record.clone());
        self.events.send(Event::Error(record));
        self.publish(&shared);
    }

    /// Publish a confirmed group. Returns false if it was already emitted
    /// or a stop or cancel got in first.
    pub fn emit_group(&self, group: DuplicateGroup) -> bool {
        let mut shared = self.lock();
        if self.control.is_ending() || !shared.builder.mark_emitted(&group) {
            return false;
        }
        shared.groups.insert(group.id.clone(), group.clone());
        self.events.send(Event::GroupConfirmed(group));
        self.publish(&shared);
        true
    }

    pub fn save_checkpoint(&self) -> Result<(), ScannerError> {
        let mut shared = self.lock();
        shared.checkpoint.save(self.store.as_ref())
    }

    /// Rebuild groups already confirmed in the store and emit the ones not seen yet
    pub fn restore_confirmed_groups(&self) -> Result<usize, ScannerError> {
        let confirmed = self
            .store
            .full_hash_collisions(&self.source_ids(), &[ProcessingState::DuplicateConfirmed])?;

        let mut by_hash: BTreeMap<ContentHash, Vec<FileRecord>> = BTreeMap::new();
        for record in confirmed {
            if let Some(hash) = record.full_hash {
                by_hash.entry(hash).or_default().push(record);
            }
        }

        let mut restored = 0;
        for members in by_hash.into_values() {
            let group = self.lock().builder.fold(&members)?;
            if self.emit_group(group) {
                restored += 1;
            }
        }
        if restored > 0 {
            debug!(session = %self.id, restored, "Restored confirmed groups");
        }
        Ok(restored)
    }

    pub fn summary(&self) -> SessionSummary {
        let records = match self.store.state_counts(&self.source_ids()) {
            Ok(counts) => counts,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Cannot read state counts for summary");
                Default::default()
            }
        };
        let shared = self.lock();
        SessionSummary {
            session_id: self.id.clone(),
            state: shared.state,
            records,
            groups: shared.groups.len(),
            duplicate_files: shared.groups.values().map(|g| g.duplicate_count()).sum(),
            reclaimable_bytes: shared.groups.values().map(|g| g.reclaimable_bytes()).sum(),
            errors: shared.errors.len(),
            elapsed_ms: shared
                .started
                .map(|started| started.elapsed().as_millis() as u64)
                .unwrap_or(0),
        }
    }
}
