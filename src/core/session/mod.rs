//! # Session Module
//!
//! The scan session controller: sequences phases, reports progress and
//! handles pause, resume, cancel and early stop.
//!
//! ## Lifecycle
//! `Idle → Enumerating → GroupingBySize → GroupingByPartialHash → FullHashing → Completed`
//!
//! `Paused` is reachable from any working phase. `Cancelled` is terminal and
//! reachable from every state.
//!
//! Phases run on a background driver thread. Control calls on [`ScanSession`]
//! return immediately; [`ScanSession::wait`] blocks until the driver settles.

mod checkpoint;
mod context;
mod driver;
mod state;

pub use checkpoint::{
    EnumerationStatus, ScanCheckpoint, SourceProgress, CHECKPOINT_VERSION,
};
pub use state::{ScanPhase, SessionState};

use crate::core::config::{CancelPolicy, ScanConfig};
use crate::core::control::ControlCommand;
use crate::core::groups::{DuplicateGroup, GroupId, Resolution};
use crate::core::record::FileKey;
use crate::core::source::{MediaSource, SourceCatalog};
use crate::core::store::{MetadataStore, StateCounts};
use crate::error::{ErrorKind, ErrorRecord, ScannerError, SessionError};
use crate::events::{
    null_sender, null_snapshot_sender, Event, EventSender, ProgressSnapshot, SnapshotSender,
};
use context::{SessionContext, Shared};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a session once its driver settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub records: StateCounts,
    pub groups: usize,
    /// Files beyond the first copy in every group
    pub duplicate_files: usize,
    pub reclaimable_bytes: u64,
    pub errors: usize,
    pub elapsed_ms: u64,
}

/// Builder for scan sessions
pub struct SessionBuilder {
    store: Arc<dyn MetadataStore>,
    config: ScanConfig,
    sources: Vec<Arc<dyn MediaSource>>,
    session_id: Option<String>,
    events: EventSender,
    snapshots: SnapshotSender,
}

impl SessionBuilder {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            config: ScanConfig::default(),
            sources: Vec::new(),
            session_id: None,
            events: null_sender(),
            snapshots: null_snapshot_sender(),
        }
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Add every source a catalog lists
    pub fn sources_from(mut self, catalog: &dyn SourceCatalog) -> Self {
        for descriptor in catalog.list_sources() {
            if let Some(source) = catalog.source(&descriptor.id) {
                self.sources.push(source);
            }
        }
        self
    }

    /// Fixed session id instead of a random one
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn snapshots(mut self, snapshots: SnapshotSender) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// A fresh session in `Idle`
    pub fn build(self) -> Result<ScanSession, ScannerError> {
        self.validate()?;
        let id = self
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ids: Vec<_> = self.sources.iter().map(|s| s.id().clone()).collect();
        let checkpoint = ScanCheckpoint::new(&id, &ids);
        Ok(self.assemble(id, Shared::new(SessionState::Idle, checkpoint)))
    }

    /// Reopen a session persisted by an earlier process.
    ///
    /// An unfinished session comes back `Paused`; call [`ScanSession::resume`]
    /// to continue. A finished one comes back `Completed` with its groups.
    pub fn resume_from_checkpoint(
        self,
        session_id: impl Into<String>,
    ) -> Result<ScanSession, ScannerError> {
        self.validate()?;
        let id = session_id.into();
        let mut checkpoint = ScanCheckpoint::load(self.store.as_ref(), &id)?;
        let ids: Vec<_> = self.sources.iter().map(|s| s.id().clone()).collect();
        checkpoint.verify_sources(&ids)?;

        let state = if checkpoint.finished {
            SessionState::Completed
        } else {
            if checkpoint.paused_from.is_none() {
                checkpoint.paused_from = checkpoint.next_phase();
            }
            SessionState::Paused
        };
        info!(session = %id, %state, phase = ?checkpoint.phase_completed, "Reopened session");

        let session = self.assemble(id, Shared::new(state, checkpoint));
        session.ctx.restore_confirmed_groups()?;
        Ok(session)
    }

    fn validate(&self) -> Result<(), ScannerError> {
        self.config.validate()?;
        if self.sources.is_empty() {
            return Err(SessionError::NoSources.into());
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id()) {
                return Err(ScannerError::Config(format!(
                    "source id {} is used twice",
                    source.id()
                )));
            }
        }
        Ok(())
    }

    fn assemble(self, id: String, shared: Shared) -> ScanSession {
        let ctx = SessionContext::new(
            id,
            self.config,
            self.sources,
            self.store,
            self.events,
            self.snapshots,
            shared,
        );
        ScanSession {
            ctx: Arc::new(ctx),
            driver: Mutex::new(None),
        }
    }
}

/// Handle to one scan session
pub struct ScanSession {
    ctx: Arc<SessionContext>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ScanSession {
    pub fn builder(store: Arc<dyn MetadataStore>) -> SessionBuilder {
        SessionBuilder::new(store)
    }

    pub fn id(&self) -> &str {
        &self.ctx.id
    }

    pub fn state(&self) -> SessionState {
        self.ctx.lock().state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let shared = self.ctx.lock();
        self.ctx.snapshot_of(&shared)
    }

    /// Groups confirmed so far
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        self.ctx.lock().groups.values().cloned().collect()
    }

    pub fn group(&self, id: &GroupId) -> Option<DuplicateGroup> {
        self.ctx.lock().groups.get(id).cloned()
    }

    /// The session error log
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.ctx.lock().errors.clone()
    }

    pub fn checkpoint(&self) -> ScanCheckpoint {
        self.ctx.lock().checkpoint.clone()
    }

    /// `Idle → Enumerating`
    pub fn start(&self) -> Result<(), ScannerError> {
        {
            let mut shared = self.ctx.lock();
            if shared.state != SessionState::Idle {
                return Err(invalid(shared.state, "start"));
            }
            let mut cleared = 0;
            for id in self.ctx.source_map.keys() {
                cleared += self.ctx.store.clear_source(id)?;
            }
            if cleared > 0 {
                debug!(session = %self.ctx.id, cleared, "Cleared records from an earlier scan");
            }
            shared.started = Some(Instant::now());
            self.ctx.set_state(&mut shared, SessionState::Enumerating);
            shared.checkpoint.save(self.ctx.store.as_ref())?;
        }
        info!(session = %self.ctx.id, sources = self.ctx.sources.len(), "Scan started");
        self.spawn_driver()
    }

    /// Stop scheduling new work and persist a checkpoint.
    ///
    /// In-flight items finish on the driver thread.
    pub fn pause(&self) -> Result<(), ScannerError> {
        let mut shared = self.ctx.lock();
        let Some(phase) = shared.state.phase() else {
            return Err(invalid(shared.state, "pause"));
        };
        self.ctx.control.request(ControlCommand::Pause);
        shared.checkpoint.paused_from = Some(phase);
        self.ctx.set_state(&mut shared, SessionState::Paused);
        shared.checkpoint.save(self.ctx.store.as_ref())?;
        info!(session = %self.ctx.id, %phase, "Scan paused");
        Ok(())
    }

    /// `Paused →` the phase it was paused from, continuing from the store
    pub fn resume(&self) -> Result<(), ScannerError> {
        if self.state() != SessionState::Paused {
            return Err(invalid(self.state(), "resume"));
        }
        self.join_driver();

        {
            let mut shared = self.ctx.lock();
            if shared.state != SessionState::Paused {
                return Err(invalid(shared.state, "resume"));
            }
            let phase = shared
                .checkpoint
                .paused_from
                .take()
                .or_else(|| shared.checkpoint.next_phase())
                .unwrap_or(ScanPhase::FullHashing);
            shared.started.get_or_insert_with(Instant::now);
            self.ctx.control.request(ControlCommand::Run);
            self.ctx.set_state(&mut shared, phase.state());
            info!(session = %self.ctx.id, %phase, "Scan resumed");
        }
        self.spawn_driver()
    }

    /// Abort everything. Terminal.
    ///
    /// Deletes the checkpoint and drops all groups. Persisted records are kept
    /// or deleted according to the configured [`CancelPolicy`].
    pub fn cancel(&self) -> Result<(), ScannerError> {
        if self.state() == SessionState::Cancelled {
            return Ok(());
        }
        self.ctx.control.request(ControlCommand::Cancel);
        self.join_driver();

        self.ctx.store.delete_checkpoint(&self.ctx.id)?;
        if self.ctx.config.cancel_policy == CancelPolicy::DiscardRecords {
            for source in &self.ctx.sources {
                let removed = self.ctx.store.clear_source(source.id())?;
                info!(source = %source.id(), removed, "Discarded records");
            }
        }

        {
            let mut shared = self.ctx.lock();
            shared.groups.clear();
            shared.resolved.clear();
            shared.builder.reset();
            shared.phase_progress = None;
            self.ctx.set_state(&mut shared, SessionState::Cancelled);
        }
        info!(session = %self.ctx.id, "Scan cancelled");
        self.ctx.events.send(Event::Settled(self.ctx.summary()));
        Ok(())
    }

    /// Finish now with the groups found so far.
    ///
    /// Remaining phases are skipped and unresolved candidates keep their state.
    pub fn stop_keeping_results(&self) -> Result<(), ScannerError> {
        let mut shared = self.ctx.lock();
        if !shared.state.is_in_progress() && shared.state != SessionState::Paused {
            return Err(invalid(shared.state, "stop"));
        }
        self.ctx.control.request(ControlCommand::Stop);
        shared.checkpoint.finished = true;
        shared.checkpoint.paused_from = None;
        self.ctx.set_state(&mut shared, SessionState::Completed);
        shared.checkpoint.save(self.ctx.store.as_ref())?;
        info!(session = %self.ctx.id, groups = shared.groups.len(), "Scan stopped early");
        Ok(())
    }

    /// Validate a keep selection for one group.
    ///
    /// `keep` must be a non-empty subset of the group's members and the group
    /// must not be resolved yet. Nothing changes when validation fails.
    pub fn resolve(
        &self,
        group_id: &GroupId,
        keep: impl IntoIterator<Item = FileKey>,
    ) -> Result<Resolution, ScannerError> {
        let keep: BTreeSet<FileKey> = keep.into_iter().collect();
        let mut shared = self.ctx.lock();

        let rejection = match shared.groups.get(group_id) {
            None => Some("unknown group".to_string()),
            Some(_) if shared.resolved.contains(group_id) => {
                Some("group is already resolved".to_string())
            }
            Some(_) if keep.is_empty() => Some("keep at least one file".to_string()),
            Some(group) => keep
                .iter()
                .find(|key| !group.contains(key))
                .map(|key| format!("{key} is not a member of the group")),
        };

        if let Some(reason) = rejection {
            warn!(group = %group_id, %reason, "Rejected selection");
            let record = ErrorRecord::new(
                ErrorKind::InvalidSelection,
                format!("group {group_id}: {reason}"),
            );
            shared.errors.push(record.clone());
            self.ctx.events.send(Event::Error(record));
            return Err(SessionError::InvalidSelection {
                group_id: group_id.to_string(),
                reason,
            }
            .into());
        }

        let remove = match shared.groups.get(group_id) {
            Some(group) => group.members.difference(&keep).cloned().collect(),
            None => BTreeSet::new(),
        };
        shared.resolved.insert(group_id.clone());
        Ok(Resolution {
            group_id: group_id.clone(),
            keep,
            remove,
        })
    }

    /// Block until the driver settles and summarize
    pub fn wait(&self) -> SessionSummary {
        self.join_driver();
        self.ctx.summary()
    }

    fn spawn_driver(&self) -> Result<(), ScannerError> {
        let ctx = Arc::clone(&self.ctx);
        let handle = std::thread::Builder::new()
            .name(format!("scan-{}", short_id(&self.ctx.id)))
            .spawn(move || driver::drive(&ctx))
            .map_err(|e| ScannerError::Config(format!("cannot start scan thread: {e}")))?;
        *self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    fn join_driver(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(session = %self.ctx.id, "Scan thread panicked");
            }
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if self.state().is_in_progress() {
            self.ctx.control.request(ControlCommand::Pause);
        }
        self.join_driver();
    }
}

fn invalid(state: SessionState, action: &'static str) -> ScannerError {
    SessionError::InvalidTransition {
        state: state.to_string(),
        action,
    }
    .into()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::SourceId;
    use crate::core::source::LocalSource;
    use crate::core::store::InMemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &[u8]) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn session(dir: &TempDir) -> ScanSession {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        ScanSession::builder(store)
            .source(Arc::new(LocalSource::with_id(SourceId::new("photos"), dir.path())))
            .session_id("test-session")
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_a_source() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let result = ScanSession::builder(store).build();
        assert!(matches!(
            result,
            Err(ScannerError::Session(SessionError::NoSources))
        ));
    }

    #[test]
    fn finds_a_duplicate_pair() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.jpg", b"same bytes");
        write(&dir, "nested/b.jpg", b"same bytes");
        write(&dir, "c.jpg", b"other byte");

        let session = session(&dir);
        session.start().unwrap();
        let summary = session.wait();

        assert_eq!(summary.state, SessionState::Completed);
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.records.unresolved(), 0);

        let group = &session.groups()[0];
        let paths: Vec<_> = group.members.iter().map(|k| k.path.as_str()).collect();
        assert_eq!(paths, vec!["a.jpg", "nested/b.jpg"]);
    }

    #[test]
    fn invalid_calls_change_nothing() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);

        assert!(session.resume().is_err());
        assert!(session.pause().is_err());
        assert_eq!(session.state(), SessionState::Idle);

        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(ScannerError::Session(SessionError::InvalidTransition { .. }))
        ));
        session.wait();
    }

    #[test]
    fn resolve_validates_the_keep_set() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.jpg", b"dup");
        write(&dir, "b.jpg", b"dup");
        write(&dir, "c.jpg", b"dup");

        let session = session(&dir);
        session.start().unwrap();
        session.wait();

        let group = session.groups().remove(0);
        let outsider = FileKey::new(SourceId::new("photos"), "zzz.jpg");

        assert!(session.resolve(&group.id, Vec::new()).is_err());
        assert!(session.resolve(&group.id, vec![outsider]).is_err());
        assert!(session
            .resolve(&GroupId::new("feedface"), group.members.iter().cloned())
            .is_err());
        let rejected = session.errors().len();
        assert_eq!(rejected, 3);

        let keep = group.members.iter().next().cloned().unwrap();
        let resolution = session.resolve(&group.id, vec![keep.clone()]).unwrap();
        assert_eq!(resolution.remove.len(), 2);
        assert!(!resolution.remove.contains(&keep));
        assert_eq!(resolution.reclaimed_bytes(&group), 6);

        assert!(session.resolve(&group.id, vec![keep]).is_err());
    }

    #[test]
    fn cancel_discards_groups_and_checkpoint() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.jpg", b"dup");
        write(&dir, "b.jpg", b"dup");

        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let session = ScanSession::builder(Arc::clone(&store))
            .source(Arc::new(LocalSource::with_id(SourceId::new("photos"), dir.path())))
            .config(ScanConfig::default().cancel_policy(CancelPolicy::DiscardRecords))
            .build()
            .unwrap();
        session.start().unwrap();
        session.wait();
        session.cancel().unwrap();

        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(session.groups().is_empty());
        assert!(store.read_checkpoint(session.id()).unwrap().is_none());
        assert_eq!(
            store
                .state_counts(&[SourceId::new("photos")])
                .unwrap()
                .total(),
            0
        );
        assert!(session.resume().is_err());
        assert!(session.cancel().is_ok());
    }
}
