//! Resume checkpoints with an integrity envelope.

use super::state::ScanPhase;
use crate::core::record::SourceId;
use crate::core::source::EnumerationCursor;
use crate::core::store::MetadataStore;
use crate::error::{ScannerError, SessionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Where a source's enumeration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationStatus {
    InProgress,
    Finished,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub cursor: Option<EnumerationCursor>,
    pub status: EnumerationStatus,
}

/// Everything needed to pick a session up again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub version: u32,
    pub session_id: String,
    /// Last phase that ran to completion
    pub phase_completed: Option<ScanPhase>,
    /// Phase that was running when the session paused
    pub paused_from: Option<ScanPhase>,
    /// Set once the session completed, naturally or by stopping early
    pub finished: bool,
    pub sources: BTreeMap<SourceId, SourceProgress>,
    /// Entries enumerated, skipped ones included
    pub files_scanned: u64,
    /// Media files stored
    pub media_found: u64,
    pub bytes_hashed: u64,
    pub written_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct CheckpointEnvelope {
    /// SHA-256 over the compact JSON of `checkpoint`
    checksum: String,
    checkpoint: ScanCheckpoint,
}

impl ScanCheckpoint {
    pub fn new<'a>(session_id: &str, sources: impl IntoIterator<Item = &'a SourceId>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id: session_id.to_string(),
            phase_completed: None,
            paused_from: None,
            finished: false,
            sources: sources
                .into_iter()
                .map(|id| {
                    (
                        id.clone(),
                        SourceProgress {
                            cursor: None,
                            status: EnumerationStatus::InProgress,
                        },
                    )
                })
                .collect(),
            files_scanned: 0,
            media_found: 0,
            bytes_hashed: 0,
            written_at: Utc::now(),
        }
    }

    /// Phase to run next, `None` once all phases are done
    pub fn next_phase(&self) -> Option<ScanPhase> {
        match self.phase_completed {
            None => Some(ScanPhase::FIRST),
            Some(phase) => phase.next(),
        }
    }

    /// Every source finished or was found unavailable
    pub fn enumeration_settled(&self) -> bool {
        self.pending_sources().next().is_none()
    }

    /// Sources whose enumeration still has work left
    pub fn pending_sources(&self) -> impl Iterator<Item = (&SourceId, &SourceProgress)> {
        self.sources
            .iter()
            .filter(|(_, progress)| progress.status == EnumerationStatus::InProgress)
    }

    pub fn set_cursor(&mut self, source: &SourceId, path: &str) {
        if let Some(progress) = self.sources.get_mut(source) {
            progress.cursor = Some(EnumerationCursor::new(path));
        }
    }

    pub fn set_status(&mut self, source: &SourceId, status: EnumerationStatus) {
        if let Some(progress) = self.sources.get_mut(source) {
            progress.status = status;
        }
    }

    /// Serialize into the checksummed envelope
    pub fn encode(&self) -> Result<String, SessionError> {
        let body = serde_json::to_string(self).map_err(|e| self.corrupt(e.to_string()))?;
        let envelope = CheckpointEnvelope {
            checksum: checksum(&body),
            checkpoint: self.clone(),
        };
        serde_json::to_string(&envelope).map_err(|e| self.corrupt(e.to_string()))
    }

    /// Parse and verify an envelope written by [`ScanCheckpoint::encode`]
    pub fn decode(session_id: &str, payload: &str) -> Result<Self, SessionError> {
        let corrupt = |reason: String| SessionError::CorruptCheckpoint {
            session_id: session_id.to_string(),
            reason,
        };

        let envelope: CheckpointEnvelope = serde_json::from_str(payload)
            .map_err(|e| corrupt(format!("unreadable checkpoint: {e}")))?;
        let body = serde_json::to_string(&envelope.checkpoint)
            .map_err(|e| corrupt(format!("cannot re-serialize checkpoint: {e}")))?;

        if checksum(&body) != envelope.checksum {
            return Err(corrupt("integrity check failed: checksum mismatch".into()));
        }

        let checkpoint = envelope.checkpoint;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        if checkpoint.session_id != session_id {
            return Err(corrupt(format!(
                "checkpoint belongs to session {}",
                checkpoint.session_id
            )));
        }
        Ok(checkpoint)
    }

    /// The checkpoint must describe exactly the sources of the resuming session
    pub fn verify_sources(&self, sources: &[SourceId]) -> Result<(), SessionError> {
        for id in sources {
            if !self.sources.contains_key(id) {
                return Err(self.corrupt(format!("source {id} is not part of the checkpoint")));
            }
        }
        if let Some(extra) = self.sources.keys().find(|id| !sources.contains(id)) {
            return Err(self.corrupt(format!("checkpoint references unknown source {extra}")));
        }
        Ok(())
    }

    /// Stamp and persist
    pub fn save(&mut self, store: &dyn MetadataStore) -> Result<(), ScannerError> {
        self.written_at = Utc::now();
        let payload = self.encode()?;
        store.write_checkpoint(&self.session_id, &payload)?;
        Ok(())
    }

    /// Load and verify; a missing checkpoint is also `CorruptCheckpoint`
    pub fn load(store: &dyn MetadataStore, session_id: &str) -> Result<Self, ScannerError> {
        let payload = store.read_checkpoint(session_id)?.ok_or_else(|| {
            SessionError::CorruptCheckpoint {
                session_id: session_id.to_string(),
                reason: "no checkpoint found".into(),
            }
        })?;
        Ok(Self::decode(session_id, &payload)?)
    }

    fn corrupt(&self, reason: String) -> SessionError {
        SessionError::CorruptCheckpoint {
            session_id: self.session_id.clone(),
            reason,
        }
    }
}

fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::InMemoryStore;

    fn checkpoint() -> ScanCheckpoint {
        let ids = [SourceId::new("disk"), SourceId::new("nas")];
        let mut checkpoint = ScanCheckpoint::new("session-1", &ids);
        checkpoint.set_cursor(&ids[0], "DCIM/100/IMG_0042.JPG");
        checkpoint.phase_completed = Some(ScanPhase::Enumerating);
        checkpoint
    }

    #[test]
    fn encode_decode_round_trip() {
        let original = checkpoint();
        let payload = original.encode().unwrap();
        let decoded = ScanCheckpoint::decode("session-1", &payload).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.next_phase(), Some(ScanPhase::GroupingBySize));
    }

    #[test]
    fn tampered_checkpoint_is_corrupt() {
        let payload = checkpoint().encode().unwrap();
        let tampered = payload.replace("IMG_0042", "IMG_0043");

        assert!(matches!(
            ScanCheckpoint::decode("session-1", &tampered),
            Err(SessionError::CorruptCheckpoint { .. })
        ));
    }

    #[test]
    fn truncated_checkpoint_is_corrupt() {
        let payload = checkpoint().encode().unwrap();
        let truncated = &payload[..payload.len() / 2];
        assert!(ScanCheckpoint::decode("session-1", truncated).is_err());
    }

    #[test]
    fn checkpoint_for_other_session_is_rejected() {
        let payload = checkpoint().encode().unwrap();
        assert!(ScanCheckpoint::decode("session-2", &payload).is_err());
    }

    #[test]
    fn source_mismatch_is_detected() {
        let checkpoint = checkpoint();
        assert!(checkpoint
            .verify_sources(&[SourceId::new("disk"), SourceId::new("nas")])
            .is_ok());
        assert!(checkpoint.verify_sources(&[SourceId::new("disk")]).is_err());
        assert!(checkpoint
            .verify_sources(&[
                SourceId::new("disk"),
                SourceId::new("nas"),
                SourceId::new("usb")
            ])
            .is_err());
    }

    #[test]
    fn missing_checkpoint_fails_load() {
        let store = InMemoryStore::new();
        let result = ScanCheckpoint::load(&store, "nope");
        assert!(matches!(
            result,
            Err(ScannerError::Session(SessionError::CorruptCheckpoint { .. }))
        ));
    }

    #[test]
    fn save_then_load_through_store() {
        let store = InMemoryStore::new();
        let mut original = checkpoint();
        original.save(&store).unwrap();

        let loaded = ScanCheckpoint::load(&store, "session-1").unwrap();
        assert_eq!(loaded.sources, original.sources);
        assert_eq!(
            loaded.pending_sources().count(),
            2,
            "both sources still enumerating"
        );
    }
}
