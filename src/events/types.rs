//! Event type definitions for progress reporting.

use crate::core::groups::DuplicateGroup;
use crate::core::record::SourceId;
use crate::core::session::{SessionState, SessionSummary};
use crate::error::ErrorRecord;
use serde::{Deserialize, Serialize};

/// Everything a session reports besides progress snapshots.
///
/// Delivered over an unbounded channel; none of these may be dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// The session moved between states
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },
    /// A source finished enumerating
    SourceEnumerated { source_id: SourceId, media_files: u64 },
    /// A duplicate group was confirmed
    GroupConfirmed(DuplicateGroup),
    /// An entry was added to the session error log
    Error(ErrorRecord),
    /// The driver stopped: paused, completed or cancelled
    Settled(SessionSummary),
}

/// Count of media files found, exact only once enumeration is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalEstimate {
    LowerBound(u64),
    Final(u64),
}

impl TotalEstimate {
    pub fn value(&self) -> u64 {
        match self {
            TotalEstimate::LowerBound(n) | TotalEstimate::Final(n) => *n,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TotalEstimate::Final(_))
    }
}

/// Completed and total work items of the current hashing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub completed: u64,
    pub total: u64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub state: SessionState,
    /// Entries enumerated so far, skipped ones included
    pub files_scanned: u64,
    pub media_found: TotalEstimate,
    pub current_source: Option<SourceId>,
    pub current_path: Option<String>,
    pub groups_found: usize,
    pub bytes_hashed: u64,
    pub phase_progress: Option<PhaseProgress>,
    pub error_count: usize,
    pub paused: bool,
}
