//! Session state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Enumerating,
    GroupingBySize,
    GroupingByPartialHash,
    FullHashing,
    Completed,
    Paused,
    Cancelled,
}

impl SessionState {
    /// One of the four working phases
    pub fn is_in_progress(&self) -> bool {
        self.phase().is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }

    /// The working phase this state represents, if any
    pub fn phase(&self) -> Option<ScanPhase> {
        match self {
            SessionState::Enumerating => Some(ScanPhase::Enumerating),
            SessionState::GroupingBySize => Some(ScanPhase::GroupingBySize),
            SessionState::GroupingByPartialHash => Some(ScanPhase::GroupingByPartialHash),
            SessionState::FullHashing => Some(ScanPhase::FullHashing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Enumerating => "enumerating",
            SessionState::GroupingBySize => "grouping by size",
            SessionState::GroupingByPartialHash => "grouping by partial hash",
            SessionState::FullHashing => "full hashing",
            SessionState::Completed => "completed",
            SessionState::Paused => "paused",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The working phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScanPhase {
    Enumerating,
    GroupingBySize,
    GroupingByPartialHash,
    FullHashing,
}

impl ScanPhase {
    pub const FIRST: ScanPhase = ScanPhase::Enumerating;

    pub fn state(&self) -> SessionState {
        match self {
            ScanPhase::Enumerating => SessionState::Enumerating,
            ScanPhase::GroupingBySize => SessionState::GroupingBySize,
            ScanPhase::GroupingByPartialHash => SessionState::GroupingByPartialHash,
            ScanPhase::FullHashing => SessionState::FullHashing,
        }
    }

    /// `None` after the last phase
    pub fn next(&self) -> Option<ScanPhase> {
        match self {
            ScanPhase::Enumerating => Some(ScanPhase::GroupingBySize),
            ScanPhase::GroupingBySize => Some(ScanPhase::GroupingByPartialHash),
            ScanPhase::GroupingByPartialHash => Some(ScanPhase::FullHashing),
            ScanPhase::FullHashing => None,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state().as_str())
    }
}
