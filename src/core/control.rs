//! Cooperative control signal shared by the session, enumerators and hashing workers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Requested behavior for running work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Run,
    /// Finish in-flight items, schedule nothing new
    Pause,
    /// Like pause, then settle as completed with partial results
    Stop,
    /// Abort in-flight items at the next chunk boundary
    Cancel,
}

impl ControlCommand {
    fn to_u8(self) -> u8 {
        match self {
            ControlCommand::Run => 0,
            ControlCommand::Pause => 1,
            ControlCommand::Stop => 2,
            ControlCommand::Cancel => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControlCommand::Pause,
            2 => ControlCommand::Stop,
            3 => ControlCommand::Cancel,
            _ => ControlCommand::Run,
        }
    }
}

/// Lock-free control flag, cheap to clone and check per item or chunk
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    state: Arc<AtomicU8>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, command: ControlCommand) {
        self.state.store(command.to_u8(), Ordering::SeqCst);
    }

    pub fn command(&self) -> ControlCommand {
        ControlCommand::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// No new items may be started
    pub fn should_stop_scheduling(&self) -> bool {
        self.command() != ControlCommand::Run
    }

    /// In-flight items must abort
    pub fn is_cancelled(&self) -> bool {
        self.command() == ControlCommand::Cancel
    }

    /// The session is over: late results must not confirm anything
    pub fn is_ending(&self) -> bool {
        matches!(self.command(), ControlCommand::Stop | ControlCommand::Cancel)
    }
}
