//! # Events Module
//!
//! Progress and result reporting for UI layers.
//!
//! Sessions publish two streams:
//! - [`ProgressSnapshot`]s over a coalescing single-slot channel, so a slow UI
//!   only ever sees the newest state and never slows the scan
//! - [`Event`]s (confirmed groups, error records, state changes) over an
//!   unbounded channel, since none of them may be lost

mod channel;
mod types;

pub use channel::{
    null_sender, null_snapshot_sender, EventChannel, EventReceiver, EventSender, SnapshotChannel,
    SnapshotReceiver, SnapshotSender,
};
pub use types::{Event, PhaseProgress, ProgressSnapshot, TotalEstimate};
