//! Channels between a running session and whoever watches it.
//!
//! Discrete events (groups, errors, state changes) queue up unbounded.
//! Snapshots go through a single slot that only ever holds the newest one.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use super::{Event, ProgressSnapshot};

/// Session-side end of the event stream.
///
/// Sending never blocks; events for a dropped receiver are discarded.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Consumer end of the event stream
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block for the next event; `None` once every sender is gone
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Everything queued right now, oldest first
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

pub struct EventChannel;

impl EventChannel {
    /// Unbounded, so a slow consumer never stalls the scan
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// Sender for sessions nobody observes
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}

/// Publishes snapshots without ever blocking.
///
/// The channel holds one snapshot. Publishing while it is full replaces the
/// stale snapshot with the new one.
#[derive(Clone)]
pub struct SnapshotSender {
    inner: Sender<ProgressSnapshot>,
    drain: Receiver<ProgressSnapshot>,
}

impl SnapshotSender {
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        match self.inner.try_send(snapshot) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(snapshot)) => {
                let _ = self.drain.try_recv();
                let _ = self.inner.try_send(snapshot);
            }
        }
    }
}

/// Receives the newest snapshot
pub struct SnapshotReceiver {
    inner: Receiver<ProgressSnapshot>,
}

impl SnapshotReceiver {
    /// Block until a snapshot is available
    pub fn recv(&self) -> Option<ProgressSnapshot> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<ProgressSnapshot> {
        self.inner.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<ProgressSnapshot> {
        self.inner.recv_timeout(timeout).ok()
    }
}

/// Factory for the coalescing snapshot channel
pub struct SnapshotChannel;

impl SnapshotChannel {
    pub fn new() -> (SnapshotSender, SnapshotReceiver) {
        let (sender, receiver) = bounded(1);
        (
            SnapshotSender {
                inner: sender,
                drain: receiver.clone(),
            },
            SnapshotReceiver { inner: receiver },
        )
    }
}

/// A snapshot sender nobody listens to
pub fn null_snapshot_sender() -> SnapshotSender {
    let (sender, _receiver) = SnapshotChannel::new();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionState;
    use crate::error::{ErrorKind, ErrorRecord};
    use crate::events::TotalEstimate;
    use std::thread;

    fn snapshot(files: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: "s".into(),
            state: SessionState::Enumerating,
            files_scanned: files,
            media_found: TotalEstimate::LowerBound(files),
            current_source: None,
            current_path: None,
            groups_found: 0,
            bytes_hashed: 0,
            phase_progress: None,
            error_count: 0,
            paused: false,
        }
    }

    #[test]
    fn errors_arrive_in_order_from_another_thread() {
        let (sender, receiver) = EventChannel::new();

        thread::spawn(move || {
            for path in ["a.jpg", "b.jpg"] {
                sender.send(Event::Error(
                    ErrorRecord::new(ErrorKind::ItemUnreadable, "permission denied")
                        .with_path(path),
                ));
            }
        })
        .join()
        .unwrap();

        let paths: Vec<_> = receiver
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(record) => record.path,
                _ => None,
            })
            .collect();
        assert_eq!(paths, vec!["a.jpg", "b.jpg"]);
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn sending_without_a_receiver_is_silent() {
        null_sender().send(Event::Error(ErrorRecord::new(ErrorKind::Store, "x")));
    }

    #[test]
    fn snapshot_channel_keeps_only_latest() {
        let (sender, receiver) = SnapshotChannel::new();
        for files in 1..=100 {
            sender.publish(snapshot(files));
        }

        assert_eq!(receiver.try_recv().unwrap().files_scanned, 100);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn snapshot_publish_never_blocks_without_receiver() {
        let sender = null_snapshot_sender();
        for files in 0..10 {
            sender.publish(snapshot(files));
        }
    }
}
