//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, Sender};
use duplicate_media_scanner::core::source::{
    ContentReader, Enumeration, EnumerationCursor, EnumerationItem, LocalSource, MediaFilter,
    MediaSource, SourceDescriptor,
};
use duplicate_media_scanner::core::{DuplicateGroup, SourceId};
use duplicate_media_scanner::error::SourceError;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Write `bytes` at `rel` below `root`, creating parent directories
pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Deterministic pseudo-random content
pub fn pattern(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Member paths of every group, sorted, for order-independent comparison
pub fn member_sets(groups: &[DuplicateGroup]) -> BTreeSet<Vec<String>> {
    groups
        .iter()
        .map(|group| group.members.iter().map(|key| key.path.clone()).collect())
        .collect()
}

/// Expected group member sets, in the shape [`member_sets`] returns
pub fn expected_sets(groups: &[&[&str]]) -> BTreeSet<Vec<String>> {
    groups
        .iter()
        .map(|members| members.iter().map(|path| path.to_string()).collect())
        .collect()
}

/// Blocks one `open` call, or one listed file, until the test releases it
struct Gate {
    /// Which pass over a file triggers: 1 for the first open, 2 for the second
    pass: usize,
    /// Trigger on the nth arrival of that pass
    nth: usize,
    seen: AtomicUsize,
    reached: Sender<String>,
    release: Receiver<()>,
}

impl Gate {
    fn new(pass: usize, nth: usize) -> (Self, GateHandle) {
        let (reached_tx, reached_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let gate = Gate {
            pass,
            nth,
            seen: AtomicUsize::new(0),
            reached: reached_tx,
            release: release_rx,
        };
        let handle = GateHandle {
            reached: reached_rx,
            release: release_tx,
        };
        (gate, handle)
    }

    /// `count` is how often `path` has arrived, this time included
    fn arrive(&self, path: &str, count: usize) {
        if count != self.pass {
            return;
        }
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == self.nth {
            let _ = self.reached.send(path.to_string());
            let _ = self.release.recv_timeout(Duration::from_secs(30));
        }
    }
}

fn bump(counts: &Mutex<HashMap<String, usize>>, path: &str) -> usize {
    let mut counts = counts.lock().unwrap();
    let count = counts.entry(path.to_string()).or_insert(0);
    *count += 1;
    *count
}

/// Test side of a gate
pub struct GateHandle {
    reached: Receiver<String>,
    release: Sender<()>,
}

impl GateHandle {
    /// Wait until a worker is parked at the gate; returns the path it opens
    pub fn wait_reached(&self) -> String {
        self.reached
            .recv_timeout(Duration::from_secs(30))
            .expect("gate was never reached")
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Local source that counts opens and listings per file and can park one of them
pub struct CountingSource {
    inner: LocalSource,
    opens: Mutex<HashMap<String, usize>>,
    listed: Arc<Mutex<HashMap<String, usize>>>,
    gate: Option<Gate>,
    listing_gate: Option<Arc<Gate>>,
}

impl CountingSource {
    pub fn new(id: &str, root: &Path) -> Self {
        Self {
            inner: LocalSource::with_id(SourceId::new(id), root),
            opens: Mutex::new(HashMap::new()),
            listed: Arc::new(Mutex::new(HashMap::new())),
            gate: None,
            listing_gate: None,
        }
    }

    /// Park the `nth` open belonging to `pass` (1 = partial read, 2 = full read)
    pub fn gated(mut self, pass: usize, nth: usize) -> (Self, GateHandle) {
        let (gate, handle) = Gate::new(pass, nth);
        self.gate = Some(gate);
        (self, handle)
    }

    /// Park enumeration on the `nth` media file listed for the first time
    pub fn gated_listing(mut self, nth: usize) -> (Self, GateHandle) {
        let (gate, handle) = Gate::new(1, nth);
        self.listing_gate = Some(Arc::new(gate));
        (self, handle)
    }

    pub fn opens_of(&self, path: &str) -> usize {
        self.opens.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// How many times enumeration handed out `path` as a media file
    pub fn listings_of(&self, path: &str) -> usize {
        self.listed.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }
}

impl MediaSource for CountingSource {
    fn descriptor(&self) -> &SourceDescriptor {
        self.inner.descriptor()
    }

    fn enumerate(
        &self,
        filter: &MediaFilter,
        resume_after: Option<&EnumerationCursor>,
    ) -> Result<Enumeration, SourceError> {
        let items = self.inner.enumerate(filter, resume_after)?;
        let listed = Arc::clone(&self.listed);
        let gate = self.listing_gate.clone();
        Ok(Box::new(items.inspect(move |item| {
            if let Ok(EnumerationItem::Found(record)) = item {
                let count = bump(&listed, &record.key.path);
                if let Some(gate) = &gate {
                    gate.arrive(&record.key.path, count);
                }
            }
        })))
    }

    fn open(&self, relative_path: &str) -> Result<Box<dyn ContentReader>, SourceError> {
        let count = bump(&self.opens, relative_path);
        if let Some(gate) = &self.gate {
            gate.arrive(relative_path, count);
        }
        self.inner.open(relative_path)
    }
}
