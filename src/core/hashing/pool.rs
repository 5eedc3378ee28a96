//! Bounded worker pools for local and remote hashing.

use super::digest::{partial_fingerprint, stream_full_hash, PartialFingerprint};
use crate::core::config::ScanConfig;
use crate::core::control::ScanControl;
use crate::core::record::{ContentHash, FileKey, SourceId};
use crate::core::source::{MediaSource, SourceKind};
use crate::error::{HashError, SourceError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Sources participating in a run, by id
pub type SourceMap = HashMap<SourceId, Arc<dyn MediaSource>>;

/// What to compute for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashJobKind {
    Partial { chunk_size: usize, derive_full: bool },
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashJob {
    pub key: FileKey,
    pub size: u64,
    pub kind: HashJobKind,
}

/// Result of one job, delivered to the controller
#[derive(Debug)]
pub enum HashOutcome {
    Partial {
        key: FileKey,
        fingerprint: PartialFingerprint,
    },
    Full {
        key: FileKey,
        hash: ContentHash,
        bytes_read: u64,
    },
    Failed {
        key: FileKey,
        error: HashError,
    },
}

impl HashOutcome {
    pub fn key(&self) -> &FileKey {
        match self {
            HashOutcome::Partial { key, .. }
            | HashOutcome::Full { key, .. }
            | HashOutcome::Failed { key, .. } => key,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        match self {
            HashOutcome::Partial { fingerprint, .. } => fingerprint.bytes_read,
            HashOutcome::Full { bytes_read, .. } => *bytes_read,
            HashOutcome::Failed { .. } => 0,
        }
    }
}

/// Two independently sized pools: local disks and remote transports
pub struct HashingPipeline {
    local: ThreadPool,
    remote: ThreadPool,
    local_workers: usize,
    remote_workers: usize,
    stream_chunk_size: usize,
}

impl HashingPipeline {
    pub fn new(config: &ScanConfig) -> Result<Self, HashError> {
        let local = ThreadPoolBuilder::new()
            .num_threads(config.local_workers)
            .thread_name(|idx| format!("hash-local-{idx}"))
            .build()
            .map_err(|e| HashError::PoolBuild(e.to_string()))?;
        let remote = ThreadPoolBuilder::new()
            .num_threads(config.remote_workers)
            .thread_name(|idx| format!("hash-remote-{idx}"))
            .build()
            .map_err(|e| HashError::PoolBuild(e.to_string()))?;

        Ok(Self {
            local,
            remote,
            local_workers: config.local_workers,
            remote_workers: config.remote_workers,
            stream_chunk_size: config.stream_chunk_size,
        })
    }

    /// Run `jobs` to completion or until the control signal stops scheduling.
    ///
    /// `on_outcome` runs on the calling thread, one outcome at a time. If it
    /// fails, workers stop picking up jobs and the first error is returned.
    /// Jobs never started are simply dropped; callers re-derive them from the store.
    pub fn run<F, E>(
        &self,
        jobs: Vec<HashJob>,
        sources: &SourceMap,
        control: &ScanControl,
        mut on_outcome: F,
    ) -> Result<usize, E>
    where
        F: FnMut(HashOutcome) -> Result<(), E>,
    {
        let (local_tx, local_rx) = unbounded();
        let (remote_tx, remote_rx) = unbounded();
        let mut orphaned = Vec::new();
        let mut seen = HashSet::new();

        for job in jobs {
            if !seen.insert(job.key.clone()) {
                trace!(key = %job.key, "Dropping duplicate job");
                continue;
            }
            match sources.get(&job.key.source_id).map(|s| s.kind()) {
                Some(SourceKind::LocalVolume) => {
                    let _ = local_tx.send(job);
                }
                Some(SourceKind::RemoteProtocol) => {
                    let _ = remote_tx.send(job);
                }
                None => orphaned.push(job),
            }
        }
        drop(local_tx);
        drop(remote_tx);

        debug!(
            local = local_rx.len(),
            remote = remote_rx.len(),
            "Starting hashing run"
        );

        let mut processed = 0usize;
        for job in orphaned {
            let error = HashError::Source(SourceError::ItemUnreadable {
                path: job.key.path.clone(),
                reason: format!("source {} is not part of this session", job.key.source_id),
            });
            on_outcome(HashOutcome::Failed {
                key: job.key,
                error,
            })?;
            processed += 1;
        }

        let halt = AtomicBool::new(false);
        let (result_tx, result_rx) = unbounded::<HashOutcome>();
        let mut first_error = None;

        std::thread::scope(|scope| {
            let lanes = [
                (&self.local, &local_rx, self.local_workers),
                (&self.remote, &remote_rx, self.remote_workers),
            ];
            for (pool, queue, workers) in lanes {
                if queue.is_empty() {
                    continue;
                }
                let results = result_tx.clone();
                let halt = &halt;
                let chunk = self.stream_chunk_size;
                scope.spawn(move || {
                    pool.scope(|s| {
                        for _ in 0..workers.min(queue.len()).max(1) {
                            let results = results.clone();
                            s.spawn(move |_| {
                                work(queue, &results, sources, control, halt, chunk)
                            });
                        }
                    });
                });
            }
            drop(result_tx);

            for outcome in result_rx.iter() {
                if first_error.is_some() {
                    continue;
                }
                match on_outcome(outcome) {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        halt.store(true, Ordering::SeqCst);
                        first_error = Some(e);
                    }
                }
            }
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(processed),
        }
    }
}

/// Pull jobs until the queue drains or scheduling stops
fn work(
    queue: &Receiver<HashJob>,
    results: &Sender<HashOutcome>,
    sources: &SourceMap,
    control: &ScanControl,
    halt: &AtomicBool,
    stream_chunk_size: usize,
) {
    loop {
        if control.should_stop_scheduling() || halt.load(Ordering::SeqCst) {
            break;
        }
        let Ok(job) = queue.recv() else {
            break;
        };

        let outcome = match sources.get(&job.key.source_id) {
            Some(source) => execute(&job, source.as_ref(), control, stream_chunk_size),
            None => continue,
        };
        if let HashOutcome::Failed { key, error } = &outcome {
            if !matches!(error, HashError::Cancelled { .. }) {
                warn!(key = %key, error = %error, "Hashing failed");
            }
        }
        if results.send(outcome).is_err() {
            break;
        }
    }
}

fn execute(
    job: &HashJob,
    source: &dyn MediaSource,
    control: &ScanControl,
    stream_chunk_size: usize,
) -> HashOutcome {
    let key = job.key.clone();
    match hash_one(job, source, control, stream_chunk_size) {
        Ok(Hashed::Partial(fingerprint)) => HashOutcome::Partial { key, fingerprint },
        Ok(Hashed::Full(hash, bytes_read)) => HashOutcome::Full {
            key,
            hash,
            bytes_read,
        },
        Err(error) => HashOutcome::Failed { key, error },
    }
}

enum Hashed {
    Partial(PartialFingerprint),
    Full(ContentHash, u64),
}

fn hash_one(
    job: &HashJob,
    source: &dyn MediaSource,
    control: &ScanControl,
    stream_chunk_size: usize,
) -> Result<Hashed, HashError> {
    trace!(key = %job.key, kind = ?job.kind, "Hashing");
    let mut reader = source.open(&job.key.path)?;
    match job.kind {
        HashJobKind::Partial {
            chunk_size,
            derive_full,
        } => partial_fingerprint(reader.as_mut(), &job.key.path, job.size, chunk_size, derive_full)
            .map(Hashed::Partial),
        HashJobKind::Full => stream_full_hash(
            reader.as_mut(),
            &job.key.path,
            job.size,
            stream_chunk_size,
            control,
        )
        .map(|(hash, bytes)| Hashed::Full(hash, bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::control::ControlCommand;
    use crate::core::source::{
        ContentReader, Enumeration, EnumerationCursor, LocalSource, MediaFilter,
        SourceDescriptor,
    };
    use std::fs;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory source that records how many opens overlap
    struct SlowSource {
        descriptor: SourceDescriptor,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSource {
        fn new(descriptor: SourceDescriptor) -> Arc<Self> {
            Arc::new(Self {
                descriptor,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl MediaSource for SlowSource {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        fn enumerate(
            &self,
            _filter: &MediaFilter,
            _resume_after: Option<&EnumerationCursor>,
        ) -> Result<Enumeration, SourceError> {
            Ok(Box::new(std::iter::empty()))
        }

        fn open(&self, _relative_path: &str) -> Result<Box<dyn ContentReader>, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(b"body".to_vec())))
        }
    }

    fn setup(files: &[(&str, &[u8])]) -> (TempDir, SourceMap, SourceId) {
        let temp = TempDir::new().unwrap();
        for (name, bytes) in files {
            fs::write(temp.path().join(name), bytes).unwrap();
        }
        let source: Arc<dyn MediaSource> = Arc::new(LocalSource::new(temp.path()));
        let id = source.id().clone();
        let mut map = SourceMap::new();
        map.insert(id.clone(), source);
        (temp, map, id)
    }

    fn full_job(id: &SourceId, name: &str, size: u64) -> HashJob {
        HashJob {
            key: FileKey::new(id.clone(), name),
            size,
            kind: HashJobKind::Full,
        }
    }

    #[test]
    fn run_hashes_every_job_once() {
        let (_temp, sources, id) = setup(&[("a.jpg", &b"alpha"[..]), ("b.jpg", &b"alpha"[..])]);
        let pipeline = HashingPipeline::new(&ScanConfig::default().local_workers(2)).unwrap();

        let jobs = vec![
            full_job(&id, "a.jpg", 5),
            full_job(&id, "b.jpg", 5),
            full_job(&id, "a.jpg", 5),
        ];
        let mut hashes = Vec::new();
        let processed = pipeline
            .run(jobs, &sources, &ScanControl::new(), |outcome| {
                if let HashOutcome::Full { hash, .. } = outcome {
                    hashes.push(hash);
                }
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(processed, 2);
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
        assert_eq!(hashes[0], ContentHash::from(blake3::hash(b"alpha")));
    }

    #[test]
    fn missing_file_is_reported_as_failure() {
        let (_temp, sources, id) = setup(&[]);
        let pipeline = HashingPipeline::new(&ScanConfig::default()).unwrap();

        let mut failures = 0;
        pipeline
            .run(
                vec![full_job(&id, "gone.jpg", 10)],
                &sources,
                &ScanControl::new(),
                |outcome| {
                    if matches!(outcome, HashOutcome::Failed { .. }) {
                        failures += 1;
                    }
                    Ok::<_, ()>(())
                },
            )
            .unwrap();
        assert_eq!(failures, 1);
    }

    #[test]
    fn paused_control_schedules_nothing() {
        let (_temp, sources, id) = setup(&[("a.jpg", &b"a"[..])]);
        let pipeline = HashingPipeline::new(&ScanConfig::default()).unwrap();
        let control = ScanControl::new();
        control.request(ControlCommand::Pause);

        let processed = pipeline
            .run(vec![full_job(&id, "a.jpg", 1)], &sources, &control, |_| {
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(processed, 0);
    }

    #[test]
    fn callback_error_halts_the_run() {
        let names: Vec<String> = (0..20).map(|i| format!("{i}.jpg")).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        let (_temp, sources, id) = setup(&files);
        let pipeline = HashingPipeline::new(&ScanConfig::default().local_workers(1)).unwrap();

        let jobs = names.iter().map(|n| full_job(&id, n, 1)).collect();
        let result = pipeline.run(jobs, &sources, &ScanControl::new(), |_| Err("store down"));
        assert_eq!(result, Err("store down"));
    }

    #[test]
    fn unknown_source_fails_the_job() {
        let (_temp, sources, _id) = setup(&[]);
        let pipeline = HashingPipeline::new(&ScanConfig::default()).unwrap();
        let stranger = SourceId::new("elsewhere");

        let mut failed = Vec::new();
        pipeline
            .run(
                vec![full_job(&stranger, "a.jpg", 1)],
                &sources,
                &ScanControl::new(),
                |outcome| {
                    failed.push(outcome.key().clone());
                    Ok::<_, ()>(())
                },
            )
            .unwrap();
        assert_eq!(failed, vec![FileKey::new(stranger, "a.jpg")]);
    }

    #[test]
    fn remote_jobs_never_exceed_remote_workers() {
        let nas = SlowSource::new(SourceDescriptor::remote(SourceId::new("nas"), "smb://nas", None));
        let disk = SlowSource::new(SourceDescriptor::local(SourceId::new("disk"), "/photos"));
        let mut sources = SourceMap::new();
        sources.insert(SourceId::new("nas"), nas.clone() as Arc<dyn MediaSource>);
        sources.insert(SourceId::new("disk"), disk.clone() as Arc<dyn MediaSource>);

        let config = ScanConfig::default().local_workers(4).remote_workers(2);
        let pipeline = HashingPipeline::new(&config).unwrap();
        let jobs = (0..16)
            .flat_map(|i| {
                let name = format!("{i}.jpg");
                [
                    full_job(&SourceId::new("nas"), &name, 4),
                    full_job(&SourceId::new("disk"), &name, 4),
                ]
            })
            .collect();

        let processed = pipeline
            .run(jobs, &sources, &ScanControl::new(), |outcome| {
                assert!(matches!(outcome, HashOutcome::Full { .. }));
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(processed, 32);
        assert!(nas.peak() >= 1 && nas.peak() <= 2, "remote peak {}", nas.peak());
        assert!(disk.peak() <= 4, "local peak {}", disk.peak());
    }
}
