//! The background thread that runs a session's phases.
//!
//! The driver is the only writer of file records. Enumeration threads and
//! hashing workers hand their results to it over channels.

use super::checkpoint::EnumerationStatus;
use super::context::SessionContext;
use super::state::{ScanPhase, SessionState};
use crate::core::control::{ControlCommand, ScanControl};
use crate::core::grouping::{
    group_by_partial_hash, group_by_size, plan_full_hashing, plan_partial_hashing,
    FullHashPlan, ResolvedBucket,
};
use crate::core::hashing::{HashOutcome, HashingPipeline};
use crate::core::record::{FileKey, FileRecord, ProcessingState, RecordUpdate, SourceId};
use crate::core::source::{
    EnumerationCursor, EnumerationItem, MediaFilter, MediaSource, SkipReason,
};
use crate::core::store::CachedHash;
use crate::error::{ErrorKind, ErrorRecord, HashError, ScannerError, SessionError, SourceError};
use crate::events::Event;
use crossbeam_channel::{bounded, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, trace, warn};

/// Enumerated items buffered between source threads and the driver
const DISCOVERY_BUFFER: usize = 256;

enum PhaseEnd {
    Done,
    Interrupted,
}

/// Messages from per-source enumeration threads
enum Discovery {
    Item(SourceId, EnumerationItem),
    Problem(SourceId, SourceError),
    Unavailable(SourceId, SourceError),
    Finished(SourceId),
}

/// Run phases from the checkpoint onward, then settle the session
pub(super) fn drive(ctx: &SessionContext) {
    let end = run_phases(ctx);
    settle(ctx, end);
}

fn run_phases(ctx: &SessionContext) -> Result<PhaseEnd, ScannerError> {
    let pipeline = HashingPipeline::new(&ctx.config)?;

    loop {
        let next = ctx.lock().checkpoint.next_phase();
        let Some(phase) = next else {
            return Ok(PhaseEnd::Done);
        };
        if !ctx.advance_to(phase) {
            return Ok(PhaseEnd::Interrupted);
        }
        info!(session = %ctx.id, %phase, "Phase started");

        let end = match phase {
            ScanPhase::Enumerating => enumerate(ctx)?,
            ScanPhase::GroupingBySize => {
                group_by_size(ctx.store.as_ref(), &ctx.source_ids())?;
                PhaseEnd::Done
            }
            ScanPhase::GroupingByPartialHash => partial_hashing(ctx, &pipeline)?,
            ScanPhase::FullHashing => full_hashing(ctx, &pipeline)?,
        };
        if let PhaseEnd::Interrupted = end {
            return Ok(PhaseEnd::Interrupted);
        }

        let mut shared = ctx.lock();
        shared.checkpoint.phase_completed = Some(phase);
        shared.phase_progress = None;
        shared.checkpoint.save(ctx.store.as_ref())?;
        info!(session = %ctx.id, %phase, "Phase finished");
    }
}

fn settle(ctx: &SessionContext, end: Result<PhaseEnd, ScannerError>) {
    let command = ctx.control.command();
    if command == ControlCommand::Cancel {
        return;
    }

    let mut shared = ctx.lock();
    match end {
        Ok(PhaseEnd::Done) => {
            if shared.state.is_in_progress() {
                shared.checkpoint.finished = true;
                shared.checkpoint.paused_from = None;
                ctx.set_state(&mut shared, SessionState::Completed);
                info!(session = %ctx.id, groups = shared.groups.len(), "Scan completed");
            }
        }
        Ok(PhaseEnd::Interrupted) => {
            trace!(session = %ctx.id, ?command, "Driver interrupted");
        }
        Err(e) => {
            error!(session = %ctx.id, error = %e, "Scan halted");
            let kind = match &e {
                ScannerError::Session(SessionError::CorruptCheckpoint { .. }) => {
                    ErrorKind::CorruptCheckpoint
                }
                _ => ErrorKind::Store,
            };
            let record = ErrorRecord::new(kind, e.to_string());
            shared.errors.push(record.clone());
            ctx.events.send(Event::Error(record));
            if let Some(phase) = shared.state.phase() {
                shared.checkpoint.paused_from = Some(phase);
                ctx.set_state(&mut shared, SessionState::Paused);
            }
        }
    }

    if let Err(e) = shared.checkpoint.save(ctx.store.as_ref()) {
        warn!(session = %ctx.id, error = %e, "Failed to persist checkpoint");
    }
    ctx.publish(&shared);
    drop(shared);

    ctx.events.send(Event::Settled(ctx.summary()));
}

#[instrument(skip_all, fields(session = %ctx.id))]
fn enumerate(ctx: &SessionContext) -> Result<PhaseEnd, ScannerError> {
    let filter = ctx.config.media_filter();
    let pending: Vec<(Arc<dyn MediaSource>, Option<EnumerationCursor>)> = {
        let shared = ctx.lock();
        shared
            .checkpoint
            .pending_sources()
            .filter_map(|(id, progress)| {
                ctx.source_map
                    .get(id)
                    .map(|source| (Arc::clone(source), progress.cursor.clone()))
            })
            .collect()
    };

    std::thread::scope(|scope| -> Result<(), ScannerError> {
        let (tx, rx) = bounded(DISCOVERY_BUFFER);
        for (source, cursor) in pending {
            let tx = tx.clone();
            let filter = &filter;
            let control = &ctx.control;
            scope.spawn(move || {
                walk_source(source.as_ref(), filter, cursor.as_ref(), control, &tx)
            });
        }
        drop(tx);

        let mut found: HashMap<SourceId, u64> = HashMap::new();
        let mut since_checkpoint = 0u64;
        for message in rx.iter() {
            absorb(ctx, message, &mut found)?;
            since_checkpoint += 1;
            if since_checkpoint >= ctx.config.checkpoint_interval {
                ctx.save_checkpoint()?;
                since_checkpoint = 0;
            }
        }
        Ok(())
    })?;

    if ctx.control.should_stop_scheduling() {
        return Ok(PhaseEnd::Interrupted);
    }

    let shared = ctx.lock();
    info!(
        files = shared.checkpoint.files_scanned,
        media = shared.checkpoint.media_found,
        "Enumeration finished"
    );
    ctx.publish(&shared);
    Ok(PhaseEnd::Done)
}

fn walk_source(
    source: &dyn MediaSource,
    filter: &MediaFilter,
    cursor: Option<&EnumerationCursor>,
    control: &ScanControl,
    tx: &Sender<Discovery>,
) {
    let id = source.id().clone();
    let items = match source.enumerate(filter, cursor) {
        Ok(items) => items,
        Err(error) => {
            let _ = tx.send(Discovery::Unavailable(id, error));
            return;
        }
    };

    for item in items {
        if control.should_stop_scheduling() {
            return;
        }
        let message = match item {
            Ok(item) => Discovery::Item(id.clone(), item),
            Err(error) if error.is_source_fatal() => {
                let _ = tx.send(Discovery::Unavailable(id, error));
                return;
            }
            Err(error) => Discovery::Problem(id.clone(), error),
        };
        if tx.send(message).is_err() {
            return;
        }
    }
    let _ = tx.send(Discovery::Finished(id));
}

fn absorb(
    ctx: &SessionContext,
    message: Discovery,
    found: &mut HashMap<SourceId, u64>,
) -> Result<(), ScannerError> {
    match message {
        Discovery::Item(id, EnumerationItem::Found(mut record)) => {
            if ctx.config.reuse_cached_hashes {
                record.full_hash =
                    ctx.store
                        .cached_hash(&record.key, record.size, record.modified)?;
                if record.full_hash.is_some() {
                    trace!(key = %record.key, "Reusing cached full hash");
                }
            }
            ctx.store.upsert(&record)?;
            *found.entry(id.clone()).or_default() += 1;

            let mut shared = ctx.lock();
            shared.checkpoint.files_scanned += 1;
            shared.checkpoint.media_found += 1;
            shared.checkpoint.set_cursor(&id, &record.key.path);
            shared.current_path = Some(record.key.path);
            shared.current_source = Some(id);
            ctx.publish(&shared);
        }
        Discovery::Item(id, EnumerationItem::Skipped(notice)) => {
            if let SkipReason::Unreadable(reason) = &notice.reason {
                warn!(source = %id, path = %notice.path, %reason, "Skipping unreadable entry");
                ctx.record_error(
                    ErrorRecord::new(ErrorKind::ItemUnreadable, reason.clone())
                        .with_source(id.as_str())
                        .with_path(notice.path.clone()),
                );
            }
            let mut shared = ctx.lock();
            shared.checkpoint.files_scanned += 1;
            shared.checkpoint.set_cursor(&id, &notice.path);
            shared.current_path = Some(notice.path);
            shared.current_source = Some(id);
            ctx.publish(&shared);
        }
        Discovery::Problem(id, error) => {
            warn!(source = %id, error = %error, "Enumeration problem");
            ctx.record_error(ErrorRecord::from_source_error(id.as_str(), &error));
        }
        Discovery::Unavailable(id, error) => {
            warn!(source = %id, error = %error, "Source unavailable, skipping the rest of it");
            ctx.record_error(ErrorRecord::from_source_error(id.as_str(), &error));
            ctx.lock()
                .checkpoint
                .set_status(&id, EnumerationStatus::Unavailable);
        }
        Discovery::Finished(id) => {
            let media_files = found.get(&id).copied().unwrap_or(0);
            info!(source = %id, media_files, "Source enumerated");
            ctx.lock()
                .checkpoint
                .set_status(&id, EnumerationStatus::Finished);
            ctx.events.send(Event::SourceEnumerated {
                source_id: id,
                media_files,
            });
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(session = %ctx.id))]
fn partial_hashing(
    ctx: &SessionContext,
    pipeline: &HashingPipeline,
) -> Result<PhaseEnd, ScannerError> {
    let sources = ctx.source_ids();
    let jobs = plan_partial_hashing(
        ctx.store.as_ref(),
        &sources,
        &ctx.source_kinds(),
        &ctx.config,
    )?;
    info!(jobs = jobs.len(), "Partial fingerprinting");
    ctx.begin_progress(jobs.len());

    pipeline.run(jobs, &ctx.source_map, &ctx.control, |outcome| {
        match outcome {
            HashOutcome::Partial { key, fingerprint } => {
                let mut update = RecordUpdate::partial_hash(fingerprint.hash);
                if let Some(full) = fingerprint.full_hash {
                    update = update.with_full_hash(full);
                }
                ctx.store.update(&key, &update)?;
                ctx.item_hashed(&key.path, &key.source_id, fingerprint.bytes_read);
            }
            HashOutcome::Full {
                key,
                hash,
                bytes_read,
            } => {
                ctx.store.update(&key, &RecordUpdate::full_hash(hash))?;
                ctx.item_hashed(&key.path, &key.source_id, bytes_read);
            }
            HashOutcome::Failed { key, error } => {
                record_hash_failure(ctx, &key, &error)?;
            }
        }
        Ok::<(), ScannerError>(())
    })?;

    if ctx.control.should_stop_scheduling() {
        return Ok(PhaseEnd::Interrupted);
    }
    group_by_partial_hash(ctx.store.as_ref(), &sources)?;
    Ok(PhaseEnd::Done)
}

#[instrument(skip_all, fields(session = %ctx.id))]
fn full_hashing(ctx: &SessionContext, pipeline: &HashingPipeline) -> Result<PhaseEnd, ScannerError> {
    ctx.restore_confirmed_groups()?;

    let sources = ctx.source_ids();
    let FullHashPlan { jobs, mut tracker } = plan_full_hashing(ctx.store.as_ref(), &sources)?;
    for bucket in tracker.take_ready() {
        resolve_bucket(ctx, bucket)?;
    }

    info!(jobs = jobs.len(), "Full hashing");
    ctx.begin_progress(jobs.len());

    pipeline.run(jobs, &ctx.source_map, &ctx.control, |outcome| {
        let resolved = match outcome {
            HashOutcome::Full {
                key,
                hash,
                bytes_read,
            } => {
                let update = RecordUpdate::state(ProcessingState::FullHashed).with_full_hash(hash);
                ctx.store.update(&key, &update)?;
                ctx.item_hashed(&key.path, &key.source_id, bytes_read);
                tracker.record_hash(&key, hash)
            }
            HashOutcome::Failed { key, error } => {
                if record_hash_failure(ctx, &key, &error)? {
                    tracker.record_failure(&key)
                } else {
                    None
                }
            }
            HashOutcome::Partial { key, .. } => {
                trace!(%key, "Ignoring partial fingerprint during full hashing");
                None
            }
        };
        if let Some(bucket) = resolved {
            resolve_bucket(ctx, bucket)?;
        }
        Ok::<(), ScannerError>(())
    })?;

    if ctx.control.should_stop_scheduling() {
        return Ok(PhaseEnd::Interrupted);
    }

    if !tracker.is_empty() {
        warn!(
            pending = tracker.pending_buckets(),
            "Buckets left unresolved after full hashing"
        );
    }
    let mut swept = 0;
    for state in [
        ProcessingState::Discovered,
        ProcessingState::SizeCandidate,
        ProcessingState::PartialHashCandidate,
        ProcessingState::FullHashed,
    ] {
        swept += ctx
            .store
            .transition_state(&sources, state, ProcessingState::Unique)?;
    }
    if swept > 0 {
        warn!(swept, "Moved leftover candidates to unique");
    }
    Ok(PhaseEnd::Done)
}

/// Confirm duplicate sub-buckets and retire the rest as unique.
///
/// Once the session is stopping, members keep their hashed state for a later rescan.
fn resolve_bucket(ctx: &SessionContext, bucket: ResolvedBucket) -> Result<(), ScannerError> {
    if ctx.control.is_ending() {
        trace!(
            duplicates = bucket.duplicates.len(),
            "Leaving bucket unresolved, session is ending"
        );
        return Ok(());
    }
    for members in bucket.duplicates {
        let group = ctx.lock().builder.fold(&members)?;
        for record in &members {
            let hashed = RecordUpdate::state(ProcessingState::FullHashed)
                .with_full_hash(group.full_hash);
            ctx.store.update(&record.key, &hashed)?;
            ctx.store.update(
                &record.key,
                &RecordUpdate::state(ProcessingState::DuplicateConfirmed),
            )?;
            remember(ctx, record)?;
        }
        ctx.emit_group(group);
    }

    for record in bucket.unique {
        ctx.store
            .update(&record.key, &RecordUpdate::state(ProcessingState::Unique))?;
        remember(ctx, &record)?;
    }
    Ok(())
}

fn remember(ctx: &SessionContext, record: &FileRecord) -> Result<(), ScannerError> {
    if let (Some(modified), Some(full_hash)) = (record.modified, record.full_hash) {
        ctx.store.remember_hash(&CachedHash {
            key: record.key.clone(),
            size: record.size,
            modified,
            full_hash,
        })?;
    }
    Ok(())
}

/// Exclude an unreadable file. Returns false for cancelled reads, which are not failures.
fn record_hash_failure(
    ctx: &SessionContext,
    key: &FileKey,
    error: &HashError,
) -> Result<bool, ScannerError> {
    if matches!(error, HashError::Cancelled { .. }) {
        return Ok(false);
    }

    let message = error.to_string();
    ctx.store.update(key, &RecordUpdate::failed(message.clone()))?;

    let kind = match error {
        HashError::Source(SourceError::SourceUnavailable { .. }) => ErrorKind::SourceUnavailable,
        _ => ErrorKind::ItemUnreadable,
    };
    ctx.record_error(
        ErrorRecord::new(kind, message)
            .with_source(key.source_id.as_str())
            .with_path(key.path.clone()),
    );
    ctx.item_hashed(&key.path, &key.source_id, 0);
    Ok(true)
}
