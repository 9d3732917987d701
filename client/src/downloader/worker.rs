use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use log::{debug, error, info, warn};
use seek_core::{SearchGroup, SearchResult, Transfer};
use seek_network::{Destination, ProgressFn, TransferProgress, TransferRequest};
use tokio::sync::watch;
use tokio::time::Instant;

use super::config::PEER_FAULT_LIMIT;
use super::state::{BufferMode, Engine, TransferFault, WorkerStatus};
use crate::storage::CandidatePaths;
use crate::storage::dedup::file_stem;
use crate::tags::{self, TagTarget, TrackTags};

/// How one candidate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accepted,
    Skipped,
    Rejected,
    Faulted,
    Stopped,
}

/// Works through the candidates of `group` in rank order.
///
/// Stops early when the engine is stopped, or after the first accepted file of a
/// singles group.
pub async fn run(engine: Arc<Engine>, worker_id: usize, group: SearchGroup) {
    debug!(
        "Worker {} started on {} candidates for {}",
        worker_id,
        group.candidates.len(),
        group.target_artist
    );

    for (index, candidate) in group.candidates.iter().enumerate() {
        if engine.stop.is_cancelled() {
            break;
        }
        let filename = candidate.basename().unwrap_or(&candidate.remote_path);
        engine.progress.start_candidate(worker_id, index + 1, filename);

        let admitted = engine
            .disk
            .wait_for_space(engine.storage.root(), &engine.stop, || {
                engine
                    .progress
                    .set_status(worker_id, WorkerStatus::WaitingForDiskSpace)
            })
            .await;
        if !admitted {
            break;
        }

        if engine.tallies.peer_faults(&candidate.peer) >= PEER_FAULT_LIMIT {
            debug!(
                "Skipping {}: peer {} reached the fault limit",
                candidate.remote_path, candidate.peer
            );
            engine
                .progress
                .set_status(worker_id, WorkerStatus::IgnoredPeer(candidate.peer.clone()));
            continue;
        }

        match process_candidate(&engine, worker_id, &group, candidate).await {
            Outcome::Accepted if group.singles => break,
            Outcome::Stopped => break,
            _ => {}
        }
    }
}

async fn process_candidate(
    engine: &Arc<Engine>,
    worker_id: usize,
    group: &SearchGroup,
    candidate: &SearchResult,
) -> Outcome {
    let parts = match candidate.path_parts() {
        Some(parts) => parts,
        None => {
            let fault = TransferFault::MalformedPath(candidate.remote_path.clone());
            return record_fault(engine, worker_id, candidate, fault);
        }
    };
    let paths = engine.storage.candidate_paths(&candidate.peer, &parts);

    if is_duplicate(engine, candidate, &parts.basename, &paths.target).await {
        return skip_duplicate(engine, worker_id, candidate);
    }

    let _peer_guard = match engine
        .peer_locks
        .acquire(
            &candidate.peer,
            &engine.stop,
            engine.options.timings.peer_poll,
            |waited| {
                engine.progress.set_status(
                    worker_id,
                    WorkerStatus::WaitingOnPeer {
                        peer: candidate.peer.clone(),
                        waited,
                    },
                )
            },
        )
        .await
    {
        Some(guard) => guard,
        None => return Outcome::Stopped,
    };

    // Another worker may have accepted the same file while this one waited.
    if engine.ignore.contains(&parts.basename) {
        return skip_duplicate(engine, worker_id, candidate);
    }

    if let Err(e) = tokio::fs::create_dir_all(&paths.dir).await {
        return record_fault(engine, worker_id, candidate, TransferFault::Io(e.to_string()));
    }

    let use_memory =
        engine.options.in_memory && candidate.size < engine.options.in_memory_max_bytes;
    let mut destination = if use_memory {
        Destination::memory(candidate.size)
    } else {
        remove_if_present(&paths.temp).await;
        match Destination::disk(&paths.temp).await {
            Ok(destination) => destination,
            Err(e) => {
                return record_fault(engine, worker_id, candidate, TransferFault::Io(e.to_string()));
            }
        }
    };
    engine.progress.set_buffer_mode(
        worker_id,
        if use_memory {
            BufferMode::Memory
        } else {
            BufferMode::Disk
        },
    );
    engine
        .progress
        .set_status(worker_id, WorkerStatus::Downloading);
    info!("Downloading {} from {}", candidate.remote_path, candidate.peer);

    let result = transfer(engine, worker_id, candidate, &mut destination).await;

    if engine.stop.is_cancelled() {
        debug!("Abandoning {} after stop request", candidate.remote_path);
        discard(destination, &paths).await;
        return Outcome::Stopped;
    }

    let transfer = match result {
        Ok(transfer) => transfer,
        Err(fault) => {
            discard(destination, &paths).await;
            return record_fault(engine, worker_id, candidate, fault);
        }
    };

    let actual = match destination.len().await {
        Ok(len) => len,
        Err(e) => {
            discard(destination, &paths).await;
            return record_fault(engine, worker_id, candidate, TransferFault::Io(e.to_string()));
        }
    };
    if actual != candidate.size {
        discard(destination, &paths).await;
        let fault = TransferFault::SizeMismatch {
            expected: candidate.size,
            actual,
        };
        return record_fault(engine, worker_id, candidate, fault);
    }

    if let Err(e) = engine.archive.append(transfer).await {
        error!(
            "Failed to persist archive entry for {}: {}",
            candidate.remote_path, e
        );
    }

    let target = TagTarget {
        artist: &group.target_artist,
        album: group.target_album.as_deref(),
        song_names: &group.song_names,
    };
    match destination.into_bytes() {
        Some(bytes) => {
            commit_from_memory(engine, worker_id, candidate, &target, &parts.basename, &paths, bytes)
                .await
        }
        None => {
            commit_from_disk(engine, worker_id, candidate, &target, &parts.basename, &paths).await
        }
    }
}

/// Runs the network transfer under the stall and hard-cap timers.
async fn transfer(
    engine: &Arc<Engine>,
    worker_id: usize,
    candidate: &SearchResult,
    destination: &mut Destination,
) -> Result<Transfer, TransferFault> {
    let timings = &engine.options.timings;
    let cancel = engine.stop.child_token();
    let (percent_tx, mut percent_rx) = watch::channel(0u8);

    let progress: ProgressFn = {
        let engine = engine.clone();
        Arc::new(move |update: TransferProgress| {
            let percent = update.percent_complete().round() as u8;
            engine
                .progress
                .record_progress(worker_id, percent, update.average_speed);
            percent_tx.send_if_modified(|current| {
                if *current == percent {
                    return false;
                }
                *current = percent;
                true
            });
        })
    };

    let request = TransferRequest::from(candidate);
    let download = engine
        .network
        .download(&request, destination, cancel.clone(), progress);
    tokio::pin!(download);
    let hard_deadline = tokio::time::sleep(timings.hard_timeout);
    tokio::pin!(hard_deadline);

    let mut stall_deadline = Instant::now() + timings.stall_timeout;
    let mut watching = true;

    let fault = loop {
        tokio::select! {
            result = &mut download => return result.map_err(TransferFault::Network),
            changed = percent_rx.changed(), if watching => {
                match changed {
                    Ok(()) => stall_deadline = Instant::now() + timings.stall_timeout,
                    Err(_) => watching = false,
                }
            }
            _ = tokio::time::sleep_until(stall_deadline) => {
                break TransferFault::Stalled(timings.stall_timeout);
            }
            _ = &mut hard_deadline => break TransferFault::TimedOut(timings.hard_timeout),
            _ = engine.stop.cancelled() => break TransferFault::Cancelled,
        }
    };

    cancel.cancel();
    if tokio::time::timeout(timings.cancel_grace, &mut download)
        .await
        .is_err()
    {
        debug!(
            "Transfer of {} did not wind down within {:?}",
            candidate.remote_path, timings.cancel_grace
        );
    }
    Err(fault)
}

/// The four duplicate checks, cheapest first.
async fn is_duplicate(
    engine: &Engine,
    candidate: &SearchResult,
    basename: &str,
    target: &Path,
) -> bool {
    if engine.archive.contains(&candidate.transfer()) || engine.ignore.contains(basename) {
        return true;
    }
    if let Ok(metadata) = tokio::fs::metadata(target).await {
        if metadata.is_file() && metadata.len() == candidate.size {
            return true;
        }
    }
    match file_stem(Path::new(basename)) {
        Some(stem) => engine.listing.fuzzy_contains(&stem).await,
        None => false,
    }
}

/// Writes the buffered bytes to the final path, then validates them.
///
/// A buffered file that fails validation stays where it was written; only disk
/// transfers are ever removed on a mismatch.
async fn commit_from_memory(
    engine: &Arc<Engine>,
    worker_id: usize,
    candidate: &SearchResult,
    target: &TagTarget<'_>,
    basename: &str,
    paths: &CandidatePaths,
    bytes: Bytes,
) -> Outcome {
    if let Err(e) = tokio::fs::write(&paths.target, &bytes).await {
        remove_if_present(&paths.target).await;
        return record_fault(engine, worker_id, candidate, TransferFault::Io(e.to_string()));
    }

    let policy = engine.options.tags;
    let verdict = if needs_tags(engine) {
        engine
            .progress
            .set_status(worker_id, WorkerStatus::Validating);
        let tags = read_buffered_tags(bytes).await;
        tags::validate(target, &tags, &policy)
    } else {
        Default::default()
    };

    if !verdict.accepted(&policy) {
        return reject(engine, worker_id, candidate);
    }
    if !engine.ignore.claim(basename) {
        remove_if_present(&paths.target).await;
        return skip_duplicate(engine, worker_id, candidate);
    }
    if verdict.rewrite_album {
        update_album(target, &paths.target).await;
    }
    accept(engine, worker_id, candidate, &paths.target)
}

/// Moves the `.bak` file into place, then validates it.
async fn commit_from_disk(
    engine: &Arc<Engine>,
    worker_id: usize,
    candidate: &SearchResult,
    target: &TagTarget<'_>,
    basename: &str,
    paths: &CandidatePaths,
) -> Outcome {
    if let Err(e) = tokio::fs::rename(&paths.temp, &paths.target).await {
        remove_if_present(&paths.temp).await;
        return record_fault(engine, worker_id, candidate, TransferFault::Io(e.to_string()));
    }

    let policy = engine.options.tags;
    let verdict = if needs_tags(engine) {
        engine
            .progress
            .set_status(worker_id, WorkerStatus::Validating);
        let tags = read_file_tags(&paths.target).await;
        tags::validate(target, &tags, &policy)
    } else {
        Default::default()
    };

    if !verdict.accepted(&policy) {
        if policy.delete_on_mismatch {
            remove_if_present(&paths.target).await;
        }
        return reject(engine, worker_id, candidate);
    }
    if !engine.ignore.claim(basename) {
        remove_if_present(&paths.target).await;
        return skip_duplicate(engine, worker_id, candidate);
    }
    if verdict.rewrite_album {
        update_album(target, &paths.target).await;
    }
    accept(engine, worker_id, candidate, &paths.target)
}

fn needs_tags(engine: &Engine) -> bool {
    engine.options.tags.check_tags || engine.options.tags.update_album_name
}

async fn read_buffered_tags(bytes: Bytes) -> TrackTags {
    tokio::task::spawn_blocking(move || tags::read_tags_from_bytes(bytes))
        .await
        .ok()
        .flatten()
        .unwrap_or_default()
}

async fn read_file_tags(path: &Path) -> TrackTags {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || tags::read_tags_from_path(&path))
        .await
        .ok()
        .flatten()
        .unwrap_or_default()
}

async fn update_album(target: &TagTarget<'_>, path: &Path) {
    let Some(album) = target.album.map(str::to_string) else {
        return;
    };
    let path = path.to_path_buf();
    let display = path.display().to_string();
    match tokio::task::spawn_blocking(move || tags::rewrite_album(&path, &album)).await {
        Ok(Ok(())) => debug!("Updated album tag of {}", display),
        Ok(Err(e)) => warn!("Could not update album tag of {}: {}", display, e),
        Err(e) => warn!("Album update of {} failed: {}", display, e),
    }
}

fn accept(engine: &Engine, worker_id: usize, candidate: &SearchResult, path: &Path) -> Outcome {
    engine.listing.insert(path);
    engine.counters.downloaded.fetch_add(1, Ordering::Relaxed);
    engine.progress.set_status(worker_id, WorkerStatus::Accepted);
    info!("Downloaded {} from {}", candidate.remote_path, candidate.peer);
    Outcome::Accepted
}

fn reject(engine: &Engine, worker_id: usize, candidate: &SearchResult) -> Outcome {
    engine.counters.mismatched_tags.fetch_add(1, Ordering::Relaxed);
    engine.progress.set_status(worker_id, WorkerStatus::TagMismatch);
    warn!(
        "Tags of {} from {} do not match the search",
        candidate.remote_path, candidate.peer
    );
    Outcome::Rejected
}

fn skip_duplicate(engine: &Engine, worker_id: usize, candidate: &SearchResult) -> Outcome {
    engine
        .counters
        .skipped_duplicate
        .fetch_add(1, Ordering::Relaxed);
    engine
        .progress
        .set_status(worker_id, WorkerStatus::SkippedDuplicate);
    debug!("Already downloaded: {}", candidate.remote_path);
    Outcome::Skipped
}

fn record_fault(
    engine: &Engine,
    worker_id: usize,
    candidate: &SearchResult,
    fault: TransferFault,
) -> Outcome {
    warn!(
        "Failed to download {} from {}: {}",
        candidate.remote_path, candidate.peer, fault
    );
    engine.tallies.record_fault(&candidate.peer, &fault);
    engine
        .progress
        .set_status(worker_id, WorkerStatus::Faulted(fault.to_string()));
    Outcome::Faulted
}

/// Drops a failed transfer's buffer, removing the `.bak` file of a disk transfer.
async fn discard(destination: Destination, paths: &CandidatePaths) {
    let on_disk = !destination.is_memory();
    drop(destination);
    if on_disk {
        remove_if_present(&paths.temp).await;
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
