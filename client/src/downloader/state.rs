use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use seek_core::SearchGroup;
use seek_network::PeerNetwork;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::admission::DiskGate;
use super::config::EngineOptions;
use super::peer_locks::PeerLocks;
use crate::storage::{ArchiveStore, IgnoreSet, LibraryListing, Storage};

/// Everything shared between the orchestrator and its workers.
///
/// One instance lives for the whole batch. Workers get it through an `Arc` and
/// only touch the registries, each of which is safe to use concurrently.
pub struct Engine {
    /// The network collaborator all searches and transfers go through.
    pub network: Arc<dyn PeerNetwork>,
    pub options: EngineOptions,
    /// The download root.
    pub storage: Storage,
    /// Transfers committed by this and earlier runs.
    pub archive: ArchiveStore,
    /// Basenames accepted during this run.
    pub ignore: IgnoreSet,
    /// Cached listing of the download tree.
    pub listing: LibraryListing,
    pub peer_locks: PeerLocks,
    pub progress: ProgressRegistry,
    pub tallies: FaultTally,
    pub counters: Counters,
    pub disk: DiskGate,
    /// One permit per live worker.
    pub slots: Arc<Semaphore>,
    /// Groups waiting for a worker slot, in arrival order.
    pub queue: Mutex<VecDeque<SearchGroup>>,
    pub active_workers: AtomicUsize,
    pub next_worker_id: AtomicUsize,
    /// Label of the search the batch driver is running.
    pub current_search: Mutex<String>,
    /// Root stop signal. Every transfer runs under a child of it.
    pub stop: CancellationToken,
}

/// Where a transfer is being buffered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferMode {
    Memory,
    Disk,
}

impl fmt::Display for BufferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferMode::Memory => write!(f, "memory"),
            BufferMode::Disk => write!(f, "disk"),
        }
    }
}

/// What a worker is doing right now.
#[derive(Clone, PartialEq, Debug)]
pub enum WorkerStatus {
    Starting,
    WaitingForDiskSpace,
    WaitingOnPeer { peer: String, waited: Duration },
    Downloading,
    Validating,
    Accepted,
    SkippedDuplicate,
    IgnoredPeer(String),
    TagMismatch,
    Faulted(String),
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "Starting"),
            WorkerStatus::WaitingForDiskSpace => write!(f, "Waiting for free disk space"),
            WorkerStatus::WaitingOnPeer { peer, waited } => {
                write!(f, "Waiting on peer {} ({}s)", peer, waited.as_secs())
            }
            WorkerStatus::Downloading => write!(f, "Downloading"),
            WorkerStatus::Validating => write!(f, "Checking tags"),
            WorkerStatus::Accepted => write!(f, "Downloaded"),
            WorkerStatus::SkippedDuplicate => write!(f, "Already downloaded"),
            WorkerStatus::IgnoredPeer(peer) => write!(f, "Ignoring peer {}", peer),
            WorkerStatus::TagMismatch => write!(f, "Incorrect tags"),
            WorkerStatus::Faulted(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// The live state of one worker, as shown by the reporter.
#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub worker_id: usize,
    pub filename: String,
    /// Rounded percentage of the current transfer.
    pub percent: u8,
    /// Bytes per second.
    pub average_speed: f64,
    pub last_updated: Instant,
    pub status: WorkerStatus,
    pub buffer_mode: Option<BufferMode>,
    /// 1-based index of the candidate being processed.
    pub candidate_index: usize,
    pub candidate_total: usize,
}

impl ProgressRecord {
    fn new(worker_id: usize, candidate_total: usize) -> Self {
        Self {
            worker_id,
            filename: String::new(),
            percent: 0,
            average_speed: 0.0,
            last_updated: Instant::now(),
            status: WorkerStatus::Starting,
            buffer_mode: None,
            candidate_index: 0,
            candidate_total,
        }
    }
}

/// Progress records of all live workers, keyed by worker id.
#[derive(Default)]
pub struct ProgressRegistry {
    records: DashMap<usize, ProgressRecord>,
}

impl ProgressRegistry {
    pub fn register(&self, worker_id: usize, candidate_total: usize) {
        self.records
            .insert(worker_id, ProgressRecord::new(worker_id, candidate_total));
    }

    pub fn remove(&self, worker_id: usize) {
        self.records.remove(&worker_id);
    }

    /// Moves a worker on to its next candidate.
    pub fn start_candidate(&self, worker_id: usize, index: usize, filename: &str) {
        if let Some(mut record) = self.records.get_mut(&worker_id) {
            record.candidate_index = index;
            record.filename = filename.to_string();
            record.percent = 0;
            record.average_speed = 0.0;
            record.buffer_mode = None;
            record.last_updated = Instant::now();
        }
    }

    pub fn set_status(&self, worker_id: usize, status: WorkerStatus) {
        if let Some(mut record) = self.records.get_mut(&worker_id) {
            record.status = status;
            record.last_updated = Instant::now();
        }
    }

    pub fn set_buffer_mode(&self, worker_id: usize, mode: BufferMode) {
        if let Some(mut record) = self.records.get_mut(&worker_id) {
            record.buffer_mode = Some(mode);
            record.last_updated = Instant::now();
        }
    }

    /// Stores a progress report. The timestamp only moves when the percentage does.
    pub fn record_progress(&self, worker_id: usize, percent: u8, average_speed: f64) {
        if let Some(mut record) = self.records.get_mut(&worker_id) {
            record.average_speed = average_speed;
            if record.percent != percent {
                record.percent = percent;
                record.last_updated = Instant::now();
            }
        }
    }

    pub fn get(&self, worker_id: usize) -> Option<ProgressRecord> {
        self.records.get(&worker_id).map(|r| r.value().clone())
    }

    /// Copies every record, ordered by worker id.
    pub fn snapshot(&self) -> Vec<ProgressRecord> {
        let mut records: Vec<ProgressRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.worker_id);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Run-wide counters exposed to the caller.
#[derive(Default)]
pub struct Counters {
    pub total_terms: AtomicUsize,
    pub seeked: AtomicUsize,
    pub succeeded: AtomicUsize,
    pub skipped_duplicate: AtomicUsize,
    pub mismatched_tags: AtomicUsize,
    pub downloaded: AtomicUsize,
}

/// A point-in-time copy of [`Counters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total_terms: usize,
    pub seeked: usize,
    pub succeeded: usize,
    pub skipped_duplicate: usize,
    pub mismatched_tags: usize,
    pub downloaded: usize,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_terms: self.total_terms.load(Ordering::Relaxed),
            seeked: self.seeked.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped_duplicate: self.skipped_duplicate.load(Ordering::Relaxed),
            mismatched_tags: self.mismatched_tags.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
        }
    }
}

/// Why a candidate's transfer was abandoned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferFault {
    /// The network reported an error.
    Network(String),
    Cancelled,
    Stalled(Duration),
    TimedOut(Duration),
    SizeMismatch { expected: u64, actual: u64 },
    MalformedPath(String),
    Io(String),
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFault::Network(msg) => write!(f, "{}", msg),
            TransferFault::Cancelled => write!(f, "Transfer cancelled"),
            TransferFault::Stalled(after) => {
                write!(f, "Transfer stalled for {}s", after.as_secs())
            }
            TransferFault::TimedOut(after) => {
                write!(f, "Transfer exceeded {}s", after.as_secs())
            }
            // The sizes are left out so equal faults share one tally entry.
            TransferFault::SizeMismatch { .. } => write!(f, "Downloaded size does not match"),
            TransferFault::MalformedPath(path) => write!(f, "Malformed remote path: {}", path),
            TransferFault::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl TransferFault {
    /// False for failures on the local side, which say nothing about the peer.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(self, TransferFault::Io(_))
    }
}

impl std::error::Error for TransferFault {}

/// Increment-only error and per-peer fault counts.
#[derive(Default)]
pub struct FaultTally {
    errors: DashMap<String, usize>,
    peers: DashMap<String, usize>,
}

impl FaultTally {
    pub fn record_error(&self, message: &str) {
        *self.errors.entry(message.to_string()).or_insert(0) += 1;
    }

    /// Tallies `fault`, counting it against `peer` unless it happened locally.
    pub fn record_fault(&self, peer: &str, fault: &TransferFault) {
        self.record_error(&fault.to_string());
        if fault.is_peer_fault() {
            *self.peers.entry(peer.to_string()).or_insert(0) += 1;
        }
    }

    pub fn peer_faults(&self, peer: &str) -> usize {
        self.peers.get(peer).map(|count| *count).unwrap_or(0)
    }

    /// The `limit` most frequent errors, most frequent first.
    pub fn top_errors(&self, limit: usize) -> Vec<(String, usize)> {
        let mut errors: Vec<(String, usize)> = self
            .errors
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        errors.truncate(limit);
        errors
    }

    pub fn total_errors(&self) -> usize {
        self.errors.iter().map(|e| *e.value()).sum()
    }
}
