mod admission;
mod config;
mod init;
mod peer_locks;
mod state;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, warn};
use seek_core::{SearchGroup, Transfer};
use seek_network::PeerNetwork;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

pub use admission::{DiskGate, FreeSpaceFn, volume_free_space};
pub use config::{DEFAULT_MIN_FREE_SPACE_MB, EngineOptions, EngineTimings, PEER_FAULT_LIMIT};
pub use peer_locks::{PeerLockGuard, PeerLocks};
pub use state::{
    BufferMode, CounterSnapshot, Counters, Engine, FaultTally, ProgressRecord, ProgressRegistry,
    TransferFault, WorkerStatus,
};

/// Returned by [`Downloader::enqueue`] once a stop has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequested;

impl fmt::Display for StopRequested {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Download engine is stopping")
    }
}

impl std::error::Error for StopRequested {}

/// The download orchestrator.
///
/// Groups are queued with [`Downloader::enqueue`] and each one is handed to its own
/// worker task, with at most `thread_count` workers alive at once. Cloning is cheap and
/// every clone drives the same engine.
#[derive(Clone)]
pub struct Downloader {
    engine: Arc<Engine>,
}

impl Downloader {
    /// Builds an engine that downloads through `network`.
    ///
    /// # Arguments
    ///
    /// * `network` - The peer network used for every transfer.
    /// * `options` - Worker count, buffering, tag policy and timings.
    ///
    /// # Returns
    ///
    /// * `Result<Downloader, ...>` - The engine, or an error if the download root or the
    ///   archive cannot be opened.
    pub async fn new(
        network: Arc<dyn PeerNetwork>,
        options: EngineOptions,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::with_free_space(network, options, volume_free_space()).await
    }

    /// Like [`Downloader::new`], reading free disk space through `free_space`.
    ///
    /// # Arguments
    ///
    /// * `free_space` - Returns the free bytes of the volume holding a path.
    pub async fn with_free_space(
        network: Arc<dyn PeerNetwork>,
        options: EngineOptions,
        free_space: FreeSpaceFn,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let engine = init::build_engine(network, options, free_space).await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Queues `group` and hands it to a worker.
    ///
    /// Waits while every worker slot is taken. Groups start in the order they were
    /// queued.
    ///
    /// # Arguments
    ///
    /// * `group` - The target metadata and the ranked candidates to try.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - A worker has been started for a queued group.
    /// * `Err(StopRequested)` - A stop was requested before or while waiting for a slot.
    pub async fn enqueue(&self, group: SearchGroup) -> Result<(), StopRequested> {
        if self.engine.stop.is_cancelled() {
            return Err(StopRequested);
        }
        self.engine.queue.lock().await.push_back(group);

        let permit = tokio::select! {
            biased;
            _ = self.engine.stop.cancelled() => None,
            permit = self.engine.slots.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            return Err(StopRequested);
        };

        let next = self.engine.queue.lock().await.pop_front();
        if let Some(group) = next {
            spawn_worker(self.engine.clone(), permit, group);
        }
        Ok(())
    }

    /// Groups waiting for a worker slot.
    pub async fn queue_depth(&self) -> usize {
        self.engine.queue.lock().await.len()
    }

    pub fn any_worker_active(&self) -> bool {
        self.active_workers() > 0
    }

    pub fn active_workers(&self) -> usize {
        self.engine.active_workers.load(Ordering::SeqCst)
    }

    /// Asks every worker to abandon its current candidate and exit.
    pub fn request_stop(&self) {
        if !self.engine.stop.is_cancelled() {
            debug!("Stop requested");
        }
        self.engine.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.engine.stop.is_cancelled()
    }

    /// A token that fires when a stop is requested.
    pub fn stop_token(&self) -> CancellationToken {
        self.engine.stop.clone()
    }

    /// Waits until the queue is empty and no worker is alive, or a stop is requested.
    ///
    /// Checks every `idle_poll` of the engine timings. A stop returns at once, without
    /// waiting for workers to wind down.
    pub async fn wait_until_idle(&self) {
        let poll = self.engine.options.timings.idle_poll;
        loop {
            if self.engine.stop.is_cancelled() {
                return;
            }
            if self.queue_depth().await == 0 && !self.any_worker_active() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.engine.stop.cancelled() => return,
            }
        }
    }

    /// A copy of the run counters taken now.
    pub fn counters(&self) -> CounterSnapshot {
        self.engine.counters.snapshot()
    }

    pub fn progress(&self) -> Vec<ProgressRecord> {
        self.engine.progress.snapshot()
    }

    /// The most frequent error messages of the run.
    ///
    /// # Arguments
    ///
    /// * `limit` - How many messages to return at most.
    ///
    /// # Returns
    ///
    /// * `Vec<(String, usize)>` - Message and count pairs, most frequent first. Equal
    ///   counts are ordered by message.
    pub fn top_errors(&self, limit: usize) -> Vec<(String, usize)> {
        self.engine.tallies.top_errors(limit)
    }

    /// Transfer faults counted against `peer`. Local I/O failures are not included.
    pub fn peer_faults(&self, peer: &str) -> usize {
        self.engine.tallies.peer_faults(peer)
    }

    /// Records an error that happened outside a worker, such as a failed search.
    pub fn record_error(&self, message: &str) {
        self.engine.tallies.record_error(message);
    }

    pub fn is_archived(&self, transfer: &Transfer) -> bool {
        self.engine.archive.contains(transfer)
    }

    /// True when the download tree already has a file named like the one at `remote_path`.
    ///
    /// Only answers once the listing has been built, see [`Downloader::warm_listing`].
    ///
    /// # Arguments
    ///
    /// * `remote_path` - A peer's path, with either `\\` or `/` separators.
    pub fn in_download_tree(&self, remote_path: &str) -> bool {
        let basename = remote_path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(remote_path);
        crate::storage::dedup::file_stem(std::path::Path::new(basename))
            .is_some_and(|stem| self.engine.listing.fuzzy_contains_loaded(&stem))
    }

    /// Builds the listing of the download tree now, returning the number of files found.
    pub async fn warm_listing(&self) -> usize {
        self.engine.listing.warm().await
    }

    pub async fn set_current_search(&self, label: &str) {
        *self.engine.current_search.lock().await = label.to_string();
    }

    pub async fn current_search(&self) -> String {
        self.engine.current_search.lock().await.clone()
    }

    pub fn add_total_terms(&self, count: usize) {
        self.engine
            .counters
            .total_terms
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_seeked(&self, count: usize) {
        self.engine.counters.seeked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self, count: usize) {
        self.engine
            .counters
            .succeeded
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Counts files skipped before they ever reached a worker, such as tracks
    /// already in the music library.
    pub fn add_skipped_duplicate(&self, count: usize) {
        self.engine
            .counters
            .skipped_duplicate
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn options(&self) -> &EngineOptions {
        &self.engine.options
    }

    pub fn network(&self) -> Arc<dyn PeerNetwork> {
        self.engine.network.clone()
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

/// Runs one group on its own task, holding `permit` until the worker is gone.
///
/// The worker itself runs on an inner task. A panic in it is tallied here and the
/// slot is freed all the same.
fn spawn_worker(engine: Arc<Engine>, permit: OwnedSemaphorePermit, group: SearchGroup) {
    let worker_id = engine.next_worker_id.fetch_add(1, Ordering::SeqCst);
    engine.active_workers.fetch_add(1, Ordering::SeqCst);
    engine.progress.register(worker_id, group.candidates.len());

    tokio::spawn(async move {
        let _permit = permit;
        let inner = tokio::spawn(worker::run(engine.clone(), worker_id, group));
        if let Err(e) = inner.await {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "Worker cancelled".to_string()
            };
            warn!("Worker {} failed: {}", worker_id, message);
            engine.tallies.record_error(&message);
        }
        engine.progress.remove(worker_id);
        engine.active_workers.fetch_sub(1, Ordering::SeqCst);
    });
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Worker panicked: {}", message)
    } else {
        "Worker panicked".to_string()
    }
}
