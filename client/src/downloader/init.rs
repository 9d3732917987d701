use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use log::info;
use seek_network::PeerNetwork;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::admission::{DiskGate, FreeSpaceFn};
use super::config::EngineOptions;
use super::peer_locks::PeerLocks;
use super::state::{Counters, Engine, FaultTally, ProgressRegistry};
use crate::storage::{ArchiveStore, IgnoreSet, LibraryListing, Storage};

/// Initializes the shared engine state.
///
/// This function:
/// 1. Initializes the `Storage` for the download directory.
/// 2. Loads the download archive, if one is configured.
/// 3. Sets up the disk-space gate and the worker-slot semaphore.
///
/// The listing of the download tree is not built here; the first duplicate check does it.
pub async fn build_engine(
    network: Arc<dyn PeerNetwork>,
    options: EngineOptions,
    free_space: FreeSpaceFn,
) -> Result<Engine, Box<dyn std::error::Error + Send + Sync>> {
    let storage = match Storage::new(options.download_dir.clone()).await {
        Ok(s) => s,
        Err(e) => return Err(format!("Failed to initialize storage: {}", e).into()),
    };
    info!("Download directory: {}", storage.get_download_dir_str());

    let archive = ArchiveStore::load(options.archive_path.clone())
        .await
        .map_err(|e| format!("Failed to load download archive: {}", e))?;
    if let Some(path) = &options.archive_path {
        info!("Loaded {} archived transfers from {}", archive.len(), path.display());
    }

    let thread_count = options.thread_count.max(1);
    let disk = DiskGate::new(
        free_space,
        options.min_free_space_bytes(),
        options.timings.disk_poll,
    );
    let listing = LibraryListing::new(storage.root());

    Ok(Engine {
        network,
        storage,
        archive,
        ignore: IgnoreSet::new(),
        listing,
        peer_locks: PeerLocks::default(),
        progress: ProgressRegistry::default(),
        tallies: FaultTally::default(),
        counters: Counters::default(),
        disk,
        slots: Arc::new(Semaphore::new(thread_count)),
        queue: Mutex::new(VecDeque::new()),
        active_workers: AtomicUsize::new(0),
        next_worker_id: AtomicUsize::new(1),
        current_search: Mutex::new(String::new()),
        stop: CancellationToken::new(),
        options,
    })
}
