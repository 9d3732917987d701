use std::path::PathBuf;
use std::time::Duration;

use crate::tags::TagPolicy;

/// Faults after which a peer's candidates are skipped for the rest of the run.
pub const PEER_FAULT_LIMIT: usize = 10;

/// Free space the download volume must keep, in megabytes.
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 20_000;

/// Poll intervals and time limits used by the engine.
#[derive(Debug, Clone)]
pub struct EngineTimings {
    /// How often a blocked disk-space gate re-checks free space.
    pub disk_poll: Duration,
    /// How often a worker waiting on a peer lock refreshes its status.
    pub peer_poll: Duration,
    /// A transfer whose percentage does not move for this long is cancelled.
    pub stall_timeout: Duration,
    /// A transfer running longer than this is cancelled regardless of progress.
    pub hard_timeout: Duration,
    /// Poll interval of [`Downloader::wait_until_idle`](super::Downloader::wait_until_idle).
    pub idle_poll: Duration,
    pub report_interval: Duration,
    /// How long a cancelled transfer gets to wind down before the worker moves on.
    pub cancel_grace: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            disk_poll: Duration::from_secs(5),
            peer_poll: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(5 * 60),
            idle_poll: Duration::from_millis(100),
            report_interval: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(1),
        }
    }
}

/// Everything the engine needs to know, already resolved from the command line.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Root of the download tree. `None` means `./downloads`.
    pub download_dir: Option<PathBuf>,
    /// Maximum number of live workers.
    pub thread_count: usize,
    /// Archive file shared across runs. `None` keeps the archive in memory only.
    pub archive_path: Option<PathBuf>,
    /// Buffer small transfers in memory instead of a `.bak` file.
    pub in_memory: bool,
    /// Transfers smaller than this many bytes are buffered in memory.
    pub in_memory_max_bytes: u64,
    pub min_free_space_mb: u64,
    pub tags: TagPolicy,
    pub timings: EngineTimings,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            download_dir: None,
            thread_count: 10,
            archive_path: None,
            in_memory: false,
            in_memory_max_bytes: 50 * 1024 * 1024,
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
            tags: TagPolicy::default(),
            timings: EngineTimings::default(),
        }
    }
}

impl EngineOptions {
    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }
}
