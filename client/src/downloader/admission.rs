//! Backpressure before a transfer starts: free disk space on the download volume.
//!
//! Worker slots are the other gate; they are the engine's semaphore, taken in
//! [`Downloader::enqueue`](super::Downloader::enqueue).

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;

/// Reports the free bytes available on the volume holding a path.
pub type FreeSpaceFn = Arc<dyn Fn(&Path) -> io::Result<u64> + Send + Sync>;

/// Reads the free space of the real volume.
pub fn volume_free_space() -> FreeSpaceFn {
    Arc::new(|path: &Path| fs2::available_space(path))
}

pub struct DiskGate {
    free_space: FreeSpaceFn,
    min_free_bytes: u64,
    poll: Duration,
}

impl DiskGate {
    pub fn new(free_space: FreeSpaceFn, min_free_bytes: u64, poll: Duration) -> Self {
        Self {
            free_space,
            min_free_bytes,
            poll,
        }
    }

    /// True when more than the safety margin is free. A failed space check counts as no space.
    pub fn has_space(&self, path: &Path) -> bool {
        match (self.free_space)(path) {
            Ok(available) => available > self.min_free_bytes,
            Err(e) => {
                warn!("Could not read free space of {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Blocks until there is enough free space under `path`.
    ///
    /// `on_wait` runs once each time the check fails. Returns false when `stop` fires first.
    pub async fn wait_for_space(
        &self,
        path: &Path,
        stop: &CancellationToken,
        mut on_wait: impl FnMut(),
    ) -> bool {
        loop {
            if stop.is_cancelled() {
                return false;
            }
            if self.has_space(path) {
                return true;
            }
            on_wait();
            tokio::select! {
                _ = tokio::time::sleep(self.poll) => {}
                _ = stop.cancelled() => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn free_space_from(free: Arc<AtomicU64>) -> FreeSpaceFn {
        Arc::new(move |_: &Path| Ok(free.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_blocks_until_space_recovers() {
        let free = Arc::new(AtomicU64::new(10));
        let gate = DiskGate::new(free_space_from(free.clone()), 100, Duration::from_millis(5));
        let stop = CancellationToken::new();
        let waits = AtomicUsize::new(0);

        let recover = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            free.store(1000, Ordering::SeqCst);
        };
        let wait = gate.wait_for_space(Path::new("."), &stop, || {
            waits.fetch_add(1, Ordering::SeqCst);
        });
        let (_, admitted) = tokio::join!(recover, wait);

        assert!(admitted);
        assert!(waits.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_stop_releases_waiter() {
        let gate = DiskGate::new(
            free_space_from(Arc::new(AtomicU64::new(0))),
            100,
            Duration::from_secs(60),
        );
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stopper.cancel();
        });
        assert!(!gate.wait_for_space(Path::new("."), &stop, || {}).await);
    }

    #[test]
    fn test_free_space_error_means_no_space() {
        let free_space: FreeSpaceFn = Arc::new(|_: &Path| Err(io::Error::other("gone")));
        let gate = DiskGate::new(free_space, 0, Duration::from_secs(1));
        assert!(!gate.has_space(Path::new(".")));
    }

    #[test]
    fn test_volume_free_space_reads_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(volume_free_space()(dir.path()).is_ok());
    }
}
