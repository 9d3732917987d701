use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Held while transferring from a peer. Dropping it releases the peer.
pub type PeerLockGuard = OwnedMutexGuard<()>;

/// One lock per peer, created on first use and kept for the whole run.
#[derive(Default)]
pub struct PeerLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PeerLocks {
    fn lock_for(&self, peer: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Waits for exclusive access to `peer`.
    ///
    /// `on_wait` is called every `poll` while the lock is held elsewhere, with the time
    /// waited so far. Returns `None` if `stop` fires first.
    pub async fn acquire(
        &self,
        peer: &str,
        stop: &CancellationToken,
        poll: Duration,
        mut on_wait: impl FnMut(Duration),
    ) -> Option<PeerLockGuard> {
        let lock = self.lock_for(peer);
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return Some(guard);
        }

        let started = Instant::now();
        let acquire = lock.lock_owned();
        tokio::pin!(acquire);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                guard = &mut acquire => return Some(guard),
                _ = ticker.tick() => on_wait(started.elapsed()),
            }
        }
    }

    /// Number of peers seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_first_touch_shares_one_lock() {
        let locks = Arc::new(PeerLocks::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move { locks.lock_for("alice") }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        assert!(seen.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_second_holder_waits_and_reports() {
        let locks = PeerLocks::default();
        let stop = CancellationToken::new();
        let first = locks
            .acquire("alice", &stop, Duration::from_millis(10), |_| {})
            .await
            .unwrap();

        let mut waits = 0;
        let release = async {
            tokio::time::sleep(Duration::from_millis(45)).await;
            drop(first);
        };
        let second = locks.acquire("alice", &stop, Duration::from_millis(10), |_| waits += 1);
        let (_, second) = tokio::join!(release, second);

        assert!(second.is_some());
        assert!(waits >= 2);
    }

    #[tokio::test]
    async fn test_other_peers_do_not_block() {
        let locks = PeerLocks::default();
        let stop = CancellationToken::new();
        let _alice = locks
            .acquire("alice", &stop, Duration::from_millis(10), |_| {})
            .await
            .unwrap();
        let bob = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("bob", &stop, Duration::from_millis(10), |_| {}),
        )
        .await;
        assert!(matches!(bob, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_stop_abandons_wait() {
        let locks = PeerLocks::default();
        let stop = CancellationToken::new();
        let _held = locks
            .acquire("alice", &stop, Duration::from_millis(10), |_| {})
            .await
            .unwrap();

        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let waited = locks
            .acquire("alice", &stop, Duration::from_millis(10), |_| {})
            .await;
        assert!(waited.is_none());
    }
}
