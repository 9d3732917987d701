//! A `PeerNetwork` backed by a local directory of peer shares.
//!
//! Every sub-directory of the root is one peer, and every file below it is shared by
//! that peer. Remote paths use `\` separators like most peer-to-peer clients report them.
//! This lets the engine be run end to end without a live network.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use seek_core::Transfer;
use seek_core::fuzzy::full_process;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{
    Credentials, Destination, PeerNetwork, ProgressFn, SearchResponse, SharedFile,
    TransferProgress, TransferRequest,
};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Serves files from `root/<peer>/...`.
#[derive(Debug, Clone)]
pub struct LocalShareNetwork {
    root: PathBuf,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    upload_speed: u32,
}

impl LocalShareNetwork {
    /// Creates a network serving the peer shares below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
            upload_speed: 1_000_000,
        }
    }

    /// Sleeps `delay` after every chunk, to make transfers observable.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Uses chunks of `size` bytes. Zero is treated as one.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Maps a peer and remote path onto the local file, refusing paths that escape the share.
    fn resolve(&self, peer: &str, remote_path: &str) -> Option<PathBuf> {
        if !is_plain_component(peer) {
            return None;
        }
        let mut path = self.root.join(peer);
        for part in remote_path.split(['\\', '/']).filter(|p| !p.is_empty()) {
            if !is_plain_component(part) {
                return None;
            }
            path.push(part);
        }
        Some(path)
    }

    fn scan(root: &Path, words: &[String], upload_speed: u32) -> Vec<SearchResponse> {
        let mut responses = Vec::new();
        let peers = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => return responses,
        };

        let mut peer_dirs: Vec<PathBuf> = peers
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        peer_dirs.sort();

        for peer_dir in peer_dirs {
            let peer = match peer_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            let mut files = Vec::new();
            for entry in WalkDir::new(&peer_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let relative = match entry.path().strip_prefix(&peer_dir) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                let remote_path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("\\");
                let haystack = full_process(&remote_path);
                if !words.iter().all(|word| haystack.contains(word.as_str())) {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                files.push(SharedFile {
                    path: remote_path,
                    size,
                });
            }

            if !files.is_empty() {
                responses.push(SearchResponse {
                    peer,
                    has_free_upload_slot: true,
                    upload_speed,
                    files,
                });
            }
        }
        responses
    }
}

fn is_plain_component(part: &str) -> bool {
    let mut components = Path::new(part).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl PeerNetwork for LocalShareNetwork {
    async fn connect(&self, _credentials: &Credentials) -> Result<(), String> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(format!("Share root {} is not a directory", self.root.display())),
            Err(e) => Err(format!("Share root {} unavailable: {}", self.root.display(), e)),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>, String> {
        let words: Vec<String> = full_process(query)
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let upload_speed = self.upload_speed;
        let responses =
            tokio::task::spawn_blocking(move || Self::scan(&root, &words, upload_speed))
                .await
                .map_err(|e| format!("Search task failed: {}", e))?;
        debug!("Search '{}' returned {} peer responses", query, responses.len());
        Ok(responses)
    }

    async fn download(
        &self,
        request: &TransferRequest,
        destination: &mut Destination,
        cancel: CancellationToken,
        progress: ProgressFn,
    ) -> Result<Transfer, String> {
        let path = self
            .resolve(&request.peer, &request.remote_path)
            .ok_or_else(|| format!("Invalid remote path: {}", request.remote_path))?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| format!("File not shared: {}", e))?;

        let started = Instant::now();
        let mut buf = vec![0u8; self.chunk_size];
        let mut transferred: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err("Transfer cancelled".to_string());
            }
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| format!("Read error: {}", e))?;
            if n == 0 {
                break;
            }
            destination
                .write_chunk(&buf[..n])
                .await
                .map_err(|e| format!("Write error: {}", e))?;
            transferred += n as u64;

            let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
            progress(TransferProgress {
                bytes_transferred: transferred,
                size: request.size,
                average_speed: transferred as f64 / elapsed,
            });

            if let Some(delay) = self.chunk_delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err("Transfer cancelled".to_string()),
                }
            }
        }

        destination
            .flush()
            .await
            .map_err(|e| format!("Flush error: {}", e))?;

        Ok(Transfer {
            peer: request.peer.clone(),
            size: request.size,
            remote_path: request.remote_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn share(root: &Path, peer: &str, rel: &str, content: &[u8]) {
        let path = root.join(peer).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_connect() {
        let dir = tempdir().unwrap();
        let network = LocalShareNetwork::new(dir.path());
        assert!(network.connect(&Credentials::default()).await.is_ok());

        let missing = LocalShareNetwork::new(dir.path().join("nope"));
        assert!(missing.connect(&Credentials::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_search_matches_all_words() {
        let dir = tempdir().unwrap();
        share(dir.path(), "alice", "Artist X/Album Y/01 - Track 1.flac", b"1234");
        share(dir.path(), "alice", "Artist Z/Other/01 - Song.flac", b"12");
        share(dir.path(), "bob", "music/Artist X - Album Y/02 - Track 2.mp3", b"123456");

        let network = LocalShareNetwork::new(dir.path());
        let responses = network.search("Artist X - Album Y").await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].peer, "alice");
        assert_eq!(responses[0].files.len(), 1);
        assert_eq!(responses[0].files[0].path, "Artist X\\Album Y\\01 - Track 1.flac");
        assert_eq!(responses[0].files[0].size, 4);
        assert_eq!(responses[1].peer, "bob");
    }

    #[tokio::test]
    async fn test_download_reports_progress() {
        let dir = tempdir().unwrap();
        share(dir.path(), "alice", "Album/song.mp3", &[7u8; 10]);

        let network = LocalShareNetwork::new(dir.path()).with_chunk_size(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let progress: ProgressFn = Arc::new(move |_p| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let request = TransferRequest {
            peer: "alice".to_string(),
            remote_path: "Album\\song.mp3".to_string(),
            size: 10,
        };
        let mut dest = Destination::memory(10);
        let transfer = network
            .download(&request, &mut dest, CancellationToken::new(), progress)
            .await
            .unwrap();

        assert_eq!(transfer.size, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dest.into_bytes().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_download_cancelled() {
        let dir = tempdir().unwrap();
        share(dir.path(), "alice", "Album/song.mp3", &[7u8; 10]);

        let network = LocalShareNetwork::new(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = TransferRequest {
            peer: "alice".to_string(),
            remote_path: "Album\\song.mp3".to_string(),
            size: 10,
        };
        let mut dest = Destination::memory(10);
        let result = network
            .download(&request, &mut dest, cancel, Arc::new(|_: TransferProgress| {}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_download_rejects_escaping_path() {
        let dir = tempdir().unwrap();
        let network = LocalShareNetwork::new(dir.path());
        let request = TransferRequest {
            peer: "alice".to_string(),
            remote_path: "..\\..\\etc\\passwd".to_string(),
            size: 10,
        };
        let mut dest = Destination::memory(10);
        let result = network
            .download(&request, &mut dest, CancellationToken::new(), Arc::new(|_: TransferProgress| {}))
            .await;
        assert!(result.unwrap_err().contains("Invalid remote path"));
    }
}
