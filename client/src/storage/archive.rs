//! The download archive: every `(peer, size, path)` committed by this or an earlier run.

use std::io;
use std::path::PathBuf;

use dashmap::DashSet;
use log::{debug, warn};
use seek_core::Transfer;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct ArchiveStore {
    entries: DashSet<Transfer>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl ArchiveStore {
    /// An archive that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            entries: DashSet::new(),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the archive file at `path`. A missing file is an empty archive.
    pub async fn load(path: Option<PathBuf>) -> io::Result<Self> {
        let entries = DashSet::new();
        if let Some(path) = &path {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    for line in content.lines().filter(|l| !l.trim().is_empty()) {
                        match Transfer::parse_archive_line(line) {
                            Some(entry) => {
                                entries.insert(entry);
                            }
                            None => warn!("Ignoring malformed archive line: {}", line),
                        }
                    }
                    debug!("Loaded {} archive entries from {}", entries.len(), path.display());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            entries,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn contains(&self, transfer: &Transfer) -> bool {
        self.entries.contains(transfer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `transfer`. The in-memory entry is kept even when persisting fails.
    pub async fn append(&self, transfer: Transfer) -> io::Result<()> {
        let line = format!("{}\n", transfer.archive_line());
        if !self.entries.insert(transfer) {
            return Ok(());
        }

        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
