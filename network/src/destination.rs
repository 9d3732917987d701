//! Where downloaded bytes are buffered before the engine commits them.

use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// A transfer target: either an in-memory buffer or a temporary file on disk.
pub enum Destination {
    Memory(BytesMut),
    Disk { path: PathBuf, file: File },
}

impl Destination {
    /// An in-memory buffer pre-sized for `capacity` bytes.
    pub fn memory(capacity: u64) -> Self {
        Destination::Memory(BytesMut::with_capacity(capacity as usize))
    }

    /// Creates (or truncates) the file at `path`.
    pub async fn disk(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(Destination::Disk { path, file })
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Destination::Memory(_))
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Destination::Memory(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Destination::Disk { file, .. } => file.write_all(chunk).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Destination::Memory(_) => Ok(()),
            Destination::Disk { file, .. } => file.flush().await,
        }
    }

    /// Number of bytes written so far.
    pub async fn len(&mut self) -> io::Result<u64> {
        match self {
            Destination::Memory(buf) => Ok(buf.len() as u64),
            Destination::Disk { file, .. } => {
                file.flush().await?;
                Ok(file.metadata().await?.len())
            }
        }
    }

    /// Consumes the destination, returning the buffered bytes for a memory target.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Destination::Memory(buf) => Some(buf.freeze()),
            Destination::Disk { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_destination() {
        let mut dest = Destination::memory(8);
        assert!(dest.is_memory());
        dest.write_chunk(b"abc").await.unwrap();
        dest.write_chunk(b"de").await.unwrap();
        assert_eq!(dest.len().await.unwrap(), 5);
        assert_eq!(dest.into_bytes().unwrap().as_ref(), b"abcde");
    }

    #[tokio::test]
    async fn test_disk_destination_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.mp3.bak");
        tokio::fs::write(&path, b"stale leftover content").await.unwrap();

        let mut dest = Destination::disk(&path).await.unwrap();
        assert!(!dest.is_memory());
        dest.write_chunk(b"fresh").await.unwrap();
        assert_eq!(dest.len().await.unwrap(), 5);
        assert!(dest.into_bytes().is_none());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"fresh");
    }
}
