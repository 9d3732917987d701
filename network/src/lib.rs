//! Boundary to the peer-to-peer network.
//!
//! The engine only talks to the network through [`PeerNetwork`]: connect, search and
//! download. Bytes land in a [`Destination`] chosen by the caller, and progress is
//! reported through a callback.

use std::sync::Arc;

use async_trait::async_trait;
use seek_core::{SearchResult, Transfer};
use tokio_util::sync::CancellationToken;

pub mod destination;
pub mod local;
pub mod ranking;

pub use destination::Destination;
pub use local::LocalShareNetwork;
pub use ranking::{MEDIA_FILE_EXTENSIONS, RankTarget, SearchFilters, rank_candidates};

/// Login details for the network.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub listen_port: u16,
}

/// One file inside a peer's search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub path: String,
    pub size: u64,
}

/// All matching files one peer returned for a search.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub peer: String,
    pub has_free_upload_slot: bool,
    pub upload_speed: u32,
    pub files: Vec<SharedFile>,
}

/// Identifies the file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub peer: String,
    pub remote_path: String,
    /// Declared size in bytes.
    pub size: u64,
}

impl From<&SearchResult> for TransferRequest {
    fn from(result: &SearchResult) -> Self {
        Self {
            peer: result.peer.clone(),
            remote_path: result.remote_path.clone(),
            size: result.size,
        }
    }
}

/// A progress report for an ongoing transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub size: u64,
    /// Average speed since the transfer started, in bytes per second.
    pub average_speed: f64,
}

impl TransferProgress {
    pub fn percent_complete(&self) -> f64 {
        if self.size == 0 {
            return 100.0;
        }
        (self.bytes_transferred as f64 / self.size as f64 * 100.0).min(100.0)
    }
}

/// Callback invoked by the network for every progress update.
pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Connects and logs in. Calling it again on a connected client is harmless.
    async fn connect(&self, credentials: &Credentials) -> Result<(), String>;

    /// Runs a free-text search and returns the raw, unranked responses.
    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>, String>;

    /// Downloads one file into `destination`.
    ///
    /// Implementations must stop promptly once `cancel` fires and return an error.
    async fn download(
        &self,
        request: &TransferRequest,
        destination: &mut Destination,
        cancel: CancellationToken,
        progress: ProgressFn,
    ) -> Result<Transfer, String>;
}
