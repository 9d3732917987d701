//! Core library for the Seek downloader.
//!
//! This library provides the data structures shared by the network boundary and the
//! download engine (search groups, candidate files, archived transfers), the fuzzy
//! string matching used to compare file names and tags, search-term parsing, and
//! track-name extraction from file names.

pub mod fuzzy;
pub mod search_term;
pub mod track_name;

pub use search_term::{SearchTerm, SearchTermKind, group_search_terms, parse_search_lines};
pub use track_name::track_name;

/// One remote file offered by one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// The peer (remote user) offering the file.
    pub peer: String,
    /// The full remote path as reported by the peer, `\` or `/` separated.
    pub remote_path: String,
    /// The declared size of the file in bytes.
    pub size: u64,
    /// Whether the peer currently has a free upload slot.
    pub has_free_upload_slot: bool,
    /// The upload speed advertised by the peer, in bytes per second.
    pub upload_speed: u32,
}

/// The pieces of a remote path the engine needs to place a file locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePathParts {
    /// The immediate parent folder of the file.
    pub folder: String,
    /// The file name, including its extension.
    pub basename: String,
}

impl SearchResult {
    /// Returns the last path component of the remote path.
    pub fn basename(&self) -> Option<&str> {
        self.remote_path
            .split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .last()
    }

    /// Splits the remote path into parent folder and basename.
    ///
    /// Returns `None` when the path does not have at least two components.
    pub fn path_parts(&self) -> Option<RemotePathParts> {
        let parts: Vec<&str> = self
            .remote_path
            .split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .collect();
        if parts.len() < 2 {
            return None;
        }
        Some(RemotePathParts {
            folder: parts[parts.len() - 2].to_string(),
            basename: parts[parts.len() - 1].to_string(),
        })
    }

    /// The archive entry this candidate would produce once committed.
    pub fn transfer(&self) -> Transfer {
        Transfer {
            peer: self.peer.clone(),
            size: self.size,
            remote_path: self.remote_path.clone(),
        }
    }
}

/// A unit of work: target metadata plus a ranked list of candidate files.
#[derive(Debug, Clone, Default)]
pub struct SearchGroup {
    /// The artist the files should belong to.
    pub target_artist: String,
    /// The album the files should belong to, if any.
    pub target_album: Option<String>,
    /// The song names wanted from this group. Empty means any track.
    pub song_names: Vec<String>,
    /// Candidates in rank order, best first.
    pub candidates: Vec<SearchResult>,
    /// Stop after the first accepted file instead of trying every candidate.
    pub singles: bool,
}

/// A completed transfer, as recorded in the download archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transfer {
    pub peer: String,
    pub size: u64,
    pub remote_path: String,
}

impl Transfer {
    /// Formats the transfer as one archive line: `peer,size,remotePath`.
    pub fn archive_line(&self) -> String {
        format!("{},{},{}", self.peer, self.size, self.remote_path)
    }

    /// Parses one archive line. The remote path may itself contain commas.
    pub fn parse_archive_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(3, ',');
        let peer = parts.next()?;
        let size = parts.next()?.trim().parse().ok()?;
        let remote_path = parts.next()?;
        if peer.is_empty() || remote_path.is_empty() {
            return None;
        }
        Some(Self {
            peer: peer.to_string(),
            size,
            remote_path: remote_path.to_string(),
        })
    }
}
