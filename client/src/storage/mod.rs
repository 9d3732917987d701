use std::io;
use std::path::{Path, PathBuf};

use seek_core::RemotePathParts;
use tokio::fs;

pub mod archive;
pub mod dedup;
pub mod library;

pub use archive::ArchiveStore;
pub use dedup::{IgnoreSet, LibraryListing};
pub use library::{DEFAULT_LIBRARY_MATCH, MusicLibrary};

/// Manages the download root where accepted files are stored.
///
/// Files are laid out as `<root>/<peer>/<remote parent folder>/<basename>`.
pub struct Storage {
    /// The root directory where files will be stored.
    pub download_dir: PathBuf,
}

/// The local paths used while downloading one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePaths {
    /// `<root>/<peer>/<folder>`
    pub dir: PathBuf,
    /// Disk buffer for the transfer: `<basename>.bak` inside `dir`.
    pub temp: PathBuf,
    /// Where the accepted file ends up.
    pub target: PathBuf,
}

impl Storage {
    /// Creates a new `Storage` instance.
    ///
    /// If a `path` is provided, it uses that as the download directory.
    /// If `path` is `None`, it defaults to a `downloads` directory in the current working directory.
    ///
    /// The directory is created when missing. An existing path that is not a directory is an error.
    pub async fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let download_dir = match path {
            Some(p) => p,
            None => {
                let mut p = std::env::current_dir()?;
                p.push("downloads");
                p
            }
        };

        match fs::metadata(&download_dir).await {
            Ok(metadata) => {
                if !metadata.is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "Path exists but is not a directory",
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&download_dir).await?;
            }
            Err(e) => return Err(e),
        }

        Ok(Self { download_dir })
    }

    /// Resolves where a candidate from `peer` is buffered and stored.
    ///
    /// Peer and folder names are sanitized so they always stay below the download root.
    pub fn candidate_paths(&self, peer: &str, parts: &RemotePathParts) -> CandidatePaths {
        let dir = self
            .download_dir
            .join(sanitize_component(peer))
            .join(sanitize_component(&parts.folder));
        let basename = sanitize_component(&parts.basename);
        CandidatePaths {
            temp: dir.join(format!("{}.bak", basename)),
            target: dir.join(&basename),
            dir,
        }
    }

    /// Returns the download directory path as a string.
    ///
    /// This uses `to_string_lossy()` so it may replace non-UTF8 characters.
    pub fn get_download_dir_str(&self) -> String {
        self.download_dir.to_string_lossy().to_string()
    }

    pub fn root(&self) -> &Path {
        &self.download_dir
    }
}

/// Makes a remote name safe to use as a single local path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_new_storage_default() {
        // When no path is provided, it should default to "downloads" in current dir.
        let storage = Storage::new(None).await.expect("Failed to create storage");
        assert!(storage.download_dir.ends_with("downloads"));
    }

    #[tokio::test]
    async fn test_new_storage_with_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("library");

        let storage = Storage::new(Some(path.clone()))
            .await
            .expect("Failed to create storage");
        assert_eq!(storage.get_download_dir_str(), path.to_string_lossy());
        assert!(storage.download_dir.exists());
    }

    #[tokio::test]
    async fn test_storage_creation_fails_on_file_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let file_path = temp_dir.path().join("i_am_a_file");
        fs::write(&file_path, "content").await.unwrap();

        let result = Storage::new(Some(file_path)).await;
        assert!(
            result.is_err(),
            "Should return error if path exists and is not a directory"
        );
    }

    #[tokio::test]
    async fn test_candidate_paths() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage {
            download_dir: temp_dir.path().to_path_buf(),
        };
        let parts = RemotePathParts {
            folder: "Album Y".to_string(),
            basename: "01 - Track 1.flac".to_string(),
        };

        let paths = storage.candidate_paths("alice", &parts);
        let dir = temp_dir.path().join("alice").join("Album Y");
        assert_eq!(paths.dir, dir);
        assert_eq!(paths.temp, dir.join("01 - Track 1.flac.bak"));
        assert_eq!(paths.target, dir.join("01 - Track 1.flac"));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component("  "), "_");
        assert_eq!(sanitize_component("Album (2001)"), "Album (2001)");
    }
}
