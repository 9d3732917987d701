//! Lookups against the user's own music libraries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use seek_core::fuzzy::{exact_number_match, ratio};
use seek_core::track_name;
use walkdir::WalkDir;

/// Default percentage a library track must beat to count as the same track.
pub const DEFAULT_LIBRARY_MATCH: u8 = 50;

#[derive(Debug, Clone)]
struct LibraryTrack {
    /// Lowercased track name taken from the file name.
    name: String,
    path: PathBuf,
}

/// Tracks found in local music libraries, indexed per artist.
///
/// An artist's tracks are the audio files below every library directory whose name
/// starts with the artist's name. Each artist is walked once, on first use.
pub struct MusicLibrary {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    threshold: u8,
    /// `None` marks an artist without a directory in any library.
    artists: DashMap<String, Option<Arc<Vec<LibraryTrack>>>>,
}

impl MusicLibrary {
    /// Creates a library over `roots`.
    ///
    /// # Arguments
    ///
    /// * `roots` - Library directories holding one sub-directory per artist.
    /// * `extensions` - Only files ending in one of these count. Empty allows all.
    /// * `threshold` - Ratio a track name must exceed to match.
    pub fn new(roots: Vec<PathBuf>, extensions: &[String], threshold: u8) -> Self {
        Self {
            roots,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            threshold,
            artists: DashMap::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.roots.is_empty()
    }

    /// Indexes the tracks of `artist` unless that already happened.
    ///
    /// # Returns
    ///
    /// The number of tracks known for the artist.
    pub async fn load_artist(&self, artist: &str) -> usize {
        let key = artist_key(artist);
        if key.is_empty() || !self.is_configured() {
            return 0;
        }
        if let Some(entry) = self.artists.get(&key) {
            return entry.value().as_ref().map_or(0, |tracks| tracks.len());
        }

        let roots = self.roots.clone();
        let extensions = self.extensions.clone();
        let scan_key = key.clone();
        let tracks = tokio::task::spawn_blocking(move || scan_artist(&roots, &extensions, &scan_key))
            .await
            .unwrap_or_else(|e| {
                warn!("Library scan for {} failed: {}", artist, e);
                None
            })
            .map(Arc::new);

        let count = tracks.as_ref().map_or(0, |t| t.len());
        debug!("Music library holds {} tracks of {}", count, artist);
        self.artists.entry(key).or_insert(tracks);
        count
    }

    /// True when the library already holds the track of the remote file at `remote_path`.
    ///
    /// For an artist found in the library, a file name without a recognisable track is
    /// treated as present so it is never downloaded. Artists that were never loaded or
    /// have no library directory hold nothing.
    pub fn contains_file(&self, artist: &str, remote_path: &str) -> bool {
        let Some(tracks) = self.tracks_of(&artist_key(artist)) else {
            return false;
        };
        match track_name(remote_path) {
            Some(wanted) => self.find(&tracks, &wanted).is_some(),
            None => true,
        }
    }

    /// True when the library already holds a track named like `song`.
    pub fn contains_track(&self, artist: &str, song: &str) -> bool {
        if song.trim().is_empty() {
            return false;
        }
        self.tracks_of(&artist_key(artist))
            .is_some_and(|tracks| self.find(&tracks, song).is_some())
    }

    fn tracks_of(&self, key: &str) -> Option<Arc<Vec<LibraryTrack>>> {
        self.artists.get(key).and_then(|entry| entry.value().clone())
    }

    fn find<'a>(&self, tracks: &'a [LibraryTrack], wanted: &str) -> Option<&'a LibraryTrack> {
        let wanted = wanted.to_lowercase();
        let found = tracks.iter().find(|track| {
            exact_number_match(&wanted, &track.name) && ratio(&wanted, &track.name) > self.threshold
        });
        if let Some(track) = found {
            debug!("'{}' is already in the library as {}", wanted, track.path.display());
        }
        found
    }
}

fn artist_key(artist: &str) -> String {
    artist.trim().to_lowercase()
}

fn scan_artist(roots: &[PathBuf], extensions: &[String], artist: &str) -> Option<Vec<LibraryTrack>> {
    let mut found_directory = false;
    let mut tracks = Vec::new();

    for root in roots {
        if !root.is_dir() {
            warn!("Music library {} is not a directory", root.display());
            continue;
        }
        let artist_dirs = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter(|e| e.file_name().to_string_lossy().to_lowercase().starts_with(artist));

        for dir in artist_dirs {
            found_directory = true;
            tracks.extend(
                WalkDir::new(dir.path())
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter(|e| has_extension(e.path(), extensions))
                    .filter_map(|e| {
                        let name = track_name(&e.file_name().to_string_lossy())?;
                        Some(LibraryTrack {
                            name: name.to_lowercase(),
                            path: e.into_path(),
                        })
                    }),
            );
        }
    }

    found_directory.then_some(tracks)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.ends_with(".jpg") {
        return false;
    }
    extensions.is_empty() || extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn extensions() -> Vec<String> {
        vec!["flac".to_string(), "mp3".to_string()]
    }

    #[tokio::test]
    async fn test_artist_directories_across_libraries() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        touch(first.path(), "Artist X/Album Y/01 - Track One.flac");
        touch(first.path(), "Artist X/Album Y/02 - Track Two.mp3");
        touch(first.path(), "Artist X/Album Y/cover.jpg");
        touch(first.path(), "Artist X/Album Y/notes.txt");
        touch(second.path(), "artist x (live)/03. Encore.flac");
        touch(second.path(), "Someone Else/01 - Other.flac");

        let library = MusicLibrary::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            &extensions(),
            DEFAULT_LIBRARY_MATCH,
        );
        assert_eq!(library.load_artist("Artist X").await, 3);
        assert_eq!(library.load_artist("ARTIST X").await, 3);

        assert!(library.contains_track("Artist X", "Track One"));
        assert!(library.contains_track("Artist X", "encore"));
        assert!(!library.contains_track("Artist X", "Track 1"));
        assert!(!library.contains_track("Artist X", "Completely Different Song"));
        assert!(!library.contains_track("Artist X", "Other"));
        assert!(!library.contains_track("Someone Else", "Other"));
    }

    #[tokio::test]
    async fn test_contains_file_uses_track_name_of_remote_path() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Artist X/Album Y/01 - Track One.flac");

        let library = MusicLibrary::new(vec![dir.path().to_path_buf()], &extensions(), 90);
        library.load_artist("Artist X").await;

        assert!(library.contains_file("Artist X", "Share\\Artist X\\Album Y\\01 - Track One.mp3"));
        assert!(!library.contains_file("Artist X", "Share\\Album Y\\02 - Track Two.mp3"));
        // Nothing to compare, so the file is not wanted
        assert!(library.contains_file("Artist X", "Share\\Album Y\\-.mp3"));
        assert!(!library.contains_file("Nobody", "Share\\Nobody\\01 - Track One.mp3"));
    }

    #[tokio::test]
    async fn test_threshold_controls_loose_matches() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Artist X/Album Y/01 - Track Two.flac");

        let loose = MusicLibrary::new(vec![dir.path().to_path_buf()], &extensions(), 50);
        loose.load_artist("Artist X").await;
        assert!(loose.contains_track("Artist X", "Track Three"));

        let strict = MusicLibrary::new(vec![dir.path().to_path_buf()], &extensions(), 90);
        strict.load_artist("Artist X").await;
        assert!(!strict.contains_track("Artist X", "Track Three"));
    }

    #[tokio::test]
    async fn test_unconfigured_or_unknown_artist() {
        let dir = tempdir().unwrap();
        let unconfigured = MusicLibrary::new(Vec::new(), &extensions(), DEFAULT_LIBRARY_MATCH);
        assert!(!unconfigured.is_configured());
        assert_eq!(unconfigured.load_artist("Artist X").await, 0);
        assert!(!unconfigured.contains_file("Artist X", "Share\\-.mp3"));

        let empty = MusicLibrary::new(vec![dir.path().to_path_buf()], &extensions(), 50);
        assert_eq!(empty.load_artist("Artist X").await, 0);
        assert!(!empty.contains_file("Artist X", "Share\\-.mp3"));
        assert!(!empty.contains_track("Artist X", "Anything"));
    }
}
