//! Duplicate detection against files accepted in this run and files already on disk.

use std::path::{Path, PathBuf};

use dashmap::DashSet;
use log::debug;
use seek_core::fuzzy::ratio;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

/// Listing stems scoring above this are the same file.
pub const LISTING_MATCH_THRESHOLD: u8 = 90;

/// Basenames accepted during this run, compared case-insensitively.
#[derive(Default)]
pub struct IgnoreSet {
    names: DashSet<String>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, basename: &str) -> bool {
        self.names.contains(&basename.to_lowercase())
    }

    /// Claims `basename`. Returns false when another worker already accepted it.
    pub fn claim(&self, basename: &str) -> bool {
        self.names.insert(basename.to_lowercase())
    }

    pub fn release(&self, basename: &str) {
        self.names.remove(&basename.to_lowercase());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Lowercased file stems found under the download root.
///
/// The directory is walked once, on first use. Files accepted afterwards are added
/// with [`LibraryListing::insert`]; nothing is ever removed.
pub struct LibraryListing {
    root: PathBuf,
    stems: OnceCell<DashSet<String>>,
}

impl LibraryListing {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stems: OnceCell::new(),
        }
    }

    async fn loaded(&self) -> &DashSet<String> {
        self.stems
            .get_or_init(|| async {
                let root = self.root.clone();
                let stems = tokio::task::spawn_blocking(move || scan(&root))
                    .await
                    .unwrap_or_default();
                debug!("Indexed {} existing files under {}", stems.len(), self.root.display());
                stems
            })
            .await
    }

    /// Walks the download root now instead of on the first lookup.
    pub async fn warm(&self) -> usize {
        self.loaded().await.len()
    }

    /// True when an existing file's stem is a close match for `stem`.
    pub async fn fuzzy_contains(&self, stem: &str) -> bool {
        let stems = self.loaded().await;
        matches_any(stems, stem)
    }

    /// Like [`LibraryListing::fuzzy_contains`], but false until the listing has been built.
    pub fn fuzzy_contains_loaded(&self, stem: &str) -> bool {
        self.stems
            .get()
            .is_some_and(|stems| matches_any(stems, stem))
    }

    /// Records a newly accepted file.
    pub fn insert(&self, path: &Path) {
        // An unbuilt listing picks the file up when it walks the root.
        if let (Some(stems), Some(stem)) = (self.stems.get(), file_stem(path)) {
            stems.insert(stem);
        }
    }
}

fn matches_any(stems: &DashSet<String>, stem: &str) -> bool {
    let needle = stem.to_lowercase();
    stems
        .iter()
        .any(|known| ratio(&needle, known.key()) > LISTING_MATCH_THRESHOLD)
}

fn scan(root: &Path) -> DashSet<String> {
    let stems = DashSet::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if name.to_lowercase().ends_with(".bak") {
            continue;
        }
        if let Some(stem) = file_stem(entry.path()) {
            stems.insert(stem);
        }
    }
    stems
}

/// The file name without its last extension, lowercased.
pub fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .filter(|s| !s.is_empty())
}
