//! Parsing of free-text search terms such as `Artist - Album - Track`.

/// Which parts a search term carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchTermKind {
    Artist,
    ArtistTrack,
    ArtistAlbumTrack,
}

/// A parsed search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub kind: SearchTermKind,
    pub artist: String,
    pub album: Option<String>,
    pub song: Option<String>,
}

impl SearchTerm {
    /// Parses `text` by splitting on `delimiter`.
    ///
    /// Three or more parts give artist, album and track, where everything after the album
    /// is re-joined into the track name. Two parts give artist and track. Anything else is
    /// an artist-only term.
    pub fn parse(text: &str, delimiter: &str) -> Self {
        let parts: Vec<&str> = if delimiter.is_empty() {
            vec![text.trim()]
        } else {
            text.split(delimiter)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect()
        };

        if parts.len() > 2 {
            Self {
                kind: SearchTermKind::ArtistAlbumTrack,
                artist: parts[0].to_string(),
                album: Some(parts[1].to_string()),
                song: Some(parts[2..].join(delimiter)),
            }
        } else if parts.len() > 1 {
            Self {
                kind: SearchTermKind::ArtistTrack,
                artist: parts[0].to_string(),
                album: None,
                song: Some(parts[1..].join(delimiter)),
            }
        } else {
            Self {
                kind: SearchTermKind::Artist,
                artist: text.trim().to_string(),
                album: None,
                song: None,
            }
        }
    }

    /// A short human-readable label, also used as the search query text.
    pub fn label(&self) -> String {
        match self.kind {
            SearchTermKind::Artist => self.artist.clone(),
            SearchTermKind::ArtistTrack => {
                format!("{} - {}", self.artist, self.song.as_deref().unwrap_or_default())
            }
            SearchTermKind::ArtistAlbumTrack => {
                format!("{} - {}", self.artist, self.album.as_deref().unwrap_or_default())
            }
        }
    }
}

/// Groups terms that share artist, album and kind, keeping first-seen order.
///
/// All tracks of one album end up in one group so the album is searched once.
pub fn group_search_terms(terms: Vec<SearchTerm>) -> Vec<Vec<SearchTerm>> {
    let mut groups: Vec<Vec<SearchTerm>> = Vec::new();
    for term in terms {
        let existing = groups.iter_mut().find(|group| {
            let first = &group[0];
            first.artist == term.artist && first.album == term.album && first.kind == term.kind
        });
        match existing {
            Some(group) => group.push(term),
            None => groups.push(vec![term]),
        }
    }
    groups
}

/// Reads search terms from file content: one per line, blank lines skipped, duplicates
/// removed.
pub fn parse_search_lines(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}
