//! Turns raw search responses into an ordered list of candidates for one target.

use std::collections::HashSet;

use seek_core::fuzzy::partial_ratio;
use seek_core::{SearchResult, Transfer};

use super::SearchResponse;

/// Extensions searched for when none are configured.
pub const MEDIA_FILE_EXTENSIONS: [&str; 6] = ["flac", "m4a", "mp3", "wav", "aiff", "opus"];

/// Filters applied to every file before it can become a candidate.
#[derive(Debug, Clone)]
pub struct SearchFilters {
    /// Allowed file extensions, without the dot.
    pub extensions: Vec<String>,
    /// Files whose path contains any of these (case-insensitive) are dropped.
    pub exclude_names: Vec<String>,
    /// Files must be smaller than this many megabytes.
    pub max_size_mb: u64,
    pub min_artist_match: u8,
    pub min_album_match: u8,
    pub min_track_match: u8,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            extensions: MEDIA_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude_names: Vec::new(),
            max_size_mb: 50,
            min_artist_match: 50,
            min_album_match: 50,
            min_track_match: 50,
        }
    }
}

/// What the candidates are ranked against.
#[derive(Debug, Clone, Copy)]
pub struct RankTarget<'a> {
    pub artist: &'a str,
    pub album: Option<&'a str>,
    pub song_names: &'a [String],
}

struct Scored {
    result: SearchResult,
    artist: u8,
    album: u8,
    track: u8,
}

/// Filters, scores, de-duplicates and orders the files from `responses`.
///
/// `is_archived` drops files already downloaded in an earlier run and `in_library` drops
/// files the local music library already has (it receives the remote path).
pub fn rank_candidates(
    responses: Vec<SearchResponse>,
    target: &RankTarget<'_>,
    filters: &SearchFilters,
    is_archived: &dyn Fn(&Transfer) -> bool,
    in_library: &dyn Fn(&str) -> bool,
) -> Vec<SearchResult> {
    let artist = target.artist.to_lowercase();
    let album = target.album.map(str::to_lowercase);
    let songs: Vec<String> = target.song_names.iter().map(|s| s.to_lowercase()).collect();
    let exclude: Vec<String> = filters.exclude_names.iter().map(|n| n.to_lowercase()).collect();
    let max_size = filters.max_size_mb.saturating_mul(1024 * 1024);

    let mut seen = HashSet::new();
    let mut scored = Vec::new();

    for response in responses {
        for file in response.files {
            let lower = file.path.to_lowercase();
            if !filters
                .extensions
                .iter()
                .any(|ext| lower.ends_with(&ext.to_lowercase()))
            {
                continue;
            }
            if exclude.iter().any(|name| lower.contains(name.as_str())) {
                continue;
            }
            if file.size >= max_size || in_library(&file.path) {
                continue;
            }

            let result = SearchResult {
                peer: response.peer.clone(),
                remote_path: file.path,
                size: file.size,
                has_free_upload_slot: response.has_free_upload_slot,
                upload_speed: response.upload_speed,
            };

            let basename = result.basename().unwrap_or_default().to_lowercase();
            let artist_score = partial_ratio(&lower, &artist);
            let album_score = match &album {
                Some(album) if !album.trim().is_empty() => partial_ratio(&lower, album),
                _ => 100,
            };
            let track_score = songs
                .iter()
                .map(|song| partial_ratio(&basename, song))
                .max()
                .unwrap_or(100);

            if artist_score < filters.min_artist_match
                || album_score < filters.min_album_match
                || track_score < filters.min_track_match
            {
                continue;
            }
            if is_archived(&result.transfer()) {
                continue;
            }
            if !seen.insert((result.peer.clone(), result.remote_path.clone())) {
                continue;
            }

            scored.push(Scored {
                result,
                artist: artist_score,
                album: album_score,
                track: track_score,
            });
        }
    }

    scored.sort_by(|a, b| {
        (
            b.artist,
            b.album,
            b.track,
            b.result.has_free_upload_slot,
            b.result.size,
            b.result.upload_speed,
        )
            .cmp(&(
                a.artist,
                a.album,
                a.track,
                a.result.has_free_upload_slot,
                a.result.size,
                a.result.upload_speed,
            ))
    });

    scored.into_iter().map(|s| s.result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedFile;

    fn response(peer: &str, free: bool, files: &[(&str, u64)]) -> SearchResponse {
        SearchResponse {
            peer: peer.to_string(),
            has_free_upload_slot: free,
            upload_speed: 100,
            files: files
                .iter()
                .map(|(path, size)| SharedFile {
                    path: path.to_string(),
                    size: *size,
                })
                .collect(),
        }
    }

    fn no_archive(_: &Transfer) -> bool {
        false
    }

    fn no_library(_: &str) -> bool {
        false
    }

    #[test]
    fn test_filters_extension_exclude_and_size() {
        let responses = vec![response(
            "alice",
            true,
            &[
                ("Artist X\\Album Y\\01 - Track 1.flac", 1000),
                ("Artist X\\Album Y\\cover.jpg", 10),
                ("Artist X\\Album Y (Karaoke)\\01 - Track 1.flac", 1000),
                ("Artist X\\Album Y\\huge.flac", 60 * 1024 * 1024),
            ],
        )];
        let filters = SearchFilters {
            exclude_names: vec!["KARAOKE".to_string()],
            ..SearchFilters::default()
        };
        let target = RankTarget {
            artist: "Artist X",
            album: Some("Album Y"),
            song_names: &[],
        };
        let ranked = rank_candidates(responses, &target, &filters, &no_archive, &no_library);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].remote_path, "Artist X\\Album Y\\01 - Track 1.flac");
    }

    #[test]
    fn test_orders_by_score_then_free_slot() {
        let responses = vec![
            response("busy", false, &[("Artist X\\Album Y\\01 - Track 1.mp3", 500)]),
            response("free", true, &[("Artist X\\Album Y\\01 - Track 1.mp3", 500)]),
            response("weak", true, &[("Artist\\Misc\\01 - Track 1.mp3", 500)]),
        ];
        let target = RankTarget {
            artist: "Artist X",
            album: None,
            song_names: &[],
        };
        let filters = SearchFilters {
            min_artist_match: 0,
            ..SearchFilters::default()
        };
        let ranked = rank_candidates(responses, &target, &filters, &no_archive, &no_library);
        let peers: Vec<&str> = ranked.iter().map(|r| r.peer.as_str()).collect();
        assert_eq!(peers, vec!["free", "busy", "weak"]);
    }

    #[test]
    fn test_drops_archived_and_duplicates() {
        let responses = vec![
            response(
                "alice",
                true,
                &[
                    ("Artist X\\Album\\a.mp3", 100),
                    ("Artist X\\Album\\a.mp3", 100),
                    ("Artist X\\Album\\b.mp3", 200),
                ],
            ),
        ];
        let target = RankTarget {
            artist: "Artist X",
            album: None,
            song_names: &[],
        };
        let archived = |t: &Transfer| t.remote_path.ends_with("b.mp3") && t.size == 200;
        let ranked = rank_candidates(
            responses,
            &target,
            &SearchFilters::default(),
            &archived,
            &no_library,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].remote_path, "Artist X\\Album\\a.mp3");
    }

    #[test]
    fn test_track_score_uses_basename() {
        let responses = vec![response(
            "alice",
            true,
            &[
                ("Artist X\\Track 1 Collection\\05 - Other.mp3", 100),
                ("Artist X\\Album\\03 - Track 1.mp3", 100),
            ],
        )];
        let songs = vec!["Track 1".to_string()];
        let target = RankTarget {
            artist: "Artist X",
            album: None,
            song_names: &songs,
        };
        let filters = SearchFilters {
            min_track_match: 90,
            ..SearchFilters::default()
        };
        let ranked = rank_candidates(responses, &target, &filters, &no_archive, &no_library);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].remote_path, "Artist X\\Album\\03 - Track 1.mp3");
    }
}
