//! Decides whether a downloaded file's tags describe the wanted track.

use seek_core::fuzzy::{exact_number_match, partial_token_set_ratio, version_qualifiers_match};

use super::TrackTags;

/// Minimum partial token-set ratio for a tag field to match its target.
pub const TAG_MATCH_THRESHOLD: u8 = 80;

/// How downloaded files are checked against their targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagPolicy {
    /// Reject files whose artist, album or title do not match.
    pub check_tags: bool,
    /// Delete a rejected file that was already committed to disk.
    pub delete_on_mismatch: bool,
    /// Accept files that carry no tags at all.
    pub allow_untagged: bool,
    /// Rewrite the album tag of a matching track to the target album.
    pub update_album_name: bool,
}

/// The metadata a file is compared against.
#[derive(Debug, Clone, Copy)]
pub struct TagTarget<'a> {
    pub artist: &'a str,
    pub album: Option<&'a str>,
    pub song_names: &'a [String],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagVerdict {
    pub artist_match: bool,
    pub album_match: bool,
    pub track_match: bool,
    /// The album tag should be replaced with the target album.
    pub rewrite_album: bool,
}

impl TagVerdict {
    /// Files are always accepted when tag checking is off.
    pub fn accepted(&self, policy: &TagPolicy) -> bool {
        !policy.check_tags || (self.artist_match && self.album_match && self.track_match)
    }
}

fn similar(target: &str, value: &str) -> bool {
    partial_token_set_ratio(&target.to_lowercase(), &value.to_lowercase()) >= TAG_MATCH_THRESHOLD
}

fn artist_matches(target: &str, tags: &TrackTags) -> bool {
    if target.trim().is_empty() {
        return true;
    }
    [
        &tags.artist,
        &tags.album_artist,
        &tags.sort_artist,
        &tags.sort_album_artist,
    ]
    .iter()
    .any(|field| similar(target, field))
        || similar(target, &tags.album)
        || tags.additional.iter().any(|field| similar(target, field))
}

fn track_matches(song_names: &[String], title: &str) -> bool {
    song_names.is_empty()
        || song_names.iter().any(|song| {
            similar(song, title)
                && exact_number_match(song, title)
                && version_qualifiers_match(song, title)
        })
}

fn album_matches(target: Option<&str>, album: &str) -> bool {
    match target {
        Some(target) if !target.trim().is_empty() => {
            similar(target, album) && exact_number_match(target, album)
        }
        _ => true,
    }
}

/// Compares `tags` with `target`.
///
/// With `allow_untagged`, a file without any of the checked tags matches everything.
/// With `update_album_name`, a file whose artist and title match but whose album tag
/// differs from the target album is marked for rewriting and counts as an album match.
pub fn validate(target: &TagTarget<'_>, tags: &TrackTags, policy: &TagPolicy) -> TagVerdict {
    if policy.allow_untagged && tags.is_blank() {
        return TagVerdict {
            artist_match: true,
            album_match: true,
            track_match: true,
            rewrite_album: false,
        };
    }

    let artist_match = artist_matches(target.artist, tags);
    let track_match = track_matches(target.song_names, &tags.title);
    let mut album_match = album_matches(target.album, &tags.album);

    let mut rewrite_album = false;
    if policy.update_album_name && artist_match && track_match && !target.song_names.is_empty() {
        if let Some(album) = target.album.map(str::trim).filter(|a| !a.is_empty()) {
            if !tags.album.trim().eq_ignore_ascii_case(album) {
                rewrite_album = true;
                album_match = true;
            }
        }
    }

    TagVerdict {
        artist_match,
        album_match,
        track_match,
        rewrite_album,
    }
}
