//! Reading and rewriting the tags of downloaded files.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::read_from_path;
use lofty::tag::{ItemKey, ItemValue, Tag};
use log::debug;

pub mod validator;

pub use validator::{TagPolicy, TagTarget, TagVerdict, validate};

/// Keys already read into the named fields of [`TrackTags`].
const MAPPED_KEYS: [ItemKey; 6] = [
    ItemKey::TrackTitle,
    ItemKey::AlbumTitle,
    ItemKey::TrackArtist,
    ItemKey::AlbumArtist,
    ItemKey::TrackArtistSortOrder,
    ItemKey::AlbumArtistSortOrder,
];

/// The tag fields the validator looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub artist: String,
    pub album_artist: String,
    pub sort_artist: String,
    pub sort_album_artist: String,
    pub album: String,
    pub title: String,
    /// Text values of the keys not mapped to a named field.
    pub additional: Vec<String>,
}

impl TrackTags {
    /// True when none of the checked fields carries a value.
    pub fn is_blank(&self) -> bool {
        [
            &self.artist,
            &self.album_artist,
            &self.sort_artist,
            &self.sort_album_artist,
            &self.album,
            &self.title,
        ]
        .iter()
        .all(|field| field.trim().is_empty())
    }

    fn from_tagged_file(tagged_file: &TaggedFile) -> Self {
        let primary_tag = tagged_file.primary_tag();
        let tags = tagged_file.tags();

        let additional = tags
            .iter()
            .flat_map(|tag| tag.items())
            .filter(|item| !MAPPED_KEYS.contains(&item.key()))
            .filter_map(|item| match item.value() {
                ItemValue::Text(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                _ => None,
            })
            .collect();

        Self {
            artist: first_non_empty_value(primary_tag, tags, |tag| {
                tag.artist().map(|value| value.into_owned())
            }),
            album_artist: first_non_empty_value(primary_tag, tags, |tag| {
                tag.get_string(ItemKey::AlbumArtist).map(str::to_string)
            }),
            sort_artist: first_non_empty_value(primary_tag, tags, |tag| {
                tag.get_string(ItemKey::TrackArtistSortOrder).map(str::to_string)
            }),
            sort_album_artist: first_non_empty_value(primary_tag, tags, |tag| {
                tag.get_string(ItemKey::AlbumArtistSortOrder).map(str::to_string)
            }),
            album: first_non_empty_value(primary_tag, tags, |tag| {
                tag.album().map(|value| value.into_owned())
            }),
            title: first_non_empty_value(primary_tag, tags, |tag| {
                tag.title().map(|value| value.into_owned())
            }),
            additional,
        }
    }
}

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    primary_tag
        .into_iter()
        .chain(tags.iter())
        .filter_map(|tag| extractor(tag))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Reads the tags of the file at `path`. `None` when the file cannot be parsed.
pub fn read_tags_from_path(path: &Path) -> Option<TrackTags> {
    match read_from_path(path) {
        Ok(tagged_file) => Some(TrackTags::from_tagged_file(&tagged_file)),
        Err(e) => {
            debug!("Could not read tags of {}: {}", path.display(), e);
            None
        }
    }
}

/// Reads the tags of an in-memory file, guessing its format from the content.
pub fn read_tags_from_bytes(bytes: Bytes) -> Option<TrackTags> {
    let reader = match Probe::new(Cursor::new(bytes)).guess_file_type() {
        Ok(reader) => reader,
        Err(e) => {
            debug!("Could not guess format of buffered file: {}", e);
            return None;
        }
    };
    match reader.read() {
        Ok(tagged_file) => Some(TrackTags::from_tagged_file(&tagged_file)),
        Err(e) => {
            debug!("Could not read tags of buffered file: {}", e);
            None
        }
    }
}

/// Replaces the album tag of the file at `path` with `album`.
///
/// A non-empty previous album is kept under the original-album field.
pub fn rewrite_album(path: &Path, album: &str) -> Result<(), String> {
    let mut tagged_file =
        read_from_path(path).map_err(|error| format!("Failed to read tags: {error}"))?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| format!("No writable tag available for {:?}", tag_type))?;

    let previous = tag
        .album()
        .map(|value| value.trim().to_string())
        .unwrap_or_default();
    if !previous.is_empty() {
        tag.insert_text(ItemKey::OriginalAlbumTitle, previous);
    }
    tag.set_album(album.to_string());

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|error| format!("Failed to write tags: {error}"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use lofty::config::WriteOptions;
    use lofty::file::{AudioFile, TaggedFileExt};
    use lofty::prelude::Accessor;
    use lofty::tag::Tag;

    /// A short, silent 8 kHz mono PCM WAV file.
    pub fn silent_wav() -> Vec<u8> {
        let data = vec![0u8; 800];
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&16000u32.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data.len() as u32).to_le_bytes());
        wav.extend_from_slice(&data);
        wav
    }

    /// Writes a WAV file at `path` tagged with the given artist, album and title.
    pub fn write_tagged_wav(path: &Path, artist: &str, album: &str, title: &str) {
        std::fs::write(path, silent_wav()).unwrap();
        let mut tagged_file = lofty::read_from_path(path).unwrap();
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
        let tag = tagged_file.tag_mut(tag_type).unwrap();
        tag.set_artist(artist.to_string());
        tag.set_album(album.to_string());
        tag.set_title(title.to_string());
        tagged_file
            .save_to_path(path, WriteOptions::default())
            .unwrap();
    }

    /// The bytes of a tagged WAV file.
    pub fn tagged_wav(artist: &str, album: &str, title: &str) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        write_tagged_wav(&path, artist, album, title);
        std::fs::read(path).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_tags_from_path_and_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_tagged_wav(&path, "Artist X", "Album Y", "Track 1");

        let from_path = read_tags_from_path(&path).unwrap();
        assert_eq!(from_path.artist, "Artist X");
        assert_eq!(from_path.album, "Album Y");
        assert_eq!(from_path.title, "Track 1");
        assert!(!from_path.is_blank());

        let from_bytes = read_tags_from_bytes(Bytes::from(std::fs::read(&path).unwrap())).unwrap();
        assert_eq!(from_bytes, from_path);
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(read_tags_from_path(&path).is_none());
        assert!(read_tags_from_bytes(Bytes::from_static(b"definitely not audio")).is_none());
    }

    #[test]
    fn test_untagged_file_is_blank() {
        let tags = read_tags_from_bytes(Bytes::from(silent_wav())).unwrap();
        assert!(tags.is_blank());
    }

    #[test]
    fn test_rewrite_album_keeps_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_tagged_wav(&path, "Artist X", "Greatest Hits", "Track 1");

        rewrite_album(&path, "Album Y").unwrap();

        let tags = read_tags_from_path(&path).unwrap();
        assert_eq!(tags.album, "Album Y");
        assert!(tags.additional.iter().any(|v| v == "Greatest Hits"));
    }

    #[test]
    fn test_named_fields_are_not_repeated_in_additional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cover.wav");
        write_tagged_wav(&path, "Apocalyptica", "Plays", "Metallica Cover");

        let tags = read_tags_from_path(&path).unwrap();
        assert_eq!(tags.title, "Metallica Cover");
        assert!(!tags.additional.iter().any(|v| v == "Metallica Cover"));
        assert!(!tags.additional.iter().any(|v| v == "Apocalyptica"));
        assert!(!tags.additional.iter().any(|v| v == "Plays"));
    }
}
