//! Extracts the track name from a music file name.

use once_cell::sync::Lazy;
use regex::Regex;

const AUDIO_EXTENSION: &str = r"\.(?i:mp3|flac|m4a|opus|wav|aiff)$";

/// Common file name layouts, most specific first. Each captures the track as `track`.
const LAYOUTS: [&str; 9] = [
    // Artist - Album - 01 - Track
    r"^(.+?)\s-\s(.+?)\s-\s(\d{2}(?:-\d{2})?)\s-\s(?P<track>.+?)",
    // 01-02. Artist - Track
    r"^(\d{1,3})-(\d{1,3})\.?(.+?)\s*-\s*(?P<track>.+?)",
    // 01-02. Track
    r"^(\d{1,3})-(\d{1,3})\.?(?P<track>.+?)",
    // 01 - Artist - Track
    r"^(\d{1,3})\s*-\s*(.+?)\s*-\s*(?P<track>.+?)",
    // 01. Artist - Track
    r"^(\d{1,3})\s*(.+?)[-.]\s*(?P<track>.+?)",
    // 01. Track
    r"^(\d{1,3})\s*[-.]\s*(?P<track>.+?)",
    // 01 Track
    r"^(\d{1,3})\s+(?P<track>.+?)",
    // Artist - Track
    r"^(.+?)\s*-\s*(?P<track>.+?)",
    r"^(?P<track>.+?)",
];

static TRACK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    LAYOUTS
        .iter()
        .filter_map(|layout| Regex::new(&format!("{layout}{AUDIO_EXTENSION}")).ok())
        .collect()
});

/// A bracketed video id such as `[dQw4w9WgXcQ]` right before the extension.
static VIDEO_ID: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(&format!(
        r"\[?(?P<id>[A-Za-z0-9\-]{{8,11}})\](?P<ext>{AUDIO_EXTENSION})"
    ))
    .ok()
});

/// The track name of `file_name`, which may be a full local or remote path.
///
/// Returns `None` for non-audio files and for names that carry no track at all.
///
/// # Examples
///
/// ```
/// use seek_core::track_name::track_name;
///
/// assert_eq!(track_name("Music\\Album\\01 - Intro.flac").as_deref(), Some("Intro"));
/// assert_eq!(track_name("cover.jpg"), None);
/// ```
pub fn track_name(file_name: &str) -> Option<String> {
    let basename = file_name.rsplit(['\\', '/']).next().unwrap_or(file_name);
    let normalized = strip_video_id(&basename.replace('–', "-").replace('_', " "));

    TRACK_PATTERNS.iter().find_map(|pattern| {
        let track = pattern.captures(&normalized)?.name("track")?.as_str();
        let bare = track.replace(['-', '(', ')', '[', ']'], "");
        if bare.trim().is_empty() {
            None
        } else {
            Some(track.trim().to_string())
        }
    })
}

fn strip_video_id(name: &str) -> String {
    let Some(captures) = VIDEO_ID.as_ref().and_then(|re| re.captures(name)) else {
        return name.to_string();
    };
    let (Some(whole), Some(id), Some(ext)) =
        (captures.get(0), captures.name("id"), captures.name("ext"))
    else {
        return name.to_string();
    };

    let id = id.as_str();
    let generated = id.chars().any(|c| c.is_ascii_digit())
        && id.chars().any(|c| c.is_ascii_uppercase())
        && id.chars().any(|c| c.is_ascii_lowercase());
    if !generated {
        return name.to_string();
    }
    format!("{}{}", &name[..whole.start()], ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_layouts() {
        assert_eq!(track_name("01 - Track One.flac").as_deref(), Some("Track One"));
        assert_eq!(track_name("07. Closing Time.mp3").as_deref(), Some("Closing Time"));
        assert_eq!(track_name("12 Encore.opus").as_deref(), Some("Encore"));
        assert_eq!(
            track_name("03 - Artist X - Hidden Track.m4a").as_deref(),
            Some("Hidden Track")
        );
        assert_eq!(
            track_name("01-03. Artist X - Disc Song.flac").as_deref(),
            Some("Disc Song")
        );
    }

    #[test]
    fn test_named_layouts() {
        assert_eq!(
            track_name("Artist X - Album Y - 04 - Deep Cut.flac").as_deref(),
            Some("Deep Cut")
        );
        assert_eq!(track_name("Artist X - Single.mp3").as_deref(), Some("Single"));
        assert_eq!(track_name("Just A Song.WAV").as_deref(), Some("Just A Song"));
    }

    #[test]
    fn test_paths_and_separators() {
        assert_eq!(
            track_name("Share\\Artist X\\Album Y\\02_-_Under_Score.mp3").as_deref(),
            Some("Under Score")
        );
        assert_eq!(
            track_name("/music/Artist X/01 – Long Dash.flac").as_deref(),
            Some("Long Dash")
        );
    }

    #[test]
    fn test_video_id_removed() {
        assert_eq!(
            track_name("Artist X - Song [dQw4w9WgXcQ].mp3").as_deref(),
            Some("Song")
        );
        // Without mixed case and digits the brackets are part of the title.
        assert_eq!(
            track_name("Artist X - Song [acoustic].mp3").as_deref(),
            Some("Song [acoustic]")
        );
    }

    #[test]
    fn test_no_track() {
        assert_eq!(track_name("cover.jpg"), None);
        assert_eq!(track_name("-.mp3"), None);
        assert_eq!(track_name("(  ).flac"), None);
        assert_eq!(track_name(""), None);
    }
}
