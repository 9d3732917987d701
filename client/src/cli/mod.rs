use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use seek_core::parse_search_lines;
use seek_network::{Credentials, MEDIA_FILE_EXTENSIONS, SearchFilters};

use crate::batch::{BatchOptions, GroupMode, LibraryOptions};
use crate::downloader::{DEFAULT_MIN_FREE_SPACE_MB, EngineOptions};
use crate::storage::DEFAULT_LIBRARY_MATCH;
use crate::tags::TagPolicy;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Searches peers for music and downloads the best matching files",
    long_about = None
)]
pub struct Args {
    /// Download path to store the downloads
    #[arg(long, env = "SEEK_DOWNLOADFILEPATH")]
    pub download_file_path: Option<PathBuf>,

    /// Directory of peer shares served by the local network, one sub-directory per peer
    #[arg(long, env = "SEEK_SHAREROOT", default_value = "shares")]
    pub share_root: PathBuf,

    /// Slow every served chunk down by this many milliseconds
    #[arg(long, env = "SEEK_SHARE_CHUNK_DELAY_MS")]
    pub share_chunk_delay_ms: Option<u64>,

    /// Username for login
    #[arg(long, env = "SEEK_USERNAME", default_value = "")]
    pub username: String,

    /// Password for login
    #[arg(long, env = "SEEK_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Listen port (used for port forwarding)
    #[arg(long, env = "SEEK_LISTENPORT", default_value_t = 0)]
    pub listen_port: u16,

    /// Music library to check for songs you already have
    #[arg(long, env = "SEEK_MUSICLIBRARY")]
    pub music_library: Option<PathBuf>,

    /// More music libraries to check, comma separated
    #[arg(long, env = "SEEK_MUSICLIBRARIES", value_delimiter = ',')]
    pub music_libraries: Vec<PathBuf>,

    /// Match percentage against your music library above which a download is skipped
    #[arg(long, env = "SEEK_MUSICLIBRARY_MATCH", default_value_t = DEFAULT_LIBRARY_MATCH,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub music_library_match: u8,

    /// Only search for the tracks missing from your music library
    #[arg(long, env = "SEEK_MUSICLIBRARY_QUICK_MATCH")]
    pub music_library_quick_match: bool,

    /// Search term in the order Artist - Album - Track
    #[arg(short = 's', long, env = "SEEK_SEARCHTERM")]
    pub search_term: Option<String>,

    /// File with one search term per line
    #[arg(short = 'f', long, env = "SEEK_SEARCHFILEPATH")]
    pub search_file_path: Option<PathBuf>,

    /// Delimiter between the Artist, Album and Track parts of a search term
    #[arg(long, env = "SEEK_SEARCHDELIMITER", default_value = "-")]
    pub search_delimiter: String,

    /// Number of concurrent download workers
    #[arg(short = 't', long, env = "SEEK_THREADCOUNT", default_value_t = 10)]
    pub thread_count: usize,

    /// Put every search into one download group
    #[arg(long, env = "SEEK_GROUPEDDOWNLOADS")]
    pub grouped_downloads: bool,

    /// Stop every download group after its first accepted file
    #[arg(long, env = "SEEK_DOWNLOADSINGLES")]
    pub download_singles: bool,

    /// Rewrite the album tag to the searched album when artist and track match
    #[arg(long, env = "SEEK_UPDATEALBUMNAME")]
    pub update_album_name: bool,

    /// Check the tags to see if the correct track was downloaded
    #[arg(long, env = "SEEK_CHECKTAGS")]
    pub check_tags: bool,

    /// Delete downloads whose tags do not match the search
    #[arg(long, env = "SEEK_CHECKTAGSDELETE")]
    pub check_tags_delete: bool,

    /// Accept files without any tags
    #[arg(long, env = "SEEK_ALLOWNONTAGGEDFILES")]
    pub allow_non_tagged_files: bool,

    /// Show the live status of the run and of every worker
    #[arg(long, env = "SEEK_OUTPUTSTATUS", default_value_t = true, action = ArgAction::Set)]
    pub output_status: bool,

    /// File extensions to search for, comma separated
    #[arg(long, env = "SEEK_FILEEXTENSIONS", value_delimiter = ',')]
    pub search_file_extensions: Vec<String>,

    /// Skip files whose path contains any of these names, comma separated
    #[arg(long, env = "SEEK_FILTEROUTFILENAMES", value_delimiter = ',')]
    pub filter_out_file_names: Vec<String>,

    /// Maximum file size to download, in MB
    #[arg(long, env = "SEEK_MAX_FILE_SIZE", default_value_t = 50)]
    pub max_file_size: u64,

    /// Keep downloads in memory until they are accepted
    #[arg(long, env = "SEEK_IN_MEMORY_DOWNLOADS")]
    pub in_memory_downloads: bool,

    /// Only downloads smaller than this many MB are kept in memory
    #[arg(long, env = "SEEK_IN_MEMORY_DOWNLOADS_MAX_SIZE", default_value_t = 50)]
    pub in_memory_downloads_max_size: u64,

    /// Archive of finished downloads, these are never downloaded again
    #[arg(long, env = "SEEK_DOWNLOAD_ARCHIVE")]
    pub download_archive: Option<PathBuf>,

    /// Minimum artist match percentage
    #[arg(long, env = "SEEK_SEARCH_MATCH_ARTIST", default_value_t = 50,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub search_match_artist: u8,

    /// Minimum album match percentage
    #[arg(long, env = "SEEK_SEARCH_MATCH_ALBUM", default_value_t = 50,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub search_match_album: u8,

    /// Minimum track match percentage
    #[arg(long, env = "SEEK_SEARCH_MATCH_TRACK", default_value_t = 50,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub search_match_track: u8,

    /// Free disk space to keep on the download volume, in MB
    #[arg(long, env = "SEEK_MIN_FREE_SPACE", default_value_t = DEFAULT_MIN_FREE_SPACE_MB)]
    pub min_free_space: u64,

    /// Cron expression, seconds first, to re-run the download on a schedule
    #[arg(long, env = "CRON")]
    pub cron: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "SEEK_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            download_dir: self.download_file_path.clone(),
            thread_count: self.thread_count,
            archive_path: self.download_archive.clone(),
            in_memory: self.in_memory_downloads,
            in_memory_max_bytes: self.in_memory_downloads_max_size.saturating_mul(1024 * 1024),
            min_free_space_mb: self.min_free_space,
            tags: TagPolicy {
                check_tags: self.check_tags,
                delete_on_mismatch: self.check_tags_delete,
                allow_untagged: self.allow_non_tagged_files,
                update_album_name: self.update_album_name,
            },
            ..EngineOptions::default()
        }
    }

    pub fn search_filters(&self) -> SearchFilters {
        let extensions = if self.search_file_extensions.is_empty() {
            MEDIA_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
        } else {
            self.search_file_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect()
        };
        SearchFilters {
            extensions,
            exclude_names: self
                .filter_out_file_names
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            max_size_mb: self.max_file_size,
            min_artist_match: self.search_match_artist,
            min_album_match: self.search_match_album,
            min_track_match: self.search_match_track,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            listen_port: self.listen_port,
        }
    }

    pub fn group_mode(&self) -> GroupMode {
        GroupMode::from_flags(self.grouped_downloads, self.download_singles)
    }

    /// The single library followed by the listed ones, blanks dropped.
    pub fn library_options(&self) -> LibraryOptions {
        LibraryOptions {
            roots: self
                .music_library
                .iter()
                .chain(self.music_libraries.iter())
                .filter(|root| !root.as_os_str().is_empty())
                .cloned()
                .collect(),
            match_threshold: self.music_library_match,
            quick_match: self.music_library_quick_match,
        }
    }

    /// The schedule expression, when one is set.
    pub fn cron_expression(&self) -> Option<&str> {
        self.cron.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn share_chunk_delay(&self) -> Option<Duration> {
        self.share_chunk_delay_ms.map(Duration::from_millis)
    }

    /// The search term given directly, followed by the lines of the search file.
    pub async fn search_terms(&self) -> std::io::Result<Vec<String>> {
        let mut terms = Vec::new();
        if let Some(term) = self
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
        {
            terms.push(term.to_string());
        }
        if let Some(path) = &self.search_file_path {
            let content = tokio::fs::read_to_string(path).await?;
            terms.extend(parse_search_lines(&content));
        }
        Ok(terms)
    }

    pub async fn batch_options(&self) -> std::io::Result<BatchOptions> {
        Ok(BatchOptions {
            search_terms: self.search_terms().await?,
            delimiter: self.search_delimiter.clone(),
            mode: self.group_mode(),
            singles: self.download_singles,
            filters: self.search_filters(),
            credentials: self.credentials(),
            library: self.library_options(),
            output_status: self.output_status,
        })
    }
}
