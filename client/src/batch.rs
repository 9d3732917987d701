//! Drives a whole run: search every term, rank what comes back and feed the engine.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use seek_core::fuzzy::partial_ratio;
use seek_core::{
    SearchGroup, SearchResult, SearchTerm, SearchTermKind, Transfer, group_search_terms,
};
use seek_network::{Credentials, RankTarget, SearchFilters, rank_candidates};

use crate::downloader::{CounterSnapshot, Downloader, StopRequested};
use crate::reporter::spawn_reporter;
use crate::storage::{DEFAULT_LIBRARY_MATCH, MusicLibrary};

const CONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How ranked results are split into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// One group per candidate file.
    Ungrouped,
    /// One group per search.
    Grouped,
    /// One group per song name.
    Singles,
}

impl GroupMode {
    /// Songs are only split into their own groups when downloads are grouped.
    pub fn from_flags(grouped: bool, singles: bool) -> Self {
        match (grouped, singles) {
            (true, true) => GroupMode::Singles,
            (true, false) => GroupMode::Grouped,
            _ => GroupMode::Ungrouped,
        }
    }
}

/// Local music libraries checked before anything is downloaded.
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub roots: Vec<PathBuf>,
    /// Ratio a library track must exceed to count as the searched one.
    pub match_threshold: u8,
    /// Drop searched tracks the library already holds before searching at all.
    pub quick_match: bool,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            match_threshold: DEFAULT_LIBRARY_MATCH,
            quick_match: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub search_terms: Vec<String>,
    pub delimiter: String,
    pub mode: GroupMode,
    /// Every group stops after its first accepted file.
    pub singles: bool,
    pub filters: SearchFilters,
    pub credentials: Credentials,
    pub library: LibraryOptions,
    /// Draw the live status view while running.
    pub output_status: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            search_terms: Vec::new(),
            delimiter: "-".to_string(),
            mode: GroupMode::Ungrouped,
            singles: false,
            filters: SearchFilters::default(),
            credentials: Credentials::default(),
            library: LibraryOptions::default(),
            output_status: false,
        }
    }
}

/// Searches every term, enqueues what was found and waits for the engine to go idle.
///
/// The engine is stopped before returning, whether the run finished or was interrupted.
pub async fn run_batch(
    downloader: &Downloader,
    options: &BatchOptions,
) -> Result<CounterSnapshot, Box<dyn std::error::Error + Send + Sync>> {
    if !connect_with_retry(downloader, &options.credentials).await {
        return Err("Stopped before a connection could be made".into());
    }

    let reporter = options.output_status.then(|| {
        spawn_reporter(
            downloader.clone(),
            downloader.options().timings.report_interval,
        )
    });

    let terms: Vec<SearchTerm> = options
        .search_terms
        .iter()
        .map(|text| SearchTerm::parse(text, &options.delimiter))
        .collect();
    downloader.add_total_terms(terms.len());

    let listed = downloader.warm_listing().await;
    debug!("Download tree holds {} files", listed);
    let library = MusicLibrary::new(
        options.library.roots.clone(),
        &options.filters.extensions,
        options.library.match_threshold,
    );

    for term_group in group_search_terms(terms) {
        if downloader.is_stopped() {
            break;
        }
        if let Err(e) = search_and_enqueue(downloader, options, &library, &term_group).await {
            debug!("Stopping batch: {}", e);
            break;
        }
    }

    downloader.wait_until_idle().await;
    downloader.request_stop();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    Ok(downloader.counters())
}

/// Connects through the downloader's network, backing off between failed attempts.
///
/// Returns `false` if a stop was requested before the connection succeeded.
async fn connect_with_retry(downloader: &Downloader, credentials: &Credentials) -> bool {
    let network = downloader.network();
    let stop = downloader.stop_token();
    let mut backoff = CONNECT_BACKOFF_START;
    loop {
        if stop.is_cancelled() {
            return false;
        }
        match network.connect(credentials).await {
            Ok(()) => return true,
            Err(e) => {
                warn!("Connect failed: {}. Retrying in {}s", e, backoff.as_secs());
                downloader.record_error(&e);
            }
        }
        tokio::select! {
            _ = stop.cancelled() => return false,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(CONNECT_BACKOFF_MAX);
    }
}

/// The text sent to the network: the artist, plus the album when there is one.
fn search_query(term: &SearchTerm) -> String {
    match term.album.as_deref() {
        Some(album) if !album.trim().is_empty() => format!("{} - {}", term.artist, album),
        _ => term.artist.clone(),
    }
}

/// The terms of `term_group` still worth searching for.
///
/// With quick matching, tracks the library already holds are dropped and counted as
/// skipped. Only terms naming a track can be quick matched.
fn missing_terms<'a>(
    downloader: &Downloader,
    library: &MusicLibrary,
    quick_match: bool,
    term_group: &'a [SearchTerm],
) -> Vec<&'a SearchTerm> {
    let Some(first) = term_group.first() else {
        return Vec::new();
    };
    let names_tracks = matches!(
        first.kind,
        SearchTermKind::ArtistTrack | SearchTermKind::ArtistAlbumTrack
    );
    if !quick_match || !names_tracks {
        return term_group.iter().collect();
    }

    let (owned, missing): (Vec<&SearchTerm>, Vec<&SearchTerm>) =
        term_group.iter().partition(|term| {
            term.song
                .as_deref()
                .is_some_and(|song| library.contains_track(&first.artist, song))
        });
    if !owned.is_empty() {
        debug!(
            "{} of {} tracks of '{}' are already in the library",
            owned.len(),
            term_group.len(),
            first.label()
        );
        downloader.add_skipped_duplicate(owned.len());
    }
    missing
}

async fn search_and_enqueue(
    downloader: &Downloader,
    options: &BatchOptions,
    library: &MusicLibrary,
    term_group: &[SearchTerm],
) -> Result<(), StopRequested> {
    let Some(first) = term_group.first() else {
        return Ok(());
    };
    downloader.set_current_search(&first.label()).await;
    library.load_artist(&first.artist).await;

    let wanted = missing_terms(downloader, library, options.library.quick_match, term_group);
    if wanted.is_empty() {
        downloader.add_seeked(term_group.len());
        return Ok(());
    }

    let query = search_query(first);
    let responses = match downloader.network().search(&query).await {
        Ok(responses) => responses,
        Err(e) => {
            warn!("Search '{}' failed: {}", query, e);
            downloader.record_error(&e);
            downloader.add_seeked(term_group.len());
            if !connect_with_retry(downloader, &options.credentials).await {
                return Err(StopRequested);
            }
            return Ok(());
        }
    };

    let song_names: Vec<String> = wanted
        .iter()
        .filter_map(|term| term.song.clone())
        .filter(|song| !song.is_empty())
        .collect();
    let target = RankTarget {
        artist: &first.artist,
        album: first.album.as_deref(),
        song_names: &song_names,
    };
    let ranked = rank_candidates(
        responses,
        &target,
        &options.filters,
        &|transfer: &Transfer| downloader.is_archived(transfer),
        &|remote_path: &str| {
            downloader.in_download_tree(remote_path)
                || library.contains_file(&first.artist, remote_path)
        },
    );

    if !options.output_status {
        info!("Seeked: '{}', found {} files", first.label(), ranked.len());
    }
    downloader.add_seeked(term_group.len());
    if ranked.is_empty() {
        return Ok(());
    }

    let base = SearchGroup {
        target_artist: first.artist.clone(),
        target_album: first.album.clone(),
        song_names,
        candidates: Vec::new(),
        singles: options.singles,
    };
    let degrouped = options.mode == GroupMode::Singles && !base.song_names.is_empty();
    let groups = build_groups(base, ranked, options.mode, options.filters.min_track_match);
    if groups.is_empty() {
        return Ok(());
    }
    downloader.add_succeeded(if degrouped { groups.len() } else { 1 });
    for group in groups {
        downloader.enqueue(group).await?;
    }
    Ok(())
}

/// Splits `ranked` into the groups handed to the engine.
///
/// `base` carries the target metadata and receives no candidates itself. Groups
/// built in [`GroupMode::Singles`] always stop after their first accepted file.
pub fn build_groups(
    base: SearchGroup,
    ranked: Vec<SearchResult>,
    mode: GroupMode,
    min_track_match: u8,
) -> Vec<SearchGroup> {
    match mode {
        GroupMode::Singles if !base.song_names.is_empty() => base
            .song_names
            .iter()
            .filter_map(|song| {
                let song_lower = song.to_lowercase();
                let mut scored: Vec<(u8, &SearchResult)> = ranked
                    .iter()
                    .map(|result| {
                        let basename = result.basename().unwrap_or_default().to_lowercase();
                        (partial_ratio(&basename, &song_lower), result)
                    })
                    .filter(|(score, _)| *score >= min_track_match)
                    .collect();
                if scored.is_empty() {
                    return None;
                }
                scored.sort_by(|a, b| b.0.cmp(&a.0));
                Some(SearchGroup {
                    song_names: vec![song.clone()],
                    candidates: scored.into_iter().map(|(_, r)| r.clone()).collect(),
                    singles: true,
                    ..base.clone()
                })
            })
            .collect(),
        GroupMode::Grouped | GroupMode::Singles => vec![SearchGroup {
            candidates: ranked,
            singles: base.singles || mode == GroupMode::Singles,
            ..base
        }],
        GroupMode::Ungrouped => ranked
            .into_iter()
            .map(|result| SearchGroup {
                candidates: vec![result],
                ..base.clone()
            })
            .collect(),
    }
}
