//! The live status view.
//!
//! Once a second the reporter takes a snapshot of the engine and redraws it at the top of
//! the terminal. It only reads the engine's registries, so workers that appear or finish
//! between two frames simply show up in the next one.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveTo;
use crossterm::{execute, queue};
use crossterm::terminal::{self, Clear, ClearType};
use log::debug;
use tokio::task::JoinHandle;

use crate::downloader::{CounterSnapshot, Downloader, ProgressRecord, WorkerStatus};

/// Width of the progress bar, in characters.
const BAR_WIDTH: usize = 50;
/// Only the tail of long file names is shown.
const NAME_WIDTH: usize = 50;
/// A downloading worker whose progress has not moved for this long is flagged.
const STALE_AFTER: Duration = Duration::from_secs(5);
const TOP_ERRORS: usize = 5;

/// Everything one frame shows, copied out of the engine.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub counters: CounterSnapshot,
    pub current_search: String,
    pub queue_depth: usize,
    pub workers: Vec<ProgressRecord>,
    pub errors: Vec<(String, usize)>,
    pub taken_at: Instant,
}

impl StatusView {
    pub async fn capture(downloader: &Downloader) -> Self {
        Self {
            counters: downloader.counters(),
            current_search: downloader.current_search().await,
            queue_depth: downloader.queue_depth().await,
            workers: downloader.progress(),
            errors: downloader.top_errors(TOP_ERRORS),
            taken_at: Instant::now(),
        }
    }

    fn is_stale(&self, record: &ProgressRecord) -> bool {
        record.status == WorkerStatus::Downloading
            && self.taken_at.saturating_duration_since(record.last_updated) > STALE_AFTER
    }

    fn active_downloads(&self) -> usize {
        self.workers
            .iter()
            .filter(|r| r.status == WorkerStatus::Downloading && !self.is_stale(r))
            .count()
    }
}

/// Renders `view` as text, every line cut or padded to `width` characters.
pub fn render_status(view: &StatusView, width: usize) -> String {
    let c = &view.counters;
    let mut lines = vec![
        format!(
            "Seeked: {} (success: {}) / {}",
            c.seeked, c.succeeded, c.total_terms
        ),
        format!("Currently seeking: {}", view.current_search),
        format!("Queue: {}", view.queue_depth),
        format!("Skipped already downloaded: {}", c.skipped_duplicate),
        format!("Incorrect tagged: {}", c.mismatched_tags),
        format!("Active downloads: {}", view.active_downloads()),
        format!("Successful downloads: {}", c.downloaded),
    ];

    for record in &view.workers {
        lines.push(worker_line(view, record));
    }
    for (message, count) in &view.errors {
        lines.push(format!("Error {}x, {}", count, message));
    }

    let mut out = String::new();
    for line in lines {
        out.push_str(&fit(&line, width));
        out.push('\n');
    }
    out
}

fn worker_line(view: &StatusView, record: &ProgressRecord) -> String {
    let mut line = format!("Thread {}: {}", record.worker_id, record.status);
    if let Some(mode) = record.buffer_mode {
        line.push_str(&format!(" ({})", mode));
    }
    line.push_str(&format!(
        ", Download speed: {}KBps",
        (record.average_speed / 1000.0) as u64
    ));

    if record.status == WorkerStatus::Downloading && !record.filename.is_empty() {
        line.push_str(&format!(
            ", Downloading [{} / {}] {} [{}] {}%",
            record.candidate_index,
            record.candidate_total,
            tail(&record.filename, NAME_WIDTH),
            progress_bar(record.percent),
            record.percent
        ));
        if view.is_stale(record) {
            let idle = view.taken_at.saturating_duration_since(record.last_updated);
            line.push_str(&format!(" (no progress for {}s)", idle.as_secs()));
        }
    }
    line
}

fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * BAR_WIDTH) / 100;
    format!("{}{}", "=".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

/// The last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Cuts `line` to `width` characters, padding shorter lines so they overwrite the last frame.
fn fit(line: &str, width: usize) -> String {
    let mut fitted: String = line.chars().take(width).collect();
    let len = fitted.chars().count();
    fitted.extend(std::iter::repeat_n(' ', width - len));
    fitted
}

fn draw(frame: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, MoveTo(0, 0))?;
    stdout.write_all(frame.as_bytes())?;
    queue!(stdout, Clear(ClearType::FromCursorDown))?;
    stdout.flush()
}

/// Redraws the status view every `interval` until the engine is stopped.
pub fn spawn_reporter(downloader: Downloader, interval: Duration) -> JoinHandle<()> {
    let stop = downloader.stop_token();
    tokio::spawn(async move {
        let _ = execute!(io::stdout(), Clear(ClearType::All));
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let view = StatusView::capture(&downloader).await;
            // Leave the last column free so lines never wrap.
            let (cols, _) = terminal::size().unwrap_or((80, 24));
            let width = (cols as usize).saturating_sub(1).max(1);
            if let Err(e) = draw(&render_status(&view, width)) {
                debug!("Failed to draw status view: {}", e);
            }
        }
    })
}
