use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use seek_client::batch::run_batch;
use seek_client::cli::Args;
use seek_client::downloader::Downloader;
use seek_client::schedule::{parse_schedule, run_scheduled};
use seek_network::LocalShareNetwork;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    let level = if args.verbose {
        log::LevelFilter::Debug
    } else if args.output_status {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    clog.filter(None, level);
    clog.init();

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, shutting down.");
            on_signal.cancel();
        }
    });

    match args.cron_expression() {
        Some(expression) => {
            let schedule = parse_schedule(expression)?;
            info!("Running on schedule '{}'", expression);
            let (args, shutdown) = (&args, &shutdown);
            let runs = run_scheduled(&schedule, shutdown, move || run_once(args, shutdown)).await;
            info!("Scheduler stopped after {} runs", runs);
            Ok(())
        }
        None => run_once(&args, &shutdown).await,
    }
}

/// One complete run over every search term, on a fresh engine.
async fn run_once(args: &Args, shutdown: &CancellationToken) -> Result<(), BoxError> {
    let batch = args.batch_options().await?;
    if batch.search_terms.is_empty() {
        return Err("No search terms given, use --search-term or --search-file-path".into());
    }

    let mut network = LocalShareNetwork::new(&args.share_root);
    if let Some(delay) = args.share_chunk_delay() {
        network = network.with_chunk_delay(delay);
    }

    let downloader = Downloader::new(Arc::new(network), args.engine_options()).await?;
    info!(
        "Searching {} terms with {} workers",
        batch.search_terms.len(),
        downloader.options().thread_count
    );

    let stopper = downloader.clone();
    let shutdown = shutdown.clone();
    let relay = tokio::spawn(async move {
        shutdown.cancelled().await;
        stopper.request_stop();
    });

    let counters = match run_batch(&downloader, &batch).await {
        Ok(counters) => counters,
        Err(e) => {
            error!("Run aborted: {}", e);
            downloader.counters()
        }
    };
    relay.abort();

    println!(
        "Seeked: {} (success: {}) / {}, downloaded: {}, skipped already downloaded: {}, incorrect tagged: {}",
        counters.seeked,
        counters.succeeded,
        counters.total_terms,
        counters.downloaded,
        counters.skipped_duplicate,
        counters.mismatched_tags
    );
    for (message, count) in downloader.top_errors(5) {
        println!("Error {}x, {}", count, message);
    }
    Ok(())
}
