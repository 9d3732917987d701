//! Re-running the whole download on a cron schedule.

use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use log::{error, info};
use tokio_util::sync::CancellationToken;

/// Parses a cron expression.
///
/// Six or seven fields starting with seconds are taken as they are, with `?` accepted
/// for an unset day field. Classic five-field expressions fire at second zero.
pub fn parse_schedule(expression: &str) -> Result<Schedule, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.is_empty() {
        return Err("Empty cron expression".to_string());
    }
    let normalized = fields.join(" ").replace('?', "*");
    let normalized = if fields.len() == 5 {
        format!("0 {}", normalized)
    } else {
        normalized
    };
    Schedule::from_str(&normalized)
        .map_err(|e| format!("Invalid cron expression '{}': {}", expression, e))
}

/// The first time `schedule` fires strictly after `now`.
pub fn next_run_after<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(now).next()
}

/// Runs `job` every time `schedule` fires, until `stop` is cancelled.
///
/// Runs never overlap: the next fire time is looked up once the previous run is done,
/// and fire times that passed in the meantime are skipped. A failed run is logged and
/// the schedule carries on.
///
/// # Returns
///
/// The number of runs started.
pub async fn run_scheduled<F, Fut>(schedule: &Schedule, stop: &CancellationToken, mut job: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
{
    let mut runs = 0;
    loop {
        let now = Local::now();
        let Some(next) = next_run_after(schedule, &now) else {
            info!("Schedule has no further runs");
            return runs;
        };
        info!("Next run at {}", next.format("%Y-%m-%d %H:%M:%S"));
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = stop.cancelled() => return runs,
            _ = tokio::time::sleep(wait) => {}
        }

        runs += 1;
        if let Err(e) = job().await {
            error!("Scheduled run failed: {}", e);
        }
        if stop.is_cancelled() {
            return runs;
        }
    }
}
