use crate::workflow::CrawlWorkflow;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const HOUR: Duration = Duration::from_secs(3600);

// Runs forever: one crawl at the top of every hour. Runs are awaited here,
// so a slow run delays the next trigger instead of overlapping it.
pub async fn run_hourly(workflow: Arc<CrawlWorkflow>, run_on_start: bool) {
    info!("Starting hourly crawl schedule...");

    if run_on_start {
        info!("Running once at startup");
        let outcome = workflow.run_once().await;
        info!("Startup run finished: {}", outcome.label());
    }

    loop {
        let target = next_top_of_hour(&Local::now());
        info!("Next crawl at {}", target.to_rfc3339());
        // sleep() runs on the monotonic clock; if the wall clock was stepped while
        // we slept, wake short of the hour and go back to sleep
        while let Some(wait) = remaining(&Local::now(), &target) {
            sleep(wait).await;
        }

        let outcome = workflow.run_once().await;
        info!("Scheduled run finished: {}", outcome.label());
    }
}

/// The next `HH:00:00` strictly after `now`, in `now`'s time zone.
pub fn next_top_of_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let wait = TimeDelta::from_std(until_next_hour(now)).unwrap_or_else(|_| TimeDelta::hours(1));
    now.clone() + wait
}

/// Wall-clock time still to go before `target`, or `None` once it has been reached.
pub fn remaining<Tz: TimeZone>(now: &DateTime<Tz>, target: &DateTime<Tz>) -> Option<Duration> {
    (target.clone() - now.clone())
        .to_std()
        .ok()
        .filter(|left| !left.is_zero())
}

/// Time left until the next `HH:00:00` in `now`'s time zone.
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_hour = Duration::from_secs(u64::from(now.minute() * 60 + now.second()))
        // nanosecond() exceeds 1e9 during a leap second
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    HOUR - into_hour
}
