use chrono::{Datelike, NaiveDate, Utc};
use market_calendar::{
    AlertBook, CalendarConfig, MarketTracker, PatternEvent, PatternKind, detect_patterns,
};
use rustls::crypto::ring::default_provider;
use std::error::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();

    // Initialize logging
    init_logging();

    let config = CalendarConfig::from_env().inspect_err(|error| {
        error!(%error, "invalid configuration");
    })?;

    info!(
        symbol = %config.symbol,
        live_stream = config.live_stream,
        cache_dir = ?config.cache_dir,
        alerts = config.alerts.len(),
        "starting market calendar feed"
    );

    let mut alerts = AlertBook::with_rules(config.alerts.clone());
    let patterns = config.patterns;
    let alert_interval = config.alert_interval;

    let mut tracker = MarketTracker::from_config(config)?;
    let mut today = Utc::now().date_naive();
    tracker.start(today);

    let mut status = tracker.status();
    let mut poll = interval(alert_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_patterns: Vec<(PatternKind, usize)> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("connection status channel closed");
                    break;
                }
                let current = *status.borrow_and_update();
                info!(status = %current, "depth stream status");
            }
            _ = poll.tick() => {
                let now = Utc::now();
                roll_day(&mut tracker, &mut today, now.date_naive());

                let store = tracker.store();
                let (events, fired) = {
                    let store = store.read();
                    let series = store.series();
                    (
                        detect_patterns(series, &patterns),
                        alerts.evaluate(series, today, now.timestamp_millis()),
                    )
                };

                let summary = summarise(&events);
                if summary != last_patterns {
                    log_patterns(&events);
                    last_patterns = summary;
                }

                for alert in fired {
                    warn!(rule_id = alert.rule_id, "alert triggered: {}", alert);
                }
            }
        }
    }

    tracker.shutdown();
    info!("market calendar feed stopped");
    Ok(())
}

/// Once the UTC date moves past `today`, backfill again so the day just closed gets its
/// complete bar.
fn roll_day(tracker: &mut MarketTracker, today: &mut NaiveDate, now: NaiveDate) {
    if now == *today {
        return;
    }

    info!(previous = %today, %now, "UTC day rolled over");
    tracker.backfill_month(*today);
    if (now.year(), now.month()) != (today.year(), today.month()) {
        tracker.backfill_month(now);
    }
    *today = now;
}

fn summarise(events: &[PatternEvent]) -> Vec<(PatternKind, usize)> {
    events
        .iter()
        .map(|event| (event.kind, event.occurrences.len()))
        .collect()
}

fn log_patterns(events: &[PatternEvent]) {
    if events.is_empty() {
        debug!("no patterns detected");
        return;
    }

    for event in events {
        info!(
            kind = %event.kind,
            severity = %event.severity,
            frequency = %event.frequency,
            occurrences = event.occurrences.len(),
            "{}",
            event.description
        );
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
