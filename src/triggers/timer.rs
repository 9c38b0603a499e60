//! Wall-clock timer driving the ingestion handler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::handlers::{ingest, SENSOR_COUNT};
use crate::store::Store;

// ---

/// Ticks land on :00 and :30 of every minute.
pub const INTERVAL: Duration = Duration::from_secs(30);

/// Lateness beyond which a tick is reported as past due.
pub const PAST_DUE_TOLERANCE: Duration = Duration::from_secs(1);

/// Details passed along with each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    pub past_due: bool,
}

/// Time from `now` until the next multiple of `period` since the Unix epoch.
///
/// Never zero, so nothing fires at startup.
pub fn delay_until_aligned(now: DateTime<Utc>, period: Duration) -> Duration {
    // ---
    let period_ms = period.as_millis().max(1) as i64;
    let into_period = now.timestamp_millis().rem_euclid(period_ms);
    Duration::from_millis((period_ms - into_period) as u64)
}

pub fn is_past_due(scheduled: Instant, fired: Instant) -> bool {
    fired.saturating_duration_since(scheduled) >= PAST_DUE_TOLERANCE
}

/// Interval whose first tick is `first` from now.
///
/// Missed ticks are dropped rather than delayed, so later ticks keep the
/// phase of the first one.
fn ticker(first: Duration) -> Interval {
    // ---
    let mut ticker = time::interval_at(Instant::now() + first, INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Fire one ingestion invocation per tick, forever.
///
/// Invocations are spawned so a slow one never delays the next tick.
pub async fn run<S>(store: S)
where
    S: Store + Clone + 'static,
{
    // ---
    let first = delay_until_aligned(Utc::now(), INTERVAL);
    let mut ticker = ticker(first);

    info!(
        interval_secs = INTERVAL.as_secs(),
        first_tick_in_ms = first.as_millis() as u64,
        "Ingestion timer started"
    );

    loop {
        let scheduled = ticker.tick().await;
        let timer = TimerInfo {
            past_due: is_past_due(scheduled, Instant::now()),
        };
        tokio::spawn(invoke(store.clone(), timer));
    }
}

/// One ingestion invocation; every outcome ends in a log line.
pub(crate) async fn invoke<S: Store>(store: S, timer: TimerInfo) {
    // ---
    let span = info_span!("ingest", invocation_id = %Uuid::new_v4());

    async move {
        if timer.past_due {
            info!("The timer is past due");
        }

        let mut rng = StdRng::from_entropy();
        match ingest::run(&store, &mut rng, SENSOR_COUNT).await {
            Ok(report) => {
                for e in &report.failures {
                    error!(error = %e, "Error inserting reading");
                }
                if report.is_complete() {
                    info!(inserted = report.inserted, "Sensor readings stored");
                } else {
                    warn!(
                        inserted = report.inserted,
                        failed = report.failed(),
                        requested = report.requested,
                        "Sensor readings partially stored"
                    );
                }
            }
            Err(e) => error!(error = %e, "Ingestion failed"),
        }
    }
    .instrument(span)
    .await
}
