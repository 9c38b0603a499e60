//! Aggregation handler: recompute per-metric statistics over all readings.
//!
//! Every metric in [`TRACKED_METRICS`] is summarized over the whole
//! `sensor_data` table and upserted into `aggregated_stats`. Each metric's
//! upsert commits on its own before the next metric is processed, so a
//! failure part-way through leaves earlier metrics updated and later ones
//! untouched. A metric with no values is skipped rather than stored as nulls.

use thiserror::Error;
use tracing::debug;

use crate::models::{Metric, StatUpdate, TRACKED_METRICS};
use crate::store::{Session, Store, StoreError, Upsert};

// ---

/// What happened to one metric during a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatOutcome {
    Inserted(StatUpdate),
    Updated(StatUpdate),
    /// No readings carried a value for the metric.
    Skipped,
}

#[derive(Debug, Default)]
pub struct AggregateReport {
    pub outcomes: Vec<(Metric, StatOutcome)>,
}

impl AggregateReport {
    // ---
    #[cfg(test)]
    pub fn outcome(&self, metric: Metric) -> Option<StatOutcome> {
        self.outcomes
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, outcome)| *outcome)
    }

    pub fn written(&self) -> usize {
        self.committed().len()
    }

    fn committed(&self) -> Vec<Metric> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, StatOutcome::Skipped))
            .map(|(m, _)| *m)
            .collect()
    }
}

/// A pass that stopped early.
#[derive(Debug, Error)]
#[error("aggregation stopped at {}: {source}", .metric.map_or("connect", Metric::stat_type))]
pub struct AggregateError {
    /// Metric being processed, `None` if no connection could be acquired.
    pub metric: Option<Metric>,
    /// Metrics whose stats were committed before the failure.
    pub committed: Vec<Metric>,
    #[source]
    pub source: StoreError,
}

/// Recompute and upsert stats for every tracked metric.
pub async fn run<S: Store>(store: &S) -> Result<AggregateReport, AggregateError> {
    // ---
    let mut session = store.open().await.map_err(|source| AggregateError {
        metric: None,
        committed: Vec::new(),
        source,
    })?;

    let mut report = AggregateReport::default();

    for metric in TRACKED_METRICS {
        let outcome = match aggregate_metric(&mut session, metric).await {
            Ok(outcome) => outcome,
            Err(source) => {
                return Err(AggregateError {
                    metric: Some(metric),
                    committed: report.committed(),
                    source,
                })
            }
        };
        report.outcomes.push((metric, outcome));
    }

    Ok(report)
}

async fn aggregate_metric<C: Session>(
    session: &mut C,
    metric: Metric,
) -> Result<StatOutcome, StoreError> {
    // ---
    let summary = session.summarize(metric).await?;

    let Some(update) = summary.to_update(metric) else {
        debug!(%metric, "No values to aggregate, skipping");
        return Ok(StatOutcome::Skipped);
    };

    let outcome = match session.upsert_stat(&update).await? {
        Upsert::Inserted => StatOutcome::Inserted(update),
        Upsert::Updated => StatOutcome::Updated(update),
    };

    debug!(
        %metric,
        average = update.average,
        min = update.min_value,
        max = update.max_value,
        count = update.count,
        "Stat upserted"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{AggregatedStat, Reading};
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn reading(co2: f64, temperature: f64, humidity: f64) -> Reading {
        Reading {
            co2_level: co2,
            temperature,
            humidity,
            timestamp: Utc::now(),
        }
    }

    fn assert_stat(stat: &AggregatedStat, average: f64, min: f64, max: f64, count: i64) {
        assert_eq!(stat.average, average, "average of {}", stat.stat_type);
        assert_eq!(stat.min_value, min, "min of {}", stat.stat_type);
        assert_eq!(stat.max_value, max, "max of {}", stat.stat_type);
        assert_eq!(stat.count, count, "count of {}", stat.stat_type);
    }

    #[tokio::test]
    async fn test_known_values_aggregate_exactly() {
        // ---
        let store = MemoryStore::with_readings([
            reading(100.0, 100.0, 100.0),
            reading(200.0, 200.0, 200.0),
            reading(300.0, 300.0, 300.0),
        ]);

        let report = assert_ok!(run(&store).await);

        assert_eq!(report.written(), 3);
        for metric in TRACKED_METRICS {
            let stat = store.stat(metric).unwrap();
            assert_eq!(stat.stat_type, metric.stat_type());
            assert_stat(&stat, 200.0, 100.0, 300.0, 3);
        }
    }

    #[tokio::test]
    async fn test_averages_are_rounded() {
        // ---
        let store = MemoryStore::with_readings([
            reading(400.0, 20.0, 40.0),
            reading(400.0, 20.0, 40.0),
            reading(400.01, 21.0, 41.0),
        ]);

        assert_ok!(run(&store).await);

        assert_stat(&store.stat(Metric::Co2Level).unwrap(), 400.0, 400.0, 400.01, 3);
        assert_stat(&store.stat(Metric::Temperature).unwrap(), 20.33, 20.0, 21.0, 3);
        assert_stat(&store.stat(Metric::Humidity).unwrap(), 40.33, 40.0, 41.0, 3);
    }

    #[tokio::test]
    async fn test_empty_store_writes_nothing() {
        // ---
        let store = MemoryStore::new();

        let report = assert_ok!(run(&store).await);

        assert_eq!(report.written(), 0);
        for metric in TRACKED_METRICS {
            assert_eq!(report.outcome(metric), Some(StatOutcome::Skipped));
        }
        assert_eq!(store.stat_count(), 0);
    }

    #[tokio::test]
    async fn test_first_pass_inserts_then_updates() {
        // ---
        let store = MemoryStore::with_readings([reading(500.0, 25.0, 50.0)]);

        let first = assert_ok!(run(&store).await);
        assert!(matches!(
            first.outcome(Metric::Humidity),
            Some(StatOutcome::Inserted(_))
        ));

        let second = assert_ok!(run(&store).await);
        assert!(matches!(
            second.outcome(Metric::Humidity),
            Some(StatOutcome::Updated(_))
        ));
        assert_eq!(store.stat_count(), 3);
    }

    #[tokio::test]
    async fn test_repeated_pass_is_idempotent() {
        // ---
        let store = MemoryStore::with_readings([
            reading(350.5, 19.25, 45.0),
            reading(420.75, 27.5, 66.1),
        ]);

        assert_ok!(run(&store).await);
        let first: Vec<_> = TRACKED_METRICS.map(|m| store.stat(m).unwrap()).into();

        assert_ok!(run(&store).await);
        let second: Vec<_> = TRACKED_METRICS.map(|m| store.stat(m).unwrap()).into();

        for (a, b) in first.iter().zip(&second) {
            assert_stat(b, a.average, a.min_value, a.max_value, a.count);
            assert!(b.last_updated >= a.last_updated);
        }
    }

    #[tokio::test]
    async fn test_new_readings_refresh_stats() {
        // ---
        let store = MemoryStore::with_readings([reading(300.0, 18.0, 30.0)]);
        assert_ok!(run(&store).await);

        let mut session = assert_ok!(store.open().await);
        assert_ok!(session.insert_reading(&reading(600.0, 30.0, 70.0)).await);
        drop(session);

        assert_ok!(run(&store).await);
        assert_stat(&store.stat(Metric::Co2Level).unwrap(), 450.0, 300.0, 600.0, 2);
    }

    #[tokio::test]
    async fn test_each_metric_commits_independently() {
        // ---
        let store = MemoryStore::with_readings([reading(100.0, 20.0, 40.0)]);
        store.fail_upserts_for(Metric::Temperature);

        let err = assert_err!(run(&store).await);

        assert_eq!(err.metric, Some(Metric::Temperature));
        assert_eq!(err.committed, vec![Metric::Co2Level]);
        assert!(store.stat(Metric::Co2Level).is_some());
        assert!(store.stat(Metric::Temperature).is_none());
        // The pass stops at the first failure
        assert!(store.stat(Metric::Humidity).is_none());
    }

    #[tokio::test]
    async fn test_connection_failure_is_returned() {
        // ---
        let store = MemoryStore::with_readings([reading(100.0, 20.0, 40.0)]);
        store.refuse_connections();

        let err = assert_err!(run(&store).await);

        assert_eq!(err.metric, None);
        assert!(err.committed.is_empty());
        assert!(matches!(err.source, StoreError::Connection(_)));
        assert!(err.to_string().starts_with("aggregation stopped at connect"));
        assert_eq!(store.stat_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_released_on_error() {
        // ---
        let store = MemoryStore::with_readings([reading(100.0, 20.0, 40.0)]);
        store.fail_upserts_for(Metric::Co2Level);

        assert_err!(run(&store).await);
        assert_eq!(store.open_sessions(), 0);
    }
}
