//! Ingestion handler: simulate one batch of sensor readings and store them.

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::models::Reading;
use crate::store::{Session, Store, StoreError};

// ---

/// Number of simulated sensors sampled on every tick.
pub const SENSOR_COUNT: usize = 10;

/// Outcome of one ingestion pass.
///
/// Individual write failures do not stop the pass; they are collected here.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub requested: usize,
    pub inserted: usize,
    pub failures: Vec<StoreError>,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.inserted == self.requested
    }
}

/// Generate `count` readings and insert each one as its own row.
///
/// Fails as a whole only when no connection can be acquired.
pub async fn run<S, R>(store: &S, rng: &mut R, count: usize) -> Result<IngestReport, StoreError>
where
    S: Store,
    R: Rng + Send,
{
    // ---
    let mut session = store.open().await?;
    let mut report = IngestReport {
        requested: count,
        ..Default::default()
    };

    for _ in 0..count {
        let reading = Reading::simulate(&mut *rng, Utc::now());

        match session.insert_reading(&reading).await {
            Ok(()) => {
                debug!(
                    co2 = reading.co2_level,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    timestamp = %reading.timestamp,
                    "Reading inserted"
                );
                report.inserted += 1;
            }
            Err(e) => report.failures.push(e),
        }
    }

    Ok(report)
}
