//! Change feed driving the aggregation handler.
//!
//! A statement-level trigger on `sensor_data` publishes a notification on
//! [`CHANGE_CHANNEL`] for every insert, update or delete. Notifications that
//! arrive within the batch window of the first one are coalesced into a
//! single aggregation pass. Notifications sent while the listener is
//! disconnected are lost, so a catch-up pass runs at startup and after every
//! re-subscription.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPool};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::handlers::aggregate::{self, StatOutcome};
use crate::schema::CHANGE_CHANNEL;
use crate::store::Store;

// ---

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Serialized change descriptions received for one aggregation pass.
///
/// An empty batch marks a catch-up pass.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    payloads: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeNotice {
    operation: String,
}

impl ChangeBatch {
    // ---
    pub fn push(&mut self, payload: impl Into<String>) {
        self.payloads.push(payload.into());
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Count of notifications per SQL operation, for logging only.
    pub fn operations(&self) -> BTreeMap<String, usize> {
        // ---
        let mut ops = BTreeMap::new();
        for payload in &self.payloads {
            let op = serde_json::from_str::<ChangeNotice>(payload)
                .map(|n| n.operation)
                .unwrap_or_else(|_| "UNKNOWN".to_string());
            *ops.entry(op).or_insert(0) += 1;
        }
        ops
    }
}

/// A live subscription to change notifications.
#[async_trait]
pub trait ChangeSource: Send {
    /// Next notification payload; `Ok(None)` once the connection is lost.
    async fn next_change(&mut self) -> Result<Option<String>, sqlx::Error>;
}

/// Opens subscriptions to the change channel.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    type Source: ChangeSource;

    async fn subscribe(&self) -> Result<Self::Source>;
}

#[async_trait]
impl ChangeSource for PgListener {
    async fn next_change(&mut self) -> Result<Option<String>, sqlx::Error> {
        Ok(self.try_recv().await?.map(|n| n.payload().to_string()))
    }
}

#[async_trait]
impl ChangeFeed for PgPool {
    type Source = PgListener;

    async fn subscribe(&self) -> Result<PgListener> {
        // ---
        let mut listener = PgListener::connect_with(self)
            .await
            .context("Failed to open change listener connection")?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .with_context(|| format!("Failed to LISTEN on '{CHANGE_CHANNEL}'"))?;
        Ok(listener)
    }
}

/// Listen for change notifications and aggregate after each batch, forever.
///
/// Returns only if the initial subscription cannot be established. Later
/// losses are retried until a new subscription succeeds, followed by a
/// catch-up pass.
pub async fn run<F, S>(feed: F, store: S, batch_window: Duration) -> Result<()>
where
    F: ChangeFeed,
    S: Store,
{
    // ---
    let mut source = feed.subscribe().await?;

    info!(
        channel = CHANGE_CHANNEL,
        batch_window_ms = batch_window.as_millis() as u64,
        "Listening for sensor data changes"
    );

    invoke(&store, &ChangeBatch::default()).await;

    loop {
        let lost = match source.next_change().await {
            Ok(Some(first)) => {
                let mut batch = ChangeBatch::default();
                batch.push(first);
                let lost = collect_batch(&mut source, &mut batch, batch_window).await;
                invoke(&store, &batch).await;
                lost
            }
            Ok(None) => {
                warn!("Change listener connection lost");
                true
            }
            Err(e) => {
                error!(error = %e, "Change listener failed");
                true
            }
        };

        if lost {
            source = resubscribe(&feed).await;
            invoke(&store, &ChangeBatch::default()).await;
        }
    }
}

/// Retry until a new subscription is in place.
async fn resubscribe<F: ChangeFeed>(feed: &F) -> F::Source {
    // ---
    loop {
        match feed.subscribe().await {
            Ok(source) => {
                info!("Change listener re-established");
                return source;
            }
            Err(e) => {
                error!("Failed to re-subscribe to changes: {:#}", e);
                time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Drain further notifications until `window` has elapsed since the first.
///
/// Returns `true` if the subscription was lost while collecting.
async fn collect_batch<C: ChangeSource>(
    source: &mut C,
    batch: &mut ChangeBatch,
    window: Duration,
) -> bool {
    // ---
    let deadline = Instant::now() + window;

    let lost = loop {
        match time::timeout_at(deadline, source.next_change()).await {
            Ok(Ok(Some(payload))) => batch.push(payload),
            Ok(Ok(None)) => {
                warn!("Change listener connection lost while batching");
                break true;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Change listener failed while batching");
                break true;
            }
            Err(_) => break false,
        }
    };

    debug!(notifications = batch.len(), "Change batch collected");
    lost
}

/// One aggregation invocation; every outcome ends in a log line.
pub(crate) async fn invoke<S: Store>(store: &S, batch: &ChangeBatch) {
    // ---
    let span = info_span!("aggregate", invocation_id = %Uuid::new_v4());

    async move {
        if batch.is_empty() {
            info!("Running catch-up aggregation");
        } else {
            info!(
                notifications = batch.len(),
                operations = ?batch.operations(),
                "Changes detected in sensor_data"
            );
        }

        match aggregate::run(store).await {
            Ok(report) => {
                for (metric, outcome) in &report.outcomes {
                    match outcome {
                        StatOutcome::Inserted(s) => info!(
                            %metric, average = s.average, min = s.min_value,
                            max = s.max_value, count = s.count, "Inserted stats"
                        ),
                        StatOutcome::Updated(s) => info!(
                            %metric, average = s.average, min = s.min_value,
                            max = s.max_value, count = s.count, "Updated stats"
                        ),
                        StatOutcome::Skipped => info!(%metric, "No readings, stats left unset"),
                    }
                }
                debug!(written = report.written(), "Aggregation pass complete");
            }
            Err(e) => error!(
                error = %e,
                committed = ?e.committed,
                "Error while updating stats"
            ),
        }
    }
    .instrument(span)
    .await
}
