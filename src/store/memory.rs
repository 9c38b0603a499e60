//! In-memory store with fault injection, used by handler tests.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;

use super::{Session, Store, StoreError, Upsert};
use crate::models::{AggregatedStat, Metric, MetricSummary, Reading, StatUpdate};

// ---

#[derive(Debug, Default)]
struct State {
    readings: Vec<Reading>,
    stats: BTreeMap<String, AggregatedStat>,
    refuse_connections: bool,
    failing_inserts: HashSet<usize>,
    insert_attempts: usize,
    failing_upsert: Option<Metric>,
    open_sessions: usize,
}

/// Cloneable handle; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn with_readings(readings: impl IntoIterator<Item = Reading>) -> Self {
        let store = Self::new();
        store.lock().readings.extend(readings);
        store
    }

    /// Make every subsequent [`Store::open`] fail.
    pub fn refuse_connections(&self) {
        self.lock().refuse_connections = true;
    }

    /// Fail the insert attempts with these zero-based indices.
    pub fn fail_inserts(&self, attempts: impl IntoIterator<Item = usize>) {
        self.lock().failing_inserts.extend(attempts);
    }

    /// Fail every upsert for `metric`.
    pub fn fail_upserts_for(&self, metric: Metric) {
        self.lock().failing_upsert = Some(metric);
    }

    /// Add a reading without going through a session.
    pub fn push_reading(&self, reading: Reading) {
        self.lock().readings.push(reading);
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.lock().readings.clone()
    }

    pub fn stat(&self, metric: Metric) -> Option<AggregatedStat> {
        self.lock().stats.get(metric.stat_type()).cloned()
    }

    pub fn stat_count(&self) -> usize {
        self.lock().stats.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession, StoreError> {
        // ---
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(StoreError::Connection(sqlx::Error::PoolTimedOut));
        }
        state.open_sessions += 1;

        Ok(MemorySession {
            store: self.clone(),
        })
    }
}

pub struct MemorySession {
    store: MemoryStore,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.store.lock().open_sessions -= 1;
    }
}

fn injected(context: &'static str) -> StoreError {
    StoreError::Statement {
        context,
        source: sqlx::Error::Protocol("injected failure".to_string()),
    }
}

#[async_trait]
impl Session for MemorySession {
    // ---
    async fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError> {
        // ---
        let mut state = self.store.lock();
        let attempt = state.insert_attempts;
        state.insert_attempts += 1;

        if state.failing_inserts.contains(&attempt) {
            return Err(injected("failed to insert reading"));
        }
        state.readings.push(reading.clone());
        Ok(())
    }

    async fn summarize(&mut self, metric: Metric) -> Result<MetricSummary, StoreError> {
        // ---
        let state = self.store.lock();
        let values: Vec<f64> = state.readings.iter().map(|r| metric.value_of(r)).collect();

        if values.is_empty() {
            return Ok(MetricSummary::default());
        }

        let sum: f64 = values.iter().sum();
        Ok(MetricSummary {
            average: Some(sum / values.len() as f64),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            count: values.len() as i64,
        })
    }

    async fn upsert_stat(&mut self, update: &StatUpdate) -> Result<Upsert, StoreError> {
        // ---
        let mut state = self.store.lock();
        if state.failing_upsert == Some(update.metric) {
            return Err(injected("failed to update stat"));
        }

        let stat = AggregatedStat {
            stat_type: update.metric.stat_type().to_string(),
            average: update.average,
            min_value: update.min_value,
            max_value: update.max_value,
            count: update.count,
            last_updated: Utc::now(),
        };

        match state.stats.insert(stat.stat_type.clone(), stat) {
            Some(_) => Ok(Upsert::Updated),
            None => Ok(Upsert::Inserted),
        }
    }
}
