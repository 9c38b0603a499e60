//! Data models for the environmental sensor pipeline.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

// ---

/// Metrics tracked by the aggregation handler, in processing order.
pub const TRACKED_METRICS: [Metric; 3] = [Metric::Co2Level, Metric::Temperature, Metric::Humidity];

/// One of the three values carried by every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Co2Level,
    Temperature,
    Humidity,
}

impl Metric {
    // ---
    /// Name stored in `aggregated_stats.stat_type`.
    pub fn stat_type(self) -> &'static str {
        match self {
            Metric::Co2Level => "CO2Level",
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
        }
    }

    /// Column holding this metric in `sensor_data`.
    ///
    /// Only ever interpolated into SQL from this closed set.
    pub fn column(self) -> &'static str {
        match self {
            Metric::Co2Level => "co2_level",
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
        }
    }

    /// Plausible range the simulator draws from.
    pub fn range(self) -> RangeInclusive<f64> {
        match self {
            Metric::Co2Level => 300.0..=600.0, // ppm
            Metric::Temperature => 18.0..=30.0, // °C
            Metric::Humidity => 30.0..=70.0,   // %
        }
    }

    #[cfg(test)]
    pub fn value_of(self, reading: &Reading) -> f64 {
        match self {
            Metric::Co2Level => reading.co2_level,
            Metric::Temperature => reading.temperature,
            Metric::Humidity => reading.humidity,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stat_type())
    }
}

/// Error returned when a string names no tracked metric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stat type '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TRACKED_METRICS
            .into_iter()
            .find(|m| m.stat_type() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// One synthetic sensor sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    // ---
    pub co2_level: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    // ---
    /// Draw a reading with every field uniform over its metric's range.
    pub fn simulate<R: Rng>(rng: &mut R, timestamp: DateTime<Utc>) -> Self {
        // ---
        let mut draw = |metric: Metric| round2(rng.gen_range(metric.range()));

        Reading {
            co2_level: draw(Metric::Co2Level),
            temperature: draw(Metric::Temperature),
            humidity: draw(Metric::Humidity),
            timestamp,
        }
    }
}

/// Raw aggregate over one column, as the store computes it.
///
/// `average`, `min` and `max` are `None` when the column holds no values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricSummary {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: i64,
}

impl MetricSummary {
    // ---
    /// Rounded values to persist, or `None` when there is nothing to record.
    pub fn to_update(&self, metric: Metric) -> Option<StatUpdate> {
        // ---
        if self.count == 0 {
            return None;
        }

        match (self.average, self.min, self.max) {
            (Some(average), Some(min), Some(max)) => Some(StatUpdate {
                metric,
                average: round2(average),
                min_value: round2(min),
                max_value: round2(max),
                count: self.count,
            }),
            _ => None,
        }
    }
}

/// Values written by one upsert into `aggregated_stats`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatUpdate {
    pub metric: Metric,
    pub average: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub count: i64,
}

/// Persisted rolling summary for one metric
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct AggregatedStat {
    // ---
    pub stat_type: String,
    pub average: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub count: i64,
    pub last_updated: DateTime<Utc>,
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
