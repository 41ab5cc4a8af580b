//! Snapshot and series point types, plus lenient parsing of raw captures.
//!
//! A capture may observe any subset of the numeric metrics, so every metric
//! is optional. The set of metrics is listed once in
//! [`SNAPSHOT_NUMERIC_FIELDS`]; merge and emptiness checks iterate that
//! table instead of naming fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamps below this value are taken to be seconds, not milliseconds.
pub const SECONDS_THRESHOLD: i64 = 1_000_000_000_000;

/// Normalize an epoch timestamp to milliseconds.
///
/// Returns `None` for non-positive values and on overflow.
#[must_use]
pub fn normalize_timestamp(t: i64) -> Option<i64> {
    if t <= 0 {
        None
    } else if t < SECONDS_THRESHOLD {
        t.checked_mul(1_000)
    } else {
        Some(t)
    }
}

// ---------------------------------------------------------------------------
// Metric table
// ---------------------------------------------------------------------------

/// One numeric metric carried by a [`Snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Views,
    UniqueViews,
    Likes,
    Comments,
    Remixes,
}

/// Every numeric snapshot field, in persisted order.
pub const SNAPSHOT_NUMERIC_FIELDS: [Metric; 5] = [
    Metric::Views,
    Metric::UniqueViews,
    Metric::Likes,
    Metric::Comments,
    Metric::Remixes,
];

impl Metric {
    /// Persisted field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Views => "views",
            Self::UniqueViews => "uv",
            Self::Likes => "likes",
            Self::Comments => "comments",
            Self::Remixes => "remix_count",
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Metrics observed for one post at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Epoch milliseconds.
    pub t: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remix_count: Option<u64>,
}

impl Snapshot {
    /// A snapshot at `t` with no metrics.
    #[must_use]
    pub const fn at(t: i64) -> Self {
        Self {
            t,
            views: None,
            uv: None,
            likes: None,
            comments: None,
            remix_count: None,
        }
    }

    /// Builder-style setter used by tests and importers.
    #[must_use]
    pub fn with(mut self, metric: Metric, value: u64) -> Self {
        *self.slot_mut(metric) = Some(value);
        self
    }

    /// Value of one metric.
    #[must_use]
    pub const fn get(&self, metric: Metric) -> Option<u64> {
        match metric {
            Metric::Views => self.views,
            Metric::UniqueViews => self.uv,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Remixes => self.remix_count,
        }
    }

    /// Mutable slot of one metric.
    pub const fn slot_mut(&mut self, metric: Metric) -> &mut Option<u64> {
        match metric {
            Metric::Views => &mut self.views,
            Metric::UniqueViews => &mut self.uv,
            Metric::Likes => &mut self.likes,
            Metric::Comments => &mut self.comments,
            Metric::Remixes => &mut self.remix_count,
        }
    }

    /// `true` if at least one metric was observed.
    #[must_use]
    pub fn has_metrics(&self) -> bool {
        SNAPSHOT_NUMERIC_FIELDS
            .iter()
            .any(|metric| self.get(*metric).is_some())
    }

    /// Parse a raw capture leniently.
    ///
    /// Returns `None` when the value is not an object or carries no usable
    /// timestamp. Individual metric fields that fail to parse are dropped.
    /// The timestamp is normalized to milliseconds.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let t = object
            .get("t")
            .and_then(parse_i64)
            .and_then(normalize_timestamp)?;

        let mut snapshot = Self::at(t);
        for metric in SNAPSHOT_NUMERIC_FIELDS {
            *snapshot.slot_mut(metric) = object.get(metric.name()).and_then(parse_count);
        }
        Some(snapshot)
    }
}

// ---------------------------------------------------------------------------
// SeriesPoint
// ---------------------------------------------------------------------------

/// One point of a follower or cameo count series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Epoch milliseconds.
    pub t: i64,
    pub count: u64,
}

impl SeriesPoint {
    #[must_use]
    pub const fn new(t: i64, count: u64) -> Self {
        Self { t, count }
    }
}

// ---------------------------------------------------------------------------
// Lenient number parsing
// ---------------------------------------------------------------------------

/// Parse a count that may arrive as a number or a formatted string (`"1,204"`).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f < 1.8e19)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(raw) => {
            let cleaned: String = raw
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '_')
                .collect();
            cleaned.parse::<u64>().ok()
        }
        _ => None,
    }
}

/// Parse an epoch timestamp from a number or numeric string.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < 9.2e18)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}
