//! Core domain types shared by the aggregation engine.
//!
//! Identifiers are plain integers, values are a two-variant sum type
//! and every timestamp is milliseconds since the Unix epoch.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Globally unique metric identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub u64);

impl MetricId {
    /// Get the raw identifier value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for MetricId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared numeric domain of a metric, fixed at aggregator creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NumericKind {
    /// Signed 64-bit integers
    Integer = 1,
    /// 64-bit floats
    Float = 2,
}

impl NumericKind {
    /// Decode the tag stored in native memory.
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Integer),
            2 => Some(Self::Float),
            _ => None,
        }
    }

    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            NumericKind::Integer => "integer",
            NumericKind::Float => "float",
        }
    }
}

/// A single submitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Integer sample
    Integer(i64),
    /// Floating-point sample
    Float(f64),
}

impl MetricValue {
    /// The kind a fresh aggregator gets when this value is the first one seen.
    pub fn kind(&self) -> NumericKind {
        match self {
            MetricValue::Integer(_) => NumericKind::Integer,
            MetricValue::Float(_) => NumericKind::Float,
        }
    }

    /// Widen to the floating accumulator domain.
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Integer(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }

    /// Narrow to the integer domain, truncating toward zero (saturating).
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> i64 {
        match *self {
            MetricValue::Integer(v) => v,
            MetricValue::Float(v) => v as i64,
        }
    }

    /// Convert into the representation of `kind`.
    pub fn coerce(self, kind: NumericKind) -> Self {
        match kind {
            NumericKind::Integer => MetricValue::Integer(self.as_i64()),
            NumericKind::Float => MetricValue::Float(self.as_f64()),
        }
    }

    /// False for NaN and infinities
    pub fn is_finite(&self) -> bool {
        match self {
            MetricValue::Integer(_) => true,
            MetricValue::Float(v) => v.is_finite(),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Integer(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Point-in-time copy of one aggregator's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Metric id
    pub id: MetricId,
    /// Declared numeric kind
    pub kind: NumericKind,
    /// Values this period
    pub count: u64,
    /// Smallest value this period
    pub min: MetricValue,
    /// Largest value this period
    pub max: MetricValue,
    /// Running mean, truncated for integer metrics
    pub mean: MetricValue,
    /// Only present when raw retention is enabled and at least one value is retained.
    pub median: Option<f64>,
    /// Whether raw retention is on
    pub raw_enabled: bool,
    /// Last ingestion, epoch millis
    pub last_update_millis: u64,
}

/// Current wall clock in milliseconds since the Unix epoch.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert epoch milliseconds to a UTC timestamp.
#[allow(clippy::cast_possible_wrap)]
pub fn millis_to_datetime(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
