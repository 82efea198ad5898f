//! Bounded-history indicators fed by OHLCV points.
//!
//! An [`Indicator`] owns a rolling input cache, one output slot per cached
//! input, and the same-period rule that decides whether a new observation
//! replaces the newest point (intrabar update) or appends a new one (period
//! rollover). The arithmetic lives behind the [`Calculation`] trait.

pub mod graph;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stoch;

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use common::Bar;

/// Upper bound on slots reserved up front for an indicator's cache.
const PREALLOCATED_POINTS: usize = 1024;

pub use graph::{IndicatorGraph, IndicatorGraphBuilder, IndicatorKey, IndicatorSpec};
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;
pub use stoch::Stoch;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("indicator '{name}': cache size {cache_size} is smaller than the minimum window {min_window}")]
    CacheTooSmall {
        name: String,
        cache_size: usize,
        min_window: usize,
    },

    #[error("{indicator} period must be at least {min}, got {got}")]
    InvalidPeriod {
        indicator: &'static str,
        min: usize,
        got: usize,
    },

    #[error("duplicate indicator name '{0}'")]
    DuplicateName(String),

    #[error("unknown feeder indicator '{0}'")]
    UnknownFeeder(String),

    #[error("column lengths differ: {0}")]
    ColumnLengthMismatch(String),

    #[error("invalid sampling rule '{0}' (expected e.g. 30s, 5m, 1h, 1d)")]
    InvalidSampling(String),

    #[error("indicator '{name}' samples by {own:?} but its feeder samples by {feeder:?}")]
    SamplingMismatch {
        name: String,
        own: Sampling,
        feeder: Option<Sampling>,
    },
}

/// One OHLCV observation. `timestamp` is optional; points without one are
/// always appended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Point {
    /// A point carrying a single value in every price field.
    pub fn from_value(value: f64, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            open: value,
            high: value,
            low: value,
            close: value,
            volume: 0.0,
            timestamp,
        }
    }
}

impl From<&Bar> for Point {
    fn from(bar: &Bar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            timestamp: Some(bar.timestamp),
        }
    }
}

/// Input accepted by [`Indicator::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorInput {
    /// One live observation, subject to the same-period rule.
    SinglePoint(Point),
    /// A time-ordered batch (historical warmup); each point goes through the
    /// single-point path in order.
    BatchPoints(Vec<Point>),
}

impl IndicatorInput {
    /// Build a batch from parallel columns. `timestamps` may be empty, in
    /// which case every point is appended.
    pub fn from_columns(
        open: &[f64],
        high: &[f64],
        low: &[f64],
        close: &[f64],
        volume: &[f64],
        timestamps: &[DateTime<Utc>],
    ) -> Result<Self, IndicatorError> {
        let n = close.len();
        let lengths = [open.len(), high.len(), low.len(), volume.len()];
        if lengths.iter().any(|&len| len != n) || (!timestamps.is_empty() && timestamps.len() != n)
        {
            return Err(IndicatorError::ColumnLengthMismatch(format!(
                "open={} high={} low={} close={} volume={} timestamps={}",
                open.len(),
                high.len(),
                low.len(),
                n,
                volume.len(),
                timestamps.len()
            )));
        }

        let points = (0..n)
            .map(|i| Point {
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                volume: volume[i],
                timestamp: timestamps.get(i).copied(),
            })
            .collect();
        Ok(IndicatorInput::BatchPoints(points))
    }

    pub fn len(&self) -> usize {
        match self {
            IndicatorInput::SinglePoint(_) => 1,
            IndicatorInput::BatchPoints(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&Bar> for IndicatorInput {
    fn from(bar: &Bar) -> Self {
        IndicatorInput::SinglePoint(Point::from(bar))
    }
}

impl From<&[Bar]> for IndicatorInput {
    fn from(bars: &[Bar]) -> Self {
        IndicatorInput::BatchPoints(bars.iter().map(Point::from).collect())
    }
}

/// Period bucketing used by the same-period rule. All buckets are aligned to
/// the Unix epoch in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Sampling {
    Seconds(u32),
    Minutes(u32),
    Hours(u32),
    Day,
}

impl Sampling {
    fn bucket_secs(&self) -> i64 {
        let secs = match self {
            Sampling::Seconds(n) => i64::from(*n),
            Sampling::Minutes(n) => i64::from(*n) * 60,
            Sampling::Hours(n) => i64::from(*n) * 3_600,
            Sampling::Day => 86_400,
        };
        secs.max(1)
    }

    /// Start of the bucket containing `ts`, in Unix seconds.
    pub fn normalize(&self, ts: DateTime<Utc>) -> i64 {
        let bucket = self.bucket_secs();
        ts.timestamp().div_euclid(bucket) * bucket
    }
}

impl FromStr for Sampling {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "day" || s == "1d" {
            return Ok(Sampling::Day);
        }
        let invalid = || IndicatorError::InvalidSampling(s.clone());
        let Some((unit_at, _)) = s.char_indices().last() else {
            return Err(invalid());
        };
        let (count, unit) = s.split_at(unit_at);
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        match unit {
            "s" => Ok(Sampling::Seconds(count)),
            "m" => Ok(Sampling::Minutes(count)),
            "h" => Ok(Sampling::Hours(count)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Sampling {
    type Error = IndicatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The replaceable arithmetic of an indicator.
///
/// Implementations are immutable; an `Arc<dyn Calculation>` may be shared by
/// every per-symbol copy of an indicator.
pub trait Calculation: Send + Sync + std::fmt::Debug {
    /// Default display name, e.g. `RSI_14`.
    fn label(&self) -> String;

    /// Fewest input points for which `compute` can produce a value.
    fn min_window(&self) -> usize;

    /// Output for the newest point of `window` (oldest first), or `None`
    /// while the window is too short.
    fn compute(&self, window: &[Point]) -> Option<f64>;
}

/// What a single-point ingest did to the input cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Appended,
    Replaced,
}

/// A calculation with its rolling cache and update rule.
#[derive(Debug, Clone)]
pub struct Indicator {
    name: String,
    calculation: Arc<dyn Calculation>,
    cache_size: usize,
    sampling: Option<Sampling>,
    previous_timestamp: Option<DateTime<Utc>>,
    inputs: VecDeque<Point>,
    outputs: VecDeque<Option<f64>>,
}

impl Indicator {
    /// Create an indicator. `cache_size` defaults to the calculation's
    /// minimum window and may not be smaller than it.
    pub fn new(
        name: Option<String>,
        calculation: Arc<dyn Calculation>,
        cache_size: Option<usize>,
        sampling: Option<Sampling>,
    ) -> Result<Self, IndicatorError> {
        let name = name.unwrap_or_else(|| calculation.label());
        let min_window = calculation.min_window().max(1);
        let cache_size = cache_size.unwrap_or(min_window);
        if cache_size < min_window {
            return Err(IndicatorError::CacheTooSmall {
                name,
                cache_size,
                min_window,
            });
        }

        Ok(Self {
            name,
            calculation,
            cache_size,
            sampling,
            previous_timestamp: None,
            inputs: VecDeque::with_capacity(cache_size.min(PREALLOCATED_POINTS)),
            outputs: VecDeque::with_capacity(cache_size.min(PREALLOCATED_POINTS)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn sampling(&self) -> Option<Sampling> {
        self.sampling
    }

    pub fn previous_timestamp(&self) -> Option<DateTime<Utc>> {
        self.previous_timestamp
    }

    pub fn inputs(&self) -> &VecDeque<Point> {
        &self.inputs
    }

    pub fn outputs(&self) -> &VecDeque<Option<f64>> {
        &self.outputs
    }

    /// Latest output if the indicator is ready.
    pub fn value(&self) -> Option<f64> {
        self.outputs.back().copied().flatten()
    }

    pub fn is_ready(&self) -> bool {
        self.value().is_some()
    }

    /// Grow the cache so it holds at least `required` points. Never shrinks.
    pub(crate) fn widen_cache(&mut self, required: usize) {
        self.cache_size = self.cache_size.max(required);
    }

    /// Ingest one point or a batch. Returns the number of points applied.
    pub fn ingest(&mut self, input: IndicatorInput) -> usize {
        match input {
            IndicatorInput::SinglePoint(point) => {
                self.ingest_point(point);
                1
            }
            IndicatorInput::BatchPoints(points) => {
                let n = points.len();
                for point in points {
                    self.ingest_point(point);
                }
                n
            }
        }
    }

    /// Apply the same-period rule to one point, recompute the newest output
    /// and evict overflow.
    pub fn ingest_point(&mut self, point: Point) -> Ingested {
        let action = if self.is_same_period(point.timestamp) && !self.inputs.is_empty() {
            if let Some(last) = self.inputs.back_mut() {
                *last = point;
            }
            Ingested::Replaced
        } else {
            self.inputs.push_back(point);
            self.outputs.push_back(None);
            Ingested::Appended
        };

        if let Some(ts) = point.timestamp {
            self.previous_timestamp = Some(ts);
        }

        self.evict();

        let output = self.calculation.compute(self.inputs.make_contiguous());
        if let Some(slot) = self.outputs.back_mut() {
            *slot = output;
        }

        trace!(indicator = %self.name, ?action, value = ?output, "Indicator ingest");
        action
    }

    /// True when `timestamp` falls in the same sampling bucket as the
    /// previously ingested point.
    pub fn is_same_period(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        match (self.sampling, timestamp, self.previous_timestamp) {
            (Some(sampling), Some(ts), Some(prev)) => {
                sampling.normalize(prev) == sampling.normalize(ts)
            }
            _ => false,
        }
    }

    fn evict(&mut self) {
        while self.inputs.len() > self.cache_size {
            self.inputs.pop_front();
            self.outputs.pop_front();
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{}={v:.4}", self.name),
            None => write!(f, "{}=warming", self.name),
        }
    }
}
