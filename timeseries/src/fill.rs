use crate::Error;
use crate::timestamp::{self, TimestampValue};
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_DENSITY_THRESHOLD: usize = 10_000;
pub const DEFAULT_MAX_BUCKETS: usize = 10_000;

static INTERVAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)(m|h|d|s)$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: TimestampValue,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: impl Into<TimestampValue>) -> Self {
        Self {
            timestamp: timestamp.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// `step` units of this granularity, or `None` when that is out of range.
    pub fn delta(&self, step: i64) -> Option<TimeDelta> {
        match self {
            Self::Second => TimeDelta::try_seconds(step),
            Self::Minute => TimeDelta::try_minutes(step),
            Self::Hour => TimeDelta::try_hours(step),
            Self::Day => TimeDelta::try_days(step),
        }
    }

    /// Classifies a sample by how many of its second, minute and hour fields
    /// are zero.
    fn of_sample(sample: &DateTime<Utc>) -> Self {
        let zeroes = [sample.second(), sample.minute(), sample.hour()]
            .iter()
            .filter(|v| **v == 0)
            .count();
        match zeroes {
            0 => Self::Second,
            1 => Self::Minute,
            2 => Self::Hour,
            _ => Self::Day,
        }
    }

    /// Most common classification across the samples. Ties go to the coarser
    /// granularity.
    pub fn infer(samples: &[DateTime<Utc>]) -> Self {
        let mut counts = [0usize; 4];
        for sample in samples {
            counts[Self::of_sample(sample) as usize] += 1;
        }

        [Self::Second, Self::Minute, Self::Hour, Self::Day]
            .into_iter()
            .reduce(|a, b| if counts[a as usize] > counts[b as usize] { a } else { b })
            .unwrap_or(Self::Day)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses an explicit bucket interval such as `5m`, `1h`, `1d` or `30s`.
pub fn parse_interval(interval: &str) -> Option<(i64, Granularity)> {
    let captures = INTERVAL.captures(interval)?;
    let step = captures[1].parse::<i64>().ok().filter(|s| *s > 0)?;
    let granularity = match &captures[2] {
        "s" => Granularity::Second,
        "m" => Granularity::Minute,
        "h" => Granularity::Hour,
        _ => Granularity::Day,
    };
    granularity.delta(step)?;
    Some((step, granularity))
}

#[derive(Debug, Clone)]
pub struct FillOptions {
    pub default_value: f64,
    /// Value fields set on inserted points. When empty, every value field seen
    /// in the input is used.
    pub value_keys: Vec<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    /// Series with more points than this are only normalized.
    pub density_threshold: usize,
    pub interval: Option<String>,
    pub max_buckets: usize,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            default_value: 0.0,
            value_keys: Vec::new(),
            min: None,
            max: None,
            density_threshold: DEFAULT_DENSITY_THRESHOLD,
            interval: None,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl FillOptions {
    #[inline]
    pub fn with_default_value(mut self, default_value: f64) -> Self {
        self.default_value = default_value;

        self
    }

    #[inline]
    pub fn with_bounds(mut self, min: Option<String>, max: Option<String>) -> Self {
        self.min = min;
        self.max = max;

        self
    }

    #[inline]
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());

        self
    }

    #[inline]
    pub fn with_density_threshold(mut self, density_threshold: usize) -> Self {
        self.density_threshold = density_threshold;

        self
    }

    #[inline]
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;

        self
    }

    #[inline]
    pub fn with_value_keys(mut self, value_keys: Vec<String>) -> Self {
        self.value_keys = value_keys;

        self
    }

    fn has_bounds(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// Gap-fills a sparse count series so that every bucket between the bounds
/// has a point.
///
/// Existing points keep their values and get ISO-8601 timestamps. A bucket is
/// considered present when an existing point falls in the same minute.
/// The result is sorted by timestamp, ascending.
pub fn fill_timeseries(
    data: Vec<TimeSeriesPoint>,
    options: &FillOptions,
) -> Result<Vec<TimeSeriesPoint>, Error> {
    if data.is_empty() && !options.has_bounds() {
        return Ok(data);
    }

    if data.len() > options.density_threshold {
        debug!(
            "Skipping fill for {} points, above density threshold of {}",
            data.len(),
            options.density_threshold
        );
        let normalized = normalize_points(data)?;
        return Ok(sorted(normalized));
    }

    if data.len() <= 1 && !options.has_bounds() {
        return Ok(data);
    }

    let normalized = normalize_points(data)?;
    let dates: Vec<DateTime<Utc>> = normalized.iter().map(|(dt, _)| *dt).collect();

    let min = parse_bound(options.min.as_deref())?;
    let max = parse_bound(options.max.as_deref())?;
    let min = min.or_else(|| dates.iter().min().copied()).or(max);
    let max = max.or_else(|| dates.iter().max().copied()).or(min);
    let (Some(min), Some(max)) = (min, max) else {
        return Ok(sorted(normalized));
    };

    let interval = options.interval.as_deref().and_then(|interval| {
        let parsed = parse_interval(interval);
        if parsed.is_none() {
            warn!("Ignoring invalid fill interval {:?}", interval);
        }
        parsed
    });
    let (step, granularity) = match interval {
        Some(interval) => interval,
        None if dates.is_empty() => (1, Granularity::infer(&[min, max])),
        None => (1, Granularity::infer(&dates)),
    };
    debug!("Filling series from {} to {} every {} {}", min, max, step, granularity);

    let Some(step_delta) = granularity.delta(step) else {
        return Ok(sorted(normalized));
    };
    let span = (max - min).num_seconds();
    let buckets = if span < 0 {
        0
    } else {
        span / step_delta.num_seconds()
    };
    if buckets > options.max_buckets as i64 {
        return Err(Error::TooManyBuckets {
            buckets,
            limit: options.max_buckets,
        });
    }

    let value_keys = if options.value_keys.is_empty() {
        normalized
            .iter()
            .flat_map(|(_, p)| p.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        options.value_keys.clone()
    };
    let present: HashSet<i64> = dates.iter().map(minute_key).collect();

    let mut filled = normalized;
    let mut instant = min;
    while instant <= max {
        if !present.contains(&minute_key(&instant)) {
            let values = value_keys
                .iter()
                .map(|key| (key.clone(), options.default_value))
                .collect();
            filled.push((
                instant,
                TimeSeriesPoint {
                    timestamp: TimestampValue::Text(timestamp::to_iso(instant)),
                    values,
                },
            ));
        }
        match instant.checked_add_signed(step_delta) {
            Some(next) => instant = next,
            None => break,
        }
    }

    Ok(sorted(filled))
}

fn normalize_points(
    data: Vec<TimeSeriesPoint>,
) -> Result<Vec<(DateTime<Utc>, TimeSeriesPoint)>, Error> {
    data.into_iter()
        .map(|mut point| {
            let dt = timestamp::normalize(&point.timestamp)
                .ok_or_else(|| Error::InvalidTimestamp(point.timestamp.to_string()))?;
            point.timestamp = TimestampValue::Text(timestamp::to_iso(dt));
            Ok((dt, point))
        })
        .collect()
}

fn parse_bound(bound: Option<&str>) -> Result<Option<DateTime<Utc>>, Error> {
    bound
        .map(|b| timestamp::parse_timestamp(b).ok_or_else(|| Error::InvalidTimestamp(b.to_string())))
        .transpose()
}

#[inline]
fn minute_key(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp().div_euclid(60)
}

fn sorted(mut points: Vec<(DateTime<Utc>, TimeSeriesPoint)>) -> Vec<TimeSeriesPoint> {
    points.sort_by_key(|(dt, _)| *dt);
    points.into_iter().map(|(_, p)| p).collect()
}
