//! Time-series processing: extraction, daily aggregation, smoothing and
//! cleaning.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::record::{parse_timestamp, HealthRecord};

/// Time-stamped values.
pub type TimeSeries = Vec<(DateTime<Utc>, f64)>;

/// Collect `data[method][key]` from records that have a start time.
#[must_use]
pub fn extract_points(records: &[HealthRecord], method: &str, key: &str) -> TimeSeries {
    records
        .iter()
        .filter_map(|r| Some((r.start?, r.value(method, key)?)))
        .collect()
}

/// How values of one day are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    /// Sum of values.
    #[default]
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Number of values.
    Count,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

impl AggFunc {
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Self::Sum => values.iter().sum(),
            Self::Mean => super::stats::mean(values),
            #[allow(clippy::cast_precision_loss)]
            Self::Count => values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl std::fmt::Display for AggFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        };
        f.write_str(name)
    }
}

/// One aggregated calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyValue {
    /// UTC calendar date.
    pub date: NaiveDate,
    /// Aggregated value.
    pub value: f64,
}

/// Group points by UTC date and combine each day with `func`.
///
/// Days are returned in ascending order; days without points are absent.
#[must_use]
pub fn aggregate_by_date(points: &[(DateTime<Utc>, f64)], func: AggFunc) -> Vec<DailyValue> {
    let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (t, v) in points {
        days.entry(t.date_naive()).or_default().push(*v);
    }
    days.into_iter()
        .map(|(date, values)| DailyValue {
            date,
            value: func.apply(&values),
        })
        .collect()
}

/// Trailing moving average over `window` values.
///
/// The first `window - 1` positions have no value. A zero window yields no
/// values at all.
#[must_use]
pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    #[allow(clippy::cast_precision_loss)]
    let w = window as f64;
    (0..values.len())
        .map(|i| {
            (i + 1 >= window).then(|| values[i + 1 - window..=i].iter().sum::<f64>() / w)
        })
        .collect()
}

/// Keep points whose UTC date lies in `start..=end`.
#[must_use]
pub fn filter_by_date_range(
    points: &[(DateTime<Utc>, f64)],
    start: NaiveDate,
    end: NaiveDate,
) -> TimeSeries {
    points
        .iter()
        .filter(|(t, _)| (start..=end).contains(&t.date_naive()))
        .copied()
        .collect()
}

/// Replace gaps with the last seen value. Leading gaps stay empty.
#[must_use]
pub fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Drop repeated `(time, value)` pairs and sort by time.
#[must_use]
pub fn clean_series(points: &[(DateTime<Utc>, f64)]) -> TimeSeries {
    let mut seen = std::collections::HashSet::new();
    let mut cleaned: TimeSeries = points
        .iter()
        .filter(|(t, v)| seen.insert((*t, v.to_bits())))
        .copied()
        .collect();
    cleaned.sort_by_key(|(t, _)| *t);
    cleaned
}

/// Share of one category value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    /// Category value.
    pub value: String,
    /// Occurrences.
    pub count: usize,
    /// Percentage of all occurrences.
    pub percent: f64,
}

/// Percentage breakdown of categories, most frequent first.
#[must_use]
pub fn percentages<I, S>(categories: I) -> Vec<CategoryShare>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for c in categories {
        *counts.entry(c.as_ref().to_string()).or_default() += 1;
        total += 1;
    }

    let mut shares: Vec<CategoryShare> = counts
        .into_iter()
        .map(|(value, count)| {
            #[allow(clippy::cast_precision_loss)]
            let percent = count as f64 / total as f64 * 100.0;
            CategoryShare {
                value,
                count,
                percent,
            }
        })
        .collect();
    shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    shares
}

static SPAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([smhdw])$").expect("Invalid span pattern"));

/// Parse a relative span such as `30m`, `24h`, `7d` or `2w`.
///
/// # Errors
///
/// Returns [`Error::InvalidTimeSpec`] for anything else.
pub fn parse_span(spec: &str) -> Result<Duration> {
    let invalid = || Error::InvalidTimeSpec {
        input: spec.to_string(),
    };
    let caps = SPAN_PATTERN.captures(spec.trim()).ok_or_else(invalid)?;
    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
    let span = match &caps[2] {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => Duration::try_weeks(amount),
    };
    span.ok_or_else(invalid)
}

/// Resolve a `--since` style argument to an instant.
///
/// Accepts a relative span (counted back from `now`), an RFC 3339 timestamp
/// or a `YYYY-MM-DD` date (midnight UTC).
///
/// # Errors
///
/// Returns [`Error::InvalidTimeSpec`] when none of the forms match or the
/// span reaches past the earliest representable instant.
pub fn parse_since(spec: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(span) = parse_span(spec) {
        return now
            .checked_sub_signed(span)
            .ok_or_else(|| Error::InvalidTimeSpec {
                input: spec.to_string(),
            });
    }
    if let Some(ts) = parse_timestamp(spec) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(spec.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .ok_or_else(|| Error::InvalidTimeSpec {
            input: spec.to_string(),
        })
}

/// The instant `days` whole days before `now`.
///
/// # Errors
///
/// Returns [`Error::InvalidTimeSpec`] when the result is out of range.
pub fn days_before(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| Error::InvalidTimeSpec {
            input: format!("{days}d"),
        })
}
