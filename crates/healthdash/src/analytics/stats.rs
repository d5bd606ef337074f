//! Descriptive statistics, trends, outliers and correlation.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::HealthRecord;

/// Slope beyond which a series counts as moving up or down.
const TREND_SLOPE_THRESHOLD: f64 = 0.01;

/// R² above which a fitted trend is called strong.
const STRONG_TREND_R_SQUARED: f64 = 0.7;

/// Summary statistics for one numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BasicStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Median (mean of the two middle values for even counts).
    pub median: f64,
    /// Sample standard deviation; 0 for a single value.
    pub std: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Number of values.
    pub count: usize,
}

impl BasicStats {
    /// Compute statistics for `values`; `None` when empty.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            mean: mean(values),
            median: quantile_sorted(&sorted, 0.5),
            std: sample_std(values).unwrap_or(0.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            count: values.len(),
        })
    }
}

/// Statistics for several named columns. Empty columns are skipped.
#[must_use]
pub fn basic_statistics<S: AsRef<str>>(columns: &[(S, Vec<f64>)]) -> BTreeMap<String, BasicStats> {
    columns
        .iter()
        .filter_map(|(name, values)| {
            BasicStats::from_values(values).map(|s| (name.as_ref().to_string(), s))
        })
        .collect()
}

/// Least-squares line through `values` against their index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    /// Change per step.
    pub slope: f64,
    /// Value at index 0.
    pub intercept: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
}

/// Fit `y = slope * x + intercept` with `x = 0..n`.
///
/// Needs at least two values. A constant series has `r_squared` 0.
#[must_use]
pub fn fit_line(values: &[f64]) -> Option<LinearFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    let r_squared = if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Positive slope.
    Increasing,
    /// Zero or negative slope.
    Decreasing,
}

/// How well the line explains the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    /// R² above 0.7.
    Strong,
    /// Everything else.
    Weak,
}

/// A fitted trend over a time-ordered series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendAnalysis {
    /// Change per sample.
    pub slope: f64,
    /// Fitted value of the first sample.
    pub intercept: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Sign of the slope.
    pub direction: TrendDirection,
    /// Strength classification.
    pub strength: TrendStrength,
}

/// Fit a trend to time-stamped points, ordered by time first.
#[must_use]
pub fn detect_trend(points: &[(DateTime<Utc>, f64)]) -> Option<TrendAnalysis> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(t, _)| *t);
    let values: Vec<f64> = sorted.iter().map(|(_, v)| *v).collect();

    let fit = fit_line(&values)?;
    Some(TrendAnalysis {
        slope: fit.slope,
        intercept: fit.intercept,
        r_squared: fit.r_squared,
        direction: if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        },
        strength: if fit.r_squared.abs() > STRONG_TREND_R_SQUARED {
            TrendStrength::Strong
        } else {
            TrendStrength::Weak
        },
    })
}

/// Coarse trend used on dashboard cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    /// Slope above 0.01.
    Up,
    /// Slope below -0.01.
    Down,
    /// Anything in between, or too few values.
    Stable,
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Classify the slope of `values`.
#[must_use]
pub fn trend_label(values: &[f64]) -> TrendLabel {
    match fit_line(values) {
        Some(fit) if fit.slope > TREND_SLOPE_THRESHOLD => TrendLabel::Up,
        Some(fit) if fit.slope < -TREND_SLOPE_THRESHOLD => TrendLabel::Down,
        _ => TrendLabel::Stable,
    }
}

/// Outlier detection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    /// Outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
    #[default]
    Iqr,
    /// More than three sample standard deviations from the mean.
    ZScore,
}

/// Flag each value that is an outlier under `method`.
#[must_use]
pub fn identify_outliers(values: &[f64], method: OutlierMethod) -> Vec<bool> {
    if values.is_empty() {
        return Vec::new();
    }

    match method {
        OutlierMethod::Iqr => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let q1 = quantile_sorted(&sorted, 0.25);
            let q3 = quantile_sorted(&sorted, 0.75);
            let iqr = q3 - q1;
            let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
            values.iter().map(|v| *v < lower || *v > upper).collect()
        }
        OutlierMethod::ZScore => {
            let m = mean(values);
            match sample_std(values) {
                Some(std) if std > 0.0 => {
                    values.iter().map(|v| ((v - m) / std).abs() > 3.0).collect()
                }
                _ => vec![false; values.len()],
            }
        }
    }
}

/// Pairwise Pearson correlations between named columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    /// Column names, in input order.
    pub names: Vec<String>,
    /// `values[i][j]` is the correlation of column `i` with column `j`.
    /// NaN where a column is constant or too short.
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Correlation between two named columns.
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.values[i][j])
    }

    /// True when there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Pearson correlation matrix. Each pair uses the common prefix of the two
/// columns.
#[must_use]
pub fn correlation_matrix<S: AsRef<str>>(columns: &[(S, Vec<f64>)]) -> CorrelationMatrix {
    let names = columns.iter().map(|(n, _)| n.as_ref().to_string()).collect();
    let values = columns
        .iter()
        .map(|(_, a)| columns.iter().map(|(_, b)| pearson(a, b)).collect())
        .collect();
    CorrelationMatrix { names, values }
}

/// Pearson correlation over the common prefix of `a` and `b`.
///
/// NaN when fewer than two pairs exist or either side is constant.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));

    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return f64::NAN;
    }
    (cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0)
}

/// Error metrics for a prediction against observed values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Mean squared error.
    pub mse: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination; 0 when the actual values are constant.
    pub r_squared: f64,
}

/// Compare `predicted` with `actual`. `None` when empty or lengths differ.
#[must_use]
pub fn performance_metrics(actual: &[f64], predicted: &[f64]) -> Option<PerformanceMetrics> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = actual.len() as f64;

    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    let mae = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum::<f64>() / n;
    let m = mean(actual);
    let ss_tot: f64 = actual.iter().map(|a| (a - m).powi(2)).sum();

    let mse = ss_res / n;
    Some(PerformanceMetrics {
        mse,
        rmse: mse.sqrt(),
        mae,
        r_squared: if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot },
    })
}

/// Missing-field counts in a record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissingCounts {
    /// Records without a start time.
    pub start: usize,
    /// Records without an end time.
    pub end: usize,
    /// Records without an app.
    pub app: usize,
}

/// Distribution of a categorical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryInfo {
    /// Distinct non-empty values.
    pub unique_values: usize,
    /// Most frequent value; ties go to the alphabetically first.
    pub most_common: Option<String>,
}

/// Data-quality and distribution overview of one method's records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    /// Method summarised.
    pub method: String,
    /// Number of records.
    pub records: usize,
    /// Records whose key already appeared earlier in the set.
    pub duplicate_keys: usize,
    /// Missing optional fields.
    pub missing: MissingCounts,
    /// Statistics for every numeric field of `data[method]`.
    pub numeric_statistics: BTreeMap<String, BasicStats>,
    /// Source app distribution.
    pub apps: CategoryInfo,
    /// Earliest start.
    pub first_start: Option<DateTime<Utc>>,
    /// Latest start.
    pub last_start: Option<DateTime<Utc>>,
}

/// Build a [`SummaryReport`] for `records` of `method`.
///
/// Numeric fields are read from `data[method]`, or from `data` itself when
/// the payload is not nested under the method name.
#[must_use]
pub fn summary_report(records: &[HealthRecord], method: &str) -> SummaryReport {
    let mut seen = HashSet::new();
    let mut duplicate_keys = 0;
    let mut missing = MissingCounts::default();
    let mut fields: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut apps: HashMap<&str, usize> = HashMap::new();

    for record in records {
        if !seen.insert(record.key.as_str()) {
            duplicate_keys += 1;
        }
        missing.start += usize::from(record.start.is_none());
        missing.end += usize::from(record.end.is_none());
        match record.app.as_deref() {
            Some(app) if !app.is_empty() => *apps.entry(app).or_default() += 1,
            _ => missing.app += 1,
        }

        let payload = record.data.get(method).unwrap_or(&record.data);
        if let Some(obj) = payload.as_object() {
            for (name, value) in obj {
                let number = match value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    _ => None,
                };
                if let Some(v) = number {
                    fields.entry(name.clone()).or_default().push(v);
                }
            }
        }
    }

    let most_common = apps
        .iter()
        .max_by(|(a_name, a_count), (b_name, b_count)| {
            a_count.cmp(b_count).then_with(|| b_name.cmp(a_name))
        })
        .map(|(name, _)| (*name).to_string());

    SummaryReport {
        method: method.to_string(),
        records: records.len(),
        duplicate_keys,
        missing,
        numeric_statistics: fields
            .into_iter()
            .filter_map(|(k, v)| BasicStats::from_values(&v).map(|s| (k, s)))
            .collect(),
        apps: CategoryInfo {
            unique_values: apps.len(),
            most_common,
        },
        first_start: records.iter().filter_map(|r| r.start).min(),
        last_start: records.iter().filter_map(|r| r.start).max(),
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let denom = (values.len() - 1) as f64;
    Some((values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / denom).sqrt())
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let pos = q * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
