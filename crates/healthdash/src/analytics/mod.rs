//! Analysis of stored health records.
//!
//! - **stats**: descriptive statistics, trends, outliers and correlations.
//! - **series**: turning records into time series and reshaping them.
//! - **health**: the dashboard report with body composition, vital signs,
//!   fitness, sleep and a health score.
//!
//! # Example
//!
//! ```
//! use healthdash::analytics::{detect_trend, extract_points};
//! use healthdash::Storage;
//!
//! let storage = Storage::open_in_memory().unwrap();
//! let records = storage.records("weight").unwrap();
//! let points = extract_points(&records, "weight", "inKilograms");
//!
//! // Fewer than two points yield no trend
//! assert!(detect_trend(&points).is_none());
//! ```

pub mod health;
pub mod series;
pub mod stats;

pub use health::{HealthAnalyzer, HealthReport, HealthScore};
pub use series::{
    aggregate_by_date, clean_series, extract_points, filter_by_date_range, forward_fill,
    days_before, moving_average, parse_since, parse_span, percentages, AggFunc, DailyValue,
    TimeSeries,
};
pub use stats::{
    basic_statistics, correlation_matrix, detect_trend, identify_outliers, performance_metrics,
    summary_report, BasicStats, CorrelationMatrix, OutlierMethod, SummaryReport, TrendAnalysis,
    TrendLabel,
};
