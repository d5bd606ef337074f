//! Health report: body composition, vital signs, fitness, sleep and an
//! overall score, built from stored records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::series::{aggregate_by_date, days_before, extract_points, AggFunc, TimeSeries};
use super::stats::{mean, trend_label, TrendLabel};
use crate::error::Result;
use crate::storage::Storage;

const BODY_LOOKBACK_DAYS: u32 = 90;
const HEIGHT_LOOKBACK_DAYS: u32 = 365;
const VITALS_LOOKBACK_DAYS: u32 = 30;
const FITNESS_LOOKBACK_DAYS: u32 = 30;
const VO2_LOOKBACK_DAYS: u32 = 90;
const SLEEP_LOOKBACK_DAYS: u32 = 30;

/// Latest value, coarse trend and history of one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Most recent value.
    pub current: Option<f64>,
    /// Trend over `values`; absent for metrics that are not trended.
    pub trend: Option<TrendLabel>,
    /// Values in time order.
    pub values: Vec<f64>,
}

impl MetricSummary {
    fn from_series(series: &TimeSeries, with_trend: bool) -> Self {
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        Self {
            current: values.last().copied(),
            trend: (with_trend && !values.is_empty()).then(|| trend_label(&values)),
            values,
        }
    }
}

/// BMI classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BmiCategory {
    /// Below 18.5.
    Underweight,
    /// 18.5 up to 25.
    Normal,
    /// 25 up to 30.
    Overweight,
    /// 30 and above.
    Obese,
}

impl BmiCategory {
    /// Classify a BMI value.
    #[must_use]
    pub fn from_bmi(bmi: f64) -> Self {
        if bmi < 18.5 {
            Self::Underweight
        } else if bmi < 25.0 {
            Self::Normal
        } else if bmi < 30.0 {
            Self::Overweight
        } else {
            Self::Obese
        }
    }
}

impl std::fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Body mass index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bmi {
    /// BMI rounded to one decimal.
    pub value: f64,
    /// Category of the unrounded value.
    pub category: BmiCategory,
}

/// Compute BMI from kilograms and metres; `None` for non-positive inputs.
#[must_use]
pub fn bmi(weight_kg: f64, height_m: f64) -> Option<Bmi> {
    if weight_kg <= 0.0 || height_m <= 0.0 {
        return None;
    }
    let raw = weight_kg / (height_m * height_m);
    Some(Bmi {
        value: round_to(raw, 1),
        category: BmiCategory::from_bmi(raw),
    })
}

/// Weight, height and derived body metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BodyComposition {
    /// `weight.inKilograms`.
    pub weight: MetricSummary,
    /// `height.inMeters`; not trended.
    pub height: MetricSummary,
    /// `bodyFat.percentage`.
    pub body_fat: MetricSummary,
    /// `leanBodyMass.inKilograms`.
    pub lean_body_mass: MetricSummary,
    /// `basalMetabolicRate.inKilocaloriesPerDay`.
    pub basal_metabolic_rate: MetricSummary,
    /// From the latest weight and height.
    pub bmi: Option<Bmi>,
    /// Start of the latest weight record.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Latest blood pressure and reading history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BloodPressure {
    /// Latest systolic value (mmHg).
    pub systolic: Option<f64>,
    /// Latest diastolic value (mmHg).
    pub diastolic: Option<f64>,
    /// `(systolic, diastolic)` pairs in time order.
    pub readings: Vec<(f64, f64)>,
}

/// Cardiovascular and other vital metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VitalSigns {
    /// `heartRate.beatsPerMinute`.
    pub heart_rate: MetricSummary,
    /// Latest `restingHeartRate.beatsPerMinute`.
    pub resting_heart_rate: Option<f64>,
    /// `bloodPressure.systolic` / `diastolic`.
    pub blood_pressure: BloodPressure,
    /// `oxygenSaturation.percentage`; not trended.
    pub oxygen_saturation: MetricSummary,
    /// `bodyTemperature.inCelsius`; not trended.
    pub body_temperature: MetricSummary,
    /// Start of the latest heart rate record.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Step totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepsSummary {
    /// Steps over the whole window.
    pub total: Option<f64>,
    /// Mean of per-day step totals over days with data, truncated.
    ///
    /// Records are summed per UTC day first, so several short walks on one
    /// day count once. This is not the mean step count per record.
    pub daily_average: Option<u64>,
    /// Trend of daily totals.
    pub trend: Option<TrendLabel>,
    /// Daily totals in date order.
    pub daily: Vec<f64>,
}

/// Distance totals in kilometres.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistanceSummary {
    /// Kilometres over the whole window.
    pub total_km: Option<f64>,
    /// Mean of daily totals, rounded to two decimals.
    pub daily_average_km: Option<f64>,
}

/// Daily calorie averages in kilocalories.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaloriesSummary {
    /// Active calories per day with data, truncated.
    pub active_daily_average: Option<u64>,
    /// Total calories per day with data, truncated.
    pub total_daily_average: Option<u64>,
}

/// Activity metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Fitness {
    /// `steps.count`.
    pub steps: StepsSummary,
    /// `distance.inMeters`.
    pub distance: DistanceSummary,
    /// `activeCaloriesBurned` / `totalCaloriesBurned` `inKilocalories`.
    pub calories: CaloriesSummary,
    /// `vo2Max.inMillilitersPerMinuteKilogram`; not trended.
    pub vo2_max: MetricSummary,
    /// Start of the latest step record.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Sleep session overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sleep {
    /// Sessions with both start and end.
    pub sessions: usize,
    /// Mean session length in hours, rounded to two decimals.
    pub average_hours: Option<f64>,
    /// Start of the latest session.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Component scores (0 when the input is missing) and their mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthScore {
    /// From BMI.
    pub body_composition: u32,
    /// From resting heart rate.
    pub cardiovascular: u32,
    /// From average daily steps.
    pub fitness: u32,
    /// Integer mean of the non-zero components.
    pub overall: u32,
}

/// Score the available inputs.
#[must_use]
pub fn health_score(
    bmi: Option<f64>,
    resting_hr: Option<f64>,
    daily_steps: Option<u64>,
) -> HealthScore {
    let body_composition = match bmi {
        Some(b) if b > 0.0 => {
            if (18.5..=25.0).contains(&b) {
                85
            } else if b > 25.0 && b <= 30.0 {
                70
            } else {
                50
            }
        }
        _ => 0,
    };

    let cardiovascular = match resting_hr {
        Some(hr) if hr > 0.0 => {
            if (60.0..=80.0).contains(&hr) {
                85
            } else if (50.0..=90.0).contains(&hr) {
                70
            } else {
                50
            }
        }
        _ => 0,
    };

    let fitness = match daily_steps {
        Some(s) if s >= 10_000 => 90,
        Some(s) if s >= 7_500 => 75,
        Some(s) if s >= 5_000 => 60,
        Some(s) if s > 0 => 40,
        _ => 0,
    };

    let scored: Vec<u32> = [body_composition, cardiovascular, fitness]
        .into_iter()
        .filter(|s| *s > 0)
        .collect();
    let overall = if scored.is_empty() {
        0
    } else {
        scored.iter().sum::<u32>() / u32::try_from(scored.len()).unwrap_or(1)
    };

    HealthScore {
        body_composition,
        cardiovascular,
        fitness,
        overall,
    }
}

/// The complete dashboard payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Body composition.
    pub body_composition: BodyComposition,
    /// Vital signs.
    pub vital_signs: VitalSigns,
    /// Activity.
    pub fitness: Fitness,
    /// Sleep.
    pub sleep: Sleep,
    /// Scores.
    pub health_score: HealthScore,
    /// Reference time used for every lookback window.
    pub generated_at: DateTime<Utc>,
}

/// Builds health reports from storage relative to a fixed `now`.
#[derive(Debug)]
pub struct HealthAnalyzer<'a> {
    storage: &'a Storage,
    now: DateTime<Utc>,
}

impl<'a> HealthAnalyzer<'a> {
    /// Create an analyzer whose windows end at `now`.
    #[must_use]
    pub fn new(storage: &'a Storage, now: DateTime<Utc>) -> Self {
        Self { storage, now }
    }

    fn series(&self, method: &str, key: &str, days: u32) -> Result<TimeSeries> {
        let records = self
            .storage
            .records_since(method, days_before(self.now, days)?)?;
        Ok(extract_points(&records, method, key))
    }

    /// Body composition over the last 90 days (height: 365).
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn body_composition(&self) -> Result<BodyComposition> {
        let weight = self.series("weight", "inKilograms", BODY_LOOKBACK_DAYS)?;
        let height = self.series("height", "inMeters", HEIGHT_LOOKBACK_DAYS)?;
        let body_fat = self.series("bodyFat", "percentage", BODY_LOOKBACK_DAYS)?;
        let lean = self.series("leanBodyMass", "inKilograms", BODY_LOOKBACK_DAYS)?;
        let bmr = self.series("basalMetabolicRate", "inKilocaloriesPerDay", BODY_LOOKBACK_DAYS)?;

        let last_updated = weight.last().map(|(t, _)| *t);
        let weight = MetricSummary::from_series(&weight, true);
        let height = MetricSummary::from_series(&height, false);
        let body_mass_index = weight.current.zip(height.current).and_then(|(w, h)| bmi(w, h));

        Ok(BodyComposition {
            weight,
            height,
            body_fat: MetricSummary::from_series(&body_fat, true),
            lean_body_mass: MetricSummary::from_series(&lean, true),
            basal_metabolic_rate: MetricSummary::from_series(&bmr, true),
            bmi: body_mass_index,
            last_updated,
        })
    }

    /// Vital signs over the last 30 days.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn vital_signs(&self) -> Result<VitalSigns> {
        let heart_rate = self.series("heartRate", "beatsPerMinute", VITALS_LOOKBACK_DAYS)?;
        let resting = self.series("restingHeartRate", "beatsPerMinute", VITALS_LOOKBACK_DAYS)?;
        let o2 = self.series("oxygenSaturation", "percentage", VITALS_LOOKBACK_DAYS)?;
        let temp = self.series("bodyTemperature", "inCelsius", VITALS_LOOKBACK_DAYS)?;

        let bp_records = self.storage.records_since(
            "bloodPressure",
            days_before(self.now, VITALS_LOOKBACK_DAYS)?,
        )?;
        let readings: Vec<(f64, f64)> = bp_records
            .iter()
            .filter_map(|r| {
                Some((
                    r.value("bloodPressure", "systolic")?,
                    r.value("bloodPressure", "diastolic")?,
                ))
            })
            .collect();

        Ok(VitalSigns {
            last_updated: heart_rate.last().map(|(t, _)| *t),
            heart_rate: MetricSummary::from_series(&heart_rate, true),
            resting_heart_rate: resting.last().map(|(_, v)| *v),
            blood_pressure: BloodPressure {
                systolic: readings.last().map(|(s, _)| *s),
                diastolic: readings.last().map(|(_, d)| *d),
                readings,
            },
            oxygen_saturation: MetricSummary::from_series(&o2, false),
            body_temperature: MetricSummary::from_series(&temp, false),
        })
    }

    /// Activity over the last 30 days (VO2 max: 90).
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn fitness(&self) -> Result<Fitness> {
        let steps = self.series("steps", "count", FITNESS_LOOKBACK_DAYS)?;
        let distance = self.series("distance", "inMeters", FITNESS_LOOKBACK_DAYS)?;
        let active = self.series("activeCaloriesBurned", "inKilocalories", FITNESS_LOOKBACK_DAYS)?;
        let total = self.series("totalCaloriesBurned", "inKilocalories", FITNESS_LOOKBACK_DAYS)?;
        let vo2 = self.series("vo2Max", "inMillilitersPerMinuteKilogram", VO2_LOOKBACK_DAYS)?;

        let daily_steps: Vec<f64> = daily_totals(&steps);
        let daily_km: Vec<f64> = daily_totals(&distance).iter().map(|m| m / 1000.0).collect();

        Ok(Fitness {
            steps: StepsSummary {
                total: (!steps.is_empty()).then(|| steps.iter().map(|(_, v)| v).sum()),
                daily_average: average(&daily_steps).map(truncate),
                trend: (!daily_steps.is_empty()).then(|| trend_label(&daily_steps)),
                daily: daily_steps,
            },
            distance: DistanceSummary {
                total_km: (!daily_km.is_empty()).then(|| daily_km.iter().sum()),
                daily_average_km: average(&daily_km).map(|km| round_to(km, 2)),
            },
            calories: CaloriesSummary {
                active_daily_average: average(&daily_totals(&active)).map(truncate),
                total_daily_average: average(&daily_totals(&total)).map(truncate),
            },
            vo2_max: MetricSummary::from_series(&vo2, false),
            last_updated: steps.last().map(|(t, _)| *t),
        })
    }

    /// Sleep sessions over the last 30 days.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn sleep(&self) -> Result<Sleep> {
        let records = self.storage.records_since(
            "sleepSession",
            days_before(self.now, SLEEP_LOOKBACK_DAYS)?,
        )?;
        #[allow(clippy::cast_precision_loss)]
        let hours: Vec<f64> = records
            .iter()
            .filter_map(|r| r.duration_secs())
            .map(|s| s as f64 / 3600.0)
            .collect();

        Ok(Sleep {
            sessions: hours.len(),
            average_hours: average(&hours).map(|h| round_to(h, 2)),
            last_updated: records.iter().filter_map(|r| r.start).max(),
        })
    }

    /// Build the full report.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn report(&self) -> Result<HealthReport> {
        let body_composition = self.body_composition()?;
        let vital_signs = self.vital_signs()?;
        let fitness = self.fitness()?;
        let sleep = self.sleep()?;

        let health_score = health_score(
            body_composition.bmi.map(|b| b.value),
            vital_signs.resting_heart_rate,
            fitness.steps.daily_average,
        );

        Ok(HealthReport {
            body_composition,
            vital_signs,
            fitness,
            sleep,
            health_score,
            generated_at: self.now,
        })
    }
}

fn daily_totals(series: &TimeSeries) -> Vec<f64> {
    aggregate_by_date(series, AggFunc::Sum)
        .into_iter()
        .map(|d| d.value)
        .collect()
}

fn average(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| mean(values))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate(v: f64) -> u64 {
    v.max(0.0) as u64
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}
