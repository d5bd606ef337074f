//! Core record types for healthdash.
//!
//! This module defines the data structures for health records pulled from the
//! Health Connect Gateway, plus the catalog of data types ("methods") the
//! gateway exposes.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Methods collected by default.
pub const CORE_METHODS: &[&str] = &[
    "steps",
    "heartRate",
    "sleepSession",
    "distance",
    "totalCaloriesBurned",
];

/// Every Health Connect record type the gateway can serve.
pub const ALL_METHODS: &[&str] = &[
    "activeCaloriesBurned",
    "basalBodyTemperature",
    "basalMetabolicRate",
    "bloodGlucose",
    "bloodPressure",
    "bodyFat",
    "bodyTemperature",
    "boneMass",
    "cervicalMucus",
    "distance",
    "exerciseSession",
    "elevationGained",
    "floorsClimbed",
    "heartRate",
    "height",
    "hydration",
    "leanBodyMass",
    "menstruationFlow",
    "menstruationPeriod",
    "nutrition",
    "ovulationTest",
    "oxygenSaturation",
    "power",
    "respiratoryRate",
    "restingHeartRate",
    "sleepSession",
    "speed",
    "steps",
    "stepsCadence",
    "totalCaloriesBurned",
    "vo2Max",
    "weight",
    "wheelchairPushes",
];

/// Check whether `name` is a Health Connect method the gateway knows.
#[must_use]
pub fn is_known_method(name: &str) -> bool {
    ALL_METHODS.contains(&name)
}

/// Which method set the collector walks each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MethodsMode {
    /// The five core activity methods.
    #[default]
    #[serde(rename = "core", alias = "CORE", alias = "Core")]
    Core,
    /// Every method in [`ALL_METHODS`].
    #[serde(rename = "all", alias = "ALL", alias = "All")]
    All,
}

impl MethodsMode {
    /// The methods selected by this mode.
    #[must_use]
    pub fn methods(self) -> &'static [&'static str] {
        match self {
            Self::Core => CORE_METHODS,
            Self::All => ALL_METHODS,
        }
    }
}

impl std::fmt::Display for MethodsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::All => write!(f, "all"),
        }
    }
}

/// A single health record as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Gateway document id (`_id`), or a BLAKE3 digest when the gateway
    /// omitted one. Unique per method.
    pub key: String,

    /// Health Connect record id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Start of the measured interval (or the instant for point samples).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    /// End of the measured interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    /// Package name of the app that wrote the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Type-specific payload.
    pub data: Value,

    /// When this record was pulled from the gateway.
    pub ingested_at: DateTime<Utc>,
}

impl HealthRecord {
    /// Build a record from one item of a gateway fetch response.
    ///
    /// Returns `None` when the item is not a JSON object.
    #[must_use]
    pub fn from_gateway(item: &Value, ingested_at: DateTime<Utc>) -> Option<Self> {
        let obj = item.as_object()?;

        let key = obj
            .get("_id")
            .and_then(value_as_string)
            .unwrap_or_else(|| Self::compute_key(item));

        let data = match obj.get("data") {
            Some(v) if !v.is_null() => v.clone(),
            _ => Value::Object(serde_json::Map::new()),
        };

        Some(Self {
            key,
            id: obj.get("id").and_then(value_as_string),
            start: obj.get("start").and_then(Value::as_str).and_then(parse_timestamp),
            end: obj.get("end").and_then(Value::as_str).and_then(parse_timestamp),
            app: obj.get("app").and_then(value_as_string),
            data,
            ingested_at,
        })
    }

    /// Compute the BLAKE3 key for an item without a gateway id.
    ///
    /// `serde_json` maps are ordered, so the serialized form is canonical.
    #[must_use]
    pub fn compute_key(item: &Value) -> String {
        blake3::hash(item.to_string().as_bytes()).to_hex().to_string()
    }

    /// Timestamp used for ordering and for advancing the sync cursor:
    /// `end`, falling back to `start`, falling back to the Unix epoch.
    #[must_use]
    pub fn cursor_time(&self) -> DateTime<Utc> {
        self.end.or(self.start).unwrap_or_default()
    }

    /// Read `data[method][key]` as a number.
    ///
    /// Numeric strings are accepted; anything else yields `None`.
    #[must_use]
    pub fn value(&self, method: &str, key: &str) -> Option<f64> {
        let raw = self.data.get(method)?.get(key)?;
        match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Duration of the record interval in seconds, if both ends are known.
    #[must_use]
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an ISO 8601 timestamp.
///
/// Offsets (including `Z`) are honoured; naive timestamps are taken as UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%:z"]
        .iter()
        .find_map(|fmt| {
            DateTime::parse_from_str(s, fmt)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(s, fmt).ok().map(|n| n.and_utc()))
        })
}

/// Format a timestamp the way it is stored and sent to the gateway.
///
/// Fixed-width UTC with millisecond precision, so text ordering matches time
/// ordering.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ingest_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 24, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_core_methods_are_known() {
        for method in CORE_METHODS {
            assert!(is_known_method(method), "{method} missing from catalog");
        }
        assert_eq!(ALL_METHODS.len(), 33);
        assert!(!is_known_method("mood"));
    }

    #[test]
    fn test_methods_mode_selection() {
        assert_eq!(MethodsMode::Core.methods().len(), 5);
        assert_eq!(MethodsMode::All.methods().len(), 33);
        assert_eq!(MethodsMode::default(), MethodsMode::Core);
        assert_eq!(MethodsMode::All.to_string(), "all");
    }

    #[test]
    fn test_methods_mode_accepts_uppercase() {
        let mode: MethodsMode = serde_json::from_str("\"ALL\"").unwrap();
        assert_eq!(mode, MethodsMode::All);
        let mode: MethodsMode = serde_json::from_str("\"core\"").unwrap();
        assert_eq!(mode, MethodsMode::Core);
    }

    #[test]
    fn test_from_gateway_full_item() {
        let item = json!({
            "_id": "abc123",
            "id": "hc-1",
            "start": "2025-08-23T10:00:00Z",
            "end": "2025-08-23T10:15:00.250Z",
            "app": "com.fitness",
            "data": {"steps": {"count": 1200}}
        });

        let record = HealthRecord::from_gateway(&item, ingest_time()).unwrap();
        assert_eq!(record.key, "abc123");
        assert_eq!(record.id.as_deref(), Some("hc-1"));
        assert_eq!(record.app.as_deref(), Some("com.fitness"));
        assert_eq!(
            record.start,
            Some(Utc.with_ymd_and_hms(2025, 8, 23, 10, 0, 0).unwrap())
        );
        assert_eq!(record.value("steps", "count"), Some(1200.0));
        assert_eq!(record.duration_secs(), Some(900));
    }

    #[test]
    fn test_from_gateway_without_id_uses_stable_hash() {
        let item = json!({"start": "2025-08-23T10:00:00Z", "data": {"weight": {"inKilograms": 70.5}}});

        let a = HealthRecord::from_gateway(&item, ingest_time()).unwrap();
        let b = HealthRecord::from_gateway(&item, Utc::now()).unwrap();
        assert_eq!(a.key, b.key);
        assert_eq!(a.key.len(), 64);

        let other = json!({"start": "2025-08-23T11:00:00Z"});
        let c = HealthRecord::from_gateway(&other, ingest_time()).unwrap();
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn test_from_gateway_rejects_non_objects() {
        assert!(HealthRecord::from_gateway(&json!("nope"), ingest_time()).is_none());
        assert!(HealthRecord::from_gateway(&json!([1, 2]), ingest_time()).is_none());
    }

    #[test]
    fn test_from_gateway_missing_data_defaults_to_object() {
        let record = HealthRecord::from_gateway(&json!({"_id": "x"}), ingest_time()).unwrap();
        assert!(record.data.is_object());
        assert!(record.start.is_none());
    }

    #[test]
    fn test_cursor_time_fallbacks() {
        let both = HealthRecord::from_gateway(
            &json!({"_id": "a", "start": "2025-01-01T00:00:00Z", "end": "2025-01-01T01:00:00Z"}),
            ingest_time(),
        )
        .unwrap();
        assert_eq!(both.cursor_time(), Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap());

        let start_only = HealthRecord::from_gateway(
            &json!({"_id": "b", "start": "2025-01-01T00:00:00Z"}),
            ingest_time(),
        )
        .unwrap();
        assert_eq!(
            start_only.cursor_time(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );

        let neither = HealthRecord::from_gateway(&json!({"_id": "c"}), ingest_time()).unwrap();
        assert_eq!(neither.cursor_time(), DateTime::<Utc>::default());
    }

    #[test]
    fn test_value_accepts_numeric_strings() {
        let record = HealthRecord::from_gateway(
            &json!({"_id": "a", "data": {"heartRate": {"beatsPerMinute": "72"}}}),
            ingest_time(),
        )
        .unwrap();
        assert_eq!(record.value("heartRate", "beatsPerMinute"), Some(72.0));
        assert_eq!(record.value("heartRate", "missing"), None);
        assert_eq!(record.value("steps", "count"), None);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 23, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-08-23T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-08-23T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-08-23T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-08-23 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2025, 8, 23, 10, 0, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2025-08-23T10:00:00.000Z");
    }
}
