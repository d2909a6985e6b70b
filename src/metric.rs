//! Metric point value type shared by collectors, the output queue and sinks
//!
//! A point is one (name, tags, meta, fields, timestamp) measurement. It is
//! validated once at construction and is immutable afterwards.

use crate::error::MetricError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type for consistent time handling across the pipeline
pub type Timestamp = DateTime<Utc>;

/// String key/value map used for tags and meta annotations
pub type Labels = BTreeMap<String, String>;

/// A single field value carried by a metric point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl FieldValue {
    /// Integer view of the value, if it is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// One measurement emitted by a collector
///
/// Tags identify the measured entity, meta holds collector-wide constant
/// annotations (source, group, unit) that sinks may or may not persist.
/// Deserialized points go through the same validation as `new`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawMetricPoint")]
pub struct MetricPoint {
    name: String,
    tags: Labels,
    meta: Labels,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Timestamp,
}

/// Unvalidated wire form of a `MetricPoint`
#[derive(Deserialize)]
struct RawMetricPoint {
    name: String,
    #[serde(default)]
    tags: Labels,
    #[serde(default)]
    meta: Labels,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Timestamp,
}

impl TryFrom<RawMetricPoint> for MetricPoint {
    type Error = MetricError;

    fn try_from(raw: RawMetricPoint) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.tags, raw.meta, raw.fields, raw.timestamp)
    }
}

impl MetricPoint {
    /// Build a validated metric point
    ///
    /// # Errors
    ///
    /// Returns a `MetricError` if the name is empty, there are no fields,
    /// any tag or field key is empty, or a float field is not finite.
    pub fn new(
        name: impl Into<String>,
        tags: Labels,
        meta: Labels,
        fields: BTreeMap<String, FieldValue>,
        timestamp: Timestamp,
    ) -> Result<Self, MetricError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MetricError::EmptyName);
        }
        if fields.is_empty() {
            return Err(MetricError::NoFields(name));
        }
        if tags.keys().chain(fields.keys()).any(|k| k.is_empty()) {
            return Err(MetricError::EmptyKey(name));
        }
        for (key, value) in &fields {
            if let FieldValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(MetricError::NonFiniteField {
                        name,
                        field: key.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            tags,
            meta,
            fields,
            timestamp,
        })
    }

    /// Convenience constructor for the common single `value` field case
    pub fn with_value(
        name: impl Into<String>,
        tags: Labels,
        meta: Labels,
        value: impl Into<FieldValue>,
        timestamp: Timestamp,
    ) -> Result<Self, MetricError> {
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value.into());
        Self::new(name, tags, meta, fields, timestamp)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Labels {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn meta(&self) -> &Labels {
        &self.meta
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Copy of this point with meta entries merged into the tags
    ///
    /// Existing tags win over meta entries with the same key.
    pub fn meta_as_tags(&self) -> Self {
        let mut tags = self.tags.clone();
        for (key, value) in &self.meta {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Self {
            tags,
            meta: Labels::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_point_creation() {
        let now = Utc::now();
        let point = MetricPoint::with_value(
            "cpufreq",
            labels(&[("type", "hwthread"), ("type-id", "3")]),
            labels(&[("unit", "Hz")]),
            2_400_000_000i64,
            now,
        )
        .unwrap();

        assert_eq!(point.name(), "cpufreq");
        assert_eq!(point.tag("type-id"), Some("3"));
        assert_eq!(point.meta().get("unit").map(String::as_str), Some("Hz"));
        assert_eq!(
            point.field("value").and_then(FieldValue::as_i64),
            Some(2_400_000_000)
        );
        assert_eq!(point.timestamp(), now);
    }

    #[test]
    fn test_point_rejects_empty_name() {
        let result = MetricPoint::with_value(" ", Labels::new(), Labels::new(), 1i64, Utc::now());
        assert_eq!(result.unwrap_err(), MetricError::EmptyName);
    }

    #[test]
    fn test_point_rejects_missing_fields() {
        let result = MetricPoint::new(
            "cpufreq",
            Labels::new(),
            Labels::new(),
            BTreeMap::new(),
            Utc::now(),
        );
        assert!(matches!(result, Err(MetricError::NoFields(_))));
    }

    #[test]
    fn test_point_rejects_empty_tag_key() {
        let result = MetricPoint::with_value(
            "cpufreq",
            labels(&[("", "x")]),
            Labels::new(),
            1i64,
            Utc::now(),
        );
        assert!(matches!(result, Err(MetricError::EmptyKey(_))));
    }

    #[test]
    fn test_point_rejects_nan() {
        let result = MetricPoint::with_value(
            "load",
            Labels::new(),
            Labels::new(),
            f64::NAN,
            Utc::now(),
        );
        assert!(matches!(result, Err(MetricError::NonFiniteField { .. })));
    }

    #[test]
    fn test_meta_as_tags_keeps_existing_tags() {
        let point = MetricPoint::with_value(
            "cpufreq",
            labels(&[("type", "hwthread"), ("unit", "tag-wins")]),
            labels(&[("unit", "Hz"), ("group", "CPU")]),
            1i64,
            Utc::now(),
        )
        .unwrap();

        let merged = point.meta_as_tags();
        assert_eq!(merged.tag("group"), Some("CPU"));
        assert_eq!(merged.tag("unit"), Some("tag-wins"));
        assert!(merged.meta().is_empty());
        assert_eq!(merged.fields(), point.fields());
    }

    #[test]
    fn test_point_serialization_shape() {
        let point = MetricPoint::with_value(
            "cpufreq",
            labels(&[("type", "hwthread")]),
            labels(&[("group", "CPU")]),
            1000i64,
            Utc::now(),
        )
        .unwrap();

        let json: serde_json::Value = serde_json::to_value(&point).unwrap();
        assert_eq!(json["name"], "cpufreq");
        assert_eq!(json["tags"]["type"], "hwthread");
        assert_eq!(json["meta"]["group"], "CPU");
        assert_eq!(json["fields"]["value"], 1000);
    }

    #[test]
    fn test_deserialization_validates() {
        let point = MetricPoint::with_value(
            "cpufreq",
            labels(&[("type", "hwthread")]),
            labels(&[("unit", "Hz")]),
            1000i64,
            Utc::now(),
        )
        .unwrap();
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(serde_json::from_str::<MetricPoint>(&json).unwrap(), point);

        let empty_name = r#"{"name":"","fields":{"value":1},"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<MetricPoint>(empty_name).is_err());

        let no_fields = r#"{"name":"cpufreq","fields":{},"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<MetricPoint>(no_fields).is_err());

        let empty_tag = r#"{"name":"cpufreq","tags":{"":"x"},"fields":{"value":1},"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<MetricPoint>(empty_tag).is_err());
    }
}
