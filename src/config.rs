//! Typed configuration for collectors, the output queue and sinks
//!
//! Loading these values from files or the command line is left to the
//! host application. Everything here deserializes from JSON shaped values
//! and falls back to sensible defaults for absent keys.

use crate::error::CollectorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the CPU frequency collector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuFreqConfig {
    /// Metric names the dispatch layer must suppress
    pub exclude_metrics: Vec<String>,
}

/// What a producer does when the output queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until a consumer frees a slot
    #[default]
    Block,
    /// Discard the point being pushed
    DropNewest,
    /// Discard the oldest queued point to make room
    DropOldest,
}

/// Configuration of the output queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued points (at least 1)
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow_policy: OverflowPolicy::Block,
        }
    }
}

/// Settings shared by every sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink implementation name, e.g. "json"
    #[serde(rename = "type")]
    pub sink_type: String,
    /// Merge point meta annotations into tags before writing
    pub meta_as_tags: bool,
}

/// Scheduling settings for the collector manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Time between two reads of every collector, in milliseconds
    pub interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

impl ManagerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Parse a collector configuration, treating `null` as "all defaults"
///
/// # Errors
///
/// Returns `CollectorError::Config` if the value does not match the
/// expected shape.
pub fn parse_collector_config<T>(value: &serde_json::Value) -> Result<T, CollectorError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(T::deserialize(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cpufreq_config_defaults() {
        let config: CpuFreqConfig = parse_collector_config(&serde_json::Value::Null).unwrap();
        assert!(config.exclude_metrics.is_empty());

        let config: CpuFreqConfig = parse_collector_config(&json!({})).unwrap();
        assert!(config.exclude_metrics.is_empty());
    }

    #[test]
    fn test_cpufreq_config_exclude_metrics() {
        let config: CpuFreqConfig =
            parse_collector_config(&json!({"exclude_metrics": ["cpufreq"], "other": 1})).unwrap();
        assert_eq!(config.exclude_metrics, vec!["cpufreq".to_string()]);
    }

    #[test]
    fn test_cpufreq_config_wrong_shape() {
        let result: Result<CpuFreqConfig, _> =
            parse_collector_config(&json!({"exclude_metrics": "cpufreq"}));
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_queue_config_deserialization() {
        let config: QueueConfig =
            serde_json::from_value(json!({"capacity": 8, "overflow_policy": "drop_oldest"}))
                .unwrap();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);

        let config: QueueConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_sink_config_type_key() {
        let config: SinkConfig =
            serde_json::from_value(json!({"type": "json", "meta_as_tags": true})).unwrap();
        assert_eq!(config.sink_type, "json");
        assert!(config.meta_as_tags);
    }

    #[test]
    fn test_manager_interval_never_zero() {
        let config = ManagerConfig { interval_ms: 0 };
        assert_eq!(config.interval(), Duration::from_millis(1));
    }
}
