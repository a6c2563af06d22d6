//! Serializable records produced by a collector during a lifecycle call.
//!
//! The runtime hands these back to the host after each call. They carry only
//! owned data so they can be printed as JSON lines or shipped across a process
//! boundary without referring to runtime state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{LogLevel, MetricType, Tags, Timestamp, TypedValue};

/// One emitted metric with its modifiers fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub namespace: String,
    pub value: TypedValue,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metric_type: MetricType,
}

impl MetricRecord {
    /// Convenience lookup used by hosts and tests.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// A non-fatal problem reported by a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub timestamp: Timestamp,
}

impl Warning {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Timestamp::now(),
        }
    }
}

/// A structured log line recorded by a collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    pub timestamp: Timestamp,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            level,
            message: message.into(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            timestamp: Timestamp::now(),
        }
    }
}
