//! Modifiers adjust the tags and metadata of an emitted metric.
//!
//! They are passed at the call site of `add_metric` or registered as
//! "always apply" rules for every metric under a namespace selector.
//!
//! ```rust
//! # use tally_plugin_protocol::{Modifier, MetricType};
//! let modifiers = [
//!     Modifier::add_tags([("origin", "x")]),
//!     Modifier::description("Memory in use"),
//!     Modifier::metric_type(MetricType::Gauge),
//! ];
//! assert_eq!(modifiers.len(), 3);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{MetricType, Tags, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// Merge tags into the metric; later additions win on key conflicts.
    AddTags(Tags),
    /// Remove tags by key. Applied after every addition.
    RemoveTags(BTreeSet<String>),
    SetTimestamp(Timestamp),
    SetDescription(String),
    SetUnit(String),
    SetMetricType(MetricType),
}

/// Handle to one always-apply rule, used to dismiss it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u64);

impl RuleId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Modifier {
    #[must_use]
    pub fn add_tags<K, V>(tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::AddTags(
            tags.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn remove_tags<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self::RemoveTags(keys.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn timestamp(secs: i64, nanos: u32) -> Self {
        Self::SetTimestamp(Timestamp::new(secs, nanos))
    }

    #[must_use]
    pub fn description(text: impl Into<String>) -> Self {
        Self::SetDescription(text.into())
    }

    #[must_use]
    pub fn unit(unit: impl Into<String>) -> Self {
        Self::SetUnit(unit.into())
    }

    #[must_use]
    pub const fn metric_type(kind: MetricType) -> Self {
        Self::SetMetricType(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_build_expected_variants() {
        let add = Modifier::add_tags([("a", "1"), ("b", "2")]);
        match add {
            Modifier::AddTags(tags) => {
                assert_eq!(tags.get("a").map(String::as_str), Some("1"));
                assert_eq!(tags.len(), 2);
            }
            other => panic!("unexpected modifier {other:?}"),
        }

        let remove = Modifier::remove_tags(["a", "a", "c"]);
        assert_eq!(
            remove,
            Modifier::RemoveTags(["a".to_string(), "c".to_string()].into_iter().collect())
        );
        assert_eq!(
            Modifier::timestamp(1, 1_000_000_001),
            Modifier::SetTimestamp(Timestamp { secs: 2, nanos: 1 })
        );
    }
}
