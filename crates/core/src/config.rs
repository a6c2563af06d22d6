//! Task configuration as seen by a collector.
//!
//! The host supplies configuration as raw text (usually a JSON object). It is
//! flattened into dotted keys so collectors can read nested values without a
//! JSON dependency:
//!
//! ```rust
//! # use tally_core::config::TaskConfig;
//! let config = TaskConfig::from_json(r#"{"db": {"host": "localhost", "ports": [1, 2]}}"#).unwrap();
//! assert_eq!(config.get("db.host"), "localhost");
//! assert_eq!(config.get("db.ports"), "1,2");
//! assert_eq!(config.get("missing"), "");
//! ```

use serde_json::Value as JsonValue;
use tally_plugin_protocol::ContextError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig {
    raw: String,
    pairs: Vec<(String, String)>,
}

impl TaskConfig {
    /// Parse and flatten a JSON object. Empty (or whitespace) text yields an empty config.
    pub fn from_json(raw: &str) -> Result<Self, ContextError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: JsonValue = serde_json::from_str(raw)
            .map_err(|e| ContextError::InvalidConfig(format!("malformed JSON: {e}")))?;
        let JsonValue::Object(_) = value else {
            return Err(ContextError::InvalidConfig(
                "configuration must be a JSON object".into(),
            ));
        };

        let mut pairs = Vec::new();
        flatten_into(&mut pairs, None, &value);
        Ok(Self {
            raw: raw.to_string(),
            pairs,
        })
    }

    /// Build a config from pairs the host has already parsed. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_pairs<K, V>(raw: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self {
            raw: raw.into(),
            pairs: Vec::new(),
        };
        for (key, value) in pairs {
            config.insert(key.into(), value.into());
        }
        config
    }

    /// Value for `key`, or an empty string when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> String {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.pairs.iter().map(|(k, _)| k.clone()).collect()
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn insert(&mut self, key: String, value: String) {
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }
}

fn flatten_into(pairs: &mut Vec<(String, String)>, prefix: Option<&str>, value: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                let path = match prefix {
                    Some(prefix) => format!("{prefix}.{key}"),
                    None => key.clone(),
                };
                flatten_into(pairs, Some(&path), nested);
            }
        }
        JsonValue::Array(items) => {
            let Some(path) = prefix else { return };
            // Only scalar arrays have a flat representation
            let scalars: Option<Vec<String>> = items.iter().map(scalar_text).collect();
            if let Some(scalars) = scalars {
                pairs.push((path.to_string(), scalars.join(",")));
            }
        }
        scalar => {
            if let (Some(path), Some(text)) = (prefix, scalar_text(scalar)) {
                pairs.push((path.to_string(), text));
            }
        }
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null => Some(String::new()),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}
