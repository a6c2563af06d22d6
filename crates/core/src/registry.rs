//! Metric definitions declared by a collector during Define.
//!
//! The registry is filled once through the define context and then shared
//! read-only (behind an `Arc`) by every task session.

use std::collections::HashMap;

use serde::Serialize;
use tally_plugin_protocol::ContextError;
use tracing::debug;

use crate::namespace::Namespace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    #[serde(serialize_with = "serialize_display")]
    pub namespace: Namespace,
    pub unit: String,
    pub is_default: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDefinition {
    pub name: String,
    pub description: String,
}

/// Format an example configuration is validated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExampleConfigFormat {
    #[default]
    Yaml,
    Json,
    /// Stored without validation.
    Opaque,
}

impl ExampleConfigFormat {
    pub fn validate(&self, text: &str) -> Result<(), ContextError> {
        match self {
            Self::Yaml => serde_yaml::from_str::<serde_yaml::Value>(text)
                .map(|_| ())
                .map_err(|e| ContextError::InvalidConfig(format!("example config is not YAML: {e}"))),
            Self::Json => serde_json::from_str::<serde_json::Value>(text)
                .map(|_| ())
                .map_err(|e| ContextError::InvalidConfig(format!("example config is not JSON: {e}"))),
            Self::Opaque => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: Vec<MetricDefinition>,
    index: HashMap<Namespace, usize>,
    groups: Vec<GroupDefinition>,
    example_config: Option<String>,
    allow_undefined: bool,
    strict: bool,
}

impl MetricRegistry {
    /// A registry where redefinition is rejected when `strict` is set.
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn define_metric(
        &mut self,
        namespace: &str,
        unit: &str,
        is_default: bool,
        description: &str,
    ) -> Result<(), ContextError> {
        let namespace = Namespace::parse(namespace)?;
        let definition = MetricDefinition {
            namespace: namespace.clone(),
            unit: unit.to_string(),
            is_default,
            description: description.to_string(),
        };

        match self.index.get(&namespace) {
            Some(_) if self.strict => Err(ContextError::DuplicateDefinition(namespace.to_string())),
            Some(&position) => {
                debug!(namespace = %namespace, "Replacing metric definition");
                self.metrics[position] = definition;
                Ok(())
            }
            None => {
                self.index.insert(namespace, self.metrics.len());
                self.metrics.push(definition);
                Ok(())
            }
        }
    }

    pub fn define_group(&mut self, name: &str, description: &str) -> Result<(), ContextError> {
        if name.trim().is_empty() {
            return Err(ContextError::invalid_namespace(name, "group name is empty"));
        }
        self.groups.push(GroupDefinition {
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    pub fn define_example_config(
        &mut self,
        text: &str,
        format: ExampleConfigFormat,
    ) -> Result<(), ContextError> {
        format.validate(text)?;
        self.example_config = Some(text.to_string());
        Ok(())
    }

    pub fn set_allow_undefined(&mut self) {
        self.allow_undefined = true;
    }

    #[must_use]
    pub fn metric(&self, namespace: &Namespace) -> Option<&MetricDefinition> {
        self.index.get(namespace).map(|&i| &self.metrics[i])
    }

    /// Definitions in the order they were first declared.
    #[must_use]
    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    pub fn default_metrics(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter().filter(|m| m.is_default)
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupDefinition] {
        &self.groups
    }

    /// Description of the most recently declared group called `name`.
    #[must_use]
    pub fn group_description(&self, name: &str) -> Option<&str> {
        self.groups
            .iter()
            .rev()
            .find(|g| g.name == name)
            .map(|g| g.description.as_str())
    }

    #[must_use]
    pub fn example_config(&self) -> Option<&str> {
        self.example_config.as_deref()
    }

    #[must_use]
    pub fn allows_undefined(&self) -> bool {
        self.allow_undefined
    }

    /// Check that `namespace` may be emitted and return its definition, if any.
    ///
    /// A registry without definitions accepts everything.
    pub fn resolve_emission(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<&MetricDefinition>, ContextError> {
        match self.metric(namespace) {
            Some(definition) => Ok(Some(definition)),
            None if self.allow_undefined || self.metrics.is_empty() => Ok(None),
            None => Err(ContextError::invalid_namespace(
                namespace.to_string(),
                "metric was not defined",
            )),
        }
    }
}

fn serialize_display<S: serde::Serializer>(value: &Namespace, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
