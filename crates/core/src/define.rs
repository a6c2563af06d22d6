use tally_plugin_protocol::{ContextError, DefineContext};

use crate::limits::InstanceLimits;
use crate::registry::{ExampleConfigFormat, MetricRegistry};

/// The context handed to a collector's `define` hook.
///
/// Collects definitions into a [`MetricRegistry`] and [`InstanceLimits`];
/// [`DefineSession::finish`] hands both to the runtime once Define is over.
#[derive(Debug)]
pub struct DefineSession {
    registry: MetricRegistry,
    limits: InstanceLimits,
    example_format: ExampleConfigFormat,
}

impl DefineSession {
    #[must_use]
    pub fn new(strict: bool, example_format: ExampleConfigFormat) -> Self {
        Self {
            registry: MetricRegistry::new(strict),
            limits: InstanceLimits::new(strict),
            example_format,
        }
    }

    #[must_use]
    pub fn finish(self) -> (MetricRegistry, InstanceLimits) {
        (self.registry, self.limits)
    }
}

impl DefineContext for DefineSession {
    fn define_metric(
        &mut self,
        namespace: &str,
        unit: &str,
        is_default: bool,
        description: &str,
    ) -> Result<(), ContextError> {
        self.registry
            .define_metric(namespace, unit, is_default, description)
    }

    fn define_group(&mut self, name: &str, description: &str) -> Result<(), ContextError> {
        self.registry.define_group(name, description)
    }

    fn define_example_config(&mut self, config: &str) -> Result<(), ContextError> {
        self.registry
            .define_example_config(config, self.example_format)
    }

    fn define_instances_limit(&mut self, limit: u32) -> Result<(), ContextError> {
        self.limits.define_instances_limit(limit)
    }

    fn define_tasks_per_instance_limit(&mut self, limit: u32) -> Result<(), ContextError> {
        self.limits.define_tasks_per_instance_limit(limit)
    }

    fn set_allow_adding_undefined_metrics(&mut self) {
        self.registry.set_allow_undefined();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_session_collects_everything() {
        let mut session = DefineSession::new(false, ExampleConfigFormat::Json);
        let ctx: &mut dyn DefineContext = &mut session;
        ctx.define_metric("/a/b", "b", true, "desc").unwrap();
        ctx.define_group("a", "group a").unwrap();
        ctx.define_example_config(r#"{"iteration": 20}"#).unwrap();
        ctx.define_tasks_per_instance_limit(3).unwrap();
        ctx.set_allow_adding_undefined_metrics();

        let (registry, limits) = session.finish();
        assert_eq!(registry.metrics().len(), 1);
        assert_eq!(registry.group_description("a"), Some("group a"));
        assert!(registry.allows_undefined());
        assert_eq!(limits.tasks_per_instance_limit(), 3);
    }

    #[test]
    fn test_example_config_uses_configured_format() {
        let mut session = DefineSession::new(false, ExampleConfigFormat::Json);
        assert!(session.define_example_config("iteration: 20").is_err());

        let mut session = DefineSession::new(false, ExampleConfigFormat::Yaml);
        assert!(session.define_example_config("iteration: 20").is_ok());
    }
}
