//! Instance and task limits declared by a collector.
//!
//! The runtime only stores and reports these values. Enforcement belongs to
//! whoever schedules tasks; [`InstanceLimits::admits`] is the check such a
//! scheduler (and the bundled debug host) runs before starting another task.

use serde::Serialize;
use tally_plugin_protocol::ContextError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstanceLimits {
    instances: u32,
    tasks_per_instance: u32,
    #[serde(skip)]
    declared: Declared,
    #[serde(skip)]
    strict: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Declared {
    instances: bool,
    tasks_per_instance: bool,
}

impl InstanceLimits {
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    pub fn define_instances_limit(&mut self, limit: u32) -> Result<(), ContextError> {
        Self::declare(
            "instances limit",
            &mut self.instances,
            &mut self.declared.instances,
            self.strict,
            limit,
        )
    }

    pub fn define_tasks_per_instance_limit(&mut self, limit: u32) -> Result<(), ContextError> {
        Self::declare(
            "tasks per instance limit",
            &mut self.tasks_per_instance,
            &mut self.declared.tasks_per_instance,
            self.strict,
            limit,
        )
    }

    /// Maximum concurrently running instances; 0 means unbounded.
    #[must_use]
    pub const fn instances_limit(&self) -> u32 {
        self.instances
    }

    /// Maximum tasks per instance; 0 means unbounded.
    #[must_use]
    pub const fn tasks_per_instance_limit(&self) -> u32 {
        self.tasks_per_instance
    }

    /// Whether one more task fits next to `active_tasks` running ones.
    #[must_use]
    pub fn admits(&self, active_tasks: usize) -> bool {
        self.tasks_per_instance == 0 || active_tasks < self.tasks_per_instance as usize
    }

    fn declare(
        name: &str,
        slot: &mut u32,
        declared: &mut bool,
        strict: bool,
        limit: u32,
    ) -> Result<(), ContextError> {
        if strict && *declared && *slot != limit {
            return Err(ContextError::DuplicateDefinition(name.to_string()));
        }
        *slot = limit;
        *declared = true;
        Ok(())
    }
}
