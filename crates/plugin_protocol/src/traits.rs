//! Core traits for implementing Tally collectors.
//!
//! A collector is a type implementing [`Plugin`]. The runtime calls its
//! lifecycle hooks and hands it a context object for each call:
//! - [`DefineContext`] - declare metrics, groups, example config and limits (once per process)
//! - [`Context`] - task config, object store, warnings and logs (Load / Unload)
//! - [`CollectContext`] - everything in [`Context`] plus metric emission and modifier rules
//!
//! Generic conveniences (`store`, `load`, `add_metric`) live on the extension
//! traits [`ContextExt`] and [`CollectContextExt`], which are implemented for
//! every context, including `dyn` ones.

use std::any::{type_name, Any};

use crate::error::ContextError;
use crate::modifiers::{Modifier, RuleId};
use crate::types::{IntoMetricValue, LogLevel, TypedValue};

/// Type-erased value kept in a task's object store.
pub type StoredObject = dyn Any + Send + Sync;

/// The main collector trait.
///
/// **Purpose**: Connects your collector to the runtime. All lifecycle hooks
/// have no-op defaults; the capabilities you expose through [`Plugin::collector`]
/// and [`Plugin::streaming_collector`] decide how Collect requests are served.
/// A plugin that exposes neither is rejected when the runtime starts.
///
/// # Example
///
/// ```rust
/// # use tally_plugin_protocol::{Plugin, Collector, CollectContext, CollectContextExt, DefineContext};
/// pub struct Uptime;
///
/// impl Collector for Uptime {
///     fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
///         ctx.add_metric("/host/uptime", 42u64, &[])?;
///         Ok(())
///     }
/// }
///
/// impl Plugin for Uptime {
///     fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
///         ctx.define_metric("/host/uptime", "s", true, "Seconds since boot")?;
///         Ok(())
///     }
///
///     fn collector(&self) -> Option<&dyn Collector> {
///         Some(self)
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Declare metrics, groups, example configuration and instance limits.
    ///
    /// Called exactly once, before any task exists. An error here aborts startup.
    fn define(&self, _ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Prepare per-task state (connections, counters) and store it in the context.
    ///
    /// Optional for the host: a task may be collected without being loaded.
    fn load(&self, _ctx: &dyn Context) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release per-task state. The context is destroyed once this returns.
    fn unload(&self, _ctx: &dyn Context) -> anyhow::Result<()> {
        Ok(())
    }

    /// Request/response collection capability.
    fn collector(&self) -> Option<&dyn Collector> {
        None
    }

    /// Long-running collection capability.
    fn streaming_collector(&self) -> Option<&dyn StreamingCollector> {
        None
    }
}

/// Request/response collection: one `collect` call per host Collect request.
pub trait Collector: Send + Sync {
    fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()>;
}

/// Streaming collection.
///
/// `stream_collect` is started once per task and is expected to keep emitting
/// until [`Context::is_done`] reports `true`. The host drains emitted records
/// periodically while the call is still running.
pub trait StreamingCollector: Send + Sync {
    fn stream_collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()>;
}

/// Per-task context available during Load, Collect and Unload.
///
/// All methods take `&self`: the runtime guards its state internally, so the
/// same context can be read by the host while a streaming collector writes to it.
pub trait Context: Send + Sync {
    /// Identifier of the task this context belongs to.
    fn task_id(&self) -> &str;

    /// Value of a configuration key, or an empty string when the key is absent.
    fn config_value(&self, key: &str) -> String;

    /// Configuration keys in the order they were supplied.
    fn config_keys(&self) -> Vec<String>;

    /// Raw configuration text, or an empty string when none was supplied.
    fn raw_config(&self) -> String;

    /// Store a type-erased value under `key`, replacing any previous value.
    ///
    /// Prefer [`ContextExt::store`].
    fn store_object(&self, key: &str, value: Box<StoredObject>);

    /// Run `f` with mutable access to the value stored under `key`, if any.
    ///
    /// The value is taken out of the store while `f` runs, so `f` may use the
    /// object store freely. If `f` stores a new value under `key`, that value
    /// is kept. Prefer [`ContextExt::load`] and [`ContextExt::load_with`].
    fn with_object(&self, key: &str, f: &mut dyn FnMut(Option<&mut StoredObject>));

    /// Remove the value stored under `key`. Returns whether a value was present.
    fn remove_object(&self, key: &str) -> bool;

    /// Record a warning for the host. Never fails; excess warnings are dropped.
    fn add_warning(&self, message: &str);

    /// Record a structured log entry for the host.
    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]);

    /// Whether the task is being unloaded. Streaming collectors poll this.
    fn is_done(&self) -> bool;
}

/// Context available during Collect.
pub trait CollectContext: Context {
    /// Emit a metric with an already converted value.
    ///
    /// Prefer [`CollectContextExt::add_metric`], which accepts any
    /// [`IntoMetricValue`].
    fn add_typed_metric(
        &self,
        namespace: &str,
        value: TypedValue,
        modifiers: &[Modifier],
    ) -> Result<(), ContextError>;

    /// Apply `modifiers` to every metric matching `selector` emitted by this
    /// task from now on, until the returned rule is dismissed or the task is unloaded.
    fn always_apply(&self, selector: &str, modifiers: &[Modifier])
        -> Result<RuleId, ContextError>;

    /// Stop applying one rule. Returns whether the rule was still active.
    fn dismiss_modifier(&self, rule: RuleId) -> bool;

    /// Clear every always-apply rule of this task.
    fn dismiss_all_modifiers(&self);

    /// Whether the host asked for `namespace`. An empty request means everything.
    fn should_process(&self, namespace: &str) -> bool;

    /// The host's requested-metrics filter, verbatim.
    fn requested_metrics(&self) -> Vec<String>;
}

/// Context available during Define.
pub trait DefineContext {
    fn define_metric(
        &mut self,
        namespace: &str,
        unit: &str,
        is_default: bool,
        description: &str,
    ) -> Result<(), ContextError>;

    fn define_group(&mut self, name: &str, description: &str) -> Result<(), ContextError>;

    /// Provide an example task configuration, validated by the host.
    fn define_example_config(&mut self, config: &str) -> Result<(), ContextError>;

    /// Maximum number of concurrently running instances; 0 means unbounded.
    fn define_instances_limit(&mut self, limit: u32) -> Result<(), ContextError>;

    /// Maximum number of tasks per instance; 0 means unbounded.
    fn define_tasks_per_instance_limit(&mut self, limit: u32) -> Result<(), ContextError>;

    /// Allow emitting metrics that were never defined.
    fn set_allow_adding_undefined_metrics(&mut self);
}

/// Typed object-store helpers for every [`Context`].
pub trait ContextExt: Context {
    /// Store `value` under `key`. It survives across calls until Unload.
    fn store<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.store_object(key, Box::new(value));
    }

    /// Clone the value stored under `key`.
    ///
    /// Fails with [`ContextError::ObjectNotFound`] when the key is absent or
    /// holds a value of another type.
    fn load<T: Any + Clone>(&self, key: &str) -> Result<T, ContextError> {
        self.load_with(key, |value: &mut T| value.clone())
    }

    /// Run `f` on the value stored under `key` in place.
    fn load_with<T: Any, R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, ContextError> {
        let mut f = Some(f);
        let mut outcome = Err(ContextError::object_not_found(key, "key not found"));
        self.with_object(key, &mut |slot| {
            let Some(object) = slot else {
                return;
            };
            outcome = match (object.downcast_mut::<T>(), f.take()) {
                (Some(value), Some(f)) => Ok(f(value)),
                _ => Err(ContextError::object_not_found(
                    key,
                    format!("stored value is not a {}", type_name::<T>()),
                )),
            };
        });
        outcome
    }

    fn contains(&self, key: &str) -> bool {
        let mut present = false;
        self.with_object(key, &mut |slot| present = slot.is_some());
        present
    }
}

impl<C: Context + ?Sized> ContextExt for C {}

/// Value-converting helpers for every [`CollectContext`].
pub trait CollectContextExt: CollectContext {
    /// Emit a metric.
    ///
    /// Fails with [`ContextError::InvalidValue`] when `value` cannot be
    /// represented, with [`ContextError::InvalidNamespace`] when the namespace
    /// is malformed or undefined. No record is produced on failure.
    fn add_metric(
        &self,
        namespace: &str,
        value: impl IntoMetricValue,
        modifiers: &[Modifier],
    ) -> Result<(), ContextError> {
        let value = value.into_metric_value()?;
        self.add_typed_metric(namespace, value, modifiers)
    }
}

impl<C: CollectContext + ?Sized> CollectContextExt for C {}
