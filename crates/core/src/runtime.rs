//! The collector runtime: Define once, then per-task lifecycle calls.
//!
//! A [`CollectorRuntime`] owns the plugin, the registry filled during Define,
//! the declared limits and the task controller. Hosts drive it through
//! [`CollectorRuntime::on_load`], [`CollectorRuntime::on_collect`] and
//! [`CollectorRuntime::on_unload`]; every call returns the [`CallOutput`]
//! the collector produced.

use std::sync::Arc;
use std::time::Duration;

use tally_plugin_protocol::Plugin;
use tracing::info;

use crate::config::TaskConfig;
use crate::controller::{TaskController, DEFAULT_UNLOAD_TIMEOUT};
use crate::define::DefineSession;
use crate::limits::InstanceLimits;
use crate::registry::{ExampleConfigFormat, MetricRegistry};
use crate::session::CallOutput;
use crate::stats::{ControllerSummary, TaskStats};
use crate::types::{TallyError, TallyResult};

/// Runtime settings chosen by the host.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub name: String,
    pub version: String,
    /// Reject redefinition of metrics and conflicting limits.
    pub strict: bool,
    pub example_config_format: ExampleConfigFormat,
    pub unload_timeout: Duration,
}

impl RuntimeOptions {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            strict: false,
            example_config_format: ExampleConfigFormat::default(),
            unload_timeout: DEFAULT_UNLOAD_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_example_config_format(mut self, format: ExampleConfigFormat) -> Self {
        self.example_config_format = format;
        self
    }

    #[must_use]
    pub fn with_unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout = timeout;
        self
    }
}

/// How a plugin serves Collect requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Request,
    Streaming,
}

pub struct CollectorRuntime {
    plugin: Arc<dyn Plugin>,
    options: RuntimeOptions,
    mode: CollectMode,
    limits: InstanceLimits,
    controller: TaskController,
}

impl CollectorRuntime {
    /// Validate the plugin, run its Define hook and build the runtime.
    ///
    /// Define errors are fatal.
    pub fn start(plugin: Arc<dyn Plugin>, options: RuntimeOptions) -> TallyResult<Self> {
        validate_version(&options.version)?;
        let mode = if plugin.collector().is_some() {
            CollectMode::Request
        } else if plugin.streaming_collector().is_some() {
            CollectMode::Streaming
        } else {
            return Err(TallyError::Config(format!(
                "plugin '{}' exposes neither a collector nor a streaming collector",
                options.name
            )));
        };

        let (registry, limits) = on_define(plugin.as_ref(), &options)?;
        info!(
            plugin = %options.name,
            version = %options.version,
            metrics = registry.metrics().len(),
            mode = ?mode,
            "Collector defined"
        );

        let controller = TaskController::new(Arc::new(registry))
            .with_unload_timeout(options.unload_timeout);
        Ok(Self {
            plugin,
            options,
            mode,
            limits,
            controller,
        })
    }

    /// Supply config and requested-metrics filter for a task before its first call.
    pub fn configure_task(
        &self,
        task_id: &str,
        config: TaskConfig,
        requested: Vec<String>,
    ) -> TallyResult<()> {
        self.controller.configure(task_id, config, requested)
    }

    pub fn on_load(&self, task_id: &str) -> TallyResult<CallOutput> {
        self.controller.load(self.plugin.as_ref(), task_id)
    }

    /// Serve a Collect request.
    ///
    /// For streaming collectors this blocks until the task is unloaded; use
    /// [`CollectorRuntime::drain`] from another thread to read output meanwhile.
    pub fn on_collect(&self, task_id: &str) -> TallyResult<CallOutput> {
        if let Some(collector) = self.plugin.collector() {
            return self.controller.collect(collector, task_id);
        }
        match self.plugin.streaming_collector() {
            Some(collector) => self.controller.stream(collector, task_id),
            None => Err(TallyError::Config(format!(
                "plugin '{}' lost its collector capability",
                self.options.name
            ))),
        }
    }

    pub fn on_unload(&self, task_id: &str) -> TallyResult<CallOutput> {
        self.controller.unload(self.plugin.as_ref(), task_id)
    }

    pub fn drain(&self, task_id: &str) -> TallyResult<CallOutput> {
        self.controller.drain(task_id)
    }

    #[must_use]
    pub fn mode(&self) -> CollectMode {
        self.mode
    }

    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &MetricRegistry {
        self.controller.registry()
    }

    #[must_use]
    pub fn limits(&self) -> &InstanceLimits {
        &self.limits
    }

    #[must_use]
    pub fn controller(&self) -> &TaskController {
        &self.controller
    }

    pub fn task_stats(&self, task_id: &str) -> TallyResult<TaskStats> {
        self.controller.stats(task_id)
    }

    #[must_use]
    pub fn summary(&self) -> ControllerSummary {
        self.controller.summary()
    }
}

/// Run the plugin's Define hook against a fresh define session.
pub fn on_define(
    plugin: &dyn Plugin,
    options: &RuntimeOptions,
) -> TallyResult<(MetricRegistry, InstanceLimits)> {
    let mut session = DefineSession::new(options.strict, options.example_config_format);
    plugin.define(&mut session).map_err(TallyError::Define)?;
    Ok(session.finish())
}

/// Versions must look like `major.minor.patch`, optionally prefixed with `v`
/// and followed by a `-prerelease` or `+build` suffix.
pub fn validate_version(version: &str) -> TallyResult<()> {
    let core = version.strip_prefix('v').unwrap_or(version);
    let core = core.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = |p: &&str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
    if parts.len() == 3 && parts.iter().all(numeric) {
        Ok(())
    } else {
        Err(TallyError::Config(format!(
            "version '{version}' is not a semantic version (major.minor.patch)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_plugin_protocol::{
        CollectContext, CollectContextExt, Collector, Context, ContextError, ContextExt,
        DefineContext, LogLevel, Modifier, StreamingCollector, TypedValue, WireValue,
    };

    struct Defined;

    impl Collector for Defined {
        fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
            ctx.add_metric("/a/b", 1.5, &[])?;
            Ok(())
        }
    }

    impl Plugin for Defined {
        fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
            ctx.define_metric("/a/b", "s", true, "")?;
            ctx.define_metric("/a/b", "ms", true, "")?;
            ctx.define_instances_limit(2)?;
            Ok(())
        }

        fn collector(&self) -> Option<&dyn Collector> {
            Some(self)
        }
    }

    struct Inert;

    impl Plugin for Inert {}

    struct Streamer;

    impl StreamingCollector for Streamer {
        fn stream_collect(&self, _ctx: &dyn CollectContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl Plugin for Streamer {
        fn streaming_collector(&self) -> Option<&dyn StreamingCollector> {
            Some(self)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        counter: u64,
    }

    struct Counting;

    impl Collector for Counting {
        fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
            let counter = ctx.load_with("state", |state: &mut Counter| {
                state.counter += 1;
                state.counter
            })?;
            ctx.add_metric(
                "example/group1/metric1",
                12.4,
                &[Modifier::add_tags([("origin", "x")])],
            )?;
            ctx.add_warning("W");
            ctx.log(LogLevel::Info, "collected", &[("counter", &counter.to_string())]);

            let bogus = WireValue::new(42, 0);
            match ctx.add_metric("example/group1/metric1", bogus, &[]) {
                Err(ContextError::InvalidValue(_)) => Ok(()),
                other => anyhow::bail!("expected an invalid value error, got {other:?}"),
            }
        }
    }

    impl Plugin for Counting {
        fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
            ctx.define_metric("example/group1/metric1", "b", false, "")?;
            Ok(())
        }

        fn load(&self, ctx: &dyn Context) -> anyhow::Result<()> {
            ctx.store("state", Counter { counter: 0 });
            Ok(())
        }

        fn collector(&self) -> Option<&dyn Collector> {
            Some(self)
        }
    }

    #[test]
    fn test_load_then_collect_scenario() {
        let runtime =
            CollectorRuntime::start(Arc::new(Counting), RuntimeOptions::new("counting", "1.0.0"))
                .unwrap();
        runtime.on_load("task").unwrap();
        let output = runtime.on_collect("task").unwrap();

        assert_eq!(output.metrics.len(), 1);
        assert_eq!(output.metrics[0].value, TypedValue::Float64(12.4));
        assert_eq!(output.metrics[0].tag("origin"), Some("x"));
        assert_eq!(output.metrics[0].unit, "b");
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].message, "W");
        assert_eq!(output.logs.len(), 1);

        let session = runtime.controller().context("task").unwrap();
        assert_eq!(session.load::<Counter>("state").unwrap(), Counter { counter: 1 });
        assert!(matches!(
            session.load::<Counter>("absent"),
            Err(ContextError::ObjectNotFound { .. })
        ));

        runtime.on_unload("task").unwrap();
        assert!(matches!(
            runtime.on_collect("task"),
            Err(TallyError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_start_runs_define() {
        let runtime =
            CollectorRuntime::start(Arc::new(Defined), RuntimeOptions::new("defined", "1.0.0"))
                .unwrap();
        assert_eq!(runtime.mode(), CollectMode::Request);
        assert_eq!(runtime.registry().metrics().len(), 1);
        assert_eq!(runtime.registry().metrics()[0].unit, "ms");
        assert_eq!(runtime.limits().instances_limit(), 2);

        let output = runtime.on_collect("t").unwrap();
        assert_eq!(output.metrics[0].unit, "ms");
        assert_eq!(runtime.summary().total_collect_requests, 1);
    }

    #[test]
    fn test_strict_define_failure_is_fatal() {
        let options = RuntimeOptions::new("defined", "1.0.0").with_strict(true);
        let err = CollectorRuntime::start(Arc::new(Defined), options)
            .err()
            .unwrap();
        match err {
            TallyError::Define(source) => assert!(matches!(
                source.downcast_ref::<ContextError>(),
                Some(ContextError::DuplicateDefinition(_))
            )),
            other => panic!("expected a define error, got {other:?}"),
        }
    }

    #[test]
    fn test_plugin_without_collector_is_rejected() {
        let result = CollectorRuntime::start(Arc::new(Inert), RuntimeOptions::new("inert", "1.0.0"));
        assert!(matches!(result, Err(TallyError::Config(_))));
    }

    #[test]
    fn test_streaming_mode_detected() {
        let runtime =
            CollectorRuntime::start(Arc::new(Streamer), RuntimeOptions::new("stream", "0.1.0"))
                .unwrap();
        assert_eq!(runtime.mode(), CollectMode::Streaming);
        assert!(runtime.on_collect("t").unwrap().is_empty());
    }

    #[test]
    fn test_version_validation() {
        for ok in ["1.0.0", "v2.10.3", "1.2.3-rc.1", "0.0.1+build5"] {
            assert!(validate_version(ok).is_ok(), "{ok}");
        }
        for bad in ["", "1.0", "1.0.x", "one.two.three", "1..0"] {
            assert!(validate_version(bad).is_err(), "{bad}");
        }
    }
}
