use tally_plugin_protocol::{
    CollectContext, CollectContextExt, Collector, Context, ContextExt, DefineContext, LogLevel,
    Modifier, Plugin,
};

pub const NAME: &str = "example";
pub const VERSION: &str = "1.0.0";

const STATE_KEY: &str = "stored_object";

const METRICS: [(&str, &str); 5] = [
    ("/example/group1/metric1", "metric1 description"),
    ("/example/group1/metric2", "metric2 description"),
    ("/example/group1/metric3", "metric3 description"),
    ("/example/group2/metric4", "metric4 description"),
    ("/example/group2/metric5", "metric5 description"),
];

/// Per-task state kept in the object store between collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectState {
    pub iteration: u32,
    pub counter: u64,
}

impl Default for CollectState {
    fn default() -> Self {
        Self {
            iteration: 20,
            counter: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExampleCollector;

impl Plugin for ExampleCollector {
    fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
        ctx.define_example_config("value: 113\nother: 142")?;
        ctx.define_instances_limit(5)?;
        ctx.define_tasks_per_instance_limit(10)?;

        for (namespace, description) in METRICS {
            ctx.define_metric(namespace, "b", false, description)?;
        }
        ctx.define_group("group1", "Numeric example metrics")?;
        ctx.define_group("group2", "Boolean and string example metrics")?;
        Ok(())
    }

    fn load(&self, ctx: &dyn Context) -> anyhow::Result<()> {
        let keys = ctx.config_keys();
        if !keys.is_empty() {
            ctx.log(
                LogLevel::Debug,
                "Loaded configuration",
                &[("keys", &keys.join(",")), ("raw", &ctx.raw_config())],
            );
        }
        ctx.store(STATE_KEY, CollectState::default());
        Ok(())
    }

    fn collector(&self) -> Option<&dyn Collector> {
        Some(self)
    }
}

impl Collector for ExampleCollector {
    fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
        let counter = match ctx.load_with(STATE_KEY, |state: &mut CollectState| {
            state.counter += 1;
            state.counter
        }) {
            Ok(counter) => counter,
            // Collected without Load
            Err(_) => {
                ctx.store(
                    STATE_KEY,
                    CollectState {
                        counter: 1,
                        ..CollectState::default()
                    },
                );
                1
            }
        };

        ctx.log(
            LogLevel::Info,
            "Collecting example metrics",
            &[("language", "rust"), ("counter", &counter.to_string())],
        );
        ctx.add_warning("Example warning");

        let requested = ctx.requested_metrics();
        if !requested.is_empty() {
            ctx.log(
                LogLevel::Debug,
                "Requested metrics",
                &[("metrics", &requested.join(","))],
            );
        }

        ctx.dismiss_all_modifiers();
        ctx.always_apply(
            "/example/group1/*",
            &[Modifier::add_tags([("virtualization", "VirtualBox")])],
        )?;

        ctx.add_metric(
            "/example/group1/metric1",
            12.4,
            &[
                Modifier::add_tags([("origin", "rust"), ("system", std::env::consts::OS)]),
                Modifier::description("new custom description"),
            ],
        )?;
        ctx.add_metric("/example/group1/metric2", 20, &[])?;
        ctx.add_metric("/example/group1/metric3", 30u32, &[])?;

        if ctx.should_process("/example/group2/metric4") {
            ctx.add_metric("/example/group2/metric4", true, &[])?;
        }
        ctx.add_metric("/example/group2/metric5", "string value", &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tally_core::{CollectorRuntime, RuntimeOptions, TaskConfig};
    use tally_plugin_protocol::TypedValue;

    use super::*;

    fn runtime() -> CollectorRuntime {
        CollectorRuntime::start(Arc::new(ExampleCollector), RuntimeOptions::new(NAME, VERSION))
            .unwrap()
    }

    #[test]
    fn test_define_declares_metrics_and_limits() {
        let runtime = runtime();
        assert_eq!(runtime.registry().metrics().len(), 5);
        assert_eq!(runtime.registry().default_metrics().count(), 0);
        assert_eq!(runtime.limits().instances_limit(), 5);
        assert_eq!(runtime.limits().tasks_per_instance_limit(), 10);
        assert_eq!(runtime.registry().example_config(), Some("value: 113\nother: 142"));
    }

    #[test]
    fn test_collect_emits_tagged_metrics() {
        let runtime = runtime();
        runtime.on_load("t").unwrap();
        let output = runtime.on_collect("t").unwrap();

        assert_eq!(output.metrics.len(), 5);
        let metric1 = &output.metrics[0];
        assert_eq!(metric1.namespace, "example/group1/metric1");
        assert_eq!(metric1.value, TypedValue::Float64(12.4));
        assert_eq!(metric1.tag("virtualization"), Some("VirtualBox"));
        assert_eq!(metric1.tag("origin"), Some("rust"));
        assert_eq!(metric1.description, "new custom description");
        assert_eq!(metric1.unit, "b");

        assert_eq!(output.metrics[2].value, TypedValue::UInt64(30));
        let metric4 = &output.metrics[3];
        assert_eq!(metric4.value, TypedValue::Bool(true));
        assert_eq!(metric4.tag("virtualization"), None);
        assert_eq!(metric4.description, "metric4 description");

        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].fields.get("counter").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_counter_survives_between_collects() {
        let runtime = runtime();
        runtime.on_load("t").unwrap();
        runtime.on_collect("t").unwrap();
        runtime.on_collect("t").unwrap();

        let session = runtime.controller().context("t").unwrap();
        let state: CollectState = session.load(STATE_KEY).unwrap();
        assert_eq!(state, CollectState { iteration: 20, counter: 2 });
    }

    #[test]
    fn test_filter_limits_output() {
        let runtime = runtime();
        runtime
            .configure_task(
                "t",
                TaskConfig::from_json(r#"{"value": 113}"#).unwrap(),
                vec!["/example/group1/*".into()],
            )
            .unwrap();
        let loaded = runtime.on_load("t").unwrap();
        assert_eq!(loaded.logs.len(), 1);

        let output = runtime.on_collect("t").unwrap();
        assert_eq!(output.metrics.len(), 3);
        assert!(output
            .metrics
            .iter()
            .all(|m| m.namespace.starts_with("example/group1/")));
        // Requested metrics get logged at debug level
        assert_eq!(output.logs.len(), 2);
    }

    #[test]
    fn test_collect_without_load_starts_fresh() {
        let runtime = runtime();
        let output = runtime.on_collect("lazy").unwrap();
        assert_eq!(output.logs[0].fields.get("counter").map(String::as_str), Some("1"));
    }
}
