use std::time::{Duration, Instant};

use tally_plugin_protocol::{
    CollectContext, CollectContextExt, Context, ContextError, DefineContext, LogLevel, Plugin,
    StreamingCollector,
};

pub const NAME: &str = "streaming-example";
pub const VERSION: &str = "1.0.0";

pub const METRIC: &str = "/example/group1/metric1";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

const POLL_STEP: Duration = Duration::from_millis(50);

/// Emits an ever-growing counter until its task is unloaded.
#[derive(Debug, Default)]
pub struct StreamingExample;

impl Plugin for StreamingExample {
    fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
        ctx.define_example_config("interval: 3s")?;
        ctx.define_metric(METRIC, "", true, "Counter increased by 2 on every tick")?;
        Ok(())
    }

    fn load(&self, ctx: &dyn Context) -> anyhow::Result<()> {
        let interval = interval(ctx);
        ctx.log(
            LogLevel::Debug,
            "Streaming collector loaded",
            &[("interval", &humantime::format_duration(interval).to_string())],
        );
        Ok(())
    }

    fn streaming_collector(&self) -> Option<&dyn StreamingCollector> {
        Some(self)
    }
}

impl StreamingCollector for StreamingExample {
    fn stream_collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
        let interval = interval(ctx);
        let mut value: u64 = 0;
        while !ctx.is_done() {
            value += 2;
            match ctx.add_metric(METRIC, value, &[]) {
                Ok(()) => {}
                Err(ContextError::TaskCancelled(_)) => break,
                Err(e) => return Err(e.into()),
            }
            sleep_unless_done(ctx, interval);
        }
        Ok(())
    }
}

/// Tick interval from the `interval` config key, falling back to
/// [`DEFAULT_INTERVAL`] with a warning when it does not parse.
fn interval<C: Context + ?Sized>(ctx: &C) -> Duration {
    let text = ctx.config_value("interval");
    if text.is_empty() {
        return DEFAULT_INTERVAL;
    }
    match humantime::parse_duration(&text) {
        Ok(interval) if !interval.is_zero() => interval,
        _ => {
            ctx.add_warning(&format!("invalid interval '{text}', using default"));
            DEFAULT_INTERVAL
        }
    }
}

fn sleep_unless_done<C: Context + ?Sized>(ctx: &C, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !ctx.is_done() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(POLL_STEP.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use tally_core::{CollectorRuntime, RuntimeOptions, TaskConfig};
    use tally_plugin_protocol::TypedValue;

    use super::*;

    fn runtime() -> Arc<CollectorRuntime> {
        Arc::new(
            CollectorRuntime::start(Arc::new(StreamingExample), RuntimeOptions::new(NAME, VERSION))
                .unwrap(),
        )
    }

    fn configure(runtime: &CollectorRuntime, task_id: &str, config: &str) {
        runtime
            .configure_task(task_id, TaskConfig::from_json(config).unwrap(), Vec::new())
            .unwrap();
    }

    #[test]
    fn test_stream_emits_until_unloaded() {
        let runtime = runtime();
        configure(&runtime, "s", r#"{"interval": "10ms"}"#);
        runtime.on_load("s").unwrap();

        let stream = {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || runtime.on_collect("s"))
        };

        let mut values = Vec::new();
        while values.len() < 3 {
            thread::sleep(Duration::from_millis(10));
            values.extend(runtime.drain("s").unwrap().metrics.into_iter().map(|m| m.value));
        }
        runtime.on_unload("s").unwrap();
        let rest = stream.join().unwrap().unwrap();
        values.extend(rest.metrics.into_iter().map(|m| m.value));

        assert_eq!(values[0], TypedValue::UInt64(2));
        assert_eq!(values[1], TypedValue::UInt64(4));
        assert_eq!(values[2], TypedValue::UInt64(6));
    }

    #[test]
    fn test_invalid_interval_warns() {
        let runtime = runtime();
        configure(&runtime, "s", r#"{"interval": "soon"}"#);
        let output = runtime.on_load("s").unwrap();
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].message.contains("soon"));
        assert_eq!(
            output.logs[0].fields.get("interval").map(String::as_str),
            Some("3s")
        );
    }

    #[test]
    fn test_default_metric_in_registry() {
        let runtime = runtime();
        let defaults: Vec<String> = runtime
            .registry()
            .default_metrics()
            .map(|m| m.namespace.to_string())
            .collect();
        assert_eq!(defaults, vec!["example/group1/metric1"]);
    }
}
