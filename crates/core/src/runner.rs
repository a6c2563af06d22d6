//! Standalone collector runner.
//!
//! [`start_collector`] is the entry point a collector binary calls from
//! `main`. It parses runner flags, installs logging, runs Define and then
//! drives the collector with a local debug host: every task is configured and
//! loaded, collected on an interval and finally unloaded, with emitted records
//! printed to stdout as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser};
use serde::Serialize;
use tally_plugin_protocol::{LogLevel, MetricRecord, Plugin};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::TaskConfig;
use crate::logging::{init_tracing, TracingConfig};
use crate::runtime::{CollectMode, CollectorRuntime, RuntimeOptions};
use crate::session::CallOutput;
use crate::types::{Phase, TallyResult};

/// Flags understood by every collector binary.
#[derive(Debug, Clone, Args)]
pub struct RunnerOptions {
    /// Log level (panic, fatal, error, warn, info, debug, trace or 0-6)
    #[arg(long, default_value = "warn")]
    pub log_level: LogLevel,

    /// Task configuration as JSON text
    #[arg(long, conflicts_with = "plugin_config_file")]
    pub plugin_config: Option<String>,

    /// Read the task configuration from a JSON file
    #[arg(long)]
    pub plugin_config_file: Option<PathBuf>,

    /// Requested metrics, comma separated (e.g. "/example/group1/*")
    #[arg(long, value_delimiter = ',')]
    pub plugin_filter: Vec<String>,

    /// Number of collect rounds; 0 runs until interrupted
    #[arg(long, default_value_t = 1)]
    pub collect_count: u32,

    /// Delay between collect rounds (e.g. "500ms", "5s")
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub collect_interval: Duration,

    /// Number of concurrent tasks to run
    #[arg(long, default_value_t = 1)]
    pub tasks: usize,

    /// Print an example task manifest for this collector and exit
    #[arg(long)]
    pub print_example_task: bool,

    /// Reject metric redefinition and conflicting limits during Define
    #[arg(long)]
    pub strict: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Warn,
            plugin_config: None,
            plugin_config_file: None,
            plugin_filter: Vec::new(),
            collect_count: 1,
            collect_interval: Duration::from_secs(1),
            tasks: 1,
            print_example_task: false,
            strict: false,
        }
    }
}

impl RunnerOptions {
    /// Task configuration from `--plugin-config` or `--plugin-config-file`.
    pub fn task_config(&self) -> TallyResult<TaskConfig> {
        let raw = match (&self.plugin_config, &self.plugin_config_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        Ok(TaskConfig::from_json(&raw)?)
    }

    #[must_use]
    pub fn runtime_options(&self, name: &str, version: &str) -> RuntimeOptions {
        RuntimeOptions::new(name, version).with_strict(self.strict)
    }

    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig::new(self.log_level)
    }
}

#[derive(Debug, Parser)]
#[command(about = "Run a Tally collector against a local debug host", version)]
struct RunnerCli {
    #[command(flatten)]
    options: RunnerOptions,
}

/// Totals of one debug-host run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub tasks: usize,
    pub calls: usize,
    pub failed_calls: usize,
    pub metrics: usize,
    pub warnings: usize,
}

/// Entry point for collector binaries. Blocks until the debug host is done.
pub fn start_collector(plugin: Arc<dyn Plugin>, name: &str, version: &str) -> TallyResult<()> {
    let cli = RunnerCli::parse();
    run_collector(plugin, name, version, cli.options)
}

/// [`start_collector`] with options supplied by the caller.
pub fn run_collector(
    plugin: Arc<dyn Plugin>,
    name: &str,
    version: &str,
    options: RunnerOptions,
) -> TallyResult<()> {
    init_tracing(&options.tracing_config())?;
    let runtime = Arc::new(CollectorRuntime::start(
        plugin,
        options.runtime_options(name, version),
    )?);

    if options.print_example_task {
        print!("{}", example_task(&runtime, options.collect_interval)?);
        return Ok(());
    }

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let summary = tokio_runtime.block_on(run_debug_host(runtime, &options, print_json_lines))?;
    info!(
        tasks = summary.tasks,
        calls = summary.calls,
        failed = summary.failed_calls,
        metrics = summary.metrics,
        "Debug host finished"
    );
    Ok(())
}

/// Drive `runtime` the way a scheduler would: configure and load each task,
/// run the collect rounds, then unload everything.
///
/// `emit` receives the output of every successful call. Failed lifecycle calls
/// are logged and counted; only configuration problems abort the run.
pub async fn run_debug_host<F>(
    runtime: Arc<CollectorRuntime>,
    options: &RunnerOptions,
    mut emit: F,
) -> TallyResult<RunSummary>
where
    F: FnMut(&str, Phase, &CallOutput),
{
    let config = options.task_config()?;
    let mut summary = RunSummary::default();
    let mut host = Host {
        summary: &mut summary,
        emit: &mut emit,
    };

    let mut task_ids = Vec::new();
    for index in 1..=options.tasks {
        if !runtime.limits().admits(task_ids.len()) {
            warn!(
                requested = options.tasks,
                limit = runtime.limits().tasks_per_instance_limit(),
                "Task limit reached, not starting more tasks"
            );
            break;
        }
        let task_id = format!("task-{index}");
        runtime.configure_task(&task_id, config.clone(), options.plugin_filter.clone())?;
        let result = blocking(&runtime, task_id.clone(), |rt, id| rt.on_load(id)).await?;
        host.record(&task_id, Phase::Load, result);
        task_ids.push(task_id);
    }
    host.summary.tasks = task_ids.len();

    match runtime.mode() {
        CollectMode::Request => {
            let mut rounds = Rounds::new(options);
            while rounds.next().await {
                let mut calls = JoinSet::new();
                for task_id in &task_ids {
                    let rt = Arc::clone(&runtime);
                    let task_id = task_id.clone();
                    calls.spawn_blocking(move || {
                        let result = rt.on_collect(&task_id);
                        (task_id, result)
                    });
                }
                let mut results = Vec::with_capacity(task_ids.len());
                while let Some(joined) = calls.join_next().await {
                    results.push(joined?);
                }
                results.sort_by(|a, b| a.0.cmp(&b.0));
                for (task_id, result) in results {
                    host.record(&task_id, Phase::Collect, result);
                }
            }
            unload_all(&runtime, &task_ids, &mut host).await?;
        }
        CollectMode::Streaming => {
            let mut streams = JoinSet::new();
            for task_id in &task_ids {
                let rt = Arc::clone(&runtime);
                let task_id = task_id.clone();
                streams.spawn_blocking(move || {
                    let result = rt.on_collect(&task_id);
                    (task_id, result)
                });
            }

            let mut rounds = Rounds::new(options);
            while rounds.next().await {
                for task_id in &task_ids {
                    host.record(task_id, Phase::Collect, runtime.drain(task_id));
                }
            }

            unload_all(&runtime, &task_ids, &mut host).await?;
            while let Some(joined) = streams.join_next().await {
                let (task_id, result) = joined?;
                host.record(&task_id, Phase::Collect, result);
            }
        }
    }

    Ok(summary)
}

struct Host<'a, F> {
    summary: &'a mut RunSummary,
    emit: &'a mut F,
}

impl<F: FnMut(&str, Phase, &CallOutput)> Host<'_, F> {
    fn record(&mut self, task_id: &str, phase: Phase, result: TallyResult<CallOutput>) {
        self.summary.calls += 1;
        match result {
            Ok(output) => self.emit_output(task_id, phase, &output),
            Err(e) => {
                self.summary.failed_calls += 1;
                error!(task_id, phase = %phase, error = %e, "Lifecycle call failed");
                if let Some(output) = e.output() {
                    self.emit_output(task_id, phase, output);
                }
            }
        }
    }

    fn emit_output(&mut self, task_id: &str, phase: Phase, output: &CallOutput) {
        self.summary.metrics += output.metrics.len();
        self.summary.warnings += output.warnings.len();
        (self.emit)(task_id, phase, output);
    }
}

/// Collect-round pacing: one round per interval tick, stopping after
/// `collect_count` rounds (never, when it is 0) or on Ctrl-C.
struct Rounds {
    ticker: tokio::time::Interval,
    remaining: Option<u32>,
}

impl Rounds {
    fn new(options: &RunnerOptions) -> Self {
        let period = options.collect_interval.max(Duration::from_millis(1));
        Self {
            ticker: tokio::time::interval(period),
            remaining: (options.collect_count > 0).then_some(options.collect_count),
        }
    }

    async fn next(&mut self) -> bool {
        match self.remaining {
            Some(0) => return false,
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        tokio::select! {
            _ = self.ticker.tick() => true,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping collection");
                false
            }
        }
    }
}

async fn unload_all<F: FnMut(&str, Phase, &CallOutput)>(
    runtime: &Arc<CollectorRuntime>,
    task_ids: &[String],
    host: &mut Host<'_, F>,
) -> TallyResult<()> {
    for task_id in task_ids {
        let result = blocking(runtime, task_id.clone(), |rt, id| rt.on_unload(id)).await?;
        host.record(task_id, Phase::Unload, result);
    }
    Ok(())
}

async fn blocking<T, C>(runtime: &Arc<CollectorRuntime>, task_id: String, call: C) -> TallyResult<T>
where
    T: Send + 'static,
    C: FnOnce(&CollectorRuntime, &str) -> T + Send + 'static,
{
    let runtime = Arc::clone(runtime);
    Ok(tokio::task::spawn_blocking(move || call(&runtime, &task_id)).await?)
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutputLine<'a> {
    Metric {
        task_id: &'a str,
        metric: &'a MetricRecord,
    },
    Warning {
        task_id: &'a str,
        message: &'a str,
    },
}

fn print_json_lines(task_id: &str, _phase: Phase, output: &CallOutput) {
    let metrics = output
        .metrics
        .iter()
        .map(|metric| OutputLine::Metric { task_id, metric });
    let warnings = output.warnings.iter().map(|w| OutputLine::Warning {
        task_id,
        message: &w.message,
    });
    for line in metrics.chain(warnings) {
        match serde_json::to_string(&line) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(task_id, error = %e, "Failed to serialize output line"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExampleTask {
    version: u32,
    schedule: ExampleSchedule,
    plugins: Vec<ExamplePlugin>,
}

#[derive(Debug, Serialize)]
struct ExampleSchedule {
    #[serde(rename = "type")]
    kind: &'static str,
    interval: String,
}

#[derive(Debug, Serialize)]
struct ExamplePlugin {
    plugin_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<serde_yaml::Value>,
    metrics: Vec<String>,
}

/// Render a task manifest that schedules this collector with its example
/// configuration and default metrics.
pub fn example_task(runtime: &CollectorRuntime, interval: Duration) -> TallyResult<String> {
    let registry = runtime.registry();
    let config = registry
        .example_config()
        .map(|text| {
            serde_yaml::from_str(text).unwrap_or_else(|_| serde_yaml::Value::String(text.into()))
        });
    let task = ExampleTask {
        version: 1,
        schedule: ExampleSchedule {
            kind: "simple",
            interval: humantime::format_duration(interval).to_string(),
        },
        plugins: vec![ExamplePlugin {
            plugin_name: runtime.options().name.clone(),
            config,
            metrics: registry
                .default_metrics()
                .map(|m| format!("/{}", m.namespace))
                .collect(),
        }],
    };
    Ok(serde_yaml::to_string(&task)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tally_plugin_protocol::{
        CollectContext, CollectContextExt, Collector, Context, DefineContext, StreamingCollector,
    };

    struct Echo;

    impl Collector for Echo {
        fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
            let value: i64 = ctx.config_value("value").parse().unwrap_or(0);
            ctx.add_metric("/echo/value", value, &[])?;
            ctx.add_metric("/echo/other", 1, &[])?;
            Ok(())
        }
    }

    impl Plugin for Echo {
        fn define(&self, ctx: &mut dyn DefineContext) -> anyhow::Result<()> {
            ctx.define_metric("/echo/value", "", true, "")?;
            ctx.define_metric("/echo/other", "", false, "")?;
            ctx.define_example_config("value: 3")?;
            ctx.define_tasks_per_instance_limit(2)?;
            Ok(())
        }

        fn collector(&self) -> Option<&dyn Collector> {
            Some(self)
        }
    }

    fn runtime(plugin: Arc<dyn Plugin>) -> Arc<CollectorRuntime> {
        Arc::new(CollectorRuntime::start(plugin, RuntimeOptions::new("echo", "1.0.0")).unwrap())
    }

    fn fast_options() -> RunnerOptions {
        RunnerOptions {
            collect_count: 2,
            collect_interval: Duration::from_millis(5),
            ..RunnerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_debug_host_runs_every_phase() {
        let options = RunnerOptions {
            plugin_config: Some(r#"{"value": 7}"#.into()),
            plugin_filter: vec!["/echo/value".into()],
            tasks: 3,
            ..fast_options()
        };
        let mut seen = Vec::new();
        let summary = run_debug_host(runtime(Arc::new(Echo)), &options, |task, phase, out| {
            seen.push((task.to_string(), phase, out.metrics.clone()));
        })
        .await
        .unwrap();

        // The tasks-per-instance limit of 2 caps the requested 3 tasks
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.calls, 2 + 4 + 2);
        assert_eq!(summary.failed_calls, 0);
        assert_eq!(summary.metrics, 4);

        let collected: Vec<_> = seen
            .iter()
            .filter(|(_, phase, _)| *phase == Phase::Collect)
            .collect();
        assert_eq!(collected.len(), 4);
        for (_, _, metrics) in collected {
            assert_eq!(metrics.len(), 1);
            assert_eq!(metrics[0].namespace, "echo/value");
            assert_eq!(metrics[0].value, tally_plugin_protocol::TypedValue::Int64(7));
        }
    }

    #[tokio::test]
    async fn test_config_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"value": 11}}"#).unwrap();

        let options = RunnerOptions {
            plugin_config_file: Some(file.path().to_path_buf()),
            collect_count: 1,
            ..fast_options()
        };
        let mut values = Vec::new();
        run_debug_host(runtime(Arc::new(Echo)), &options, |_, phase, out| {
            if phase == Phase::Collect {
                values.extend(out.metrics.iter().map(|m| m.value.clone()));
            }
        })
        .await
        .unwrap();
        assert!(values.contains(&tally_plugin_protocol::TypedValue::Int64(11)));
    }

    #[tokio::test]
    async fn test_bad_filter_aborts_run() {
        let options = RunnerOptions {
            plugin_filter: vec!["/echo/*/value".into()],
            ..fast_options()
        };
        let result = run_debug_host(runtime(Arc::new(Echo)), &options, |_, _, _| {}).await;
        assert!(result.is_err());
    }

    struct Flaky;

    impl Collector for Flaky {
        fn collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
            ctx.add_warning("disk almost full");
            ctx.log(LogLevel::Error, "giving up", &[]);
            anyhow::bail!("collector failure")
        }
    }

    impl Plugin for Flaky {
        fn collector(&self) -> Option<&dyn Collector> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn test_failed_collect_output_is_still_emitted() {
        let mut logs = Vec::new();
        let summary = run_debug_host(runtime(Arc::new(Flaky)), &fast_options(), |_, phase, out| {
            if phase == Phase::Collect {
                logs.extend(out.logs.iter().map(|l| l.message.clone()));
            }
        })
        .await
        .unwrap();

        assert_eq!(summary.failed_calls, 2);
        assert_eq!(summary.warnings, 2);
        assert_eq!(logs, vec!["giving up", "giving up"]);
    }

    #[derive(Default)]
    struct Ticker {
        streamed: AtomicUsize,
    }

    impl StreamingCollector for Ticker {
        fn stream_collect(&self, ctx: &dyn CollectContext) -> anyhow::Result<()> {
            while !ctx.is_done() {
                let n = self.streamed.fetch_add(1, Ordering::SeqCst);
                match ctx.add_metric("/ticker/n", n, &[]) {
                    Ok(()) => {}
                    Err(tally_plugin_protocol::ContextError::TaskCancelled(_)) => break,
                    Err(e) => return Err(e.into()),
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    impl Plugin for Ticker {
        fn unload(&self, ctx: &dyn Context) -> anyhow::Result<()> {
            ctx.add_warning("bye");
            Ok(())
        }

        fn streaming_collector(&self) -> Option<&dyn StreamingCollector> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn test_streaming_collector_is_drained_and_stopped() {
        let plugin = Arc::new(Ticker::default());
        let options = RunnerOptions {
            collect_count: 3,
            collect_interval: Duration::from_millis(20),
            ..RunnerOptions::default()
        };
        let mut unload_warnings = 0;
        let summary = run_debug_host(runtime(plugin.clone()), &options, |_, phase, out| {
            if phase == Phase::Unload {
                unload_warnings += out.warnings.len();
            }
        })
        .await
        .unwrap();

        assert_eq!(summary.failed_calls, 0);
        assert_eq!(unload_warnings, 1);
        assert!(plugin.streamed.load(Ordering::SeqCst) > 0);
        assert!(summary.metrics > 0);
    }

    #[test]
    fn test_example_task_lists_default_metrics() {
        let runtime = runtime(Arc::new(Echo));
        let yaml = example_task(&runtime, Duration::from_secs(5)).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed["schedule"]["interval"].as_str(), Some("5s"));
        let plugin = &parsed["plugins"][0];
        assert_eq!(plugin["plugin_name"].as_str(), Some("echo"));
        assert_eq!(plugin["config"]["value"].as_u64(), Some(3));
        assert_eq!(plugin["metrics"][0].as_str(), Some("/echo/value"));
        assert!(plugin["metrics"][1].is_null());
    }

    #[test]
    fn test_runner_flags_parse() {
        let cli = RunnerCli::try_parse_from([
            "collector",
            "--log-level",
            "debug",
            "--plugin-filter",
            "/a/*,/b/c",
            "--collect-count",
            "0",
            "--collect-interval",
            "250ms",
        ])
        .unwrap();
        assert_eq!(cli.options.log_level, LogLevel::Debug);
        assert_eq!(cli.options.plugin_filter, vec!["/a/*", "/b/c"]);
        assert_eq!(cli.options.collect_count, 0);
        assert_eq!(cli.options.collect_interval, Duration::from_millis(250));

        assert!(RunnerCli::try_parse_from([
            "collector",
            "--plugin-config",
            "{}",
            "--plugin-config-file",
            "x.json",
        ])
        .is_err());
    }
}
