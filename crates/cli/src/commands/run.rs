use std::sync::Arc;

use anyhow::Result;
use colored::*;
use tally_core::logging::init_tracing;
use tally_core::runner::{example_task, run_debug_host, RunSummary};
use tally_core::types::Phase;
use tally_core::{CallOutput, CollectorRuntime, RunnerOptions};
use tally_plugin_protocol::{LogLevel, MetricRecord};

use crate::collectors;

pub async fn execute(name: &str, json: bool, options: &RunnerOptions) -> Result<()> {
    let collector = collectors::find(name)?;
    init_tracing(&options.tracing_config().with_ansi(!json))?;

    let runtime = CollectorRuntime::start(
        collector.plugin(),
        options.runtime_options(collector.name, collector.version),
    )
    .map_err(|e| anyhow::anyhow!("Failed to start collector '{}': {}", name, e))?;

    if options.print_example_task {
        print!("{}", example_task(&runtime, options.collect_interval)?);
        return Ok(());
    }

    if !json {
        println!("{} {}", "Running collector".bold(), name.cyan());
        println!();
    }

    let summary = run_debug_host(Arc::new(runtime), options, |task_id, phase, output| {
        if json {
            print_json(task_id, output);
        } else {
            for line in render(task_id, phase, output) {
                println!("{line}");
            }
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("Debug host failed: {}", e))?;

    if !json {
        println!();
        print_summary(&summary);
    }
    Ok(())
}

fn print_json(task_id: &str, output: &CallOutput) {
    let value = serde_json::json!({ "task_id": task_id, "output": output });
    match serde_json::to_string(&value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(task_id, error = %e, "Failed to serialize call output"),
    }
}

/// Readable lines for one lifecycle call's output.
fn render(task_id: &str, phase: Phase, output: &CallOutput) -> Vec<String> {
    let mut lines = Vec::new();
    let prefix = format!("[{task_id} {phase}]").dimmed();

    for metric in &output.metrics {
        lines.push(format!("{} {}", prefix, metric_line(metric)));
    }
    for warning in &output.warnings {
        lines.push(format!(
            "{} {} {}",
            prefix,
            "warning:".yellow().bold(),
            warning.message
        ));
    }
    if output.dropped_warnings > 0 {
        lines.push(format!(
            "{} {}",
            prefix,
            format!("{} warnings dropped", output.dropped_warnings).yellow()
        ));
    }
    for entry in &output.logs {
        let fields: Vec<String> = entry
            .fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        lines.push(format!(
            "{} {} {} {}",
            prefix,
            level_label(entry.level),
            entry.message,
            fields.join(" ").dimmed()
        ));
    }
    lines
}

fn metric_line(metric: &MetricRecord) -> String {
    let mut line = format!("/{} = {}", metric.namespace.blue(), metric.value.to_string().bold());
    if !metric.unit.is_empty() {
        line.push_str(&format!(" {}", metric.unit));
    }
    if !metric.tags.is_empty() {
        let tags: Vec<String> = metric
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        line.push_str(&format!(" {}", format!("{{{}}}", tags.join(", ")).cyan()));
    }
    line
}

fn level_label(level: LogLevel) -> ColoredString {
    let label = level.as_str();
    match level {
        LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => label.red().bold(),
        LogLevel::Warn => label.yellow(),
        LogLevel::Info => label.green(),
        LogLevel::Debug | LogLevel::Trace => label.dimmed(),
    }
}

fn print_summary(summary: &RunSummary) {
    let status = if summary.failed_calls == 0 {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} {} tasks, {} calls ({} failed), {} metrics, {} warnings",
        status,
        summary.tasks,
        summary.calls,
        summary.failed_calls,
        summary.metrics,
        summary.warnings
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use clap::Parser;
    use tally_plugin_protocol::{LogEntry, TypedValue, Warning};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        options: RunnerOptions,
    }

    fn options(args: &[&str]) -> RunnerOptions {
        let args = std::iter::once("tally").chain(args.iter().copied());
        TestCli::parse_from(args).options
    }

    #[test]
    fn test_render_output() {
        colored::control::set_override(false);
        let mut metric = MetricRecord {
            namespace: "a/b".into(),
            value: TypedValue::Float64(1.5),
            tags: Default::default(),
            description: String::new(),
            unit: "ms".into(),
            timestamp: tally_plugin_protocol::Timestamp::new(0, 0),
            metric_type: Default::default(),
        };
        metric.tags.insert("host".into(), "x".into());
        let output = CallOutput {
            metrics: vec![metric],
            warnings: vec![Warning::new("careful")],
            logs: vec![LogEntry::new(LogLevel::Info, "hello", &[("k", "v")])],
            dropped_warnings: 2,
        };

        let lines = render("task-1", Phase::Collect, &output);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "[task-1 collect] /a/b = 1.5 ms {host=x}");
        assert_eq!(lines[1], "[task-1 collect] warning: careful");
        assert_eq!(lines[2], "[task-1 collect] 2 warnings dropped");
        assert_eq!(lines[3], "[task-1 collect] info hello k=v");
    }

    #[tokio::test]
    async fn test_run_bundled_collector_with_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"value": 113}}"#).unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let options = options(&[
            "--plugin-config-file",
            &path,
            "--collect-count",
            "2",
            "--collect-interval",
            "5ms",
        ]);
        let collector = collectors::find("example").unwrap();
        let runtime = CollectorRuntime::start(
            collector.plugin(),
            options.runtime_options(collector.name, collector.version),
        )
        .unwrap();

        let mut rendered = 0;
        let summary = run_debug_host(Arc::new(runtime), &options, |task_id, phase, output| {
            rendered += render(task_id, phase, output).len();
        })
        .await
        .unwrap();

        assert_eq!(summary.tasks, 1);
        assert_eq!(summary.failed_calls, 0);
        assert_eq!(summary.metrics, 10);
        assert!(rendered >= 10);
    }
}
