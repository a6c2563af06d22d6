use anyhow::Result;
use colored::*;
use serde_json::json;
use tally_core::{CollectorRuntime, RuntimeOptions};

use crate::collectors;

pub fn execute(name: &str, json: bool) -> Result<()> {
    let collector = collectors::find(name)?;
    let runtime = CollectorRuntime::start(
        collector.plugin(),
        RuntimeOptions::new(collector.name, collector.version),
    )
    .map_err(|e| anyhow::anyhow!("Failed to define '{}': {}", name, e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&definition_json(&runtime))?);
        return Ok(());
    }

    let registry = runtime.registry();
    let limits = runtime.limits();

    println!(
        "{} {}",
        "Definitions for".bold(),
        format!("{} v{}", collector.name, collector.version).cyan()
    );

    println!("\n{}:", "Metrics".bold());
    if registry.metrics().is_empty() {
        println!("  {}", "none declared".dimmed());
    }
    for metric in registry.metrics() {
        let unit = if metric.unit.is_empty() {
            String::new()
        } else {
            format!(" [{}]", metric.unit)
        };
        let marker = if metric.is_default {
            "default".green()
        } else {
            "optional".dimmed()
        };
        println!("  /{}{} {}", metric.namespace.to_string().blue(), unit, marker);
        if !metric.description.is_empty() {
            println!("      {}", metric.description.dimmed());
        }
    }

    if !registry.groups().is_empty() {
        println!("\n{}:", "Groups".bold());
        for group in registry.groups() {
            println!("  {} {}", group.name.cyan(), group.description.dimmed());
        }
    }

    println!("\n{}:", "Limits".bold());
    println!("  instances: {}", limit_text(limits.instances_limit()));
    println!(
        "  tasks per instance: {}",
        limit_text(limits.tasks_per_instance_limit())
    );
    if registry.allows_undefined() {
        println!("  {}", "undefined metrics allowed".yellow());
    }

    if let Some(example) = registry.example_config() {
        println!("\n{}:", "Example config".bold());
        for line in example.lines() {
            println!("  {line}");
        }
    }

    Ok(())
}

fn definition_json(runtime: &CollectorRuntime) -> serde_json::Value {
    let registry = runtime.registry();
    json!({
        "name": runtime.options().name,
        "version": runtime.options().version,
        "metrics": registry.metrics(),
        "groups": registry.groups(),
        "instances_limit": runtime.limits().instances_limit(),
        "tasks_per_instance_limit": runtime.limits().tasks_per_instance_limit(),
        "allow_undefined_metrics": registry.allows_undefined(),
        "example_config": registry.example_config(),
    })
}

fn limit_text(limit: u32) -> String {
    if limit == 0 {
        "unbounded".to_string()
    } else {
        limit.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_json() {
        let collector = collectors::find("example").unwrap();
        let runtime = CollectorRuntime::start(
            collector.plugin(),
            RuntimeOptions::new(collector.name, collector.version),
        )
        .unwrap();

        let value = definition_json(&runtime);
        assert_eq!(value["name"], "example");
        assert_eq!(value["metrics"].as_array().unwrap().len(), 5);
        assert_eq!(value["metrics"][0]["namespace"], "example/group1/metric1");
        assert_eq!(value["instances_limit"], 5);
        assert_eq!(value["example_config"], "value: 113\nother: 142");
    }

    #[test]
    fn test_limit_text() {
        assert_eq!(limit_text(0), "unbounded");
        assert_eq!(limit_text(10), "10");
    }
}
