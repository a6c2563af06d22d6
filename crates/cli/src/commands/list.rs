use anyhow::Result;
use colored::*;
use tally_core::runtime::{CollectMode, CollectorRuntime, RuntimeOptions};

use crate::collectors::COLLECTORS;

pub fn execute() -> Result<()> {
    println!("{}", "Collectors".bold().underline());

    if COLLECTORS.is_empty() {
        println!("  {}", "No collectors bundled".dimmed());
        return Ok(());
    }

    for collector in COLLECTORS {
        let runtime = CollectorRuntime::start(
            collector.plugin(),
            RuntimeOptions::new(collector.name, collector.version),
        )
        .map_err(|e| anyhow::anyhow!("Failed to define '{}': {}", collector.name, e))?;

        let mode = match runtime.mode() {
            CollectMode::Request => "request",
            CollectMode::Streaming => "streaming",
        };
        println!(
            "{} {} {}",
            collector.name.blue().bold(),
            format!("v{}", collector.version).dimmed(),
            format!("[{mode}]").green()
        );
        println!(
            "  {} ({} metrics)",
            collector.description,
            runtime.registry().metrics().len()
        );
    }

    Ok(())
}
