//! Tally Core Library
//!
//! The runtime behind Tally metric collectors. It runs a collector's Define
//! hook once, then serves per-task Load, Collect and Unload calls, applying
//! modifier rules to every emitted metric and returning the records, warnings
//! and log entries each call produced.
//!
//! ## Architecture
//!
//! - [`runtime`] - [`CollectorRuntime`], the host-facing entry point
//! - [`controller`] - Per-task lifecycle state machine and task map
//! - [`session`] - The per-task context handed to collectors
//! - [`registry`] - Metric and group definitions from Define
//! - [`define`] - The define context filling the registry and limits
//! - [`modifiers`] - Always-apply rules and modifier resolution
//! - [`namespace`] - Namespace parsing and selector matching
//! - [`config`] - Flattened task configuration
//! - [`limits`] - Declared instance and task limits
//! - [`stats`] - Per-task call statistics
//! - [`runner`] - `start_collector` and the local debug host
//! - [`logging`] - Tracing subscriber setup
//! - [`types`] - Common error types and type aliases
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally_core::{CollectorRuntime, RuntimeOptions, TaskConfig};
//! # use tally_plugin_protocol::{Plugin, Collector, CollectContext};
//! # struct MyCollector;
//! # impl Collector for MyCollector { fn collect(&self, _: &dyn CollectContext) -> anyhow::Result<()> { Ok(()) } }
//! # impl Plugin for MyCollector { fn collector(&self) -> Option<&dyn Collector> { Some(self) } }
//!
//! # fn example() -> tally_core::TallyResult<()> {
//! let runtime = CollectorRuntime::start(
//!     Arc::new(MyCollector),
//!     RuntimeOptions::new("my-collector", "1.0.0"),
//! )?;
//! runtime.configure_task("task-1", TaskConfig::from_json(r#"{"interval": 5}"#)?, vec![])?;
//! runtime.on_load("task-1")?;
//! let output = runtime.on_collect("task-1")?;
//! println!("{} metrics", output.metrics.len());
//! runtime.on_unload("task-1")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod define;
pub mod limits;
pub mod logging;
pub mod modifiers;
pub mod namespace;
pub mod registry;
pub mod runner;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod types;

// Re-export the main types for easier usage
pub use config::TaskConfig;
pub use runner::{start_collector, RunnerOptions};
pub use runtime::{CollectorRuntime, RuntimeOptions};
pub use session::CallOutput;
pub use types::{TallyError, TallyResult};
