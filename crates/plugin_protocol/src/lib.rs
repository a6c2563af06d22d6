//! Tally Plugin Protocol
//!
//! The API a metrics collector is written against. A collector implements
//! [`Plugin`], declares its metrics during Define and emits them through a
//! [`CollectContext`] on every Collect request. The runtime that drives these
//! calls lives in `tally_core`.
//!
//! ## Modules
//!
//! - [`traits`] - Plugin capabilities and the context traits handed to each lifecycle call
//! - [`types`] - Typed values, metric types, log levels and timestamps
//! - [`modifiers`] - Tag and metadata modifiers
//! - [`message`] - Serializable records returned to the host
//! - [`error`] - Errors returned by context operations

pub mod error;
pub mod message;
pub mod modifiers;
pub mod traits;
pub mod types;

pub use error::ContextError;
pub use message::{LogEntry, MetricRecord, Warning};
pub use modifiers::{Modifier, RuleId};
pub use traits::{
    CollectContext, CollectContextExt, Collector, Context, ContextExt, DefineContext, Plugin,
    StoredObject, StreamingCollector,
};
pub use types::{
    wire_tag, IntoMetricValue, LogLevel, MetricType, ParseLogLevelError, Tags, Timestamp,
    TypedValue, WireValue,
};
