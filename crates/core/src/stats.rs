//! Per-task call statistics.

use std::time::{Duration, SystemTime};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    #[serde(with = "time_text")]
    pub loaded_at: Option<SystemTime>,
    pub collect_requests: u64,
    pub failed_collects: u64,
    pub total_metrics: u64,
    #[serde(with = "duration_text")]
    pub total_processing: Duration,
    #[serde(with = "duration_text")]
    pub max_processing: Duration,
    #[serde(with = "duration_text")]
    pub last_processing: Duration,
    pub last_metric_count: u64,
}

impl TaskStats {
    pub fn record_load(&mut self) {
        self.loaded_at = Some(SystemTime::now());
    }

    pub fn record_collect(&mut self, elapsed: Duration, metrics: usize, succeeded: bool) {
        self.collect_requests += 1;
        if !succeeded {
            self.failed_collects += 1;
        }
        self.total_metrics += metrics as u64;
        self.total_processing += elapsed;
        self.max_processing = self.max_processing.max(elapsed);
        self.last_processing = elapsed;
        self.last_metric_count = metrics as u64;
    }

    /// Metrics emitted by a streaming collector between two drains.
    pub fn record_streamed(&mut self, metrics: usize) {
        self.total_metrics += metrics as u64;
        self.last_metric_count = metrics as u64;
    }

    #[must_use]
    pub fn average_processing(&self) -> Duration {
        match u32::try_from(self.collect_requests) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_processing / n,
        }
    }
}

/// Totals across every task a controller has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerSummary {
    pub active_tasks: usize,
    pub total_loaded: u64,
    pub total_unloaded: u64,
    pub total_collect_requests: u64,
}

mod duration_text {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }
}

mod time_text {
    use std::time::SystemTime;

    pub fn serialize<S: serde::Serializer>(
        value: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => serializer.collect_str(&humantime::format_rfc3339_seconds(*at)),
            None => serializer.serialize_none(),
        }
    }
}
