//! Per-task collect session.
//!
//! A [`CollectSession`] is the context object handed to a collector for every
//! lifecycle call of one task. It owns the task configuration, the object
//! store, the always-apply rules and the output buffers of the current call.
//! Each piece of state sits behind its own lock so the host can drain output
//! while a streaming collector keeps emitting.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tally_plugin_protocol::{
    CollectContext, Context, ContextError, LogEntry, LogLevel, MetricRecord, Modifier, RuleId,
    StoredObject, TypedValue, Warning,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::TaskConfig;
use crate::modifiers::{resolve, AlwaysApplyRule};
use crate::namespace::{Namespace, Selector};
use crate::registry::MetricRegistry;

/// Maximum number of warnings kept per call.
pub const MAX_WARNINGS: usize = 40;
/// Warning messages longer than this many bytes are truncated.
pub const MAX_WARNING_LEN: usize = 256;

/// Everything a collector produced during one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallOutput {
    pub metrics: Vec<MetricRecord>,
    pub warnings: Vec<Warning>,
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "is_zero")]
    pub dropped_warnings: usize,
}

impl CallOutput {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.warnings.is_empty() && self.logs.is_empty()
    }
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

pub struct CollectSession {
    task_id: String,
    config: TaskConfig,
    requested: Vec<String>,
    selectors: Vec<Selector>,
    registry: Arc<MetricRegistry>,
    objects: Mutex<HashMap<String, Box<StoredObject>>>,
    rules: Mutex<Vec<AlwaysApplyRule>>,
    next_rule: AtomicU64,
    output: Mutex<CallOutput>,
    cancelled: AtomicBool,
}

impl CollectSession {
    /// Create a session. Every requested selector must parse.
    pub fn new(
        task_id: impl Into<String>,
        config: TaskConfig,
        requested: Vec<String>,
        registry: Arc<MetricRegistry>,
    ) -> Result<Self, ContextError> {
        let selectors = requested
            .iter()
            .map(|text| Selector::parse(text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            task_id: task_id.into(),
            config,
            requested,
            selectors,
            registry,
            objects: Mutex::new(HashMap::new()),
            rules: Mutex::new(Vec::new()),
            next_rule: AtomicU64::new(1),
            output: Mutex::new(CallOutput::default()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Session with an empty config and no filter, as created on first access.
    #[must_use]
    pub fn unconfigured(task_id: impl Into<String>, registry: Arc<MetricRegistry>) -> Self {
        Self {
            task_id: task_id.into(),
            config: TaskConfig::default(),
            requested: Vec::new(),
            selectors: Vec::new(),
            registry,
            objects: Mutex::new(HashMap::new()),
            rules: Mutex::new(Vec::new()),
            next_rule: AtomicU64::new(1),
            output: Mutex::new(CallOutput::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Discard whatever the previous call left behind. Objects and rules are kept.
    pub fn begin_call(&self) {
        *self.output.lock() = CallOutput::default();
    }

    /// Take the output buffered so far.
    pub fn drain(&self) -> CallOutput {
        mem::take(&mut *self.output.lock())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.lock().len()
    }

    /// Number of entries in the object store.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    fn requested_match(&self, namespace: &Namespace) -> bool {
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches(namespace))
    }
}

impl Context for CollectSession {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn config_value(&self, key: &str) -> String {
        self.config.get(key)
    }

    fn config_keys(&self) -> Vec<String> {
        self.config.keys()
    }

    fn raw_config(&self) -> String {
        self.config.raw().to_string()
    }

    fn store_object(&self, key: &str, value: Box<StoredObject>) {
        self.objects.lock().insert(key.to_string(), value);
    }

    fn with_object(&self, key: &str, f: &mut dyn FnMut(Option<&mut StoredObject>)) {
        // Taken out so `f` can use the store without deadlocking on it
        let taken = self.objects.lock().remove(key);
        match taken {
            Some(mut object) => {
                f(Some(&mut *object));
                self.objects
                    .lock()
                    .entry(key.to_string())
                    .or_insert(object);
            }
            None => f(None),
        }
    }

    fn remove_object(&self, key: &str) -> bool {
        self.objects.lock().remove(key).is_some()
    }

    fn add_warning(&self, message: &str) {
        let mut output = self.output.lock();
        if output.warnings.len() >= MAX_WARNINGS {
            output.dropped_warnings += 1;
            debug!(task_id = %self.task_id, "Warning limit reached, dropping warning");
            return;
        }
        output.warnings.push(Warning::new(truncate(message, MAX_WARNING_LEN)));
    }

    fn log(&self, level: LogLevel, message: &str, fields: &[(&str, &str)]) {
        let entry = LogEntry::new(level, message, fields);
        let task_id = self.task_id.as_str();
        match level {
            LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => {
                error!(task_id, fields = ?entry.fields, "{message}");
            }
            LogLevel::Warn => warn!(task_id, fields = ?entry.fields, "{message}"),
            LogLevel::Info => info!(task_id, fields = ?entry.fields, "{message}"),
            LogLevel::Debug => debug!(task_id, fields = ?entry.fields, "{message}"),
            LogLevel::Trace => trace!(task_id, fields = ?entry.fields, "{message}"),
        }
        self.output.lock().logs.push(entry);
    }

    fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl CollectContext for CollectSession {
    fn add_typed_metric(
        &self,
        namespace: &str,
        value: TypedValue,
        modifiers: &[Modifier],
    ) -> Result<(), ContextError> {
        if self.is_done() {
            return Err(ContextError::TaskCancelled(self.task_id.clone()));
        }

        let namespace = Namespace::parse(namespace)?;
        let definition = self.registry.resolve_emission(&namespace)?;
        if !self.requested_match(&namespace) {
            trace!(task_id = %self.task_id, namespace = %namespace, "Metric not requested, skipping");
            return Ok(());
        }

        let record = resolve(&namespace, value, definition, &self.rules.lock(), modifiers);
        self.output.lock().metrics.push(record);
        Ok(())
    }

    fn always_apply(&self, selector: &str, modifiers: &[Modifier]) -> Result<RuleId, ContextError> {
        let selector = Selector::parse(selector)?;
        let id = RuleId::new(self.next_rule.fetch_add(1, Ordering::Relaxed));
        self.rules
            .lock()
            .push(AlwaysApplyRule::new(id, selector, modifiers.to_vec()));
        Ok(id)
    }

    fn dismiss_modifier(&self, rule: RuleId) -> bool {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.id != rule);
        rules.len() != before
    }

    fn dismiss_all_modifiers(&self) {
        self.rules.lock().clear();
    }

    fn should_process(&self, namespace: &str) -> bool {
        if self.selectors.is_empty() {
            return true;
        }
        Namespace::parse(namespace).is_ok_and(|ns| self.requested_match(&ns))
    }

    fn requested_metrics(&self) -> Vec<String> {
        self.requested.clone()
    }
}

fn truncate(message: &str, max_len: usize) -> &str {
    if message.len() <= max_len {
        return message;
    }
    let mut end = max_len;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
