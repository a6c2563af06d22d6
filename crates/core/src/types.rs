use std::fmt;

use tally_plugin_protocol::ContextError;
use thiserror::Error;

use crate::session::CallOutput;

/// Lifecycle call a plugin error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Define,
    Load,
    Collect,
    Unload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Define => "define",
            Self::Load => "load",
            Self::Collect => "collect",
            Self::Unload => "unload",
        })
    }
}

/// The main error type for Tally runtime operations
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Invalid lifecycle call for task '{task_id}': {reason}")]
    InvalidLifecycle { task_id: String, reason: String },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Plugin {phase} failed for task '{task_id}': {source:#}")]
    Plugin {
        task_id: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
        /// Records, warnings and logs produced before the hook failed.
        output: Box<CallOutput>,
    },

    #[error("Plugin define failed: {0:#}")]
    Define(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TallyError {
    pub(crate) fn plugin(
        task_id: &str,
        phase: Phase,
        source: anyhow::Error,
        output: CallOutput,
    ) -> Self {
        Self::Plugin {
            task_id: task_id.to_string(),
            phase,
            source,
            output: Box::new(output),
        }
    }

    /// Output the failing plugin call produced before it returned.
    #[must_use]
    pub fn output(&self) -> Option<&CallOutput> {
        match self {
            Self::Plugin { output, .. } => Some(&**output),
            _ => None,
        }
    }

    pub(crate) fn invalid_lifecycle(task_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLifecycle {
            task_id: task_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Tally operations
pub type TallyResult<T> = Result<T, TallyError>;
