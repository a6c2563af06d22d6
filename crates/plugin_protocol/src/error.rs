use thiserror::Error;

/// Errors a collector receives from context operations.
///
/// Every variant is recoverable from the collector's point of view: a failed
/// `add_metric` produces no record but the collect call can carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Object '{key}' not found: {cause}")]
    ObjectNotFound { key: String, cause: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("'{0}' is already defined")]
    DuplicateDefinition(String),

    #[error("Task '{0}' has been cancelled")]
    TaskCancelled(String),
}

impl ContextError {
    #[must_use]
    pub fn invalid_namespace(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn object_not_found(key: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            key: key.into(),
            cause: cause.into(),
        }
    }
}
