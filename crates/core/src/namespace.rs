//! Metric namespaces and the selectors matched against them.
//!
//! A namespace is a `/`-separated path such as `example/group1/metric1`. A
//! single leading separator is accepted and dropped, so `/example/group1` and
//! `example/group1` are the same namespace.
//!
//! Selectors are namespaces that may end in a `*` segment:
//! `example/group1/*` matches everything below `example/group1`, and `*` on
//! its own matches every namespace.

use std::fmt;

use tally_plugin_protocol::ContextError;

const SEPARATOR: char = '/';
const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    segments: Vec<String>,
}

impl Namespace {
    /// Parse a concrete namespace. Wildcards are rejected.
    pub fn parse(text: &str) -> Result<Self, ContextError> {
        let segments = split_segments(text)?;
        if segments.iter().any(|s| s.contains('*')) {
            return Err(ContextError::invalid_namespace(
                text,
                "wildcards are only allowed in selectors",
            ));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &Namespace) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Pattern matched against namespaces by always-apply rules and request filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `*`: every namespace.
    All,
    /// No wildcard: one namespace.
    Exact(Namespace),
    /// `prefix/*`: every namespace strictly below `prefix`.
    Prefix(Namespace),
}

impl Selector {
    pub fn parse(text: &str) -> Result<Self, ContextError> {
        let mut segments = split_segments(text)?;
        let trailing_wildcard = segments.last().is_some_and(|s| s == WILDCARD);
        if trailing_wildcard {
            segments.pop();
        }
        if segments.iter().any(|s| s.contains('*')) {
            return Err(ContextError::invalid_namespace(
                text,
                "a wildcard may only appear as the last segment",
            ));
        }

        let namespace = Namespace { segments };
        Ok(match (trailing_wildcard, namespace.is_empty()) {
            (true, true) => Self::All,
            (true, false) => Self::Prefix(namespace),
            (false, _) => Self::Exact(namespace),
        })
    }

    #[must_use]
    pub fn matches(&self, namespace: &Namespace) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == namespace,
            Self::Prefix(prefix) => namespace.len() > prefix.len() && namespace.starts_with(prefix),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(WILDCARD),
            Self::Exact(ns) => write!(f, "{ns}"),
            Self::Prefix(ns) => write!(f, "{ns}/{WILDCARD}"),
        }
    }
}

fn split_segments(text: &str) -> Result<Vec<String>, ContextError> {
    let trimmed = text.strip_prefix(SEPARATOR).unwrap_or(text);
    if trimmed.is_empty() {
        return Err(ContextError::invalid_namespace(text, "namespace is empty"));
    }

    trimmed
        .split(SEPARATOR)
        .map(|segment| {
            if segment.trim().is_empty() {
                Err(ContextError::invalid_namespace(
                    text,
                    "namespace contains an empty segment",
                ))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}
