//! Core value types shared between collectors and the runtime.
//!
//! - [`TypedValue`] - The closed set of values a metric can carry
//! - [`WireValue`] - Tagged form of a value as handed over by a foreign caller
//! - [`MetricType`] - Semantic kind of a metric (gauge, sum, ...)
//! - [`LogLevel`] - Severity of a log entry recorded by a collector
//! - [`Timestamp`] - Seconds/nanoseconds pair attached to records

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ContextError;

/// Tag set attached to a metric. Ordered by key so records render deterministically.
pub type Tags = BTreeMap<String, String>;

/// A metric value.
///
/// Narrower numeric inputs are widened to the 64-bit variants when converted
/// through [`IntoMetricValue`], so a collector can pass `i32`, `u8` or `f32`
/// directly to `add_metric`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Int64(i64),
    #[serde(rename = "uint64")]
    UInt64(u64),
    Float64(f64),
    Bool(bool),
    String(String),
}

impl TypedValue {
    /// Name of the variant, as used in serialized records.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
        }
    }

    /// Returns the value as `f64` when it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Bool(_) | Self::String(_) => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Wire tags understood by [`WireValue`].
pub mod wire_tag {
    pub const INT64: i32 = 1;
    pub const UINT64: i32 = 2;
    pub const DOUBLE: i32 = 3;
    pub const BOOL: i32 = 4;
    pub const STRING: i32 = 5;
}

/// Tagged value as it crosses a language boundary: a type tag plus a 64-bit
/// payload (or text for strings).
///
/// Conversion into a [`TypedValue`] fails with [`ContextError::InvalidValue`]
/// for tags outside [`wire_tag`] and for string tags without text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
    pub tag: i32,
    pub bits: u64,
    pub text: Option<String>,
}

impl WireValue {
    #[must_use]
    pub const fn new(tag: i32, bits: u64) -> Self {
        Self {
            tag,
            bits,
            text: None,
        }
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            tag: wire_tag::STRING,
            bits: 0,
            text: Some(value.into()),
        }
    }
}

impl From<&TypedValue> for WireValue {
    fn from(value: &TypedValue) -> Self {
        match value {
            TypedValue::Int64(v) => Self::new(wire_tag::INT64, *v as u64),
            TypedValue::UInt64(v) => Self::new(wire_tag::UINT64, *v),
            TypedValue::Float64(v) => Self::new(wire_tag::DOUBLE, v.to_bits()),
            TypedValue::Bool(v) => Self::new(wire_tag::BOOL, u64::from(*v)),
            TypedValue::String(v) => Self::text(v.clone()),
        }
    }
}

impl TryFrom<WireValue> for TypedValue {
    type Error = ContextError;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        match value.tag {
            wire_tag::INT64 => Ok(Self::Int64(value.bits as i64)),
            wire_tag::UINT64 => Ok(Self::UInt64(value.bits)),
            wire_tag::DOUBLE => Ok(Self::Float64(f64::from_bits(value.bits))),
            wire_tag::BOOL => Ok(Self::Bool(value.bits != 0)),
            wire_tag::STRING => value
                .text
                .map(Self::String)
                .ok_or_else(|| ContextError::InvalidValue("string value without text".into())),
            other => Err(ContextError::InvalidValue(format!(
                "unsupported value tag {other}"
            ))),
        }
    }
}

/// Conversion of collector-side values into a [`TypedValue`].
///
/// Implemented for every integer and float width, `bool`, strings,
/// [`TypedValue`], [`WireValue`] and loosely typed JSON values.
pub trait IntoMetricValue {
    fn into_metric_value(self) -> Result<TypedValue, ContextError>;
}

macro_rules! widen_into {
    ($variant:ident, $target:ty, $($source:ty),+) => {
        $(
            impl IntoMetricValue for $source {
                fn into_metric_value(self) -> Result<TypedValue, ContextError> {
                    Ok(TypedValue::$variant(self as $target))
                }
            }
        )+
    };
}

widen_into!(Int64, i64, i8, i16, i32, i64, isize);
widen_into!(UInt64, u64, u8, u16, u32, u64, usize);
widen_into!(Float64, f64, f32, f64);

impl IntoMetricValue for bool {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        Ok(TypedValue::Bool(self))
    }
}

impl IntoMetricValue for String {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        Ok(TypedValue::String(self))
    }
}

impl IntoMetricValue for &str {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        Ok(TypedValue::String(self.to_string()))
    }
}

impl IntoMetricValue for TypedValue {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        Ok(self)
    }
}

impl IntoMetricValue for WireValue {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        TypedValue::try_from(self)
    }
}

impl IntoMetricValue for JsonValue {
    fn into_metric_value(self) -> Result<TypedValue, ContextError> {
        match self {
            JsonValue::Bool(b) => Ok(TypedValue::Bool(b)),
            JsonValue::String(s) => Ok(TypedValue::String(s)),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(TypedValue::Int64(v))
                } else if let Some(v) = n.as_u64() {
                    Ok(TypedValue::UInt64(v))
                } else {
                    n.as_f64()
                        .map(TypedValue::Float64)
                        .ok_or_else(|| ContextError::InvalidValue(format!("number {n}")))
                }
            }
            JsonValue::Null => Err(ContextError::InvalidValue("null".into())),
            JsonValue::Array(_) => Err(ContextError::InvalidValue("array".into())),
            JsonValue::Object(_) => Err(ContextError::InvalidValue("object".into())),
        }
    }
}

/// Semantic kind of a metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    #[default]
    Unknown,
    Gauge,
    Sum,
    Summary,
    Histogram,
}

/// Severity of a collector log entry.
///
/// Numeric values follow the host's level numbering: `Panic = 0` through
/// `Trace = 6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Panic = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl LogLevel {
    #[must_use]
    pub const fn from_i32(level: i32) -> Option<Self> {
        match level {
            0 => Some(Self::Panic),
            1 => Some(Self::Fatal),
            2 => Some(Self::Error),
            3 => Some(Self::Warn),
            4 => Some(Self::Info),
            5 => Some(Self::Debug),
            6 => Some(Self::Trace),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Panic => "panic",
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown log level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown log level '{0}' (expected panic, fatal, error, warn, info, debug, trace or 0-6)")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<i32>() {
            return Self::from_i32(number).ok_or_else(|| ParseLogLevelError(s.to_string()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "panic" => Ok(Self::Panic),
            "fatal" => Ok(Self::Fatal),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Point in time attached to metric records, warnings and log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    /// Builds a timestamp, carrying whole seconds out of `nanos`.
    #[must_use]
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / 1_000_000_000) as i64,
            nanos: nanos % 1_000_000_000,
        }
    }

    #[must_use]
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self::new(elapsed.as_secs() as i64, elapsed.subsec_nanos()),
            Err(before) => {
                let d = before.duration();
                Self::new(-(d.as_secs() as i64), 0)
            }
        }
    }
}
