//! FFI-safe value and option types.
//!
//! These mirror [`Value`] and [`ReplicaConfig`] in shapes `UniFFI` can carry
//! to Kotlin and Swift.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::time::Duration;

use sqlbridge_db::{Params, ReplicaConfig, Value};

/// A SQL value as seen by foreign code.
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum SqlValue {
    /// 64-bit signed integer.
    Integer {
        /// The value.
        value: i64,
    },
    /// 64-bit float.
    Real {
        /// The value.
        value: f64,
    },
    /// UTF-8 text.
    Text {
        /// The value.
        value: String,
    },
    /// Binary blob.
    Blob {
        /// The value.
        value: Vec<u8>,
    },
    /// SQL NULL.
    Null,
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Integer { value } => Self::Integer(value),
            SqlValue::Real { value } => Self::Real(value),
            SqlValue::Text { value } => Self::Text(value),
            SqlValue::Blob { value } => Self::Blob(value),
            SqlValue::Null => Self::Null,
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(value) => Self::Integer { value },
            Value::Real(value) => Self::Real { value },
            Value::Text(value) => Self::Text { value },
            Value::Blob(value) => Self::Blob { value },
            Value::Null => Self::Null,
        }
    }
}

/// Positional parameters. An empty list binds nothing.
pub(super) fn positional(values: Vec<SqlValue>) -> Params {
    if values.is_empty() {
        Params::None
    } else {
        Params::Positional(values.into_iter().map(Value::from).collect())
    }
}

/// Named parameters. An empty map binds nothing.
pub(super) fn named<S: BuildHasher>(values: HashMap<String, SqlValue, S>) -> Params {
    if values.is_empty() {
        Params::None
    } else {
        Params::Named(
            values
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

/// Options for [`open_embedded_replica`](super::open_embedded_replica).
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ReplicaOptions {
    /// Milliseconds between automatic syncs; `0` disables them.
    pub sync_interval_ms: u64,
    /// Whether the replica's own writes are visible to its reads before the
    /// next sync.
    pub read_your_writes: bool,
    /// Whether to validate remote certificates with the bundled web PKI
    /// roots.
    pub with_webpki: bool,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        ReplicaConfig::default().into()
    }
}

impl From<ReplicaOptions> for ReplicaConfig {
    fn from(options: ReplicaOptions) -> Self {
        Self {
            sync_interval: Duration::from_millis(options.sync_interval_ms),
            read_your_writes: options.read_your_writes,
            with_webpki: options.with_webpki,
        }
    }
}

impl From<ReplicaConfig> for ReplicaOptions {
    fn from(config: ReplicaConfig) -> Self {
        Self {
            sync_interval_ms: u64::try_from(config.sync_interval.as_millis()).unwrap_or(u64::MAX),
            read_your_writes: config.read_your_writes,
            with_webpki: config.with_webpki,
        }
    }
}
