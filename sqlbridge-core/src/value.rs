//! Building [`Value`]s and [`Params`] from application data.
//!
//! Values are normally built explicitly (`Value::from(42_i64)`, the
//! [`params!`](crate::params) macro). When the application only has a
//! dynamic value, [`from_json`] and [`from_any`] map it onto the closed
//! variant set and reject everything else with
//! [`Error::UnsupportedValueType`].

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use sqlbridge_db::{Params, Value};

use crate::error::{Error, Result};

/// Converts a JSON value.
///
/// Numbers map to `Integer` when they fit an `i64` and to `Real` otherwise;
/// strings map to `Text`; `null` maps to `Null`.
///
/// # Errors
///
/// Booleans, arrays, objects and unsigned integers above `i64::MAX` have no
/// counterpart and are rejected.
pub fn from_json(value: &serde_json::Value) -> Result<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if n.is_u64() {
                Err(Error::UnsupportedValueType(format!(
                    "integer {n} does not fit in 64-bit signed"
                )))
            } else {
                n.as_f64().map(Value::Real).ok_or_else(|| {
                    Error::UnsupportedValueType(format!("number {n} is not representable"))
                })
            }
        }
        serde_json::Value::Bool(_) => Err(unsupported("boolean")),
        serde_json::Value::Array(_) => Err(unsupported("array")),
        serde_json::Value::Object(_) => Err(unsupported("object")),
    }
}

/// Converts a dynamically typed value.
///
/// Accepted: signed integers up to 64 bits and unsigned integers up to 32
/// bits (`Integer`), `f32`/`f64` (`Real`), `String`/`&str` (`Text`),
/// `Vec<u8>` (`Blob`), an existing [`Value`], and `Option<Value>`'s `None`
/// (`Null`).
///
/// # Errors
///
/// Any other type is rejected; there is no string or numeric fallback.
pub fn from_any(value: &dyn Any) -> Result<Value> {
    macro_rules! try_int {
        ($($ty:ty),*) => {
            $(if let Some(v) = value.downcast_ref::<$ty>() {
                return Ok(Value::Integer(i64::from(*v)));
            })*
        };
    }
    if let Some(v) = value.downcast_ref::<i64>() {
        return Ok(Value::Integer(*v));
    }
    try_int!(i32, i16, i8, u32, u16, u8);
    if let Some(v) = value.downcast_ref::<f64>() {
        return Ok(Value::Real(*v));
    }
    if let Some(v) = value.downcast_ref::<f32>() {
        return Ok(Value::Real(f64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<String>() {
        return Ok(Value::Text(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<&str>() {
        return Ok(Value::Text((*v).to_string()));
    }
    if let Some(v) = value.downcast_ref::<Vec<u8>>() {
        return Ok(Value::Blob(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<Value>() {
        return Ok(v.clone());
    }
    if let Some(v) = value.downcast_ref::<Option<Value>>() {
        return Ok(v.clone().unwrap_or(Value::Null));
    }
    Err(unsupported("non-SQL type"))
}

fn unsupported(what: &str) -> Error {
    Error::UnsupportedValueType(format!("{what} has no SQL value counterpart"))
}

/// Anything that can be bound as the parameters of one statement.
///
/// A parameter set is either positional or named, never both; every
/// implementation produces exactly one kind.
pub trait IntoParams {
    /// Converts into a parameter set.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsupportedValueType`] when a dynamic value has no
    /// counterpart.
    fn into_params(self) -> Result<Params>;
}

impl IntoParams for () {
    fn into_params(self) -> Result<Params> {
        Ok(Params::None)
    }
}

impl IntoParams for Params {
    fn into_params(self) -> Result<Params> {
        Ok(self)
    }
}

impl IntoParams for Vec<Value> {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self))
    }
}

impl<const N: usize> IntoParams for [Value; N] {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self.into()))
    }
}

impl IntoParams for &[Value] {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Positional(self.to_vec()))
    }
}

impl IntoParams for BTreeMap<String, Value> {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Named(self))
    }
}

impl<S: std::hash::BuildHasher> IntoParams for HashMap<String, Value, S> {
    fn into_params(self) -> Result<Params> {
        Ok(Params::Named(self.into_iter().collect()))
    }
}

/// A JSON array binds positionally, a JSON object by name and `null` binds
/// nothing.
impl IntoParams for &serde_json::Value {
    fn into_params(self) -> Result<Params> {
        match self {
            serde_json::Value::Null => Ok(Params::None),
            serde_json::Value::Array(items) => items
                .iter()
                .map(from_json)
                .collect::<Result<Vec<_>>>()
                .map(Params::Positional),
            serde_json::Value::Object(fields) => fields
                .iter()
                .map(|(name, value)| Ok((name.clone(), from_json(value)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Params::Named),
            other => Err(Error::UnsupportedValueType(format!(
                "parameters must be a JSON array or object, got {other}"
            ))),
        }
    }
}

impl IntoParams for serde_json::Value {
    fn into_params(self) -> Result<Params> {
        (&self).into_params()
    }
}
