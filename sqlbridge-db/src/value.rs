//! Parameter and column value types shared by both sides of the boundary.

use std::collections::BTreeMap;

/// A value that can be bound to a statement parameter or read from a result
/// column.
///
/// The set of variants is closed; there is no implicit coercion between them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit IEEE-754 float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
    /// SQL NULL.
    Null,
}

/// Discriminant of a [`Value`]. The numeric values are the wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// [`Value::Integer`].
    Integer = 1,
    /// [`Value::Real`].
    Real = 2,
    /// [`Value::Text`].
    Text = 3,
    /// [`Value::Blob`].
    Blob = 4,
    /// [`Value::Null`].
    Null = 5,
}

impl ValueType {
    /// Maps a wire tag back to its type, `None` for unknown tags.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Integer),
            2 => Some(Self::Real),
            3 => Some(Self::Text),
            4 => Some(Self::Blob),
            5 => Some(Self::Null),
            _ => None,
        }
    }

    /// The wire tag of this type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl Value {
    /// Returns the variant of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::Real(_) => ValueType::Real,
            Self::Text(_) => ValueType::Text,
            Self::Blob(_) => ValueType::Blob,
            Self::Null => ValueType::Null,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Real(f64::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// The parameters bound to one statement invocation.
///
/// Positional and named parameters cannot be mixed: a call carries exactly
/// one of the two kinds, or nothing at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No parameters supplied. Encodes as an empty buffer.
    #[default]
    None,
    /// Parameters bound by position, starting at index 1.
    Positional(Vec<Value>),
    /// Parameters bound by name. Keys are unique by construction.
    Named(BTreeMap<String, Value>),
}

impl Params {
    /// Number of parameter values carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }

    /// Returns `true` when no values are carried.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convenience macro for building positional parameter lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text"]`
#[macro_export]
macro_rules! params {
    ($($val:expr),* $(,)?) => {{
        let values: ::std::vec::Vec<$crate::Value> = ::std::vec![$($crate::Value::from($val)),*];
        $crate::Params::Positional(values)
    }};
}

/// Convenience macro for building named parameter sets.
///
/// Usage: `named_params! { ":id" => 1_i64, ":name" => "alice" }`
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $val:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut values = ::std::collections::BTreeMap::<::std::string::String, $crate::Value>::new();
        $(values.insert(::std::string::String::from($name), $crate::Value::from($val));)*
        $crate::Params::Named(values)
    }};
}
