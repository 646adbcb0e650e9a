//! Binary message format for parameter sets and rows.
//!
//! Both sides of the boundary speak this format; it is versioned on its own
//! and does not depend on any particular language binding.
//!
//! # Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Value        := tag:u8 payload
//!                   1 Integer  i64 (8 bytes)
//!                   2 Real     f64 bit pattern (8 bytes)
//!                   3 Text     len:u32 + UTF-8 bytes
//!                   4 Blob     len:u32 + bytes
//!                   5 Null     (no payload)
//! ParameterSet := <empty>                         no parameters supplied
//!               | version:u8 kind:u8 count:u32 entries
//!                   kind 1 Positional  Value * count
//!                   kind 2 Named       (len:u32 name Value) * count
//! Row          := <empty>                         exhaustion sentinel
//!               | version:u8 count:u32 Value * count
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::{Params, Value, ValueType};

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Parameter set kind: positional values.
pub const PARAMS_POSITIONAL: u8 = 1;

/// Parameter set kind: named values.
pub const PARAMS_NAMED: u8 = 2;

/// Reasons a buffer does not parse as a well-formed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ended before the message did.
    #[error("unexpected end of buffer while reading {context}")]
    UnexpectedEof {
        /// What was being read.
        context: &'static str,
    },
    /// The message was produced by an incompatible format version.
    #[error("unsupported wire version {found} (expected {WIRE_VERSION})")]
    UnsupportedVersion {
        /// Version byte found in the buffer.
        found: u8,
    },
    /// A value carried a tag outside the closed variant set.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    /// A parameter set carried an unknown kind byte.
    #[error("unknown parameter set kind {0}")]
    UnknownParamsKind(u8),
    /// Text or a parameter name was not valid UTF-8.
    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 {
        /// What was being read.
        context: &'static str,
    },
    /// A named parameter set repeated a name.
    #[error("duplicate parameter name {0:?}")]
    DuplicateName(String),
    /// Bytes were left over after the message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    /// A length or count does not fit the `u32` prefix.
    #[error("{context} too large to encode")]
    TooLarge {
        /// What was being written.
        context: &'static str,
    },
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a parameter set. [`Params::None`] encodes as an empty buffer.
///
/// # Errors
///
/// Returns [`WireError::TooLarge`] if a count or length exceeds `u32::MAX`.
pub fn encode_params(params: &Params) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    match params {
        Params::None => {}
        Params::Positional(values) => {
            buf.push(WIRE_VERSION);
            buf.push(PARAMS_POSITIONAL);
            put_len(&mut buf, values.len(), "parameter count")?;
            for value in values {
                encode_value(&mut buf, value)?;
            }
        }
        Params::Named(values) => {
            buf.push(WIRE_VERSION);
            buf.push(PARAMS_NAMED);
            put_len(&mut buf, values.len(), "parameter count")?;
            for (name, value) in values {
                put_bytes(&mut buf, name.as_bytes(), "parameter name")?;
                encode_value(&mut buf, value)?;
            }
        }
    }
    Ok(buf)
}

/// Encodes one result row. An empty slice encodes as the exhaustion sentinel.
///
/// # Errors
///
/// Returns [`WireError::TooLarge`] if a count or length exceeds `u32::MAX`.
pub fn encode_row(values: &[Value]) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    if values.is_empty() {
        return Ok(buf);
    }
    buf.push(WIRE_VERSION);
    put_len(&mut buf, values.len(), "column count")?;
    for value in values {
        encode_value(&mut buf, value)?;
    }
    Ok(buf)
}

/// Appends one tagged value.
///
/// # Errors
///
/// Returns [`WireError::TooLarge`] if a text or blob is longer than `u32::MAX`.
pub fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), WireError> {
    buf.push(value.value_type().tag());
    match value {
        Value::Integer(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Real(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::Text(v) => put_bytes(buf, v.as_bytes(), "text value")?,
        Value::Blob(v) => put_bytes(buf, v, "blob value")?,
        Value::Null => {}
    }
    Ok(())
}

fn put_len(buf: &mut Vec<u8>, len: usize, context: &'static str) -> Result<(), WireError> {
    let len = u32::try_from(len).map_err(|_| WireError::TooLarge { context })?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8], context: &'static str) -> Result<(), WireError> {
    put_len(buf, bytes.len(), context)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a parameter set. An empty buffer decodes as [`Params::None`].
///
/// # Errors
///
/// Returns a [`WireError`] if the buffer is not a well-formed parameter set.
pub fn decode_params(bytes: &[u8]) -> Result<Params, WireError> {
    if bytes.is_empty() {
        return Ok(Params::None);
    }
    let mut reader = Reader::new(bytes);
    reader.version()?;
    let kind = reader.u8("parameter kind")?;
    let count = reader.u32("parameter count")?;
    let params = match kind {
        PARAMS_POSITIONAL => {
            let mut values = Vec::new();
            for _ in 0..count {
                values.push(reader.value()?);
            }
            Params::Positional(values)
        }
        PARAMS_NAMED => {
            let mut values = BTreeMap::new();
            for _ in 0..count {
                let name = reader.string("parameter name")?;
                let value = reader.value()?;
                if values.contains_key(&name) {
                    return Err(WireError::DuplicateName(name));
                }
                values.insert(name, value);
            }
            Params::Named(values)
        }
        other => return Err(WireError::UnknownParamsKind(other)),
    };
    reader.finish()?;
    Ok(params)
}

/// Decodes one result row. An empty buffer decodes as an empty row.
///
/// # Errors
///
/// Returns a [`WireError`] if the buffer is not a well-formed row.
pub fn decode_row(bytes: &[u8]) -> Result<Vec<Value>, WireError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Reader::new(bytes);
    reader.version()?;
    let count = reader.u32("column count")?;
    let mut values = Vec::new();
    for _ in 0..count {
        values.push(reader.value()?);
    }
    reader.finish()?;
    Ok(values)
}

/// Cursor over an input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::UnexpectedEof { context })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    fn u8(&mut self, context: &'static str) -> Result<u8, WireError> {
        Ok(self.take(1, context)?[0])
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array(context)?))
    }

    fn version(&mut self) -> Result<(), WireError> {
        let found = self.u8("version")?;
        if found == WIRE_VERSION {
            Ok(())
        } else {
            Err(WireError::UnsupportedVersion { found })
        }
    }

    fn bytes(&mut self, context: &'static str) -> Result<&'a [u8], WireError> {
        let len = self.u32(context)?;
        let len = usize::try_from(len).map_err(|_| WireError::UnexpectedEof { context })?;
        self.take(len, context)
    }

    fn string(&mut self, context: &'static str) -> Result<String, WireError> {
        let bytes = self.bytes(context)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8 { context })
    }

    fn value(&mut self) -> Result<Value, WireError> {
        let tag = self.u8("value tag")?;
        let value_type = ValueType::from_tag(tag).ok_or(WireError::UnknownTag(tag))?;
        Ok(match value_type {
            ValueType::Integer => Value::Integer(i64::from_le_bytes(self.array("integer value")?)),
            ValueType::Real => Value::Real(f64::from_bits(u64::from_le_bytes(
                self.array("real value")?,
            ))),
            ValueType::Text => Value::Text(self.string("text value")?),
            ValueType::Blob => Value::Blob(self.bytes("blob value")?.to_vec()),
            ValueType::Null => Value::Null,
        })
    }

    fn finish(self) -> Result<(), WireError> {
        let rest = self.buf.len() - self.pos;
        if rest == 0 {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(rest))
        }
    }
}
