//! Dynamically-typed values stored in entities and passed as parameters.

use crate::error::{Error, TypeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single storage value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Storage type label used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) | Value::BigInt(_) => "INTEGER",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Json(_) => "JSON",
        }
    }

    /// Integer view of the value. Numeric text is accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some((*v).into()),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some((*v).into()),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Canonical text form used when a value keys an in-memory map.
    ///
    /// Integers of any width collapse to the same form, so a join column read
    /// back as `Int(3)` matches a parent key held as `BigInt(3)`.
    pub fn key_fragment(&self) -> String {
        match self {
            Value::Null => "\0null".to_owned(),
            Value::Bytes(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
            Value::Text(s) => s.clone(),
            other => match other.as_i64() {
                Some(n) if !matches!(other, Value::Double(_)) => n.to_string(),
                _ => other.to_string(),
            },
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::Type(TypeError {
            expected,
            actual: self.type_name().to_owned(),
            column: None,
        })
    }
}

/// Key of a (possibly composite) primary key: fragments joined by commas.
pub fn composite_key(values: &[Value]) -> String {
    let fragments: Vec<String> = values.iter().map(Value::key_fragment).collect();
    fragments.join(",")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => v.fmt(f),
            Value::Int(v) => v.fmt(f),
            Value::BigInt(v) => v.fmt(f),
            Value::Double(v) => v.fmt(f),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(_) => write!(f, "x'{}'", self.key_fragment()),
            Value::Json(j) => j.fmt(f),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    serde_json::Value => Json,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64().ok_or_else(|| value.mismatch("INTEGER"))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(other.mismatch("TEXT")),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(0) | Value::BigInt(0) => Ok(false),
            Value::Int(1) | Value::BigInt(1) => Ok(true),
            other => Err(other.mismatch("BOOLEAN")),
        }
    }
}

impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.is_null() {
            Ok(None)
        } else {
            T::try_from(value).map(Some)
        }
    }
}
