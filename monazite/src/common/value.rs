use crate::collection::Document;
use crate::common::ObjectId;
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};

/// Represents a field value in a [Document]. It can be a simple value like
/// [Value::I64] or [Value::String], or a complex value like
/// [Value::Document] or [Value::Array].
///
/// # Purpose
/// Provides a unified representation for every value shape the backing
/// document store understands: null, booleans, 32/64-bit integers,
/// doubles, strings, native object identifiers, arrays, and nested
/// documents.
///
/// # Characteristics
/// - **Comparable**: numeric variants compare across widths, so
///   `Value::I32(1) == Value::I64(1)` and `Value::I64(2) == Value::F64(2.0)`
/// - **Convertible**: `From` implementations cover the native Rust types
/// - **Renderable**: `Display` produces the shell-style literal used when
///   a query is rendered for diagnostics
///
/// # Usage
/// ```text
/// let v1: Value = 42.into();
/// let v2 = Value::from("hello");
/// let doc = doc! { "age": 42, "name": "Alice" };
/// ```
#[derive(Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Represents a null value.
    #[default]
    Null,
    /// Represents a boolean value.
    Bool(bool),
    /// Represents a signed 32-bit integer value.
    I32(i32),
    /// Represents a signed 64-bit integer value.
    I64(i64),
    /// Represents a 64-bit floating point value.
    F64(f64),
    /// Represents a string value.
    String(String),
    /// Represents a native object identifier.
    ObjectId(ObjectId),
    /// Represents an array value.
    Array(Vec<Value>),
    /// Represents a nested document value.
    Document(Document),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::I32(_) | Value::I64(_) | Value::F64(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Value::Document(_))
    }

    pub fn is_object_id(&self) -> bool {
        matches!(self, Value::ObjectId(_))
    }

    /// Returns the integer value, widening from 32 bits when needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the numeric value as a double, converting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Value::ObjectId(v) => Some(v),
            _ => None,
        }
    }

    /// Renders this value as the shell-style literal used in query
    /// diagnostics: strings quoted, identifiers as `ObjectId("...")`,
    /// documents and arrays in JSON shape.
    pub fn to_shell_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F64(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{:.1}", v)
                } else {
                    v.to_string()
                }
            }
            Value::String(v) => format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
            Value::ObjectId(v) => format!("ObjectId(\"{}\")", v),
            Value::Array(items) => {
                format!("[{}]", items.iter().map(|v| v.to_shell_string()).join(", "))
            }
            Value::Document(doc) => doc.to_shell_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // integers compare across widths, and against doubles by value
        if self.is_number() && other.is_number() {
            return match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
                    _ => false,
                },
            };
        }

        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::ObjectId(a), Value::ObjectId(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_shell_string())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_shell_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::I64(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Casts a value destined for an identifier-like field.
///
/// A 24-character string round-trips through [ObjectId] only if
/// re-rendering the parsed identifier reproduces the identical string;
/// otherwise the value passes through unchanged. Everything else is left
/// as-is.
pub fn cast_identifier(value: Value) -> Value {
    if let Value::String(ref s) = value {
        if s.len() == 24 {
            if let Ok(oid) = ObjectId::parse(s) {
                if oid.to_string() == *s {
                    return Value::ObjectId(oid);
                }
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_widths() {
        assert_eq!(Value::I32(7), Value::I64(7));
        assert_eq!(Value::I64(2), Value::F64(2.0));
        assert_ne!(Value::I64(2), Value::F64(2.5));
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from("abc"), Value::String("abc".to_string()));
        assert_eq!(Value::from(vec![1, 2]), Value::Array(vec![Value::I32(1), Value::I32(2)]));
        assert_eq!(Value::from(Option::<i32>::None), Value::Null);
    }

    #[test]
    fn test_shell_rendering() {
        assert_eq!(Value::Null.to_shell_string(), "null");
        assert_eq!(Value::from("a\"b").to_shell_string(), "\"a\\\"b\"");
        assert_eq!(Value::from(vec![1, 2]).to_shell_string(), "[1, 2]");
        assert_eq!(Value::F64(3.0).to_shell_string(), "3.0");
    }

    #[test]
    fn test_cast_identifier_round_trip() {
        let id = ObjectId::new();
        let cast = cast_identifier(Value::String(id.to_string()));
        assert_eq!(cast, Value::ObjectId(id));
    }

    #[test]
    fn test_cast_identifier_keeps_non_matching_strings() {
        // wrong length
        let v = cast_identifier(Value::from("short"));
        assert_eq!(v, Value::String("short".to_string()));
        // 24 chars but uppercase, so re-rendering would differ
        let v = cast_identifier(Value::from("4AF9F23D8EAD0E1D32000000"));
        assert!(v.is_string());
        // non-string values pass through
        assert_eq!(cast_identifier(Value::I64(5)), Value::I64(5));
    }
}
