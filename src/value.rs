//! Property values carried by input nodes and relationships.
//!
//! The identity core never interprets these; they are counted by estimates
//! and handed to the caller-supplied size calculator.

use serde::{Deserialize, Serialize};

/// A property value on an input entity.
///
/// # Examples
///
/// ```
/// use kyro_import::Value;
///
/// let name = Value::from("Ada");
/// let born = Value::from(1815i64);
///
/// assert!(name.is_string());
/// assert_eq!(born.as_int(), Some(1815));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Null,
}

impl Value {
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_values_convert_from_primitives() {
        assert_eq!(Value::from(7i64).as_int(), Some(7));
        assert!(Value::from("x").is_string());
        assert!(Value::from(true).as_int().is_none());
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
    }

    #[test]
    fn values_serialize_with_a_type_tag() {
        let val = Value::Array(vec![Value::from("x"), Value::Null]);
        let json = serde_json::to_string(&val).unwrap();
        assert!(json.contains(r#""type":"array""#));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}
