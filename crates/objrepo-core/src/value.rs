use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A property value carried by change events and used as an index key
///
/// Only hashable shapes are representable so that any property can key a
/// secondary index. Floating point properties are not indexable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Id(Uuid),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Interpret the value as a foreign key
    ///
    /// `Null` and non-id values are treated as an unset key.
    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<null>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{}", s),
            Value::Id(id) => write!(f, "{}", id),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Id(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_maps_to_null() {
        let none: Option<Uuid> = None;
        assert_eq!(Value::from(none), Value::Null);

        let id = Uuid::new_v4();
        assert_eq!(Value::from(Some(id)), Value::Id(id));
        assert_eq!(Value::from(Some(id)).as_id(), Some(id));
    }

    #[test]
    fn test_as_id_ignores_other_shapes() {
        assert_eq!(Value::Null.as_id(), None);
        assert_eq!(Value::from("abc").as_id(), None);
        assert_eq!(Value::from(7i64).as_id(), None);
    }

    #[test]
    fn test_text_and_id_stay_distinct_in_json() {
        let id = Uuid::new_v4();
        let as_text = serde_json::to_value(Value::Text(id.to_string())).unwrap();
        let as_id = serde_json::to_value(Value::Id(id)).unwrap();
        assert_ne!(as_text, as_id);

        let back: Value = serde_json::from_value(as_id).unwrap();
        assert_eq!(back, Value::Id(id));
    }
}
