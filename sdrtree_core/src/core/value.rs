use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// A scalar cell value as returned by a statistics provider and bound into
/// partition filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL equality: NULL never matches, integers and floats compare numerically.
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Integral floats become integers, so values that compare equal under
    /// `sql_eq` also compare equal structurally.
    pub fn normalized(self) -> Value {
        match self {
            Value::Float(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
                Value::Int(v as i64)
            }
            other => other,
        }
    }

    #[inline]
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
        }
    }

    #[inline]
    fn float_bits(v: f64) -> u64 {
        // -0.0 and 0.0 hash and compare the same
        if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => Value::float_bits(*a) == Value::float_bits(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => Value::float_bits(*v).hash(state),
            Value::Text(v) => v.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                // Mixed numerics order by value; Int sorts before an equal Float
                (Some(x), Some(y)) => f64::from_bits(Value::float_bits(x))
                    .total_cmp(&f64::from_bits(Value::float_bits(y)))
                    .then_with(|| a.rank().cmp(&b.rank())),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_eq_never_matches_null() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert!(!Value::Null.sql_eq(&Value::Int(1)));
        assert!(Value::Int(2).sql_eq(&Value::Float(2.0)));
        assert!(!Value::Text("2".into()).sql_eq(&Value::Int(2)));
    }

    #[test]
    fn test_structural_eq_and_order() {
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));

        let mut values = vec![
            Value::Text("b".into()),
            Value::Float(1.5),
            Value::Null,
            Value::Int(2),
            Value::Int(1),
            Value::Bool(true),
            Value::Float(1.0),
        ];
        values.sort();

        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(1),
                Value::Float(1.0),
                Value::Float(1.5),
                Value::Int(2),
                Value::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_normalized_merges_integral_floats() {
        assert_eq!(Value::Float(1.0).normalized(), Value::Int(1));
        assert_eq!(Value::Float(-0.0).normalized(), Value::Int(0));
        assert_eq!(Value::Float(1.5).normalized(), Value::Float(1.5));
        assert!(matches!(Value::Float(f64::NAN).normalized(), Value::Float(_)));
        assert_eq!(Value::Float(f64::INFINITY).normalized(), Value::Float(f64::INFINITY));
        assert_eq!(Value::Text("1".into()).normalized(), Value::Text("1".into()));

        let a = Value::Float(3.0);
        let b = Value::Int(3);
        assert!(a.sql_eq(&b));
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn test_json_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Text("x".into())
            ]
        );
        assert_eq!(serde_json::to_string(&values).unwrap(), r#"[null,true,3,2.5,"x"]"#);
    }
}
