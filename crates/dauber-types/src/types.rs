use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Possible values that can be read from a fact field
///
/// Values are used as hash-index keys, so equality is structural and floats
/// compare by bit pattern. `Float(1.0)` and `Integer(1)` are different keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FactValue {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Array of `FactValues`
    Array(Vec<FactValue>),
    /// UTC date/time value
    Date(DateTime<Utc>),
    /// Null value, also produced when a field is absent
    Null,
}

impl PartialEq for FactValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl Eq for FactValue {}

impl std::hash::Hash for FactValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::String(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            Self::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Self::Array(arr) => {
                4u8.hash(state);
                arr.hash(state);
            }
            Self::Date(dt) => {
                6u8.hash(state);
                dt.timestamp_nanos_opt().unwrap_or(0).hash(state);
            }
            Self::Null => {
                7u8.hash(state);
            }
        }
    }
}

impl PartialOrd for FactValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use FactValue::{Boolean, Date, Float, Integer, Null, String};
        match (self, other) {
            (String(a), String(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Null, Null) => Some(std::cmp::Ordering::Equal),
            #[allow(clippy::cast_precision_loss)]
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl FactValue {
    /// Convert to a normalised numeric value for ordered comparisons
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_comparable(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Date(dt) => Some(dt.timestamp() as f64),
            Self::Array(arr) => Some(arr.len() as f64),
            Self::String(_) | Self::Null => None,
        }
    }

    /// Check if this value is "truthy" for conditional logic
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(arr) => !arr.is_empty(),
            Self::Date(_) => true,
            Self::Null => false,
        }
    }

    /// Get the type name as a string
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Array(_) => "array",
            Self::Date(_) => "date",
            Self::Null => "null",
        }
    }

    /// Create date from UTC timestamp
    #[must_use]
    pub fn date_from_timestamp(timestamp: i64) -> Self {
        Self::Date(DateTime::from_timestamp(timestamp, 0).unwrap_or_default())
    }
}

/// The field content of an inserted object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FactData {
    /// Field values by name
    pub fields: HashMap<String, FactValue>,
}

impl FactData {
    /// Create an empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<FactValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Get a field value
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FactValue> {
        self.fields.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(value: &FactValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        let nan = FactValue::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_ne!(FactValue::Float(0.0), FactValue::Float(-0.0));
        assert_eq!(hash_of(&FactValue::Float(2.5)), hash_of(&FactValue::Float(2.5)));
    }

    #[test]
    fn test_cross_variant_values_differ() {
        assert_ne!(FactValue::Integer(1), FactValue::Float(1.0));
        assert_ne!(FactValue::String("1".into()), FactValue::Integer(1));
        assert!(FactValue::Integer(1) < FactValue::Float(1.5));
    }

    #[test]
    fn test_fact_data_builder() {
        let data = FactData::new().with("id", 7).with("status", "open");
        assert_eq!(data.get("id"), Some(&FactValue::Integer(7)));
        assert_eq!(data.get("status"), Some(&FactValue::String("open".into())));
        assert!(data.get("missing").is_none());
    }

    #[test]
    fn test_display_and_truthiness() {
        let arr = FactValue::Array(vec![FactValue::Integer(1), FactValue::Null]);
        assert_eq!(arr.to_string(), "[1, null]");
        assert!(arr.is_truthy());
        assert!(!FactValue::Null.is_truthy());
        assert_eq!(FactValue::date_from_timestamp(0).type_name(), "date");
    }
}
