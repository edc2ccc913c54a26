//! Attribute values and schemas.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Closed set of attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl AttributeValue {
    /// Type of a non-null value.
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            AttributeValue::String(_) => Some(AttributeType::String),
            AttributeValue::Number(_) => Some(AttributeType::Number),
            AttributeValue::Boolean(_) => Some(AttributeType::Boolean),
            AttributeValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Grouping key with total equality.
    pub fn key(&self) -> AttributeKey {
        match self {
            AttributeValue::String(s) => AttributeKey::String(s.clone()),
            AttributeValue::Number(n) => {
                // -0.0 and 0.0 group together; all NaNs group together
                let normalized = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                AttributeKey::Number(normalized.to_bits())
            }
            AttributeValue::Boolean(b) => AttributeKey::Boolean(*b),
            AttributeValue::Null => AttributeKey::Null,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

/// Hashable, totally ordered form of an [`AttributeValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKey {
    Null,
    Boolean(bool),
    /// Bit pattern of the normalised number
    Number(u64),
    String(String),
}

impl AttributeKey {
    /// Value this key was derived from.
    pub fn to_value(&self) -> AttributeValue {
        match self {
            AttributeKey::Null => AttributeValue::Null,
            AttributeKey::Boolean(b) => AttributeValue::Boolean(*b),
            AttributeKey::Number(bits) => AttributeValue::Number(f64::from_bits(*bits)),
            AttributeKey::String(s) => AttributeValue::String(s.clone()),
        }
    }
}

/// Attribute map of a feature.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Number,
    Boolean,
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttributeType::String => "string",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
        })
    }
}

/// Attribute names and types shared by all features of a dataset.
///
/// Null is compatible with every type. Attributes not yet in the schema
/// are added with the type of their first non-null value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, AttributeType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field declaration.
    pub fn with_field(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn field(&self, name: &str) -> Option<AttributeType> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check attributes against the schema without changing it.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` when a value's type differs from the declared type.
    pub fn check(&self, attributes: &Attributes) -> Result<()> {
        for (name, value) in attributes {
            if let (Some(expected), Some(found)) = (self.field(name), value.attribute_type()) {
                if expected != found {
                    return Err(EngineError::SchemaMismatch {
                        attribute: name.clone(),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Schema extended by the attributes' new fields.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` as for [`Schema::check`].
    pub fn extended(&self, attributes: &Attributes) -> Result<Schema> {
        self.check(attributes)?;
        let mut next = self.clone();
        for (name, value) in attributes {
            if let Some(kind) = value.attribute_type() {
                next.fields.entry(name.clone()).or_insert(kind);
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_normalises_numbers() {
        assert_eq!(
            AttributeValue::Number(0.0).key(),
            AttributeValue::Number(-0.0).key()
        );
        assert_eq!(
            AttributeValue::Number(f64::NAN).key(),
            AttributeValue::Number(-f64::NAN).key()
        );
        assert_ne!(
            AttributeValue::Number(1.0).key(),
            AttributeValue::String("1".into()).key()
        );
    }

    #[test]
    fn test_key_round_trip() {
        let value = AttributeValue::Number(2.5);
        assert_eq!(value.key().to_value(), value);
    }

    #[test]
    fn test_schema_mismatch() {
        let schema = Schema::new().with_field("pop", AttributeType::Number);
        let err = schema
            .check(&attrs(&[("pop", AttributeValue::from("many"))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch { ref attribute, .. } if attribute == "pop"));
        // Null fits any type
        assert!(schema.check(&attrs(&[("pop", AttributeValue::Null)])).is_ok());
    }

    #[test]
    fn test_schema_extended_with_new_fields() {
        let schema = Schema::new()
            .extended(&attrs(&[
                ("name", AttributeValue::from("a")),
                ("note", AttributeValue::Null),
            ]))
            .unwrap();
        assert_eq!(schema.field("name"), Some(AttributeType::String));
        assert_eq!(schema.field("note"), None);
        assert_eq!(schema.len(), 1);
    }
}
