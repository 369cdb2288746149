// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trac_error::{ErrorCode, TracError};

/// Scalar kinds a tag attribute value may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Boolean,
    Integer,
    Float,
    Decimal,
    String,
    Date,
    DateTime,
}

/// The declared shape of a [`Value`]: a scalar primitive, or an array/map
/// of some element type, to arbitrary nesting depth (spec §3.1: "nested
/// arrays and maps are supported to arbitrary depth").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDescriptor {
    Scalar { primitive: PrimitiveType },
    Array { element: Box<TypeDescriptor> },
    Map { element: Box<TypeDescriptor> },
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(String),
    String(String),
    Date(chrono::NaiveDate),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl Primitive {
    #[must_use]
    pub fn type_of(&self) -> PrimitiveType {
        match self {
            Self::Boolean(_) => PrimitiveType::Boolean,
            Self::Integer(_) => PrimitiveType::Integer,
            Self::Float(_) => PrimitiveType::Float,
            Self::Decimal(_) => PrimitiveType::Decimal,
            Self::String(_) => PrimitiveType::String,
            Self::Date(_) => PrimitiveType::Date,
            Self::DateTime(_) => PrimitiveType::DateTime,
        }
    }
}

/// A tag-attribute value: a scalar, an array, or a map thereof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Primitive),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Validate this value's runtime shape against a declared
    /// [`TypeDescriptor`] (spec §4.2: "the value's runtime type required
    /// to match the descriptor").
    pub fn check_type(&self, descriptor: &TypeDescriptor) -> Result<(), TracError> {
        match (self, descriptor) {
            (Value::Scalar(p), TypeDescriptor::Scalar { primitive }) if p.type_of() == *primitive => {
                Ok(())
            }
            (Value::Array(items), TypeDescriptor::Array { element }) => {
                for item in items {
                    item.check_type(element)?;
                }
                Ok(())
            }
            (Value::Map(entries), TypeDescriptor::Map { element }) => {
                for v in entries.values() {
                    v.check_type(element)?;
                }
                Ok(())
            }
            _ => Err(TracError::new(
                ErrorCode::Validation,
                "attribute value does not match its declared type descriptor",
            )),
        }
    }
}

/// Attribute key grammar from spec §4.2: `[A-Za-z_][A-Za-z0-9_]*`, and must
/// not start with the reserved prefix `trac_`.
pub const RESERVED_ATTR_PREFIX: &str = "trac_";

#[must_use]
pub fn is_valid_attr_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[must_use]
pub fn is_reserved_attr_key(key: &str) -> bool {
    key.starts_with(RESERVED_ATTR_PREFIX)
}

/// Validate an attribute key for a *public* write: well-formed and not
/// reserved. Trusted internal writes skip the reserved check (spec §4.2:
/// "trusted internal writes may create reserved attributes ... on the
/// caller's behalf").
pub fn validate_public_attr_key(key: &str) -> Result<(), TracError> {
    if !is_valid_attr_key(key) {
        return Err(
            TracError::validation("attribute key must match [A-Za-z_][A-Za-z0-9_]*")
                .with_context("attr_key", key),
        );
    }
    if is_reserved_attr_key(key) {
        return Err(
            TracError::validation("attribute key uses the reserved 'trac_' prefix")
                .with_context("attr_key", key),
        );
    }
    Ok(())
}

pub fn validate_trusted_attr_key(key: &str) -> Result<(), TracError> {
    if !is_valid_attr_key(key) {
        return Err(
            TracError::validation("attribute key must match [A-Za-z_][A-Za-z0-9_]*")
                .with_context("attr_key", key),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_grammar() {
        assert!(is_valid_attr_key("owner"));
        assert!(is_valid_attr_key("_private"));
        assert!(is_valid_attr_key("a1_b2"));
        assert!(!is_valid_attr_key("1abc"));
        assert!(!is_valid_attr_key("has-dash"));
        assert!(!is_valid_attr_key(""));
    }

    #[test]
    fn reserved_prefix_rejected_for_public_writes() {
        assert!(validate_public_attr_key("trac_schema_id").is_err());
        assert!(validate_trusted_attr_key("trac_schema_id").is_ok());
        assert!(validate_public_attr_key("owner").is_ok());
    }

    #[test]
    fn scalar_type_check() {
        let v = Value::Scalar(Primitive::Integer(42));
        let d = TypeDescriptor::Scalar {
            primitive: PrimitiveType::Integer,
        };
        assert!(v.check_type(&d).is_ok());
        let wrong = TypeDescriptor::Scalar {
            primitive: PrimitiveType::String,
        };
        assert!(v.check_type(&wrong).is_err());
    }

    #[test]
    fn nested_array_type_check() {
        let v = Value::Array(vec![
            Value::Scalar(Primitive::String("a".into())),
            Value::Scalar(Primitive::String("b".into())),
        ]);
        let d = TypeDescriptor::Array {
            element: Box::new(TypeDescriptor::Scalar {
                primitive: PrimitiveType::String,
            }),
        };
        assert!(v.check_type(&d).is_ok());
    }

    #[test]
    fn nested_map_type_mismatch() {
        let mut m = BTreeMap::new();
        m.insert("x".to_string(), Value::Scalar(Primitive::Boolean(true)));
        let v = Value::Map(m);
        let d = TypeDescriptor::Map {
            element: Box::new(TypeDescriptor::Scalar {
                primitive: PrimitiveType::Integer,
            }),
        };
        assert!(v.check_type(&d).is_err());
    }
}
