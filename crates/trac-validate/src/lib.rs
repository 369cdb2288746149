// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Validation rules shared by the metadata kernel and job cache: the
//! attribute-key grammar (re-exported from `trac-core`), the cache-key
//! grammar, public-write object-type restrictions, and batch-level
//! duplicate detection.

use std::collections::HashSet;
use std::hash::Hash;
use trac_core::{ObjectType, Value};
use trac_error::{ErrorCode, TracError};

pub use trac_core::{is_reserved_attr_key, is_valid_attr_key};

/// Cache-key grammar from spec §3.2: `[\w\-]+`, and it must not collide
/// with the reserved identifier pattern used for attribute keys.
#[must_use]
pub fn is_valid_cache_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_cache_key(key: &str) -> Result<(), TracError> {
    if !is_valid_cache_key(key) {
        return Err(TracError::validation("cache key must match [\\w\\-]+").with_context("key", key));
    }
    Ok(())
}

/// Cache entry `status` uses the same grammar as an attribute key (spec
/// §3.2: "free-form identifier, same validation as attribute keys").
pub fn validate_cache_status(status: &str) -> Result<(), TracError> {
    if !is_valid_attr_key(status) {
        return Err(
            TracError::validation("cache status must match [A-Za-z_][A-Za-z0-9_]*")
                .with_context("status", status),
        );
    }
    Ok(())
}

/// Reject a public write targeting a trusted-only object type (spec §9
/// Open Question 1: the public-write permission list is `FLOW, CUSTOM`).
pub fn validate_public_write_type(object_type: ObjectType) -> Result<(), TracError> {
    if !object_type.is_public_writable() {
        return Err(TracError::new(
            ErrorCode::Access,
            format!("object type {object_type} is not writable through the public API"),
        ));
    }
    Ok(())
}

/// Spec §8 invariant 4: "`save(batch)` where batch contains an internal
/// duplicate never alters persistent state." This finds the first
/// duplicate key in a proposed batch before any write is attempted.
pub fn find_batch_duplicate<K: Eq + Hash + Clone>(keys: impl IntoIterator<Item = K>) -> Option<K> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.clone()) {
            return Some(key);
        }
    }
    None
}

pub fn validate_no_batch_duplicates<K: Eq + Hash + Clone + std::fmt::Debug>(
    keys: impl IntoIterator<Item = K>,
) -> Result<(), TracError> {
    if let Some(dup) = find_batch_duplicate(keys) {
        return Err(TracError::duplicate(format!(
            "batch contains an internal duplicate: {dup:?}"
        )));
    }
    Ok(())
}

/// Recursively validate every attribute key in a value tree (used when a
/// `Value::Map` itself carries nested attribute-shaped keys).
pub fn validate_value_keys(value: &Value) -> Result<(), TracError> {
    match value {
        Value::Scalar(_) => Ok(()),
        Value::Array(items) => {
            for item in items {
                validate_value_keys(item)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            for (key, v) in entries {
                if !is_valid_attr_key(key) {
                    return Err(TracError::validation("nested map key must match [A-Za-z_][A-Za-z0-9_]*")
                        .with_context("key", key.clone()));
                }
                validate_value_keys(v)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_grammar() {
        assert!(is_valid_cache_key("job-1"));
        assert!(is_valid_cache_key("job_1"));
        assert!(!is_valid_cache_key("job 1"));
        assert!(!is_valid_cache_key(""));
    }

    #[test]
    fn public_write_restricted_to_flow_and_custom() {
        assert!(validate_public_write_type(ObjectType::Flow).is_ok());
        assert!(validate_public_write_type(ObjectType::Custom).is_ok());
        assert!(validate_public_write_type(ObjectType::Data).is_err());
        assert!(validate_public_write_type(ObjectType::Job).is_err());
    }

    #[test]
    fn batch_duplicate_detection() {
        assert_eq!(find_batch_duplicate(["a", "b", "a"]), Some("a"));
        assert_eq!(find_batch_duplicate(["a", "b", "c"]), None);
        assert!(validate_no_batch_duplicates(["a", "b", "a"]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn cache_key_grammar_never_panics(s in "\\PC*") {
            let _ = is_valid_cache_key(&s);
        }
    }
}
