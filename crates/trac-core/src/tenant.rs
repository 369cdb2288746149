// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use trac_error::{ErrorCode, TracError};

/// Top-level isolation boundary. Every entity belongs to exactly one tenant.
///
/// Immutable once created; validated at construction so downstream code can
/// treat any `TenantCode` value as already well-formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantCode(String);

impl TenantCode {
    /// Validate and wrap a tenant code.
    pub fn new(code: impl Into<String>) -> Result<Self, TracError> {
        let code = code.into();
        if code.is_empty() || code.len() > 128 {
            return Err(TracError::validation(format!(
                "tenant code must be 1-128 characters, got {}",
                code.len()
            )));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TracError::validation(
                "tenant code must contain only ASCII alphanumerics, '_' and '-'",
            )
            .with_context("tenant_code", code));
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tenant record: the immutable code plus a mutable display description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_code: TenantCode,
    pub description: String,
}

/// Kernel contract error for tenant lookups, per spec §4.2's `listTenants`/
/// `updateTenant` table.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant not found: {0}")]
    NotFound(String),
}

impl From<TenantError> for TracError {
    fn from(e: TenantError) -> Self {
        match &e {
            TenantError::NotFound(code) => {
                TracError::new(ErrorCode::NotFound, e.to_string()).with_context("tenant_code", code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_codes() {
        assert!(TenantCode::new("acme-co_1").is_ok());
    }

    #[test]
    fn rejects_empty_and_invalid() {
        assert!(TenantCode::new("").is_err());
        assert!(TenantCode::new("has space").is_err());
        assert!(TenantCode::new("has/slash").is_err());
    }
}
