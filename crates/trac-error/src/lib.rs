// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Closed error taxonomy for TRAC core services.
//!
//! Every error code follows the pattern `TRAC-X###` where `X` is the
//! category letter and `###` is a three-digit number:
//!
//! - **VAL** — validation / malformed request
//! - **AUTH** — authentication and access
//! - **DATA** — metadata store conflicts (not-found, duplicate, wrong-type)
//! - **CACHE** — job cache ticket/entry errors
//! - **EXEC** — batch executor and runtime failures
//! - **SYS** — startup, internal, and transient system errors

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// The closed taxonomy from the TRAC error-handling design (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Startup/bootstrap failed; the process cannot serve requests.
    Startup,
    /// The request is structurally invalid or fails validation rules.
    Validation,
    /// No valid session token was presented.
    Unauthenticated,
    /// The caller is authenticated but not permitted to perform the action.
    Access,
    /// The referenced entity does not exist.
    NotFound,
    /// The write collided with an existing unique key.
    Duplicate,
    /// The operation targeted an object of the wrong type.
    WrongType,
    /// A write failed due to a referential/version conflict.
    DataConflict,
    /// A value exceeded a configured size limit.
    DataSize,
    /// The cache ticket was missing, superseded, or expired.
    CacheTicket,
    /// A cache mutation collided with a concurrent writer.
    CacheDuplicate,
    /// The referenced cache entry does not exist.
    CacheNotFound,
    /// A stored cache value failed to decode.
    CacheCorruption,
    /// The batch executor failed in a way that will not resolve by retrying.
    ExecutorFailure,
    /// The batch executor failed transiently; retry may succeed.
    ExecutorTemporaryFailure,
    /// The batch executor denied the operation (OS/permissions).
    ExecutorAccess,
    /// The batch executor rejected the request as invalid.
    ExecutorValidation,
    /// A downstream dependency failed transiently; the caller may retry.
    TemporaryFailure,
    /// An internal invariant was violated.
    Internal,
    /// An error occurred that does not fit any other category.
    Unexpected,
}

impl ErrorCode {
    /// Stable machine-readable code, e.g. `"TRAC-VAL001"`.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Startup => "TRAC-SYS001",
            Self::Validation => "TRAC-VAL001",
            Self::Unauthenticated => "TRAC-AUTH001",
            Self::Access => "TRAC-AUTH002",
            Self::NotFound => "TRAC-DATA001",
            Self::Duplicate => "TRAC-DATA002",
            Self::WrongType => "TRAC-DATA003",
            Self::DataConflict => "TRAC-DATA004",
            Self::DataSize => "TRAC-DATA005",
            Self::CacheTicket => "TRAC-CACHE001",
            Self::CacheDuplicate => "TRAC-CACHE002",
            Self::CacheNotFound => "TRAC-CACHE003",
            Self::CacheCorruption => "TRAC-CACHE004",
            Self::ExecutorFailure => "TRAC-EXEC001",
            Self::ExecutorTemporaryFailure => "TRAC-EXEC002",
            Self::ExecutorAccess => "TRAC-EXEC003",
            Self::ExecutorValidation => "TRAC-EXEC004",
            Self::TemporaryFailure => "TRAC-SYS002",
            Self::Internal => "TRAC-SYS003",
            Self::Unexpected => "TRAC-SYS004",
        }
    }

    /// Category label, matching the taxonomy grouping in spec §7.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::Startup | Self::TemporaryFailure | Self::Internal | Self::Unexpected => "system",
            Self::Validation => "validation",
            Self::Unauthenticated | Self::Access => "auth",
            Self::NotFound | Self::Duplicate | Self::WrongType | Self::DataConflict | Self::DataSize => {
                "data"
            }
            Self::CacheTicket | Self::CacheDuplicate | Self::CacheNotFound | Self::CacheCorruption => {
                "cache"
            }
            Self::ExecutorFailure
            | Self::ExecutorTemporaryFailure
            | Self::ExecutorAccess
            | Self::ExecutorValidation => "executor",
        }
    }

    /// `true` if a caller may retry the same request and plausibly succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TemporaryFailure | Self::ExecutorTemporaryFailure
        )
    }

    /// gRPC status code per the mapping table in spec §6.
    #[must_use]
    pub fn grpc_status(self) -> u32 {
        // tonic::Code discriminants, kept as raw u32 so this crate does not
        // need to depend on tonic.
        match self {
            Self::Validation | Self::ExecutorValidation => 3, // INVALID_ARGUMENT
            Self::Unauthenticated => 16,                      // UNAUTHENTICATED
            Self::Access | Self::ExecutorAccess => 7,         // PERMISSION_DENIED
            Self::NotFound | Self::CacheNotFound => 5,        // NOT_FOUND
            Self::Duplicate | Self::CacheDuplicate => 6,      // ALREADY_EXISTS
            Self::WrongType | Self::DataConflict => 9,        // FAILED_PRECONDITION
            Self::TemporaryFailure | Self::ExecutorTemporaryFailure => 14, // UNAVAILABLE
            Self::DataSize => 3,                              // INVALID_ARGUMENT
            Self::CacheTicket => 9,                            // FAILED_PRECONDITION
            Self::CacheCorruption
            | Self::ExecutorFailure
            | Self::Startup
            | Self::Internal
            | Self::Unexpected => 13, // INTERNAL
        }
    }

    /// HTTP status per the mapping table in spec §6.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Validation | Self::ExecutorValidation | Self::DataSize => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Access | Self::ExecutorAccess => StatusCode::FORBIDDEN,
            Self::NotFound | Self::CacheNotFound => StatusCode::NOT_FOUND,
            Self::Duplicate | Self::CacheDuplicate => StatusCode::CONFLICT,
            Self::WrongType | Self::DataConflict | Self::CacheTicket => {
                StatusCode::PRECONDITION_FAILED
            }
            Self::TemporaryFailure | Self::ExecutorTemporaryFailure => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::CacheCorruption
            | Self::ExecutorFailure
            | Self::Startup
            | Self::Internal
            | Self::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Process exit code when this error terminates startup (spec §6): `0`
    /// normal, `-1` unhandled fatal, `-2` interrupted (the latter is not
    /// produced here — it's raised directly by the process's signal
    /// handling). Every other category gets its own negative code so an
    /// operator can tell "bad config" from "cache corrupted" from "executor
    /// unreachable" without reading the log line.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Startup | Self::TemporaryFailure | Self::Internal | Self::Unexpected => -1,
            Self::Validation => -3,
            Self::Unauthenticated | Self::Access => -4,
            Self::NotFound | Self::Duplicate | Self::WrongType | Self::DataConflict | Self::DataSize => -5,
            Self::CacheTicket | Self::CacheDuplicate | Self::CacheNotFound | Self::CacheCorruption => -6,
            Self::ExecutorFailure
            | Self::ExecutorTemporaryFailure
            | Self::ExecutorAccess
            | Self::ExecutorValidation => -7,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for ErrorCode {}

// ---------------------------------------------------------------------------
// TracError — rich error carrying context
// ---------------------------------------------------------------------------

/// Rich error value carrying an [`ErrorCode`], a message, structured
/// context, and whether the message has already been reported to the
/// caller ("quiet" — suppresses a duplicate stack trace at the process
/// boundary, per spec §6's exit-code notes).
#[derive(thiserror::Error)]
#[error("[{code}] {message}")]
pub struct TracError {
    /// The taxonomy code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Deterministic key/value context (tenant, object_id, run_id, ...).
    pub context: BTreeMap<String, String>,
    /// Set once this error has already been surfaced to a caller.
    pub quiet: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Debug for TracError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("quiet", &self.quiet)
            .finish()
    }
}

impl TracError {
    /// Start building a [`TracError`] for the given code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
            quiet: false,
            source: None,
        }
    }

    /// Add a key/value context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Mark this error as already reported (suppresses duplicate logging at
    /// the process boundary).
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Convenience constructors, one per taxonomy member.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Duplicate, message)
    }

    #[must_use]
    pub fn wrong_type(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WrongType, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }
}

/// Convenience result type.
pub type TracResult<T> = Result<T, TracError>;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::Startup,
    ErrorCode::Validation,
    ErrorCode::Unauthenticated,
    ErrorCode::Access,
    ErrorCode::NotFound,
    ErrorCode::Duplicate,
    ErrorCode::WrongType,
    ErrorCode::DataConflict,
    ErrorCode::DataSize,
    ErrorCode::CacheTicket,
    ErrorCode::CacheDuplicate,
    ErrorCode::CacheNotFound,
    ErrorCode::CacheCorruption,
    ErrorCode::ExecutorFailure,
    ErrorCode::ExecutorTemporaryFailure,
    ErrorCode::ExecutorAccess,
    ErrorCode::ExecutorValidation,
    ErrorCode::TemporaryFailure,
    ErrorCode::Internal,
    ErrorCode::Unexpected,
];

/// Static lookup/enumeration over the taxonomy.
pub struct ErrorCatalog;

impl ErrorCatalog {
    /// All defined codes, in declaration order.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        ALL_CODES
    }

    /// Look up a code by its string form (e.g. `"TRAC-DATA001"`).
    #[must_use]
    pub fn lookup(code: &str) -> Option<ErrorCode> {
        ALL_CODES.iter().copied().find(|c| c.code() == code)
    }

    /// All codes in a given category (e.g. `"data"`).
    #[must_use]
    pub fn by_category(category: &str) -> Vec<ErrorCode> {
        ALL_CODES
            .iter()
            .copied()
            .filter(|c| c.category() == category)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_a_distinct_string() {
        let mut seen = std::collections::HashSet::new();
        for c in ErrorCatalog::all() {
            assert!(seen.insert(c.code()), "duplicate code string {}", c.code());
        }
    }

    #[test]
    fn lookup_roundtrips() {
        for c in ErrorCatalog::all() {
            assert_eq!(ErrorCatalog::lookup(c.code()), Some(*c));
        }
        assert_eq!(ErrorCatalog::lookup("TRAC-NOPE"), None);
    }

    #[test]
    fn mapping_table_matches_spec() {
        assert_eq!(ErrorCode::Validation.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Access.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Duplicate.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::WrongType.http_status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(
            ErrorCode::TemporaryFailure.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn exit_codes_are_negative_and_differentiate_by_category() {
        for c in ErrorCatalog::all() {
            assert!(c.exit_code() < 0, "{c:?} exit_code should be negative");
        }
        assert_ne!(ErrorCode::Startup.exit_code(), ErrorCode::Validation.exit_code());
        assert_ne!(ErrorCode::Validation.exit_code(), ErrorCode::CacheCorruption.exit_code());
        assert_ne!(ErrorCode::CacheCorruption.exit_code(), ErrorCode::ExecutorFailure.exit_code());
        assert_eq!(ErrorCode::Unauthenticated.exit_code(), ErrorCode::Access.exit_code());
    }

    #[test]
    fn only_temporary_kinds_are_retryable() {
        assert!(ErrorCode::TemporaryFailure.is_retryable());
        assert!(ErrorCode::ExecutorTemporaryFailure.is_retryable());
        assert!(!ErrorCode::NotFound.is_retryable());
        assert!(!ErrorCode::Validation.is_retryable());
    }

    #[test]
    fn builder_accumulates_context() {
        let err = TracError::not_found("object missing")
            .with_context("tenant", "acme")
            .with_context("object_id", "1234");
        assert_eq!(err.context.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.to_string(), "[TRAC-DATA001] object missing");
    }

    #[test]
    fn quiet_flag_is_sticky() {
        let err = TracError::validation("bad").quiet();
        assert!(err.quiet);
    }
}
