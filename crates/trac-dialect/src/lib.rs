// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Maps vendor-specific relational error signals onto the closed
//! [`DbErrorCode`] set, and prepares the per-transaction scratch table used
//! to preserve caller-supplied ordering when batch-loading heterogeneous
//! rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational backend flavor. `Sqlite` stands in for the embedded-engine
/// role an H2-style in-process database plays in the reference design —
/// see DESIGN.md for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
    Oracle,
}

impl SqlDialect {
    /// Parse a `db.dialect` configuration value (spec §6).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "h2" | "sqlite" => Some(Self::Sqlite),
            "sqlserver" => Some(Self::SqlServer),
            "oracle" => Some(Self::Oracle),
            _ => None,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "h2",
            Self::SqlServer => "sqlserver",
            Self::Oracle => "oracle",
        };
        write!(f, "{s}")
    }
}

/// The closed set of semantic database error codes (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbErrorCode {
    Unknown,
    InsertDuplicate,
    InsertMissingFk,
    NoData,
    TooManyRows,
    WrongObjectType,
    InvalidObjectDefinition,
}

/// Per-dialect classification of a raw database error into a
/// [`DbErrorCode`]. Holds no state beyond the dialect flavor (spec §4.1:
/// "the adapter holds no state beyond its dialect flavor").
pub trait DialectAdapter: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// Classify a `sqlx` error using dialect-specific SQLSTATE/vendor-code
    /// conventions.
    fn classify_error(&self, err: &sqlx::Error) -> DbErrorCode;

    /// DDL for the per-transaction `(ordering, mapped_pk)` scratch table
    /// used to preserve caller-supplied ordering when batch-loading
    /// heterogeneous rows.
    fn mapping_table_ddl(&self) -> &'static str;
}

fn classify_by_sqlstate(db_err: &dyn sqlx::error::DatabaseError, dialect: SqlDialect) -> DbErrorCode {
    let code = db_err.code().map(|c| c.into_owned());
    match dialect {
        SqlDialect::Postgres => match code.as_deref() {
            Some("23505") => DbErrorCode::InsertDuplicate,
            Some("23503") => DbErrorCode::InsertMissingFk,
            Some("22P02" | "22003") => DbErrorCode::InvalidObjectDefinition,
            _ => DbErrorCode::Unknown,
        },
        SqlDialect::MySql => match code.as_deref() {
            Some("23000") if db_err.message().contains("Duplicate") => DbErrorCode::InsertDuplicate,
            Some("23000") => DbErrorCode::InsertMissingFk,
            _ => DbErrorCode::Unknown,
        },
        SqlDialect::Sqlite => {
            let msg = db_err.message();
            if msg.contains("UNIQUE constraint failed") {
                DbErrorCode::InsertDuplicate
            } else if msg.contains("FOREIGN KEY constraint failed") {
                DbErrorCode::InsertMissingFk
            } else {
                DbErrorCode::Unknown
            }
        }
        SqlDialect::SqlServer => match code.as_deref() {
            Some("2627" | "2601") => DbErrorCode::InsertDuplicate,
            Some("547") => DbErrorCode::InsertMissingFk,
            _ => DbErrorCode::Unknown,
        },
        SqlDialect::Oracle => match code.as_deref() {
            Some("ORA-00001") => DbErrorCode::InsertDuplicate,
            Some("ORA-02291") => DbErrorCode::InsertMissingFk,
            _ => DbErrorCode::Unknown,
        },
    }
}

fn classify_error_common(dialect: SqlDialect, err: &sqlx::Error) -> DbErrorCode {
    match err {
        sqlx::Error::RowNotFound => DbErrorCode::NoData,
        sqlx::Error::Database(db_err) => classify_by_sqlstate(db_err.as_ref(), dialect),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => DbErrorCode::InvalidObjectDefinition,
        _ => DbErrorCode::Unknown,
    }
}

macro_rules! adapter_impl {
    ($name:ident, $dialect:expr, $ddl:expr) => {
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl DialectAdapter for $name {
            fn dialect(&self) -> SqlDialect {
                $dialect
            }

            fn classify_error(&self, err: &sqlx::Error) -> DbErrorCode {
                classify_error_common($dialect, err)
            }

            fn mapping_table_ddl(&self) -> &'static str {
                $ddl
            }
        }
    };
}

adapter_impl!(
    PostgresAdapter,
    SqlDialect::Postgres,
    "CREATE TEMPORARY TABLE trac_batch_order (ordering INTEGER PRIMARY KEY, mapped_pk BIGINT) ON COMMIT DROP"
);
adapter_impl!(
    MySqlAdapter,
    SqlDialect::MySql,
    "CREATE TEMPORARY TABLE trac_batch_order (ordering INTEGER PRIMARY KEY, mapped_pk BIGINT)"
);
adapter_impl!(
    SqliteAdapter,
    SqlDialect::Sqlite,
    "CREATE TEMP TABLE trac_batch_order (ordering INTEGER PRIMARY KEY, mapped_pk INTEGER)"
);
adapter_impl!(
    SqlServerAdapter,
    SqlDialect::SqlServer,
    "CREATE TABLE #trac_batch_order (ordering INT PRIMARY KEY, mapped_pk BIGINT)"
);
adapter_impl!(
    OracleAdapter,
    SqlDialect::Oracle,
    "CREATE GLOBAL TEMPORARY TABLE trac_batch_order (ordering NUMBER PRIMARY KEY, mapped_pk NUMBER) ON COMMIT DELETE ROWS"
);

/// Build the adapter for a configured dialect.
#[must_use]
pub fn adapter_for(dialect: SqlDialect) -> Box<dyn DialectAdapter> {
    match dialect {
        SqlDialect::Postgres => Box::new(PostgresAdapter),
        SqlDialect::MySql => Box::new(MySqlAdapter),
        SqlDialect::Sqlite => Box::new(SqliteAdapter),
        SqlDialect::SqlServer => Box::new(SqlServerAdapter),
        SqlDialect::Oracle => Box::new(OracleAdapter),
    }
}
