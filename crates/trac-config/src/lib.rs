// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for TRAC core services.
//!
//! This crate provides [`TracConfig`] — the top-level runtime settings
//! enumerated in the external-interfaces configuration table — together
//! with helpers for loading from TOML files, applying environment
//! overrides, and validating the result before any socket is opened.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use trac_dialect::SqlDialect;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `executor.batch_persist` is set, so sandboxes accumulate on disk.
    BatchPersistEnabled,
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::BatchPersistEnabled => {
                write!(f, "executor.batch_persist is enabled: sandboxes are never cleaned up")
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Deployment environment, gating the non-production-only auth bypasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Production
    }
}

/// Top-level runtime configuration for a TRAC service process.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TracConfig {
    /// Listen port for the service.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Idle connection timeout, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,

    /// Relational backend settings.
    pub db: DbConfig,

    /// Auth gate settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Batch executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// SSH executor settings (only used when the executor targets SSH).
    #[serde(default)]
    pub ssh: SshConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_idle_timeout() -> u64 {
    60
}

/// `db.*` configuration options.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct DbConfig {
    /// One of `mysql`, `postgres`, `h2`, `sqlserver`, `oracle`.
    pub dialect: String,
    /// Connection URL/DSN.
    pub url: String,
    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

/// `auth.*` configuration options.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
pub struct AuthConfig {
    /// Reference to the public key used to verify session tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_ref: Option<String>,
    /// Accept every request without a token. Non-production only.
    #[serde(default)]
    pub disable_auth: bool,
    /// Accept tokens without verifying their signature. Non-production only.
    #[serde(default)]
    pub disable_signing: bool,
}

/// `executor.*` configuration options.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Path to the Python venv the launched runtime process uses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venv_path: Option<String>,
    /// Root directory under which batch sandboxes are created.
    #[serde(default = "default_batch_dir")]
    pub batch_dir: String,
    /// If true, sandbox directories are kept after `deleteBatch`.
    #[serde(default)]
    pub batch_persist: bool,
}

fn default_batch_dir() -> String {
    "/var/run/trac/batch".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            venv_path: None,
            batch_dir: default_batch_dir(),
            batch_persist: false,
        }
    }
}

/// `ssh.*` configuration options, used only by the SSH batch executor.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`TracConfig`] from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<TracConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    let mut config = parse_toml(&content)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`TracConfig`].
pub fn parse_toml(content: &str) -> Result<TracConfig, ConfigError> {
    toml::from_str::<TracConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables: `TRAC_PORT`, `TRAC_DB_URL`, `TRAC_DB_DIALECT`.
pub fn apply_env_overrides(config: &mut TracConfig) {
    if let Ok(val) = std::env::var("TRAC_PORT")
        && let Ok(port) = val.parse::<u16>()
    {
        config.port = port;
    }
    if let Ok(val) = std::env::var("TRAC_DB_URL") {
        config.db.url = val;
    }
    if let Ok(val) = std::env::var("TRAC_DB_DIALECT") {
        config.db.dialect = val;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration before any socket is opened.
///
/// Hard errors (unknown dialect, non-production-only flags set in
/// production) are returned as a [`ConfigError::ValidationError`]; soft
/// issues come back as warnings.
pub fn validate_config(config: &TracConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if SqlDialect::parse(&config.db.dialect).is_none() {
        errors.push(format!(
            "unknown db.dialect '{}' (expected one of mysql, postgres, h2, sqlserver, oracle)",
            config.db.dialect
        ));
    }

    if config.db.url.trim().is_empty() {
        errors.push("db.url must not be empty".into());
    }

    if config.environment == Environment::Production {
        if config.auth.disable_auth {
            errors.push("auth.disable_auth is not permitted in the production environment".into());
        }
        if config.auth.disable_signing {
            errors
                .push("auth.disable_signing is not permitted in the production environment".into());
        }
    }

    if !config.auth.disable_auth && config.auth.public_key_ref.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "auth.public_key_ref".into(),
            hint: "tokens cannot be verified without a configured public key".into(),
        });
    }

    if config.executor.batch_persist {
        warnings.push(ConfigWarning::BatchPersistEnabled);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            port = 9090

            [db]
            dialect = "postgres"
            url = "postgres://localhost/trac"
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = parse_toml(minimal_toml()).expect("parses");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.idle_timeout, 60);
        assert_eq!(cfg.db.pool_size, 10);
        assert_eq!(cfg.environment, Environment::Production);
    }

    #[test]
    fn rejects_unknown_dialect() {
        let mut cfg = parse_toml(minimal_toml()).expect("parses");
        cfg.db.dialect = "mongodb".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_disable_auth_in_production() {
        let mut cfg = parse_toml(minimal_toml()).expect("parses");
        cfg.auth.disable_auth = true;
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("disable_auth")));
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn allows_disable_auth_outside_production() {
        let mut cfg = parse_toml(minimal_toml()).expect("parses");
        cfg.environment = Environment::Development;
        cfg.auth.disable_auth = true;
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn warns_when_batch_persist_enabled() {
        let mut cfg = parse_toml(minimal_toml()).expect("parses");
        cfg.auth.public_key_ref = Some("kid-1".into());
        cfg.executor.batch_persist = true;
        let warnings = validate_config(&cfg).expect("valid");
        assert!(warnings.contains(&ConfigWarning::BatchPersistEnabled));
    }

    #[test]
    fn env_override_applies_port_and_db_url() {
        let mut cfg = parse_toml(minimal_toml()).expect("parses");
        std::env::set_var("TRAC_PORT", "7777");
        std::env::set_var("TRAC_DB_URL", "postgres://override/trac");
        apply_env_overrides(&mut cfg);
        std::env::remove_var("TRAC_PORT");
        std::env::remove_var("TRAC_DB_URL");
        assert_eq!(cfg.port, 7777);
        assert_eq!(cfg.db.url, "postgres://override/trac");
    }
}
