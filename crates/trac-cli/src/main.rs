// SPDX-License-Identifier: MIT OR Apache-2.0
//! Administrative command-line interface. Tenant commands talk directly to
//! the metadata store kernel, the same way `trac-gateway` and
//! `trac-metastore`'s own binary do; job and cache inspection commands talk
//! to an orchestrator's admin HTTP surface over a minimal hand-rolled
//! HTTP/1.1 client, since no workspace crate pulls in a general-purpose HTTP
//! client.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;
use trac_config::TracConfig;
use trac_core::TenantCode;
use trac_dialect::SqlDialect;
use trac_metastore::MetadataKernel;

#[derive(Parser, Debug)]
#[command(name = "trac", version, about = "TRAC administrative CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tenant administration against the metadata store.
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },
    /// Job and cache inspection against a running orchestrator.
    Orchestrator {
        #[command(subcommand)]
        command: OrchestratorCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TenantCommand {
    /// List every tenant known to the metadata store.
    List {
        #[arg(long, default_value = "trac.toml")]
        config: PathBuf,
    },
    /// Register a new tenant.
    Create {
        tenant_code: String,
        description: String,
        #[arg(long, default_value = "trac.toml")]
        config: PathBuf,
    },
    /// Update an existing tenant's description.
    Update {
        tenant_code: String,
        description: String,
        #[arg(long, default_value = "trac.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum OrchestratorCommand {
    /// Fetch a batch job's current status.
    JobStatus {
        batch_key: String,
        #[arg(long, default_value = "http://127.0.0.1:8090")]
        orchestrator_url: String,
    },
    /// Fetch a cache entry by key.
    CacheGet {
        key: String,
        #[arg(long, default_value = "http://127.0.0.1:8090")]
        orchestrator_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Tenant { command } => run_tenant_command(command).await,
        Command::Orchestrator { command } => run_orchestrator_command(command).await,
    }
}

async fn run_tenant_command(command: TenantCommand) -> Result<()> {
    match command {
        TenantCommand::List { config } => {
            let kernel = connect_kernel(&config).await?;
            let tenants = kernel.list_tenants().await.context("list tenants")?;
            for tenant in tenants {
                println!("{}\t{}", tenant.tenant_code, tenant.description);
            }
            Ok(())
        }
        TenantCommand::Create { tenant_code, description, config } => {
            let kernel = connect_kernel(&config).await?;
            let tenant_code = TenantCode::new(tenant_code).context("invalid tenant code")?;
            kernel.create_tenant(&tenant_code, &description).await.context("create tenant")?;
            println!("created tenant {tenant_code}");
            Ok(())
        }
        TenantCommand::Update { tenant_code, description, config } => {
            let kernel = connect_kernel(&config).await?;
            let tenant_code = TenantCode::new(tenant_code).context("invalid tenant code")?;
            kernel.update_tenant(&tenant_code, &description).await.context("update tenant")?;
            println!("updated tenant {tenant_code}");
            Ok(())
        }
    }
}

async fn connect_kernel(config_path: &PathBuf) -> Result<MetadataKernel> {
    let config: TracConfig = trac_config::load_config(config_path).context("load config")?;
    let dialect = SqlDialect::parse(&config.db.dialect)
        .with_context(|| format!("unknown db.dialect: {}", config.db.dialect))?;
    MetadataKernel::connect(&config.db.url, dialect).await.context("connect to metadata store")
}

async fn run_orchestrator_command(command: OrchestratorCommand) -> Result<()> {
    match command {
        OrchestratorCommand::JobStatus { batch_key, orchestrator_url } => {
            let path = format!("/jobs/{batch_key}/status");
            let body = http_get(&orchestrator_url, &path).await?;
            println!("{body}");
            Ok(())
        }
        OrchestratorCommand::CacheGet { key, orchestrator_url } => {
            let path = format!("/cache/{key}");
            let body = http_get(&orchestrator_url, &path).await?;
            println!("{body}");
            Ok(())
        }
    }
}

/// Issue a bare `GET` over a plain TCP connection and return the response
/// body as text. Deliberately minimal: one request per connection, no
/// redirects, no TLS — the admin surface this talks to is expected to run
/// on a trusted local network.
async fn http_get(base_url: &str, path: &str) -> Result<String> {
    let authority = base_url
        .strip_prefix("http://")
        .with_context(|| format!("orchestrator URL must be http://host:port, got {base_url}"))?;
    let mut stream = TcpStream::connect(authority)
        .await
        .with_context(|| format!("connect to orchestrator at {authority}"))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\nAccept: application/json\r\n\r\n");
    stream.write_all(request.as_bytes()).await.context("send request")?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.context("read response")?;
    let response = String::from_utf8(raw).context("response was not valid UTF-8")?;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .with_context(|| "malformed HTTP response: no header/body separator")?;
    let status_line = head.lines().next().unwrap_or("");
    let status_code: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .with_context(|| format!("malformed status line: {status_line}"))?;

    if !(200..300).contains(&status_code) {
        bail!("orchestrator returned {status_code}: {body}");
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_get_rejects_non_http_scheme() {
        let err = http_get("https://example.com", "/health").await.unwrap_err();
        assert!(err.to_string().contains("http://host:port"));
    }
}
