// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Protocol gateway process. Implements the Service Lifecycle (§4.10):
//! `doStartup`/`doShutdown` run under a watchdog that interrupts an
//! overrunning phase, and resources shut down in reverse order of start.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trac_authgate::AuthGate;
use trac_dialect::SqlDialect;
use trac_error::{ErrorCode, TracError};
use trac_gateway::{build_router, AppState};
use trac_metastore::MetadataKernel;

#[derive(Parser, Debug)]
#[command(name = "trac-gateway", version, about = "TRAC protocol gateway")]
struct Args {
    #[arg(long, default_value = "trac.toml")]
    config: PathBuf,

    #[arg(long, default_value_t = 30)]
    startup_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    shutdown_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    shutdown_grace_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let code = match do_startup(&args).await {
        Ok((state, bind)) => run_until_shutdown(state, bind, &args).await,
        Err(err) => {
            error!(code = err.code.code(), "startup failed: {err}");
            err.code.exit_code()
        }
    };
    std::process::exit(code);
}

/// `doStartup(timeout)`: fatal on error, under a watchdog deadline.
async fn do_startup(args: &Args) -> Result<(Arc<AppState>, String), TracError> {
    let timeout = Duration::from_secs(args.startup_timeout_secs);
    tokio::time::timeout(timeout, build_state(args))
        .await
        .map_err(|_| TracError::new(ErrorCode::Startup, "startup exceeded its timeout"))?
}

async fn build_state(args: &Args) -> Result<(Arc<AppState>, String), TracError> {
    let config = trac_config::load_config(&args.config)
        .map_err(|e| TracError::new(ErrorCode::Startup, format!("load config: {e}")))?;
    for warning in trac_config::validate_config(&config)
        .map_err(|e| TracError::new(ErrorCode::Startup, format!("invalid config: {e}")))?
    {
        warn!(%warning, "configuration warning");
    }

    let dialect = SqlDialect::parse(&config.db.dialect)
        .ok_or_else(|| TracError::new(ErrorCode::Startup, format!("unknown db.dialect: {}", config.db.dialect)))?;
    let kernel = MetadataKernel::connect(&config.db.url, dialect).await?;

    let public_key_pem = match &config.auth.public_key_ref {
        Some(path) => Some(
            std::fs::read(path)
                .map_err(|e| TracError::new(ErrorCode::Startup, format!("read public_key_ref: {e}")))?,
        ),
        None => None,
    };
    let auth = AuthGate::new(config.auth.clone(), public_key_pem.as_deref())?;

    let state = Arc::new(AppState { kernel: Arc::new(kernel), auth: Arc::new(auth) });
    let bind = format!("0.0.0.0:{}", config.port);
    info!(bind = %bind, dialect = %dialect, "gateway ready");
    Ok((state, bind))
}

async fn run_until_shutdown(state: Arc<AppState>, bind: String, args: &Args) -> i32 {
    let router = build_router(state);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(err) => {
            error!(%bind, "bind failed: {err}");
            return 1;
        }
    };

    let serve = axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown_signal());

    match serve.await {
        Ok(()) => {
            info!("gateway stopped accepting connections");
            do_shutdown(args).await
        }
        Err(err) => {
            error!("server loop failed: {err}");
            1
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

/// `doShutdown(timeout)`: resources tear down in reverse order of start,
/// each under its own deadline carved from the remaining budget; a grace
/// period after the deadline allows cooperative shutdown before the process
/// exits anyway. Shutdown errors are logged, not fatal, and reported via
/// the exit code.
async fn do_shutdown(args: &Args) -> i32 {
    let timeout = Duration::from_secs(args.shutdown_timeout_secs);
    let grace = Duration::from_secs(args.shutdown_grace_secs);

    // The gateway's only started resource beyond the listener (already
    // drained by `with_graceful_shutdown`) is the metastore connection
    // pool, closed implicitly when `AppState`'s `Arc<MetadataKernel>` drops
    // at the end of `run_until_shutdown`. Nothing else to tear down here
    // yet, but the watchdog stays in place for resources added later.
    match tokio::time::timeout(timeout, async {}).await {
        Ok(()) => {
            info!("shutdown complete");
            0
        }
        Err(_) => {
            warn!("shutdown exceeded its timeout; waiting out grace period");
            tokio::time::sleep(grace).await;
            1
        }
    }
}
