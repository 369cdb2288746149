// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Job orchestrator process. Mirrors the gateway's service lifecycle
//! (§4.10): a watchdog-bounded startup builds the supervisor and cache,
//! then the admin HTTP surface serves until a shutdown signal arrives.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trac_error::{ErrorCode, TracError};
use trac_executor::LocalExecutor;
use trac_jobcache::JobCache;
use trac_joborch::JobSupervisor;
use trac_orchestrator::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "trac-orchestrator", version, about = "TRAC job orchestrator")]
struct Args {
    #[arg(long, default_value = "trac.toml")]
    config: PathBuf,

    #[arg(long, default_value_t = 30)]
    startup_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let code = match do_startup(&args).await {
        Ok((state, bind)) => run_until_shutdown(state, bind).await,
        Err(err) => {
            error!(code = err.code.code(), "startup failed: {err}");
            err.code.exit_code()
        }
    };
    std::process::exit(code);
}

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

    let executor = LocalExecutor::new(PathBuf::from(&config.executor.batch_dir));
    let cache = Arc::new(JobCache::new());
    let supervisor = JobSupervisor::new(executor, cache.clone());

    let state = Arc::new(AppState::new(supervisor, cache));
    // The orchestrator's admin surface has no dedicated config field yet;
    // it shares the gateway's port convention, offset to avoid collision
    // when both run on the same host during local development.
    let bind = format!("0.0.0.0:{}", config.port.saturating_add(10));
    info!(bind = %bind, batch_dir = %config.executor.batch_dir, "orchestrator ready");
    Ok((state, bind))
}

async fn run_until_shutdown(state: Arc<AppState>, bind: String) -> i32 {
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
            info!("orchestrator stopped accepting connections");
            0
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
