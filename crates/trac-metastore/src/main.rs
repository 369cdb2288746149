// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Standalone metadata-store service process: loads `trac-config`,
//! connects `trac-metastore::MetadataKernel`, and idles ready for a
//! gateway to drive it (the gRPC/REST surface itself lives in
//! `trac-gateway`; this binary is the kernel's deployable unit).

use std::path::PathBuf;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;
use trac_dialect::SqlDialect;
use trac_metastore::MetadataKernel;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            error!(code = err.code.code(), "metastore startup failed: {err}");
            err.code.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<(), trac_error::TracError> {
    async {
        let config_path = std::env::var("TRAC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("trac.toml"));
        let config = trac_config::load_config(&config_path).map_err(|e| {
            trac_error::TracError::new(trac_error::ErrorCode::Startup, format!("load config: {e}"))
        })?;
        let warnings = trac_config::validate_config(&config).map_err(|e| {
            trac_error::TracError::new(trac_error::ErrorCode::Startup, format!("invalid config: {e}"))
        })?;
        for warning in warnings {
            tracing::warn!(%warning, "configuration warning");
        }

        let dialect = SqlDialect::parse(&config.db.dialect).ok_or_else(|| {
            trac_error::TracError::new(
                trac_error::ErrorCode::Startup,
                format!("unknown db.dialect: {}", config.db.dialect),
            )
        })?;

        let kernel = MetadataKernel::connect(&config.db.url, dialect).await?;
        info!(port = config.port, dialect = %dialect, "metadata store kernel ready");
        let _ = kernel.list_tenants().await?;

        info!("metastore idling; serve via trac-gateway");
        Ok(())
    }
    .instrument(info_span!("startup"))
    .await
}
