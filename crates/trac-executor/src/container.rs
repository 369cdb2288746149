// SPDX-License-Identifier: MIT OR Apache-2.0
//! Container batch executor: launches the job in a container via the
//! host's container CLI (`docker`/`podman`-compatible), exposing the
//! runtime API port through a published container port.

use crate::{BatchConfig, BatchExecutor, BatchState, BatchStatus, Feature, VolumeType};
use async_trait::async_trait;
use std::path::PathBuf;
use trac_error::{ErrorCode, TracError};

const FEATURES: &[Feature] = &[
    Feature::OutputVolumes,
    Feature::ExposePort,
    Feature::StorageMapping,
    Feature::Cancellation,
];

/// Executes batches as containers via a configured CLI binary.
pub struct ContainerExecutor {
    cli: String,
    image: String,
    batch_root: PathBuf,
}

impl ContainerExecutor {
    #[must_use]
    pub fn new(cli: impl Into<String>, image: impl Into<String>, batch_root: PathBuf) -> Self {
        Self {
            cli: cli.into(),
            image: image.into(),
            batch_root,
        }
    }

    fn sandbox_for(&self, batch_key: &str) -> PathBuf {
        self.batch_root.join(batch_key)
    }

    fn container_name(batch_key: &str) -> String {
        format!("trac-batch-{batch_key}")
    }

    async fn run_cli(&self, args: &[&str]) -> Result<std::process::Output, TracError> {
        tokio::process::Command::new(&self.cli)
            .args(args)
            .output()
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("{} failed: {e}", self.cli)))
    }
}

#[async_trait]
impl BatchExecutor for ContainerExecutor {
    fn features(&self) -> &'static [Feature] {
        FEATURES
    }

    async fn create_batch(&self, batch_key: &str) -> Result<BatchState, TracError> {
        let sandbox = self.sandbox_for(batch_key);
        tokio::fs::create_dir_all(&sandbox)
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("create sandbox: {e}")))?;
        Ok(BatchState::new(batch_key, sandbox))
    }

    async fn add_volume(
        &self,
        state: &mut BatchState,
        name: &str,
        volume_type: VolumeType,
    ) -> Result<(), TracError> {
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(TracError::new(
                ErrorCode::ExecutorValidation,
                format!("invalid volume name '{name}'"),
            ));
        }
        let path = state.sandbox_root.join(name);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("create volume: {e}")))?;
        state.volumes.insert(name.to_string(), (volume_type, path));
        Ok(())
    }

    async fn add_file(
        &self,
        state: &BatchState,
        volume: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), TracError> {
        if state.running {
            return Err(TracError::new(
                ErrorCode::ExecutorValidation,
                "cannot add files after the batch has started running",
            ));
        }
        let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
            TracError::new(ErrorCode::ExecutorValidation, format!("unknown volume '{volume}'"))
        })?;
        let target = crate::normalize_under(vol_path, name)?;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("write input file: {e}")))
    }

    async fn submit_batch(&self, state: &mut BatchState, config: &BatchConfig) -> Result<(), TracError> {
        let mut resolved_args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            resolved_args.push(state.resolve_arg(arg)?);
        }

        let name = Self::container_name(&state.batch_key);
        let mount = format!("{}:/sandbox", state.sandbox_root.display());
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name,
            "-v".into(),
            mount,
            "-w".into(),
            "/sandbox".into(),
            "-p".into(),
            "0:8443".into(),
            self.image.clone(),
            config.executable.clone(),
        ];
        args.extend(resolved_args);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_cli(&arg_refs).await?;
        if !output.status.success() {
            return Err(TracError::new(
                ErrorCode::ExecutorFailure,
                format!("container run failed: {}", String::from_utf8_lossy(&output.stderr)),
            ));
        }
        state.running = true;
        Ok(())
    }

    async fn get_batch_status(&self, state: &BatchState) -> Result<BatchStatus, TracError> {
        if state.cancelled {
            return Ok(BatchStatus::Cancelled);
        }
        if !state.running {
            return Ok(BatchStatus::Queued);
        }
        let name = Self::container_name(&state.batch_key);
        let output = self
            .run_cli(&["inspect", "--format", "{{.State.Status}}:{{.State.ExitCode}}", &name])
            .await?;
        if !output.status.success() {
            return Ok(BatchStatus::Unknown);
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut parts = text.trim().split(':');
        match (parts.next(), parts.next()) {
            (Some("running"), _) => Ok(BatchStatus::Running),
            (Some("exited"), Some("0")) => Ok(BatchStatus::Succeeded),
            (Some("exited"), Some(_)) => Ok(BatchStatus::Failed),
            _ => Ok(BatchStatus::Unknown),
        }
    }

    async fn has_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<bool, TracError> {
        self.require_feature(Feature::OutputVolumes)?;
        let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
            TracError::new(ErrorCode::ExecutorValidation, format!("unknown volume '{volume}'"))
        })?;
        let path = crate::normalize_under(vol_path, name)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn get_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<Vec<u8>, TracError> {
        self.require_feature(Feature::OutputVolumes)?;
        let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
            TracError::new(ErrorCode::ExecutorValidation, format!("unknown volume '{volume}'"))
        })?;
        let path = crate::normalize_under(vol_path, name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| TracError::new(ErrorCode::NotFound, format!("output file not found: {name}")))
    }

    async fn get_batch_address(&self, state: &BatchState) -> Result<String, TracError> {
        self.require_feature(Feature::ExposePort)?;
        let name = Self::container_name(&state.batch_key);
        let output = self
            .run_cli(&["port", &name, "8443/tcp"])
            .await?;
        if !output.status.success() {
            return Err(TracError::new(
                ErrorCode::ExecutorFailure,
                "container has not bound its runtime API port yet",
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn cancel_batch(&self, state: &mut BatchState) -> Result<(), TracError> {
        self.require_feature(Feature::Cancellation)?;
        let name = Self::container_name(&state.batch_key);
        self.run_cli(&["stop", &name]).await?;
        state.cancelled = true;
        Ok(())
    }

    async fn delete_batch(&self, state: BatchState, persist: bool) -> Result<(), TracError> {
        let name = Self::container_name(&state.batch_key);
        let _ = self.run_cli(&["rm", "-f", &name]).await;
        if !persist {
            tokio::fs::remove_dir_all(&state.sandbox_root)
                .await
                .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("remove sandbox: {e}")))?;
        }
        Ok(())
    }
}
