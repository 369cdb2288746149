// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local-process batch executor: spawns `trac-runtime` (or any configured
//! executable) directly on the host, writing its sandbox under a
//! configured batch root.

use crate::{BatchConfig, BatchExecutor, BatchState, BatchStatus, Feature, VolumeType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use trac_error::{ErrorCode, TracError};

const FEATURES: &[Feature] = &[Feature::OutputVolumes, Feature::StorageMapping];

/// Executes batches as child processes of the orchestrator itself.
pub struct LocalExecutor {
    batch_root: PathBuf,
    /// Exit codes harvested by each batch's detached wait task, keyed by
    /// `batch_key`. `get_batch_status` consults this before falling back to
    /// a liveness probe, since once the child has been reaped its pid can't
    /// be probed for exit status any other way.
    exit_codes: Arc<Mutex<HashMap<String, i32>>>,
}

impl LocalExecutor {
    #[must_use]
    pub fn new(batch_root: PathBuf) -> Self {
        Self { batch_root, exit_codes: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn sandbox_for(&self, batch_key: &str) -> PathBuf {
        self.batch_root.join(batch_key)
    }
}

fn io_err(context: &str, e: std::io::Error) -> TracError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        TracError::new(ErrorCode::ExecutorAccess, format!("{context}: {e}"))
    } else {
        TracError::new(ErrorCode::ExecutorFailure, format!("{context}: {e}"))
    }
}

#[async_trait]
impl BatchExecutor for LocalExecutor {
    fn features(&self) -> &'static [Feature] {
        FEATURES
    }

    async fn create_batch(&self, batch_key: &str) -> Result<BatchState, TracError> {
        let sandbox = self.sandbox_for(batch_key);
        tokio::fs::create_dir_all(&sandbox)
            .await
            .map_err(|e| io_err("create batch sandbox", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o750);
            tokio::fs::set_permissions(&sandbox, perms)
                .await
                .map_err(|e| io_err("set sandbox permissions", e))?;
        }
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
            .map_err(|e| io_err("create volume directory", e))?;
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
            .map_err(|e| io_err("write batch input file", e))
    }

    async fn submit_batch(&self, state: &mut BatchState, config: &BatchConfig) -> Result<(), TracError> {
        let mut args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            args.push(state.resolve_arg(arg)?);
        }

        let mut cmd = tokio::process::Command::new(&config.executable);
        cmd.args(&args).current_dir(&state.sandbox_root);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        if let Some((volume, name)) = &config.stdout_to {
            let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
                TracError::new(ErrorCode::ExecutorValidation, format!("unknown stdout volume '{volume}'"))
            })?;
            let path = crate::normalize_under(vol_path, name)?;
            let file = std::fs::File::create(&path).map_err(|e| io_err("open stdout redirect", e))?;
            cmd.stdout(Stdio::from(file));
        }
        if let Some((volume, name)) = &config.stderr_to {
            let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
                TracError::new(ErrorCode::ExecutorValidation, format!("unknown stderr volume '{volume}'"))
            })?;
            let path = crate::normalize_under(vol_path, name)?;
            let file = std::fs::File::create(&path).map_err(|e| io_err("open stderr redirect", e))?;
            cmd.stderr(Stdio::from(file));
        }

        let child = cmd.spawn().map_err(|e| io_err("spawn batch process", e))?;
        state.pid = child.id();
        state.running = true;

        // Detach: the supervisor polls status rather than awaiting exit
        // directly, matching the "monitor, harvest" split in the executor's
        // responsibility. The wait task still records the real exit code so
        // `get_batch_status` can distinguish success from failure instead of
        // treating "process gone" as automatic success.
        let batch_key = state.batch_key.clone();
        let exit_codes = self.exit_codes.clone();
        tokio::spawn(async move {
            if let Ok(output) = child.wait_with_output().await {
                let code = output.status.code().unwrap_or(-1);
                exit_codes.lock().unwrap_or_else(|e| e.into_inner()).insert(batch_key, code);
            }
        });
        Ok(())
    }

    async fn get_batch_status(&self, state: &BatchState) -> Result<BatchStatus, TracError> {
        if state.cancelled {
            return Ok(BatchStatus::Cancelled);
        }
        if !state.running {
            return Ok(BatchStatus::Queued);
        }
        if let Some(code) = self.exit_codes.lock().unwrap_or_else(|e| e.into_inner()).get(&state.batch_key) {
            return Ok(if *code == 0 { BatchStatus::Succeeded } else { BatchStatus::Failed });
        }
        match state.pid {
            // No recorded exit code yet: either still running, or the wait
            // task hasn't harvested it yet. Report Running either way — the
            // caller is expected to poll again, and the exit code map is the
            // only source of truth for Succeeded/Failed.
            Some(_) => Ok(BatchStatus::Running),
            None => Ok(BatchStatus::Unknown),
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
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TracError::new(ErrorCode::NotFound, format!("output file not found: {name}"))
            } else {
                io_err("read output file", e)
            }
        })
    }

    async fn get_batch_address(&self, _state: &BatchState) -> Result<String, TracError> {
        Err(TracError::new(
            ErrorCode::ExecutorValidation,
            "LocalExecutor does not advertise EXPOSE_PORT",
        ))
    }

    async fn cancel_batch(&self, _state: &mut BatchState) -> Result<(), TracError> {
        Err(TracError::new(
            ErrorCode::ExecutorValidation,
            "LocalExecutor does not advertise CANCELLATION",
        ))
    }

    async fn delete_batch(&self, state: BatchState, persist: bool) -> Result<(), TracError> {
        if state.running && state.pid.is_some() {
            #[cfg(unix)]
            signal_kill(state.pid.unwrap_or_default());
        }
        self.exit_codes.lock().unwrap_or_else(|e| e.into_inner()).remove(&state.batch_key);
        if !persist {
            tokio::fs::remove_dir_all(&state.sandbox_root)
                .await
                .map_err(|e| io_err("remove batch sandbox", e))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn signal_kill(pid: u32) {
    let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_batch_and_add_volume_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let mut state = exec.create_batch("batch-1").await.unwrap();
        exec.add_volume(&mut state, "config", VolumeType::Config)
            .await
            .unwrap();
        assert!(state.volumes.contains_key("config"));
        exec.add_file(&state, "config", "job_config.json", b"{}")
            .await
            .unwrap();
        assert!(exec.has_output_file(&state, "config", "job_config.json").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_invalid_volume_names() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let mut state = exec.create_batch("batch-1").await.unwrap();
        assert!(exec.add_volume(&mut state, "../escape", VolumeType::Scratch).await.is_err());
    }

    #[tokio::test]
    async fn delete_batch_removes_sandbox_unless_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let state = exec.create_batch("batch-1").await.unwrap();
        let sandbox = state.sandbox_root.clone();
        exec.delete_batch(state, false).await.unwrap();
        assert!(!sandbox.exists());
    }

    async fn wait_for_exit(exec: &LocalExecutor, state: &BatchState) -> BatchStatus {
        for _ in 0..200 {
            let status = exec.get_batch_status(state).await.unwrap();
            if status != BatchStatus::Running {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("batch never left Running within the test's polling budget");
    }

    #[tokio::test]
    async fn reports_succeeded_for_zero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let mut state = exec.create_batch("batch-ok").await.unwrap();
        let config = BatchConfig {
            executable: "/bin/sh".to_string(),
            args: vec![crate::LaunchArg::String("-c".into()), crate::LaunchArg::String("exit 0".into())],
            ..Default::default()
        };
        exec.submit_batch(&mut state, &config).await.unwrap();
        assert_eq!(wait_for_exit(&exec, &state).await, BatchStatus::Succeeded);
    }

    #[tokio::test]
    async fn reports_failed_for_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let mut state = exec.create_batch("batch-fail").await.unwrap();
        let config = BatchConfig {
            executable: "/bin/sh".to_string(),
            args: vec![crate::LaunchArg::String("-c".into()), crate::LaunchArg::String("exit 7".into())],
            ..Default::default()
        };
        exec.submit_batch(&mut state, &config).await.unwrap();
        assert_eq!(wait_for_exit(&exec, &state).await, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn delete_batch_clears_recorded_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(tmp.path().to_path_buf());
        let mut state = exec.create_batch("batch-cleanup").await.unwrap();
        let config = BatchConfig {
            executable: "/bin/sh".to_string(),
            args: vec![crate::LaunchArg::String("-c".into()), crate::LaunchArg::String("exit 0".into())],
            ..Default::default()
        };
        exec.submit_batch(&mut state, &config).await.unwrap();
        wait_for_exit(&exec, &state).await;
        assert!(exec.exit_codes.lock().unwrap().contains_key("batch-cleanup"));
        exec.delete_batch(state, false).await.unwrap();
        assert!(!exec.exit_codes.lock().unwrap().contains_key("batch-cleanup"));
    }
}
