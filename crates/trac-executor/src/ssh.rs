// SPDX-License-Identifier: MIT OR Apache-2.0
//! SSH batch executor: sandboxes and launches the job on a remote host
//! reached through `openssh`'s multiplexed control-master session.

use crate::{BatchConfig, BatchExecutor, BatchState, BatchStatus, Feature, VolumeType};
use async_trait::async_trait;
use openssh::{KnownHosts, Session};
use std::path::PathBuf;
use trac_error::{ErrorCode, TracError};

const FEATURES: &[Feature] = &[Feature::OutputVolumes, Feature::Cancellation];

/// Connection settings for the remote host (spec §6's `ssh.*` config
/// options).
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub batch_root: PathBuf,
}

/// Executes batches on a remote host over SSH.
pub struct SshExecutor {
    target: SshTarget,
}

impl SshExecutor {
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    async fn connect(&self) -> Result<Session, TracError> {
        let destination = format!("ssh://{}@{}:{}", self.target.user, self.target.host, self.target.port);
        Session::connect(&destination, KnownHosts::Strict)
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("ssh connect failed: {e}")))
    }

    fn sandbox_for(&self, batch_key: &str) -> PathBuf {
        self.target.batch_root.join(batch_key)
    }
}

fn remote_err(context: &str, e: openssh::Error) -> TracError {
    TracError::new(ErrorCode::ExecutorFailure, format!("{context}: {e}"))
}

/// Single-quote a value for safe interpolation into a remote shell command.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[async_trait]
impl BatchExecutor for SshExecutor {
    fn features(&self) -> &'static [Feature] {
        FEATURES
    }

    async fn create_batch(&self, batch_key: &str) -> Result<BatchState, TracError> {
        let sandbox = self.sandbox_for(batch_key);
        let session = self.connect().await?;
        session
            .command("mkdir")
            .arg("-p")
            .arg(sandbox.display().to_string())
            .status()
            .await
            .map_err(|e| remote_err("create remote sandbox", e))?;
        session
            .close()
            .await
            .map_err(|e| remote_err("close ssh session", e))?;
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
        let session = self.connect().await?;
        session
            .command("mkdir")
            .arg("-p")
            .arg(path.display().to_string())
            .status()
            .await
            .map_err(|e| remote_err("create remote volume", e))?;
        session
            .close()
            .await
            .map_err(|e| remote_err("close ssh session", e))?;
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

        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("staging file: {e}")))?;
        std::fs::write(tmp.path(), bytes)
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("staging file: {e}")))?;

        let destination = format!(
            "{}@{}:{}",
            self.target.user,
            self.target.host,
            target.display()
        );
        let status = tokio::process::Command::new("scp")
            .arg("-P")
            .arg(self.target.port.to_string())
            .arg(tmp.path())
            .arg(&destination)
            .status()
            .await
            .map_err(|e| TracError::new(ErrorCode::ExecutorFailure, format!("scp failed: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(TracError::new(ErrorCode::ExecutorFailure, "scp exited non-zero"))
        }
    }

    async fn submit_batch(&self, state: &mut BatchState, config: &BatchConfig) -> Result<(), TracError> {
        let mut args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            args.push(state.resolve_arg(arg)?);
        }
        let marker = state.sandbox_root.join(".trac_exit_code");

        // `openssh` runs the remote command detached and discards its exit
        // status once the connection closes, so the remote shell records its
        // own `$?` into a marker file that `get_batch_status` reads back.
        let mut script = shell_quote(&config.executable);
        for arg in &args {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        script.push_str("; echo $? > ");
        script.push_str(&shell_quote(&marker.display().to_string()));

        let session = self.connect().await?;
        let mut command = session.command("sh");
        command.arg("-c").arg(&script).current_dir(state.sandbox_root.display().to_string());
        for (k, v) in &config.env {
            command.env(k, v);
        }
        command
            .spawn()
            .await
            .map_err(|e| remote_err("spawn remote batch", e))?;
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
        let session = self.connect().await?;
        let marker = state.sandbox_root.join(".trac_exit_code");
        let output = session
            .command("cat")
            .arg(marker.display().to_string())
            .output()
            .await
            .map_err(|e| remote_err("poll remote batch status", e))?;
        if output.status.success() {
            let code: i32 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(-1);
            Ok(if code == 0 { BatchStatus::Succeeded } else { BatchStatus::Failed })
        } else {
            Ok(BatchStatus::Running)
        }
    }

    async fn has_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<bool, TracError> {
        self.require_feature(Feature::OutputVolumes)?;
        let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
            TracError::new(ErrorCode::ExecutorValidation, format!("unknown volume '{volume}'"))
        })?;
        let path = crate::normalize_under(vol_path, name)?;
        let session = self.connect().await?;
        let status = session
            .command("test")
            .arg("-f")
            .arg(path.display().to_string())
            .status()
            .await
            .map_err(|e| remote_err("check remote output file", e))?;
        Ok(status.success())
    }

    async fn get_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<Vec<u8>, TracError> {
        self.require_feature(Feature::OutputVolumes)?;
        let (_, vol_path) = state.volumes.get(volume).ok_or_else(|| {
            TracError::new(ErrorCode::ExecutorValidation, format!("unknown volume '{volume}'"))
        })?;
        let path = crate::normalize_under(vol_path, name)?;
        let session = self.connect().await?;
        let output = session
            .command("cat")
            .arg(path.display().to_string())
            .output()
            .await
            .map_err(|e| remote_err("read remote output file", e))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(TracError::new(ErrorCode::NotFound, format!("output file not found: {name}")))
        }
    }

    async fn get_batch_address(&self, _state: &BatchState) -> Result<String, TracError> {
        Err(TracError::new(
            ErrorCode::ExecutorValidation,
            "SshExecutor does not advertise EXPOSE_PORT",
        ))
    }

    async fn cancel_batch(&self, state: &mut BatchState) -> Result<(), TracError> {
        self.require_feature(Feature::Cancellation)?;
        let session = self.connect().await?;
        session
            .command("pkill")
            .arg("-f")
            .arg(state.batch_key.clone())
            .status()
            .await
            .map_err(|e| remote_err("cancel remote batch", e))?;
        state.cancelled = true;
        Ok(())
    }

    async fn delete_batch(&self, state: BatchState, persist: bool) -> Result<(), TracError> {
        if !persist {
            let session = self.connect().await?;
            session
                .command("rm")
                .arg("-rf")
                .arg(state.sandbox_root.display().to_string())
                .status()
                .await
                .map_err(|e| remote_err("remove remote sandbox", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
