// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Polymorphic batch executor driver over local process, SSH, and
//! container launchers. Every operation takes `(batchKey, state)` and
//! returns the updated state; callers must check [`BatchExecutor::has_feature`]
//! before invoking a feature-gated operation.

mod container;
mod local;
mod ssh;

pub use container::ContainerExecutor;
pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use trac_error::{ErrorCode, TracError};

/// Capability flags a concrete executor advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    OutputVolumes,
    ExposePort,
    StorageMapping,
    Cancellation,
}

/// Kind of sandbox sub-directory created by `addVolume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    Config,
    Scratch,
    Output,
}

/// A single launch argument, decoded per spec §4.4: a `PATH` arg resolves
/// relative to the sandbox root through an existing volume; a `STRING` arg
/// passes through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchArg {
    String(String),
    Path { volume: String, relative_path: String },
}

/// Configuration for `submitBatch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    pub executable: String,
    pub args: Vec<LaunchArg>,
    pub env: BTreeMap<String, String>,
    pub stdout_to: Option<(String, String)>,
    pub stderr_to: Option<(String, String)>,
}

/// Process/runtime status reported by `getBatchStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Complete,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

/// Opaque, serializable batch state. Executors treat this as a snapshot
/// they consume and return an updated copy of from each operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_key: String,
    pub sandbox_root: PathBuf,
    pub volumes: BTreeMap<String, (VolumeType, PathBuf)>,
    pub running: bool,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub address: Option<String>,
    pub cancelled: bool,
}

impl BatchState {
    #[must_use]
    pub fn new(batch_key: impl Into<String>, sandbox_root: PathBuf) -> Self {
        Self {
            batch_key: batch_key.into(),
            sandbox_root,
            volumes: BTreeMap::new(),
            running: false,
            pid: None,
            exit_code: None,
            address: None,
            cancelled: false,
        }
    }

    /// Resolve a [`LaunchArg`] to its final command-line form, per spec
    /// §4.4's launch-argument decoding: path arguments are resolved
    /// relative to the sandbox root and normalized; the referenced volume
    /// must exist.
    pub fn resolve_arg(&self, arg: &LaunchArg) -> Result<String, TracError> {
        match arg {
            LaunchArg::String(s) => Ok(s.clone()),
            LaunchArg::Path { volume, relative_path } => {
                let (_, vol_path) = self.volumes.get(volume).ok_or_else(|| {
                    TracError::new(
                        ErrorCode::ExecutorValidation,
                        format!("launch arg references unknown volume '{volume}'"),
                    )
                })?;
                let resolved = normalize_under(vol_path, relative_path)?;
                Ok(resolved.display().to_string())
            }
        }
    }
}

/// Join `relative` onto `root`, rejecting any path that escapes `root`
/// (e.g. via `..`) — the sandbox boundary every launch-arg path must
/// respect.
pub fn normalize_under(root: &Path, relative: &str) -> Result<PathBuf, TracError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            std::path::Component::Normal(part) => resolved.push(part),
            std::path::Component::CurDir => {}
            _ => {
                return Err(TracError::new(
                    ErrorCode::ExecutorValidation,
                    format!("launch arg path escapes its volume: {relative}"),
                ))
            }
        }
    }
    Ok(resolved)
}

/// Polymorphic interface over concrete batch launchers.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    fn features(&self) -> &'static [Feature];

    #[must_use]
    fn has_feature(&self, feature: Feature) -> bool {
        self.features().contains(&feature)
    }

    fn require_feature(&self, feature: Feature) -> Result<(), TracError> {
        if self.has_feature(feature) {
            Ok(())
        } else {
            Err(TracError::new(
                ErrorCode::ExecutorValidation,
                format!("executor does not advertise feature {feature:?}"),
            ))
        }
    }

    /// Allocate a working directory with a controlled mode and owner.
    async fn create_batch(&self, batch_key: &str) -> Result<BatchState, TracError>;

    /// Create a sub-directory for the named volume.
    async fn add_volume(
        &self,
        state: &mut BatchState,
        name: &str,
        volume_type: VolumeType,
    ) -> Result<(), TracError>;

    /// Write a file into a volume. Valid only before the batch is running.
    async fn add_file(
        &self,
        state: &BatchState,
        volume: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), TracError>;

    /// Decode launch arguments and spawn the process.
    async fn submit_batch(&self, state: &mut BatchState, config: &BatchConfig) -> Result<(), TracError>;

    /// Current lifecycle status of the batch.
    async fn get_batch_status(&self, state: &BatchState) -> Result<BatchStatus, TracError>;

    /// Gated on [`Feature::OutputVolumes`].
    async fn has_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<bool, TracError>;

    /// Gated on [`Feature::OutputVolumes`].
    async fn get_output_file(&self, state: &BatchState, volume: &str, name: &str) -> Result<Vec<u8>, TracError>;

    /// Gated on [`Feature::ExposePort`].
    async fn get_batch_address(&self, state: &BatchState) -> Result<String, TracError>;

    /// Gated on [`Feature::Cancellation`].
    async fn cancel_batch(&self, state: &mut BatchState) -> Result<(), TracError>;

    /// Terminate if still alive, then optionally remove the sandbox.
    async fn delete_batch(&self, state: BatchState, persist: bool) -> Result<(), TracError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_arg_resolves_under_volume_root() {
        let mut state = BatchState::new("b1", PathBuf::from("/sandbox/b1"));
        state.volumes.insert(
            "config".to_string(),
            (VolumeType::Config, PathBuf::from("/sandbox/b1/config")),
        );
        let resolved = state
            .resolve_arg(&LaunchArg::Path {
                volume: "config".into(),
                relative_path: "job_config.json".into(),
            })
            .unwrap();
        assert_eq!(resolved, "/sandbox/b1/config/job_config.json");
    }

    #[test]
    fn path_arg_rejects_escape() {
        let root = PathBuf::from("/sandbox/b1/config");
        assert!(normalize_under(&root, "../../etc/passwd").is_err());
    }

    #[test]
    fn string_arg_passes_through() {
        let state = BatchState::new("b1", PathBuf::from("/sandbox/b1"));
        let resolved = state.resolve_arg(&LaunchArg::String("--verbose".into())).unwrap();
        assert_eq!(resolved, "--verbose");
    }

    struct FakeExecutor;

    #[async_trait]
    impl BatchExecutor for FakeExecutor {
        fn features(&self) -> &'static [Feature] {
            &[Feature::OutputVolumes]
        }
        async fn create_batch(&self, batch_key: &str) -> Result<BatchState, TracError> {
            Ok(BatchState::new(batch_key, PathBuf::from("/tmp")))
        }
        async fn add_volume(&self, _: &mut BatchState, _: &str, _: VolumeType) -> Result<(), TracError> {
            Ok(())
        }
        async fn add_file(&self, _: &BatchState, _: &str, _: &str, _: &[u8]) -> Result<(), TracError> {
            Ok(())
        }
        async fn submit_batch(&self, _: &mut BatchState, _: &BatchConfig) -> Result<(), TracError> {
            Ok(())
        }
        async fn get_batch_status(&self, _: &BatchState) -> Result<BatchStatus, TracError> {
            Ok(BatchStatus::Running)
        }
        async fn has_output_file(&self, _: &BatchState, _: &str, _: &str) -> Result<bool, TracError> {
            Ok(false)
        }
        async fn get_output_file(&self, _: &BatchState, _: &str, _: &str) -> Result<Vec<u8>, TracError> {
            Ok(vec![])
        }
        async fn get_batch_address(&self, _: &BatchState) -> Result<String, TracError> {
            Ok("127.0.0.1:0".into())
        }
        async fn cancel_batch(&self, _: &mut BatchState) -> Result<(), TracError> {
            Ok(())
        }
        async fn delete_batch(&self, _: BatchState, _: bool) -> Result<(), TracError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn require_feature_rejects_ungated_call() {
        let exec = FakeExecutor;
        assert!(exec.require_feature(Feature::OutputVolumes).is_ok());
        let err = exec.require_feature(Feature::Cancellation).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutorValidation);
    }
}
