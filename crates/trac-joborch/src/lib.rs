// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Job Executor Supervisor (C5): wraps the job cache and batch executor
//! into a durable job lifecycle — submit, poll, and fetch results for a
//! one-shot batch job.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use trac_error::{ErrorCode, TracError};
use trac_executor::{BatchConfig, BatchExecutor, BatchState, BatchStatus, Feature, LaunchArg, VolumeType};
use trac_jobcache::{CacheError, EntryStatus, QueryRow, SharedJobCache, TicketOutcome};
use trac_retry::map_runtime_rpc_error;

/// Lease length requested for every ticket this supervisor opens. Well
/// under [`trac_jobcache::MAX_TICKET_DURATION`], just long enough to cover
/// a single cache mutation plus the round trip to the executor.
const TICKET_DURATION: Duration = Duration::seconds(30);

fn cache_error(err: CacheError) -> TracError {
    match err {
        CacheError::NotFound(key) => TracError::new(ErrorCode::CacheNotFound, format!("no such cache entry: {key}")),
        CacheError::Deleted(key) => TracError::new(ErrorCode::CacheNotFound, format!("cache entry deleted: {key}")),
        CacheError::TicketMismatch(key) => TracError::new(ErrorCode::CacheTicket, format!("ticket mismatch: {key}")),
        CacheError::TicketExpired(key) => TracError::new(ErrorCode::CacheTicket, format!("ticket expired: {key}")),
        CacheError::RevisionMismatch { key, ticket_rev, entry_rev } => TracError::new(
            ErrorCode::CacheTicket,
            format!("revision mismatch for {key}: ticket at {ticket_rev}, entry at {entry_rev}"),
        ),
    }
}

/// Status of a submitted job, mapped from [`BatchStatus`] or the in-batch
/// runtime API's authoritative status (spec §4.5 "Poll status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Running,
    Finishing,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl From<BatchStatus> for JobStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Queued => Self::Submitted,
            BatchStatus::Running => Self::Running,
            BatchStatus::Complete => Self::Finishing,
            BatchStatus::Succeeded => Self::Succeeded,
            BatchStatus::Failed => Self::Failed,
            BatchStatus::Cancelled => Self::Cancelled,
            BatchStatus::Unknown => Self::Unknown,
        }
    }
}

/// Durable supervisor record for a single submitted batch job. Persisted
/// as the cache entry's JSON value, so every field must round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobState {
    pub batch_key: String,
    pub state: BatchState,
    pub runtime_api_enabled: bool,
    pub log_volume: Option<String>,
    pub result_volume: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// The caller-provided shape of a submission request.
#[derive(Debug, Clone)]
pub struct JobHeader {
    pub job_key: String,
    pub job_config: Json,
    pub sys_config: Json,
    pub executable: String,
}

/// Client for the in-batch runtime API, when [`Feature::ExposePort`] is
/// advertised. A real implementation speaks gRPC to `trac-runtime`;
/// callers inject whichever transport they have wired.
#[async_trait]
pub trait RuntimeApiClient: Send + Sync {
    async fn get_status(&self, address: &str) -> Result<JobStatus, (u32, String)>;
    async fn get_result(&self, address: &str) -> Result<Json, (u32, String)>;
}

/// Hand-rolled stand-in for a regex engine: matches
/// `exceptions.(E\w+): (.+)` against the final line of stderr without
/// pulling in a regex dependency for a single anchor-free pattern.
struct ExceptionMatcher;

impl ExceptionMatcher {
    fn captures<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let idx = line.find("exceptions.")?;
        let rest = &line[idx + "exceptions.".len()..];
        let colon = rest.find(": ")?;
        let (exc_name, after) = rest.split_at(colon);
        if exc_name.is_empty() || !exc_name.chars().next()?.eq_ignore_ascii_case(&'e') {
            return None;
        }
        if !exc_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        Some((exc_name, &after[2..]))
    }
}

/// Submits, polls, and retrieves results for one-shot batch jobs.
///
/// Composes the ticketed job cache (C3) with the batch executor (C4):
/// a job's cache entry is the source of truth for "has this key already
/// been submitted", enforced by the cache's single-LIVE-ticket invariant
/// rather than by any lock local to this process.
pub struct JobSupervisor<E: BatchExecutor> {
    executor: E,
    cache: SharedJobCache,
}

impl<E: BatchExecutor> JobSupervisor<E> {
    pub fn new(executor: E, cache: SharedJobCache) -> Self {
        Self { executor, cache }
    }

    /// Looks up a previously submitted job's durable state by batch key,
    /// replacing what used to be a bare in-process registry lookup.
    pub fn lookup(&self, batch_key: &str) -> Result<BatchJobState, TracError> {
        match self.cache.query_key(batch_key, Utc::now()) {
            Some(QueryRow::Ok(entry)) => {
                let value = entry
                    .value
                    .ok_or_else(|| TracError::not_found(format!("no such batch job: {batch_key}")))?;
                serde_json::from_value(value).map_err(|e| {
                    TracError::new(ErrorCode::CacheCorruption, format!("corrupt job cache entry for {batch_key}: {e}"))
                })
            }
            Some(QueryRow::Error(err)) => Err(TracError::new(
                ErrorCode::CacheCorruption,
                format!("corrupt job cache entry for {batch_key}: {}", err.error),
            )),
            None => Err(TracError::not_found(format!("no such batch job: {batch_key}"))),
        }
    }

    /// Submit one-shot (spec §4.5 steps 1-7). Registers the job in the
    /// cache before touching the executor, so two concurrent submissions
    /// for the same key never both proceed: the second sees
    /// [`TicketOutcome::Superseded`] and is rejected outright.
    pub async fn submit_one_shot(&self, header: &JobHeader) -> Result<BatchJobState, TracError> {
        let batch_key = format!("job-{}", header.job_key);
        let now = Utc::now();

        let ticket = match self.cache.open_new_ticket(&batch_key, TICKET_DURATION, now) {
            TicketOutcome::Live(ticket) => ticket,
            TicketOutcome::Superseded | TicketOutcome::Missing => {
                return Err(TracError::new(
                    ErrorCode::CacheDuplicate,
                    format!("job already submitted for key: {batch_key}"),
                ));
            }
        };
        self.cache
            .create_entry(&ticket, EntryStatus::Queued, serde_json::Value::Null, now)
            .map_err(cache_error)?;
        self.cache.close_ticket(&ticket);

        let mut state = match self.executor.create_batch(&batch_key).await {
            Ok(state) => state,
            Err(err) => {
                self.fail_entry(&batch_key).await;
                return Err(err);
            }
        };

        let result = self.configure_and_submit(&mut state, header).await;
        match result {
            Ok(job) => {
                if let Err(err) = self.record_running(&batch_key, &job).await {
                    let _ = self.executor.delete_batch(job.state, false).await;
                    self.fail_entry(&batch_key).await;
                    return Err(err);
                }
                Ok(job)
            }
            Err(err) => {
                let _ = self.executor.delete_batch(state, false).await;
                self.fail_entry(&batch_key).await;
                Err(err)
            }
        }
    }

    async fn record_running(&self, batch_key: &str, job: &BatchJobState) -> Result<(), TracError> {
        let now = Utc::now();
        let ticket = match self.cache.open_ticket(batch_key, 1, TICKET_DURATION, now) {
            TicketOutcome::Live(ticket) => ticket,
            _ => return Err(TracError::new(ErrorCode::CacheTicket, format!("could not re-open ticket for {batch_key}"))),
        };
        let value = serde_json::to_value(job)
            .map_err(|e| TracError::new(ErrorCode::Internal, format!("encode job state: {e}")))?;
        let result = self.cache.update_entry(&ticket, EntryStatus::Running, value, now).map_err(cache_error);
        self.cache.close_ticket(&ticket);
        result.map(|_| ())
    }

    /// Marks a job's cache entry failed and releases its lease, used when
    /// submission fails after the entry has already been created.
    async fn fail_entry(&self, batch_key: &str) {
        let now = Utc::now();
        let Some(QueryRow::Ok(entry)) = self.cache.query_key(batch_key, now) else {
            return;
        };
        let ticket = match self.cache.open_ticket(batch_key, entry.revision, TICKET_DURATION, now) {
            TicketOutcome::Live(ticket) => ticket,
            _ => return,
        };
        let _ = self.cache.delete_entry(&ticket, now);
        self.cache.close_ticket(&ticket);
    }

    /// Removes a job's cache entry entirely, used alongside the executor
    /// side of [`Self::delete_job`].
    async fn purge_cache_entry(&self, batch_key: &str) {
        let now = Utc::now();
        let Some(QueryRow::Ok(entry)) = self.cache.query_key(batch_key, now) else {
            return;
        };
        let ticket = match self.cache.open_ticket(batch_key, entry.revision, TICKET_DURATION, now) {
            TicketOutcome::Live(ticket) => ticket,
            _ => return,
        };
        let _ = self.cache.delete_entry(&ticket, now);
        self.cache.close_ticket(&ticket);
    }

    async fn configure_and_submit(
        &self,
        state: &mut BatchState,
        header: &JobHeader,
    ) -> Result<BatchJobState, TracError> {
        self.executor.add_volume(state, "config", VolumeType::Config).await?;
        self.executor.add_volume(state, "scratch", VolumeType::Scratch).await?;

        let runtime_api_enabled = self.executor.has_feature(Feature::ExposePort);
        let has_output = self.executor.has_feature(Feature::OutputVolumes);
        let log_volume = if has_output {
            self.executor.add_volume(state, "logs", VolumeType::Output).await?;
            Some("logs".to_string())
        } else {
            None
        };
        let result_volume = if has_output {
            self.executor.add_volume(state, "output", VolumeType::Output).await?;
            Some("output".to_string())
        } else {
            None
        };

        let job_config_bytes = serde_json::to_vec_pretty(&header.job_config)
            .map_err(|e| TracError::new(ErrorCode::Validation, format!("encode job config: {e}")))?;
        let sys_config_bytes = serde_json::to_vec_pretty(&header.sys_config)
            .map_err(|e| TracError::new(ErrorCode::Validation, format!("encode sys config: {e}")))?;
        self.executor
            .add_file(state, "config", "job_config.json", &job_config_bytes)
            .await?;
        self.executor
            .add_file(state, "config", "sys_config.json", &sys_config_bytes)
            .await?;

        let mut args = vec![
            LaunchArg::String("--sys-config".into()),
            LaunchArg::Path {
                volume: "config".into(),
                relative_path: "sys_config.json".into(),
            },
            LaunchArg::String("--job-config".into()),
            LaunchArg::Path {
                volume: "config".into(),
                relative_path: "job_config.json".into(),
            },
            LaunchArg::String("--scratch-dir".into()),
            LaunchArg::Path {
                volume: "scratch".into(),
                relative_path: ".".into(),
            },
        ];
        if let Some(result_vol) = &result_volume {
            args.push(LaunchArg::String("--result-dir".into()));
            args.push(LaunchArg::Path {
                volume: result_vol.clone(),
                relative_path: ".".into(),
            });
        }
        if let Some(log_vol) = &log_volume {
            args.push(LaunchArg::String("--log-dir".into()));
            args.push(LaunchArg::Path {
                volume: log_vol.clone(),
                relative_path: ".".into(),
            });
        }

        let config = BatchConfig {
            executable: header.executable.clone(),
            args,
            env: Default::default(),
            stdout_to: log_volume.clone().map(|v| (v.clone(), "stdout".to_string())),
            stderr_to: log_volume.clone().map(|v| (v.clone(), "stderr".to_string())),
        };
        self.executor.submit_batch(state, &config).await?;

        Ok(BatchJobState {
            batch_key: state.batch_key.clone(),
            state: state.clone(),
            runtime_api_enabled,
            log_volume,
            result_volume,
            submitted_at: Utc::now(),
        })
    }

    /// Poll status (spec §4.5). `client` supplies the in-batch runtime RPC
    /// when `runtime_api_enabled` is set; pass `None` to always fall back
    /// to the batch-status mapping.
    pub async fn poll_status(
        &self,
        job: &BatchJobState,
        client: Option<&dyn RuntimeApiClient>,
    ) -> Result<JobStatus, TracError> {
        let batch_status = self.executor.get_batch_status(&job.state).await?;

        if job.runtime_api_enabled && batch_status == BatchStatus::Running {
            if let Some(client) = client {
                let address = self.executor.get_batch_address(&job.state).await?;
                return client
                    .get_status(&address)
                    .await
                    .map_err(|(code, msg)| map_runtime_rpc_error(code, msg));
            }
        }

        let job_status = JobStatus::from(batch_status);
        if job_status == JobStatus::Failed {
            if let Some(log_volume) = &job.log_volume {
                if let Ok(stderr) = self.executor.get_output_file(&job.state, log_volume, "stderr").await {
                    let text = String::from_utf8_lossy(&stderr);
                    let last_line = text.lines().last().unwrap_or_default();
                    if let Some((exc, msg)) = ExceptionMatcher.captures(last_line) {
                        return Err(TracError::new(ErrorCode::ExecutorFailure, msg.to_string())
                            .with_context("exception", exc)
                            .with_context("stderr", text.to_string()));
                    }
                    return Err(TracError::new(ErrorCode::ExecutorFailure, "batch exited with a non-zero code")
                        .with_context("stderr", text.to_string()));
                }
            }
            return Err(TracError::new(ErrorCode::ExecutorFailure, "batch failed"));
        }

        Ok(job_status)
    }

    /// Get result (spec §4.5).
    pub async fn get_result(
        &self,
        job: &BatchJobState,
        client: Option<&dyn RuntimeApiClient>,
    ) -> Result<Json, TracError> {
        let batch_status = self.executor.get_batch_status(&job.state).await?;

        if job.runtime_api_enabled && batch_status == BatchStatus::Running {
            if let Some(client) = client {
                let address = self.executor.get_batch_address(&job.state).await?;
                return client
                    .get_result(&address)
                    .await
                    .map_err(|(code, msg)| map_runtime_rpc_error(code, msg));
            }
        }

        if matches!(batch_status, BatchStatus::Complete | BatchStatus::Succeeded) {
            let Some(result_volume) = &job.result_volume else {
                return Err(TracError::new(
                    ErrorCode::ExecutorValidation,
                    "executor does not advertise OUTPUT_VOLUMES",
                ));
            };
            let filename = format!("job_result_{}.json", job.batch_key);
            let bytes = self.executor.get_output_file(&job.state, result_volume, &filename).await?;
            return serde_json::from_slice(&bytes).map_err(|e| {
                TracError::new(ErrorCode::ExecutorFailure, format!("result file did not parse as JSON: {e}"))
            });
        }

        Err(TracError::new(
            ErrorCode::ExecutorValidation,
            format!("no result available in batch status {batch_status:?}"),
        ))
    }

    /// Release the executor-side state once the caller is done with a job,
    /// and purge its cache entry.
    pub async fn delete_job(&self, job: BatchJobState, persist: bool) -> Result<(), TracError> {
        let batch_key = job.batch_key.clone();
        self.executor.delete_batch(job.state, persist).await?;
        self.purge_cache_entry(&batch_key).await;
        Ok(())
    }
}
