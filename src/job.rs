//! Submit-and-poll protocol for asynchronous jobs.
//!
//! Each iteration sleeps the interval and then reads the job's status once.
//! Failures are handled by class:
//!
//! - transport failures are retried while they stay consecutive, up to
//!   [`PollConfig::max_consecutive_network_failures`]; any successful read
//!   resets the count
//! - every other error propagates at once
//! - FAILED and CANCELLED end the run with the remote detail
//! - running out of attempts is a [`PipelineError::Timeout`]

use crate::backend::JobBackend;
use crate::error::Result;
use crate::types::{JobInput, JobRecord, JobStatus};
use crate::PipelineError;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll loop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep before every status read.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Consecutive transport failures tolerated before giving up.
    pub max_consecutive_network_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_attempts: 40,
            max_consecutive_network_failures: 3,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_consecutive_network_failures(mut self, max: u32) -> Self {
        self.max_consecutive_network_failures = max;
        self
    }

    /// Nominal wall-clock budget: `max_attempts * interval`, in seconds.
    pub fn budget_secs(&self) -> f64 {
        self.interval.as_secs_f64() * self.max_attempts as f64
    }
}

/// What one poll attempt observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollUpdate {
    Status(JobStatus),
    /// The read failed in transport and will be retried.
    NetworkRetry,
}

impl fmt::Display for PollUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollUpdate::Status(status) => status.fmt(f),
            PollUpdate::NetworkRetry => f.write_str("NETWORK_RETRY"),
        }
    }
}

/// Submit `input` and poll until the job reaches a terminal status.
///
/// `on_poll(update, attempt)` is called once per attempt that does not end
/// the loop with an error, with a 1-based attempt number. Returns the
/// COMPLETED record.
pub async fn submit_and_poll<F>(
    backend: &dyn JobBackend,
    input: &JobInput,
    config: PollConfig,
    mut on_poll: F,
) -> Result<JobRecord>
where
    F: FnMut(PollUpdate, u32) + Send,
{
    let job_id = backend.submit(input).await?;
    info!(backend = backend.name(), job_id = %job_id, "Job submitted");

    let mut network_failures = 0u32;
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.interval).await;

        let record = match backend.status(&job_id).await {
            Ok(record) => record,
            Err(e) if e.is_transient() => {
                network_failures += 1;
                if network_failures >= config.max_consecutive_network_failures {
                    warn!(job_id = %job_id, attempt, "Giving up after {} consecutive network failures", network_failures);
                    return Err(e);
                }
                warn!(job_id = %job_id, attempt, error = %e, "Status read failed; retrying");
                on_poll(PollUpdate::NetworkRetry, attempt);
                continue;
            }
            Err(e) => return Err(e),
        };

        network_failures = 0;
        debug!(job_id = %job_id, attempt, status = %record.status, "Polled job status");
        on_poll(PollUpdate::Status(record.status), attempt);

        match record.status {
            JobStatus::Completed => return Ok(record),
            JobStatus::Failed | JobStatus::Cancelled => {
                return Err(PipelineError::JobFailed {
                    service: backend.name(),
                    status: record.status,
                    detail: record
                        .error_detail()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
            JobStatus::InQueue | JobStatus::InProgress | JobStatus::Unknown => {}
        }
    }

    Err(PipelineError::Timeout {
        service: backend.name(),
        elapsed_secs: config.budget_secs(),
    })
}
