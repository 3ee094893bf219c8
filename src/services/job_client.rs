use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::job::{JobHandle, JobOutcome};
use crate::services::cancel::CancelToken;
use crate::services::comfy::{HistoryEntry, RenderService, ServiceError};

/// Bounded polling budget.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 180,
        }
    }
}

/// Submit and poll half of the job protocol.
#[derive(Clone)]
pub struct JobClient {
    service: Arc<dyn RenderService>,
    policy: PollPolicy,
}

impl JobClient {
    pub fn new(service: Arc<dyn RenderService>, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Create exactly one remote job. Never retried here: a resubmission
    /// would create a second job on the service.
    pub async fn submit(&self, cancel: &CancelToken, payload: &[u8]) -> Result<JobHandle, SubmitError> {
        if cancel.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }
        let job_id = self.service.submit(payload).await?;
        tracing::info!(prompt_id = %job_id, "Job queued on rendering service");
        Ok(JobHandle::new(job_id))
    }

    /// Poll until the job reaches a terminal state or the budget runs out.
    ///
    /// A failed status call only costs its attempt. Cancellation leaves the
    /// remote job running; the service offers no way to stop it.
    pub async fn poll_until_done(
        &self,
        cancel: &CancelToken,
        handle: JobHandle,
    ) -> Result<JobOutcome, PollError> {
        let started = Instant::now();
        let job_id = handle.job_id;

        for attempt in 1..=self.policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { job_id: job_id.clone() }),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { job_id: job_id.clone() }),
                lookup = self.service.history(&job_id) => lookup,
            };

            let outcome = match lookup {
                Ok(entry) => classify(entry.as_ref()),
                Err(e) => {
                    tracing::warn!(
                        prompt_id = %job_id,
                        attempt,
                        error = %e,
                        "History lookup failed, counting as pending"
                    );
                    JobOutcome::Pending
                }
            };

            if outcome.is_terminal() {
                metrics::histogram!("render_poll_attempts").record(f64::from(attempt));
                tracing::info!(
                    prompt_id = %job_id,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    outcome = ?outcome,
                    "Job reached terminal state"
                );
                return Ok(outcome);
            }

            if attempt % 10 == 0 {
                tracing::debug!(
                    prompt_id = %job_id,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    "Still waiting for job"
                );
            }
        }

        metrics::histogram!("render_poll_attempts").record(f64::from(self.policy.max_attempts));
        tracing::warn!(
            prompt_id = %job_id,
            attempts = self.policy.max_attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job did not finish within the polling budget"
        );
        Ok(JobOutcome::TimedOut)
    }
}

/// Map one history lookup to an outcome.
///
/// A record with at least one image picks the first image of the first
/// node, in the order the service listed its nodes. A record without any
/// image is final.
pub fn classify(entry: Option<&HistoryEntry>) -> JobOutcome {
    let Some(entry) = entry else {
        return JobOutcome::Pending;
    };

    entry
        .outputs
        .iter()
        .find_map(|(node_id, output)| {
            let image = output.images.iter().find(|image| !image.filename.is_empty())?;
            tracing::debug!(node_id = %node_id, filename = %image.filename, "Found artifact");
            Some(JobOutcome::Succeeded {
                artifact_name: image.filename.clone(),
            })
        })
        .unwrap_or(JobOutcome::FailedNoArtifact)
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Cancelled before the job was submitted")]
    Cancelled,

    #[error("Job submission failed: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Cancelled while polling job {job_id}; the job may still be running")]
    Cancelled { job_id: String },
}
