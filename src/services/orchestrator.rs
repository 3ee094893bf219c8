//! Composition root for one render: admit, submit, poll, fetch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::OrchestratorConfig;
use crate::models::job::{EmptyPrompt, JobOutcome, JobSpec, RenderedImage};
use crate::services::artifact_store::{ArtifactStore, StoreError};
use crate::services::cancel::CancelToken;
use crate::services::comfy::RenderService;
use crate::services::gate::{AdmissionError, AdmissionGate};
use crate::services::job_client::{JobClient, PollError, PollPolicy, SubmitError};
use crate::services::template::{random_seed, JobTemplate, TemplateError};

/// Where a render call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RenderStage {
    Idle,
    Admitted,
    Submitted,
    Polling,
    Fetching,
    Done,
}

/// Caller-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    InvalidSpec,
    AdmissionCancelled,
    FieldNotFound,
    SubmissionFailed,
    PollCancelled,
    FailedNoArtifact,
    TimedOut,
    DownloadFailed,
    Internal,
}

impl FailureKind {
    /// Whether trying again later (possibly with another prompt) can help.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::AdmissionCancelled
                | FailureKind::SubmissionFailed
                | FailureKind::FailedNoArtifact
                | FailureKind::TimedOut
                | FailureKind::DownloadFailed
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid render request: {0}")]
    InvalidSpec(#[from] EmptyPrompt),

    #[error("Cancelled before the job reached the rendering service")]
    AdmissionCancelled,

    #[error("Job template is incompatible with this service: {0}")]
    Template(#[source] TemplateError),

    #[error("Failed to submit job: {0}")]
    SubmissionFailed(#[source] SubmitError),

    #[error("Cancelled while job {job_id} was running; it was left on the service")]
    PollCancelled { job_id: String },

    #[error("Job {job_id} finished without producing an image")]
    FailedNoArtifact { job_id: String },

    #[error("Job {job_id} did not finish within {attempts} polls")]
    TimedOut { job_id: String, attempts: u32 },

    #[error("Failed to fetch artifact {artifact}: {source}")]
    Fetch {
        artifact: String,
        #[source]
        source: StoreError,
    },
}

impl RenderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::InvalidSpec(_) => FailureKind::InvalidSpec,
            RenderError::AdmissionCancelled => FailureKind::AdmissionCancelled,
            RenderError::Template(TemplateError::FieldNotFound(_)) => FailureKind::FieldNotFound,
            RenderError::Template(_) => FailureKind::Internal,
            RenderError::SubmissionFailed(SubmitError::Cancelled) => FailureKind::AdmissionCancelled,
            RenderError::SubmissionFailed(_) => FailureKind::SubmissionFailed,
            RenderError::PollCancelled { .. } => FailureKind::PollCancelled,
            RenderError::FailedNoArtifact { .. } => FailureKind::FailedNoArtifact,
            RenderError::TimedOut { .. } => FailureKind::TimedOut,
            RenderError::Fetch {
                source: StoreError::Download(_) | StoreError::UnsafeName(_),
                ..
            } => FailureKind::DownloadFailed,
            RenderError::Fetch {
                source: StoreError::Cancelled,
                ..
            } => FailureKind::PollCancelled,
            RenderError::Fetch { .. } => FailureKind::Internal,
        }
    }
}

/// Runs renders against one rendering service, at most `N` at a time.
pub struct Orchestrator {
    template: JobTemplate,
    gate: AdmissionGate,
    jobs: JobClient,
    store: ArtifactStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn RenderService>,
        template: JobTemplate,
        config: OrchestratorConfig,
    ) -> Self {
        let policy = PollPolicy {
            interval: config.poll_interval,
            max_attempts: config.poll_max_attempts,
        };
        Self {
            template,
            gate: AdmissionGate::new(config.max_concurrent_jobs),
            jobs: JobClient::new(service.clone(), policy),
            store: ArtifactStore::new(service, config.output_dir.clone()),
            config,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Render one image and return the local path it was saved to.
    pub async fn render_image(&self, cancel: &CancelToken, spec: &JobSpec) -> Result<PathBuf, RenderError> {
        self.render(cancel, spec).await.map(|image| image.path)
    }

    /// Like [`Orchestrator::render_image`], also reporting seed, size and job id.
    pub async fn render(&self, cancel: &CancelToken, spec: &JobSpec) -> Result<RenderedImage, RenderError> {
        let started = Instant::now();
        metrics::counter!("render_jobs_total").increment(1);

        let result = self.run(cancel, spec, started).await;
        match &result {
            Ok(image) => {
                metrics::counter!("render_jobs_completed").increment(1);
                metrics::histogram!("render_duration_seconds").record(started.elapsed().as_secs_f64());
                tracing::info!(
                    prompt_id = %image.prompt_id,
                    path = %image.path.display(),
                    elapsed_ms = image.elapsed_ms,
                    "Render complete"
                );
            }
            Err(e) => {
                let kind: &'static str = e.kind().into();
                metrics::counter!("render_jobs_failed", "kind" => kind).increment(1);
                tracing::error!(kind, error = %e, "Render failed");
            }
        }
        result
    }

    async fn run(&self, cancel: &CancelToken, spec: &JobSpec, started: Instant) -> Result<RenderedImage, RenderError> {
        let mut stage = RenderStage::Idle;
        tracing::info!(
            stage = %stage,
            prompt = %preview(spec.prompt()),
            width = spec.width(),
            height = spec.height(),
            "Render requested"
        );

        // Build the payload before taking a slot: template errors never reach the service.
        let seed = spec.seed().unwrap_or_else(random_seed);
        let payload = self.build_payload(spec, seed).map_err(RenderError::Template)?;

        let _permit = self
            .gate
            .acquire(cancel)
            .await
            .map_err(|e| match e {
                AdmissionError::Cancelled | AdmissionError::Closed => RenderError::AdmissionCancelled,
            })?;
        stage = advance(stage, RenderStage::Admitted);

        let handle = self
            .jobs
            .submit(cancel, &payload)
            .await
            .map_err(RenderError::SubmissionFailed)?;
        let job_id = handle.job_id.clone();
        stage = advance(stage, RenderStage::Submitted);

        stage = advance(stage, RenderStage::Polling);
        let outcome = self
            .jobs
            .poll_until_done(cancel, handle)
            .await
            .map_err(|PollError::Cancelled { job_id }| RenderError::PollCancelled { job_id })?;

        let artifact = match outcome {
            JobOutcome::Succeeded { artifact_name } => artifact_name,
            JobOutcome::FailedNoArtifact => return Err(RenderError::FailedNoArtifact { job_id }),
            JobOutcome::TimedOut | JobOutcome::Pending => {
                return Err(RenderError::TimedOut {
                    job_id,
                    attempts: self.config.poll_max_attempts,
                })
            }
        };

        stage = advance(stage, RenderStage::Fetching);
        let path = self
            .store
            .fetch_and_save(cancel, &artifact)
            .await
            .map_err(|source| RenderError::Fetch {
                artifact: artifact.clone(),
                source,
            })?;
        advance(stage, RenderStage::Done);

        Ok(RenderedImage {
            path,
            filename: artifact,
            prompt_id: job_id,
            seed,
            width: spec.width(),
            height: spec.height(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn build_payload(&self, spec: &JobSpec, seed: u64) -> Result<Vec<u8>, TemplateError> {
        let mut job = self.template.clone_job();
        job.set_text(&self.config.prompt_field, spec.prompt())?;
        job.set_seed(&self.config.seed_field, seed)?;
        if let Some(size_field) = &self.config.size_field {
            job.set_size(size_field, i64::from(spec.width()), i64::from(spec.height()))?;
        }
        job.serialize()
    }
}

fn advance(from: RenderStage, to: RenderStage) -> RenderStage {
    tracing::debug!(from = %from, to = %to, "Render stage");
    to
}

fn preview(prompt: &str) -> String {
    prompt.chars().take(50).collect()
}
