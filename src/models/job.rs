use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest width or height the rendering service supports.
pub const MIN_DIMENSION: u32 = 512;
/// Largest width or height the rendering service supports.
pub const MAX_DIMENSION: u32 = 2048;
/// Width and height used when the caller does not supply one.
pub const DEFAULT_DIMENSION: u32 = 1024;

/// Clamp a caller-supplied dimension into the supported envelope.
pub fn clamp_dimension(value: i64) -> u32 {
    value.clamp(i64::from(MIN_DIMENSION), i64::from(MAX_DIMENSION)) as u32
}

/// Caller input for one render. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    prompt: String,
    width: u32,
    height: u32,
    seed: Option<u64>,
}

impl JobSpec {
    /// Build a spec at the default 1024x1024 size. Rejects blank prompts.
    pub fn new(prompt: impl Into<String>) -> Result<Self, EmptyPrompt> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(EmptyPrompt);
        }
        Ok(Self {
            prompt,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            seed: None,
        })
    }

    /// Set the requested size; out-of-range values are clamped, not rejected.
    pub fn with_size(mut self, width: i64, height: i64) -> Self {
        self.width = clamp_dimension(width);
        self.height = clamp_dimension(height);
        self
    }

    /// Pin the sampler seed instead of drawing a random one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("prompt must not be empty")]
pub struct EmptyPrompt;

/// A job accepted by the rendering service.
///
/// Deliberately not `Clone`: polling consumes the handle so a job id is
/// never polled twice.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Classification of a single history lookup, and of a finished poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded { artifact_name: String },
    FailedNoArtifact,
    TimedOut,
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Pending)
    }
}

/// Artifact bytes together with the name the service assigned them.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A finished render, returned from the orchestrator's `Done` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedImage {
    pub path: PathBuf,
    pub filename: String,
    pub prompt_id: String,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: u64,
}
