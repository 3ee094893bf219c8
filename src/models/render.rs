use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{EmptyPrompt, JobSpec, DEFAULT_DIMENSION};

/// Request body for `POST /api/v1/render`.
#[derive(Debug, Deserialize, Validate)]
pub struct RenderRequest {
    #[garde(length(min = 1, max = 4000))]
    pub prompt: String,

    /// Clamped into the supported envelope, never rejected.
    #[garde(skip)]
    #[serde(default = "default_dimension")]
    pub width: i64,

    #[garde(skip)]
    #[serde(default = "default_dimension")]
    pub height: i64,

    #[garde(skip)]
    pub seed: Option<u64>,
}

fn default_dimension() -> i64 {
    i64::from(DEFAULT_DIMENSION)
}

impl RenderRequest {
    pub fn to_spec(&self) -> Result<JobSpec, EmptyPrompt> {
        let spec = JobSpec::new(self.prompt.clone())?.with_size(self.width, self.height);
        Ok(match self.seed {
            Some(seed) => spec.with_seed(seed),
            None => spec,
        })
    }
}

/// Response after a successful render.
#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub path: String,
    pub filename: String,
    pub prompt_id: String,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: u64,
}

/// Error body returned for every failed render.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub retryable: bool,
}
