use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:9999"). Unused by the CLI.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the ComfyUI rendering service
    #[serde(default = "default_comfyui_url")]
    pub comfyui_url: String,

    /// TCP connect timeout for every call to the rendering service
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Overall timeout for a single call to the rendering service
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Sleep between two history polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of history polls before a job is declared timed out
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Admission gate capacity (jobs in flight against the service)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Deadline for one caller request, admission wait included
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    /// Directory downloaded artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Job template in the service's API graph format
    #[serde(default = "default_workflow_path")]
    pub workflow_path: PathBuf,

    /// Template path of the positive prompt text
    #[serde(default = "default_prompt_field")]
    pub prompt_field: String,

    /// Template path of the sampler seed
    #[serde(default = "default_seed_field")]
    pub seed_field: String,

    /// Template path of the object holding `width` and `height`.
    /// Empty disables the size override.
    #[serde(default = "default_size_field")]
    pub size_field: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9999".to_string()
}

fn default_comfyui_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_max_attempts() -> u32 {
    180
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_render_timeout_secs() -> u64 {
    600
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs/images")
}

fn default_workflow_path() -> PathBuf {
    PathBuf::from("workflows/text_to_image.json")
}

fn default_prompt_field() -> String {
    "45.inputs.text".to_string()
}

fn default_seed_field() -> String {
    "44.inputs.seed".to_string()
}

fn default_size_field() -> String {
    "41.inputs".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// Explicit configuration value handed to the orchestrator.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_max_attempts: self.poll_max_attempts.max(1),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            output_dir: self.output_dir.clone(),
            prompt_field: self.prompt_field.clone(),
            seed_field: self.seed_field.clone(),
            size_field: (!self.size_field.trim().is_empty()).then(|| self.size_field.clone()),
        }
    }
}

/// Tuning and template injection points for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub max_concurrent_jobs: usize,
    pub output_dir: PathBuf,
    pub prompt_field: String,
    pub seed_field: String,
    pub size_field: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            poll_max_attempts: default_poll_max_attempts(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            output_dir: default_output_dir(),
            prompt_field: default_prompt_field(),
            seed_field: default_seed_field(),
            size_field: Some(default_size_field()),
        }
    }
}
