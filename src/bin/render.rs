use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use imagegen_orchestrator::{
    config::AppConfig,
    models::job::{JobSpec, DEFAULT_DIMENSION},
    services::{
        cancel::CancelToken,
        comfy::{ComfyClient, RenderService},
        orchestrator::Orchestrator,
        template::JobTemplate,
    },
};

/// Render one image on the configured rendering service and print its path.
#[derive(Debug, Parser)]
#[command(name = "render", version)]
struct Args {
    /// Text prompt describing the image
    #[arg(long, env = "RENDER_PROMPT")]
    prompt: String,

    /// Width in pixels, clamped to 512..=2048
    #[arg(long, env = "RENDER_WIDTH", default_value_t = i64::from(DEFAULT_DIMENSION), allow_negative_numbers = true)]
    width: i64,

    /// Height in pixels, clamped to 512..=2048
    #[arg(long, env = "RENDER_HEIGHT", default_value_t = i64::from(DEFAULT_DIMENSION), allow_negative_numbers = true)]
    height: i64,

    /// Fixed sampler seed; random when omitted
    #[arg(long, env = "RENDER_SEED")]
    seed: Option<u64>,

    /// Overall deadline in seconds
    #[arg(long, env = "RENDER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let spec = match JobSpec::new(args.prompt) {
        Ok(spec) => spec.with_size(args.width, args.height),
        Err(e) => {
            eprintln!("invalid_spec: {e}");
            return ExitCode::from(2);
        }
    };
    let spec = match args.seed {
        Some(seed) => spec.with_seed(seed),
        None => spec,
    };

    let template = JobTemplate::load(&config.workflow_path).expect("Failed to load job template");
    let service: Arc<dyn RenderService> = Arc::new(
        ComfyClient::new(
            &config.comfyui_url,
            config.connect_timeout(),
            config.request_timeout(),
        )
        .expect("Failed to initialize rendering service client"),
    );
    let orchestrator = Orchestrator::new(service, template, config.orchestrator_config());

    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.render_timeout());
    let cancel = CancelToken::with_timeout(timeout);

    // Ctrl-C abandons the wait; the slot and any partial file are cleaned up.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling render");
                cancel.cancel();
            }
        });
    }

    match orchestrator.render_image(&cancel, &spec).await {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}
