use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use imagegen_orchestrator::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        comfy::{ComfyClient, RenderService},
        orchestrator::Orchestrator,
        template::JobTemplate,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing imagegen-orchestrator server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("render_jobs_total", "Total render requests received");
    metrics::describe_counter!("render_jobs_completed", "Render requests that produced a file");
    metrics::describe_counter!("render_jobs_failed", "Render requests that failed, by kind");
    metrics::describe_histogram!(
        "render_duration_seconds",
        "Time from request to saved artifact"
    );
    metrics::describe_histogram!(
        "render_admission_wait_seconds",
        "Time spent waiting for an admission slot"
    );
    metrics::describe_histogram!(
        "render_poll_attempts",
        "History polls used per finished job"
    );
    metrics::describe_gauge!(
        "render_gate_available_slots",
        "Free admission slots for the rendering service"
    );

    tracing::info!(path = %config.workflow_path.display(), "Loading job template");
    let template = JobTemplate::load(&config.workflow_path).expect("Failed to load job template");

    tracing::info!(url = %config.comfyui_url, "Initializing rendering service client");
    let comfy = ComfyClient::new(
        &config.comfyui_url,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .expect("Failed to initialize rendering service client");
    let service: Arc<dyn RenderService> = Arc::new(comfy);

    let orchestrator_config = config.orchestrator_config();
    tracing::info!(
        slots = orchestrator_config.max_concurrent_jobs,
        poll_attempts = orchestrator_config.poll_max_attempts,
        output_dir = %orchestrator_config.output_dir.display(),
        "Initializing orchestrator"
    );
    let orchestrator = Orchestrator::new(service.clone(), template, orchestrator_config);

    let state = AppState::new(orchestrator, service, config.render_timeout());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/render", post(routes::render::render_image))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting imagegen-orchestrator on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
