use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::app_state::AppState;

/// Upper bound on one reachability check, independent of the render client timeout.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub rendering_service: ComponentHealth,
    pub admission_gate: GateHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct GateHealth {
    pub capacity: usize,
    pub available: usize,
}

/// GET /health - rendering service reachability and admission gate usage.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let service_check = match tokio::time::timeout(PING_TIMEOUT, state.service.ping()).await {
        Ok(Ok(())) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Rendering service health check failed");
            ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
        Err(_) => {
            tracing::warn!(timeout_ms = PING_TIMEOUT.as_millis() as u64, "Rendering service health check timed out");
            ComponentHealth {
                status: "timeout".to_string(),
                latency_ms: None,
            }
        }
    };

    let gate = state.orchestrator.gate();
    let healthy = service_check.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            rendering_service: service_check,
            admission_gate: GateHealth {
                capacity: gate.capacity(),
                available: gate.available(),
            },
        },
    };

    (status_code, Json(response))
}
