use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::render::{ErrorResponse, RenderRequest, RenderResponse};
use crate::services::cancel::CancelToken;
use crate::services::orchestrator::{FailureKind, RenderError};

type RenderFailure = (StatusCode, Json<ErrorResponse>);

/// POST /api/v1/render - Render one image and wait for it.
pub async fn render_image(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<RenderResponse>, RenderFailure> {
    if let Err(report) = request.validate() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            report.to_string(),
            FailureKind::InvalidSpec,
        ));
    }
    let spec = request
        .to_spec()
        .map_err(|e| render_failure(&RenderError::from(e)))?;

    // A dropped client connection drops this future; the gate permit and any
    // partial file are released by their guards.
    let cancel = CancelToken::with_timeout(state.render_timeout);
    let image = state
        .orchestrator
        .render(&cancel, &spec)
        .await
        .map_err(|e| render_failure(&e))?;

    Ok(Json(RenderResponse {
        path: image.path.display().to_string(),
        filename: image.filename,
        prompt_id: image.prompt_id,
        seed: image.seed,
        width: image.width,
        height: image.height,
        elapsed_ms: image.elapsed_ms,
    }))
}

pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidSpec => StatusCode::BAD_REQUEST,
        FailureKind::AdmissionCancelled | FailureKind::PollCancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FailureKind::SubmissionFailed | FailureKind::DownloadFailed => StatusCode::BAD_GATEWAY,
        FailureKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::FailedNoArtifact => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::FieldNotFound | FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn render_failure(error: &RenderError) -> RenderFailure {
    failure(status_for(error.kind()), error.to_string(), error.kind())
}

fn failure(status: StatusCode, message: String, kind: FailureKind) -> RenderFailure {
    (
        status,
        Json(ErrorResponse {
            error: message,
            kind: kind.to_string(),
            retryable: kind.is_retryable(),
        }),
    )
}
