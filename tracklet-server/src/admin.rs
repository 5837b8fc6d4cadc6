//! Admin control surface: scheduler pause/resume/status behind bearer
//! authentication.

use axum::{
    Json,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;
use serde_json::json;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Bearer-token check for admin routes.
///
/// The comparison is constant-time, and failures are logged at warn level
/// without saying why the credential was rejected.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.admin.auth_disabled {
        return Ok(next.run(request).await);
    }

    let Some(expected) = state.config.admin.api_key.as_deref() else {
        // Config validation enforces a key when auth is on; treat a
        // missing one as a deny.
        warn!("admin authentication failed");
        return Err(AppError::unauthorized("unauthorized"));
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token)
            if constant_time_eq(
                token.as_bytes(),
                expected.as_bytes(),
            ) =>
        {
            Ok(next.run(request).await)
        }
        _ => {
            warn!("admin authentication failed");
            Err(AppError::unauthorized("unauthorized"))
        }
    }
}

pub async fn pause_scheduler(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let changed = state.scheduler.pause();
    Ok(Json(json!({
        "state": state.scheduler.state(),
        "changed": changed,
    })))
}

pub async fn resume_scheduler(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let changed = state.scheduler.resume();
    Ok(Json(json!({
        "state": state.scheduler.state(),
        "changed": changed,
    })))
}

pub async fn scheduler_status(
    State(state): State<AppState>,
) -> AppResult<Json<tracklet_core::SchedulerStatus>> {
    Ok(Json(state.scheduler.status()))
}
