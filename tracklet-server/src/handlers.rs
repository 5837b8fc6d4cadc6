//! REST handlers: thin call-sites over `tracklet-core`. No policy lives
//! here; the refresh coordinator owns cache, rate-limit, and persistence
//! decisions.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use tracklet_model::{
    NewShipment, RefreshCaller, RefreshResponse, Shipment, TrackingEvent,
};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn list_shipments(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Shipment>>> {
    Ok(Json(state.db.shipments().list().await?))
}

pub async fn create_shipment(
    State(state): State<AppState>,
    Json(new): Json<NewShipment>,
) -> AppResult<(StatusCode, Json<Shipment>)> {
    let shipment = state.db.shipments().create(&new).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

pub async fn get_shipment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Shipment>> {
    let shipment = state
        .db
        .shipments()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("shipment {id}")))?;
    Ok(Json(shipment))
}

#[derive(Debug, Deserialize)]
pub struct UpdateShipmentBody {
    pub description: String,
}

pub async fn update_shipment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateShipmentBody>,
) -> AppResult<Json<Shipment>> {
    let shipment = state
        .db
        .shipments()
        .update_description(id, &body.description)
        .await?;
    // The cached refresh response carries no description, but dropping it
    // keeps mutation semantics uniform: any shipment write invalidates.
    state.coordinator.invalidate_shipment(id).await?;
    Ok(Json(shipment))
}

pub async fn delete_shipment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.db.shipments().delete(id).await?;
    state.coordinator.invalidate_shipment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub forced: bool,
}

pub async fn refresh_shipment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RefreshQuery>,
) -> AppResult<Json<RefreshResponse>> {
    let response = state
        .coordinator
        .refresh_shipment(id, query.forced, RefreshCaller::User)
        .await?;
    Ok(Json(response))
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<TrackingEvent>>> {
    // 404 for unknown shipments rather than an empty list.
    state
        .db
        .shipments()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("shipment {id}")))?;
    Ok(Json(state.db.events().list_for_shipment(id).await?))
}

pub async fn health(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let db_ok = sqlx_ping(&state).await;
    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "scheduler": state.scheduler.state(),
    })))
}

async fn sqlx_ping(state: &AppState) -> bool {
    sqlx_ping_inner(state).await.is_ok()
}

async fn sqlx_ping_inner(
    state: &AppState,
) -> Result<(), tracklet_core::TrackerError> {
    state.db.shipments().get(0).await?;
    Ok(())
}
