use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::trip::Trip;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", post(request_trip))
        .route("/trips/:id", get(get_trip))
        .route("/trips/:id/assign", post(assign_driver))
        .route("/trips/:id/start", post(start_trip))
        .route("/trips/:id/complete", post(complete_trip))
        .route("/trips/:id/cancel", post(cancel_trip))
        .route("/trips/:id/force-cancel", post(force_cancel_trip))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTripRequest {
    pub rider_id: String,
    pub pickup: GeoPoint,
    pub destination: GeoPoint,
}

/// Candidates are tried in the order given; ranking happens upstream.
#[derive(Deserialize)]
pub struct AssignDriverRequest {
    pub candidates: Vec<Uuid>,
}

async fn request_trip(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RequestTripRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .coordinator
        .request_trip(&payload.rider_id, payload.pickup, payload.destination)
        .await?;
    Ok(Json(trip))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.coordinator.get_trip(id).await?))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(
        state
            .coordinator
            .assign_driver(id, &payload.candidates)
            .await?,
    ))
}

async fn start_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.coordinator.start_trip(id).await?))
}

async fn complete_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.coordinator.complete_trip(id).await?))
}

async fn cancel_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.coordinator.cancel_trip(id).await?))
}

async fn force_cancel_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.coordinator.force_cancel_trip(id).await?))
}
