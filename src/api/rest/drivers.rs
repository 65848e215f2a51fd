use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus, GeoPoint, NewDriver};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver).patch(update_driver))
        .route("/drivers/:id/location", put(update_location))
        .route("/drivers/:id/availability", put(update_availability))
}

#[derive(Deserialize)]
pub struct ListDriversQuery {
    pub status: Option<DriverStatus>,
    pub available: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub available: bool,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewDriver>,
) -> Result<Json<Value>, AppError> {
    let id = state.drivers.create(payload).await?;
    Ok(Json(json!({ "id": id })))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDriversQuery>,
) -> Result<Json<Vec<Driver>>, AppError> {
    let listing = match (query.status, query.available) {
        (Some(_), Some(_)) => {
            return Err(AppError::Validation(
                "filter by either status or available, not both".to_string(),
            ));
        }
        (Some(status), None) => state.drivers.list_by_status(status),
        (None, Some(true)) => state.drivers.list_available(),
        (None, Some(false)) => {
            return Err(AppError::Validation(
                "only available=true is supported".to_string(),
            ));
        }
        (None, None) => state.drivers.list_approved(),
    };

    Ok(Json(listing.collect().await?))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.get(id).await?))
}

async fn update_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<Json<Driver>, AppError> {
    let Value::Object(patch) = payload else {
        return Err(AppError::Validation("patch must be a json object".to_string()));
    };
    Ok(Json(state.drivers.update(id, patch).await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GeoPoint>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.updater.set_location(id, payload).await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(
        state.updater.set_availability(id, payload.available).await?,
    ))
}
