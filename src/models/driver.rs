use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::trip::TripStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::Validation(format!(
                "latitude {} is outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::Validation(format!(
                "longitude {} is outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub color: String,
    pub plate_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

/// The trip a driver is currently bound to, mirrored from the trip record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTrip {
    pub trip_id: Uuid,
    pub status: TripStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub vehicle: Vehicle,
    pub license: String,
    pub status: DriverStatus,
    pub availability: bool,
    pub location: Option<DriverLocation>,
    pub current_trip: Option<CurrentTrip>,
    pub rating: f64,
    pub total_trips: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// An available driver is never bound to a trip, and a bound driver is never available.
    /// An offline driver with no trip (`availability == false`, no `currentTrip`) is allowed.
    pub fn binding_is_consistent(&self) -> bool {
        !(self.availability && self.current_trip.is_some())
    }
}

/// Registration payload. Every field is optional on the wire so that missing
/// fields surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDriver {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub vehicle: Option<Vehicle>,
    pub license: Option<String>,
}
