use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    Requested,
    Assigned,
    Active,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Assigned => "assigned",
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: Uuid,
    pub rider_id: String,
    pub driver_id: Option<Uuid>,
    pub status: TripStatus,
    pub pickup: GeoPoint,
    pub destination: GeoPoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Published on every committed trip transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripEvent {
    pub trip_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: TripStatus,
    pub at: DateTime<Utc>,
}

impl From<&Trip> for TripEvent {
    fn from(trip: &Trip) -> Self {
        Self {
            trip_id: trip.id,
            driver_id: trip.driver_id,
            status: trip.status,
            at: trip.updated_at,
        }
    }
}
