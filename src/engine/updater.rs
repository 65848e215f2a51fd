use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::load_driver;
use crate::error::AppError;
use crate::models::driver::{Driver, DriverLocation, DriverStatus, GeoPoint};
use crate::observability::metrics::Metrics;
use crate::store::{fields, Collection, DocumentStore, DocumentWrite, RejectReason, WriteOutcome};

/// Applies the driver-reported field groups: live location and self-declared
/// availability. Each write touches only its own fields.
#[derive(Clone)]
pub struct AvailabilityUpdater {
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
}

impl AvailabilityUpdater {
    pub fn new(store: Arc<dyn DocumentStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    pub async fn set_location(&self, driver_id: Uuid, point: GeoPoint) -> Result<Driver, AppError> {
        point.validate()?;

        let now = Utc::now();
        let location = DriverLocation {
            latitude: point.latitude,
            longitude: point.longitude,
            updated_at: now,
        };
        let write = DocumentWrite::update(
            Collection::Drivers,
            driver_id.to_string(),
            fields(json!({ "location": location, "updatedAt": now })),
        );

        match self.store.commit(vec![write]).await? {
            WriteOutcome::Committed => {
                debug!(
                    driver_id = %driver_id,
                    latitude = point.latitude,
                    longitude = point.longitude,
                    "driver location updated"
                );
                load_driver(self.store.as_ref(), driver_id).await
            }
            WriteOutcome::Rejected(_) => Err(AppError::NotFound(format!("driver {driver_id} not found"))),
        }
    }

    pub async fn set_availability(&self, driver_id: Uuid, available: bool) -> Result<Driver, AppError> {
        let driver = load_driver(self.store.as_ref(), driver_id).await?;

        let expected = if available {
            if let Some(current) = driver.current_trip {
                return Err(AppError::Conflict(format!(
                    "driver {driver_id} is on trip {} and cannot become available",
                    current.trip_id
                )));
            }
            if driver.status != DriverStatus::Approved {
                return Err(AppError::Validation(format!(
                    "driver {driver_id} is not approved"
                )));
            }
            fields(json!({ "currentTrip": null, "status": DriverStatus::Approved }))
        } else {
            fields(json!({ "currentTrip": driver.current_trip }))
        };

        let outcome = self
            .store
            .conditional_write(
                Collection::Drivers,
                &driver_id.to_string(),
                expected,
                fields(json!({ "availability": available, "updatedAt": Utc::now() })),
            )
            .await?;

        match outcome {
            WriteOutcome::Committed => {
                info!(driver_id = %driver_id, available, "driver availability changed");
                load_driver(self.store.as_ref(), driver_id).await
            }
            WriteOutcome::Rejected(rejection) if rejection.reason == RejectReason::Missing => {
                Err(AppError::NotFound(format!("driver {driver_id} not found")))
            }
            WriteOutcome::Rejected(rejection) => {
                self.metrics
                    .write_conflicts_total
                    .with_label_values(&["set_availability"])
                    .inc();
                warn!(
                    driver_id = %driver_id,
                    available,
                    reason = ?rejection.reason,
                    "availability change lost a race"
                );
                Err(AppError::Conflict(format!(
                    "driver {driver_id} changed while setting availability"
                )))
            }
        }
    }
}
