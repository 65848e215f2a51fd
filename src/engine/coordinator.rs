use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{ensure_forced_cancel, ensure_transition};
use crate::engine::{decode, encode, load_driver};
use crate::error::AppError;
use crate::models::driver::{CurrentTrip, Driver, DriverStatus, GeoPoint};
use crate::models::trip::{Trip, TripEvent, TripStatus};
use crate::observability::metrics::Metrics;
use crate::store::{fields, Collection, DocumentStore, DocumentWrite, WriteOutcome};

/// Owns the trip lifecycle and the paired (`availability`, `currentTrip`) driver
/// fields. Every transition that touches both a trip and its driver is committed
/// as one batch.
#[derive(Clone)]
pub struct TripCoordinator {
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<TripEvent>,
    metrics: Metrics,
}

impl TripCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: broadcast::Sender<TripEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
        }
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        let doc = self
            .store
            .read(Collection::Trips, &trip_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))?;

        decode(Collection::Trips, doc)
    }

    pub async fn request_trip(
        &self,
        rider_id: &str,
        pickup: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Trip, AppError> {
        let rider_id = rider_id.trim();
        if rider_id.is_empty() {
            return Err(AppError::Validation("riderId cannot be empty".to_string()));
        }
        pickup.validate()?;
        destination.validate()?;

        let now = Utc::now();
        let trip = Trip {
            id: Uuid::new_v4(),
            rider_id: rider_id.to_string(),
            driver_id: None,
            status: TripStatus::Requested,
            pickup,
            destination,
            created_at: now,
            updated_at: now,
        };

        let write = DocumentWrite::create(Collection::Trips, trip.id.to_string(), encode(&trip)?);
        match self.commit(vec![write]).await? {
            WriteOutcome::Committed => {
                info!(trip_id = %trip.id, rider_id = %trip.rider_id, "trip requested");
                self.publish(&trip);
                Ok(trip)
            }
            WriteOutcome::Rejected(_) => Err(AppError::Conflict(format!(
                "trip id {} already taken",
                trip.id
            ))),
        }
    }

    /// Reserves the first candidate that is still free, in the order given.
    pub async fn assign_driver(&self, trip_id: Uuid, candidates: &[Uuid]) -> Result<Trip, AppError> {
        let start = Instant::now();
        let result = self.reserve_first_free(trip_id, candidates).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NoDriverAvailable { .. }) => "no_driver",
            Err(AppError::Conflict(_)) => "conflict",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn reserve_first_free(&self, trip_id: Uuid, candidates: &[Uuid]) -> Result<Trip, AppError> {
        let trip = self.get_trip(trip_id).await?;
        ensure_transition(&trip, TripStatus::Assigned)?;

        let mut tried = HashSet::new();
        for &driver_id in candidates {
            if !tried.insert(driver_id) {
                continue;
            }

            let now = Utc::now();
            let binding = CurrentTrip {
                trip_id,
                status: TripStatus::Assigned,
            };
            // Trip precondition first: a trip that moved on must not be reported as
            // a shortage of drivers.
            let writes = vec![
                DocumentWrite::compare_and_set(
                    Collection::Trips,
                    trip_id.to_string(),
                    fields(json!({ "status": TripStatus::Requested, "driverId": null })),
                    fields(json!({
                        "status": TripStatus::Assigned,
                        "driverId": driver_id,
                        "updatedAt": now
                    })),
                ),
                DocumentWrite::compare_and_set(
                    Collection::Drivers,
                    driver_id.to_string(),
                    fields(json!({
                        "availability": true,
                        "currentTrip": null,
                        "status": DriverStatus::Approved
                    })),
                    fields(json!({
                        "availability": false,
                        "currentTrip": binding,
                        "updatedAt": now
                    })),
                ),
            ];

            match self.commit(writes).await? {
                WriteOutcome::Committed => {
                    let assigned = Trip {
                        status: TripStatus::Assigned,
                        driver_id: Some(driver_id),
                        updated_at: now,
                        ..trip
                    };
                    info!(trip_id = %trip_id, driver_id = %driver_id, "driver reserved");
                    self.publish(&assigned);
                    return Ok(assigned);
                }
                WriteOutcome::Rejected(rejection) if rejection.collection == Collection::Trips => {
                    self.metrics
                        .write_conflicts_total
                        .with_label_values(&["assign_driver"])
                        .inc();
                    warn!(trip_id = %trip_id, reason = ?rejection.reason, "trip changed during assignment");
                    return Err(AppError::Conflict(format!(
                        "trip {trip_id} changed while assigning a driver"
                    )));
                }
                WriteOutcome::Rejected(rejection) => {
                    debug!(
                        trip_id = %trip_id,
                        driver_id = %driver_id,
                        reason = ?rejection.reason,
                        "candidate not reservable"
                    );
                }
            }
        }

        warn!(
            trip_id = %trip_id,
            candidates = candidates.len(),
            "no candidate could be reserved"
        );
        Err(AppError::NoDriverAvailable { trip_id })
    }

    pub async fn start_trip(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        let trip = self.get_trip(trip_id).await?;
        ensure_transition(&trip, TripStatus::Active)?;
        let driver_id = bound_driver(&trip)?;

        let now = Utc::now();
        let started = CurrentTrip {
            trip_id,
            status: TripStatus::Active,
        };
        let writes = vec![
            trip_write(&trip, TripStatus::Active, now),
            DocumentWrite::compare_and_set(
                Collection::Drivers,
                driver_id.to_string(),
                fields(json!({ "currentTrip": binding_of(&trip) })),
                fields(json!({ "currentTrip": started, "updatedAt": now })),
            ),
        ];

        self.commit_transition(trip, TripStatus::Active, writes, now, "start_trip")
            .await
    }

    /// Completes the trip, frees the driver and bumps their trip count in one commit.
    pub async fn complete_trip(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        let trip = self.get_trip(trip_id).await?;
        ensure_transition(&trip, TripStatus::Completed)?;
        let driver_id = bound_driver(&trip)?;
        let driver = load_driver(self.store.as_ref(), driver_id).await?;

        let now = Utc::now();
        let writes = vec![
            trip_write(&trip, TripStatus::Completed, now),
            release_write(&trip, &driver, now, true),
        ];

        self.commit_transition(trip, TripStatus::Completed, writes, now, "complete_trip")
            .await
    }

    pub async fn cancel_trip(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        let trip = self.get_trip(trip_id).await?;
        ensure_transition(&trip, TripStatus::Cancelled)?;
        self.cancel(trip, "cancel_trip").await
    }

    /// Override path that also cancels an active trip, releasing its driver.
    pub async fn force_cancel_trip(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        let trip = self.get_trip(trip_id).await?;
        ensure_forced_cancel(&trip)?;
        warn!(trip_id = %trip_id, status = %trip.status, "force-cancelling trip");
        self.cancel(trip, "force_cancel_trip").await
    }

    async fn cancel(&self, trip: Trip, operation: &'static str) -> Result<Trip, AppError> {
        let now = Utc::now();
        let mut writes = vec![trip_write(&trip, TripStatus::Cancelled, now)];

        if trip.status.binds_driver() {
            let driver = load_driver(self.store.as_ref(), bound_driver(&trip)?).await?;
            writes.push(release_write(&trip, &driver, now, false));
        }

        self.commit_transition(trip, TripStatus::Cancelled, writes, now, operation)
            .await
    }

    async fn commit_transition(
        &self,
        trip: Trip,
        next: TripStatus,
        writes: Vec<DocumentWrite>,
        now: DateTime<Utc>,
        operation: &'static str,
    ) -> Result<Trip, AppError> {
        match self.commit(writes).await? {
            WriteOutcome::Committed => {
                let updated = Trip {
                    status: next,
                    updated_at: now,
                    ..trip
                };
                info!(
                    trip_id = %updated.id,
                    driver_id = ?updated.driver_id,
                    status = %next,
                    "trip transitioned"
                );
                self.publish(&updated);
                Ok(updated)
            }
            WriteOutcome::Rejected(rejection) => {
                self.metrics
                    .write_conflicts_total
                    .with_label_values(&[operation])
                    .inc();
                warn!(
                    trip_id = %trip.id,
                    operation,
                    collection = %rejection.collection,
                    id = %rejection.id,
                    reason = ?rejection.reason,
                    "transition lost a race"
                );
                Err(AppError::Conflict(format!(
                    "{operation} on trip {} lost a race on {}/{}",
                    trip.id, rejection.collection, rejection.id
                )))
            }
        }
    }

    /// Runs the commit on its own task so that a dropped caller cannot abandon a
    /// write that is already in flight.
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<WriteOutcome, AppError> {
        let store = Arc::clone(&self.store);
        let outcome = tokio::spawn(async move { store.commit(writes).await })
            .await
            .map_err(|err| AppError::Internal(format!("commit task failed: {err}")))??;
        Ok(outcome)
    }

    fn publish(&self, trip: &Trip) {
        self.metrics
            .trip_transitions_total
            .with_label_values(&[trip.status.as_str()])
            .inc();
        let _ = self.events.send(TripEvent::from(trip));
    }
}

fn bound_driver(trip: &Trip) -> Result<Uuid, AppError> {
    trip.driver_id.ok_or_else(|| {
        AppError::Internal(format!("trip {} is {} without a driver", trip.id, trip.status))
    })
}

/// The `currentTrip` value a driver bound to this trip must hold.
fn binding_of(trip: &Trip) -> CurrentTrip {
    CurrentTrip {
        trip_id: trip.id,
        status: trip.status,
    }
}

/// Unbinds the driver from the trip. Only an approved driver returns to the pool,
/// and the write is guarded on the status read so a concurrent moderation change
/// wins. A completed trip also bumps `totalTrips`, guarded on the count read.
fn release_write(trip: &Trip, driver: &Driver, now: DateTime<Utc>, completed: bool) -> DocumentWrite {
    let mut expected = fields(json!({ "currentTrip": binding_of(trip), "status": driver.status }));
    let mut released = fields(json!({
        "currentTrip": null,
        "availability": driver.status == DriverStatus::Approved,
        "updatedAt": now
    }));
    if completed {
        expected.insert("totalTrips".to_string(), json!(driver.total_trips));
        released.insert("totalTrips".to_string(), json!(driver.total_trips + 1));
    }

    DocumentWrite::compare_and_set(Collection::Drivers, driver.id.to_string(), expected, released)
}

/// Moves the trip from its read status to `next`, guarded on status and driver.
fn trip_write(trip: &Trip, next: TripStatus, now: DateTime<Utc>) -> DocumentWrite {
    DocumentWrite::compare_and_set(
        Collection::Trips,
        trip.id.to_string(),
        fields(json!({ "status": trip.status, "driverId": trip.driver_id })),
        fields(json!({ "status": next, "updatedAt": now })),
    )
}
