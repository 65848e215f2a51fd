use std::sync::Arc;

use chrono::Utc;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{decode, encode, load_driver};
use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus, NewDriver, Vehicle};
use crate::store::{Collection, Document, DocumentStore, DocumentWrite, RejectReason, WriteOutcome};

/// Fields owned by the updater or the coordinator, or fixed at creation.
const PROTECTED_FIELDS: &[&str] = &[
    "availability",
    "currentTrip",
    "location",
    "totalTrips",
    "id",
    "createdAt",
    "updatedAt",
];

const PATCHABLE_FIELDS: &[&str] = &[
    "name", "phone", "email", "vehicle", "license", "status", "rating",
];

#[derive(Clone)]
pub struct DriverRepository {
    store: Arc<dyn DocumentStore>,
}

impl DriverRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> Result<Driver, AppError> {
        load_driver(self.store.as_ref(), id).await
    }

    pub async fn create(&self, data: NewDriver) -> Result<Uuid, AppError> {
        let name = required("name", data.name)?;
        let phone = required("phone", data.phone)?;
        let email = required("email", data.email)?;
        let license = required("license", data.license)?;
        let vehicle = data
            .vehicle
            .ok_or_else(|| AppError::Validation("vehicle is required".to_string()))?;
        validate_vehicle(&vehicle)?;

        let now = Utc::now();
        let driver = Driver {
            id: Uuid::new_v4(),
            name,
            phone,
            email,
            vehicle,
            license,
            status: DriverStatus::Pending,
            availability: false,
            location: None,
            current_trip: None,
            rating: 0.0,
            total_trips: 0,
            created_at: now,
            updated_at: now,
        };

        let write = DocumentWrite::create(Collection::Drivers, driver.id.to_string(), encode(&driver)?);
        match self.store.commit(vec![write]).await? {
            WriteOutcome::Committed => {
                info!(driver_id = %driver.id, "driver registered");
                Ok(driver.id)
            }
            WriteOutcome::Rejected(rejection) => Err(AppError::Conflict(format!(
                "driver id {} already taken: {:?}",
                driver.id, rejection.reason
            ))),
        }
    }

    /// Writes the given profile fields and nothing else, so concurrent location and
    /// availability writes are never reverted.
    pub async fn update(&self, id: Uuid, patch: Document) -> Result<Driver, AppError> {
        if patch.is_empty() {
            return Err(AppError::Validation("no fields to update".to_string()));
        }

        for field in patch.keys() {
            if PROTECTED_FIELDS.contains(&field.as_str()) {
                return Err(AppError::ForbiddenField(field.clone()));
            }
            if !PATCHABLE_FIELDS.contains(&field.as_str()) {
                return Err(AppError::Validation(format!("unknown driver field `{field}`")));
            }
        }

        let current = self
            .store
            .read(Collection::Drivers, &id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

        let patch = trim_strings(patch);
        let mut merged = current;
        merged.extend(patch.clone());
        let candidate: Driver = serde_json::from_value(Value::Object(merged))
            .map_err(|err| AppError::Validation(format!("invalid driver fields: {err}")))?;
        validate_profile(&candidate)?;

        let mut fields = patch;
        // Only approved drivers may stay in the pool.
        if fields.contains_key("status") && candidate.status != DriverStatus::Approved {
            fields.insert("availability".to_string(), Value::Bool(false));
        }
        fields.insert("updatedAt".to_string(), json!(Utc::now()));
        let updated: Vec<String> = fields.keys().cloned().collect();

        let write = DocumentWrite::update(Collection::Drivers, id.to_string(), fields);
        match self.store.commit(vec![write]).await? {
            WriteOutcome::Committed => {
                debug!(driver_id = %id, fields = ?updated, "driver profile updated");
                self.get(id).await
            }
            WriteOutcome::Rejected(rejection) if rejection.reason == RejectReason::Missing => {
                Err(AppError::NotFound(format!("driver {id} not found")))
            }
            WriteOutcome::Rejected(rejection) => Err(AppError::Conflict(format!(
                "driver {id} update rejected: {:?}",
                rejection.reason
            ))),
        }
    }

    pub fn list_by_status(&self, status: DriverStatus) -> DriverQuery {
        DriverQuery {
            store: Arc::clone(&self.store),
            field: "status",
            value: json!(status),
            approved_only: false,
        }
    }

    pub fn list_approved(&self) -> DriverQuery {
        self.list_by_status(DriverStatus::Approved)
    }

    /// Approved drivers that are online and unbound.
    pub fn list_available(&self) -> DriverQuery {
        DriverQuery {
            store: Arc::clone(&self.store),
            field: "availability",
            value: Value::Bool(true),
            approved_only: true,
        }
    }
}

/// A driver listing that runs its query only when streamed, and again on every
/// new stream.
pub struct DriverQuery {
    store: Arc<dyn DocumentStore>,
    field: &'static str,
    value: Value,
    approved_only: bool,
}

impl DriverQuery {
    pub fn stream(&self) -> BoxStream<'_, Result<Driver, AppError>> {
        let approved_only = self.approved_only;
        stream::once(self.store.query(Collection::Drivers, self.field, &self.value))
            .flat_map(|result| match result {
                Ok(docs) => stream::iter(
                    docs.into_iter()
                        .map(|doc| decode::<Driver>(Collection::Drivers, doc)),
                )
                .left_stream(),
                Err(err) => stream::iter(std::iter::once(Err(AppError::from(err)))).right_stream(),
            })
            .try_filter(move |driver| {
                future::ready(!approved_only || driver.status == DriverStatus::Approved)
            })
            .boxed()
    }

    pub async fn collect(&self) -> Result<Vec<Driver>, AppError> {
        self.stream().try_collect().await
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(AppError::Validation(format!("{field} cannot be empty"))),
        None => Err(AppError::Validation(format!("{field} is required"))),
    }
}

/// Trims the free-text profile fields of a patch, the way `create` stores them.
fn trim_strings(mut patch: Document) -> Document {
    for field in ["name", "phone", "email", "license"] {
        if let Some(Value::String(text)) = patch.get_mut(field) {
            *text = text.trim().to_string();
        }
    }
    if let Some(Value::Object(vehicle)) = patch.get_mut("vehicle") {
        for value in vehicle.values_mut() {
            if let Value::String(text) = value {
                *text = text.trim().to_string();
            }
        }
    }
    patch
}

fn validate_vehicle(vehicle: &Vehicle) -> Result<(), AppError> {
    for (field, value) in [
        ("vehicle.make", &vehicle.make),
        ("vehicle.model", &vehicle.model),
        ("vehicle.color", &vehicle.color),
        ("vehicle.plateNumber", &vehicle.plate_number),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{field} cannot be empty")));
        }
    }
    Ok(())
}

fn validate_profile(driver: &Driver) -> Result<(), AppError> {
    for (field, value) in [
        ("name", &driver.name),
        ("phone", &driver.phone),
        ("email", &driver.email),
        ("license", &driver.license),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{field} cannot be empty")));
        }
    }
    validate_vehicle(&driver.vehicle)?;

    if !(0.0..=5.0).contains(&driver.rating) {
        return Err(AppError::Validation(format!(
            "rating {} is outside [0, 5]",
            driver.rating
        )));
    }
    Ok(())
}
