use crate::error::AppError;
use crate::models::trip::{Trip, TripStatus};

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Statuses in which the trip holds a driver reservation.
    pub fn binds_driver(&self) -> bool {
        matches!(self, TripStatus::Assigned | TripStatus::Active)
    }

    /// Regular transitions. Cancelling an active trip is only reachable through
    /// [`ensure_forced_cancel`].
    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        matches!(
            (self, next),
            (TripStatus::Requested, TripStatus::Assigned)
                | (TripStatus::Assigned, TripStatus::Active)
                | (TripStatus::Active, TripStatus::Completed)
                | (TripStatus::Requested, TripStatus::Cancelled)
                | (TripStatus::Assigned, TripStatus::Cancelled)
        )
    }
}

pub fn ensure_transition(trip: &Trip, next: TripStatus) -> Result<(), AppError> {
    if trip.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            trip_id: trip.id,
            from: trip.status,
            to: next,
        })
    }
}

pub fn ensure_forced_cancel(trip: &Trip) -> Result<(), AppError> {
    if trip.status.is_terminal() {
        Err(AppError::InvalidTransition {
            trip_id: trip.id,
            from: trip.status,
            to: TripStatus::Cancelled,
        })
    } else {
        Ok(())
    }
}

/// Checks the stored driver binding against the trip status.
pub fn binding_is_consistent(trip: &Trip) -> bool {
    match trip.status {
        TripStatus::Requested => trip.driver_id.is_none(),
        TripStatus::Assigned | TripStatus::Active | TripStatus::Completed => {
            trip.driver_id.is_some()
        }
        TripStatus::Cancelled => true,
    }
}
