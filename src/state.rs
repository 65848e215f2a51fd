use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::coordinator::TripCoordinator;
use crate::engine::drivers::DriverRepository;
use crate::engine::updater::AvailabilityUpdater;
use crate::models::trip::TripEvent;
use crate::observability::metrics::Metrics;
use crate::store::DocumentStore;

pub struct AppState {
    pub drivers: DriverRepository,
    pub updater: AvailabilityUpdater,
    pub coordinator: TripCoordinator,
    pub trip_events_tx: broadcast::Sender<TripEvent>,
    pub metrics: Metrics,
}

impl AppState {
    /// Wires every component to the one store instance passed in.
    pub fn new(store: Arc<dyn DocumentStore>, event_buffer_size: usize) -> Self {
        let (trip_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let metrics = Metrics::new();

        Self {
            drivers: DriverRepository::new(store.clone()),
            updater: AvailabilityUpdater::new(store.clone(), metrics.clone()),
            coordinator: TripCoordinator::new(store, trip_events_tx.clone(), metrics.clone()),
            trip_events_tx,
            metrics,
        }
    }
}
