use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub write_conflicts_total: IntCounterVec,
    pub trip_transitions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of driver assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let write_conflicts_total = IntCounterVec::new(
            Opts::new(
                "write_conflicts_total",
                "Conditional writes that lost a race, by operation",
            ),
            &["operation"],
        )
        .expect("valid write_conflicts_total metric");

        let trip_transitions_total = IntCounterVec::new(
            Opts::new("trip_transitions_total", "Committed trip transitions by new status"),
            &["status"],
        )
        .expect("valid trip_transitions_total metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(write_conflicts_total.clone()))
            .expect("register write_conflicts_total");
        registry
            .register(Box::new(trip_transitions_total.clone()))
            .expect("register trip_transitions_total");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            write_conflicts_total,
            trip_transitions_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
