use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// Core OTel metrics for the pipeline. Created once during wiring and
/// shared across workers. Instruments are no-op when no meter provider
/// is installed.
pub struct Metrics {
    events_consumed: Counter<u64>,
    duplicates_dropped: Counter<u64>,
    deliveries_attempted: Counter<u64>,
    deliveries_succeeded: Counter<u64>,
    fanout_partial_failures: Counter<u64>,
    dead_letters: Counter<u64>,
    status_applied: Counter<u64>,
    status_dropped: Counter<u64>,
    live_pushes: Counter<u64>,
    rate_limit_decisions: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("correio");
        Self::from_meter(&meter)
    }

    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            events_consumed: meter
                .u64_counter("correio.events.consumed")
                .with_description("Message events consumed from the log")
                .build(),
            duplicates_dropped: meter
                .u64_counter("correio.events.duplicates_dropped")
                .with_description("Redelivered events dropped by the dedup check")
                .build(),
            deliveries_attempted: meter
                .u64_counter("correio.deliveries.attempted")
                .with_description("Individual delivery attempts against channel adapters")
                .build(),
            deliveries_succeeded: meter
                .u64_counter("correio.deliveries.succeeded")
                .with_description("Delivery attempts accepted by a connector")
                .build(),
            fanout_partial_failures: meter
                .u64_counter("correio.fanout.partial_failures")
                .with_description("Messages delivered to some but not all linked identities")
                .build(),
            dead_letters: meter
                .u64_counter("correio.dead_letters")
                .with_description("Messages routed to the dead-letter topic")
                .build(),
            status_applied: meter
                .u64_counter("correio.status.applied")
                .with_description("Status transitions validated and persisted")
                .build(),
            status_dropped: meter
                .u64_counter("correio.status.dropped")
                .with_description("Status updates dropped as illegal or unknown")
                .build(),
            live_pushes: meter
                .u64_counter("correio.live.pushes")
                .with_description("Live events pushed to connected sessions")
                .build(),
            rate_limit_decisions: meter
                .u64_counter("correio.rate_limit.decisions")
                .with_description("Admission decisions at the ingress")
                .build(),
        }
    }

    pub fn record_event_consumed(&self, channel: &'static str) {
        self.events_consumed
            .add(1, &[KeyValue::new("channel", channel)]);
    }

    pub fn record_duplicate_dropped(&self) {
        self.duplicates_dropped.add(1, &[]);
    }

    pub fn record_delivery_attempts(&self, channel: &'static str, attempts: u32) {
        self.deliveries_attempted
            .add(u64::from(attempts), &[KeyValue::new("channel", channel)]);
    }

    pub fn record_delivery_succeeded(&self, channel: &'static str) {
        self.deliveries_succeeded
            .add(1, &[KeyValue::new("channel", channel)]);
    }

    pub fn record_fanout_partial_failure(&self) {
        self.fanout_partial_failures.add(1, &[]);
    }

    pub fn record_dead_letter(&self, reason: &'static str) {
        self.dead_letters.add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn record_status_applied(&self, status: &'static str) {
        self.status_applied
            .add(1, &[KeyValue::new("status", status)]);
    }

    pub fn record_status_dropped(&self, reason: &'static str) {
        self.status_dropped
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn record_live_push(&self, delivered: bool) {
        self.live_pushes
            .add(1, &[KeyValue::new("delivered", delivered)]);
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        self.rate_limit_decisions
            .add(1, &[KeyValue::new("allowed", allowed)]);
    }
}
