//! Connection and pool counters exported through OpenTelemetry.
//!
//! Instruments are created lazily from the global meter provider, which the
//! hosting binary installs. Without the `metrics` feature every function here
//! compiles to a no-op.

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
struct Instruments {
    connections_accepted: Counter<u64>,
    connections_inflight: UpDownCounter<i64>,
    accept_errors: Counter<u64>,
    tasks_submitted: Counter<u64>,
    task_panics: Counter<u64>,
}

#[cfg(feature = "metrics")]
static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

#[cfg(feature = "metrics")]
fn instruments() -> &'static Instruments {
    INSTRUMENTS.get_or_init(|| {
        let meter = opentelemetry::global::meter("kvshell");
        Instruments {
            connections_accepted: meter
                .u64_counter("connections_accepted")
                .with_description("Total accepted TCP connections")
                .build(),
            connections_inflight: meter
                .i64_up_down_counter("connections_inflight")
                .with_description("Connections currently dispatched to the handler")
                .build(),
            accept_errors: meter
                .u64_counter("accept_errors")
                .with_description("Listener accept failures")
                .build(),
            tasks_submitted: meter
                .u64_counter("pool_tasks_submitted")
                .with_description("Tasks handed to the worker pool")
                .build(),
            task_panics: meter
                .u64_counter("pool_task_panics")
                .with_description("Pool tasks that panicked")
                .build(),
        }
    })
}

#[cfg(feature = "metrics")]
pub fn increment_connections_accepted() {
    instruments().connections_accepted.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_accepted() {}

#[cfg(feature = "metrics")]
pub fn increment_connections_inflight() {
    instruments().connections_inflight.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_connections_inflight() {
    instruments().connections_inflight.add(-1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_connections_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_accept_errors(transient: bool) {
    instruments()
        .accept_errors
        .add(1, &[KeyValue::new("transient", transient)]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_accept_errors(_transient: bool) {}

#[cfg(feature = "metrics")]
pub fn increment_tasks_submitted() {
    instruments().tasks_submitted.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_tasks_submitted() {}

#[cfg(feature = "metrics")]
pub fn increment_task_panics() {
    instruments().task_panics.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_task_panics() {}
