//! Metric instrument factories for taskq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskq"` meter.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Returns the shared meter for taskq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: tasks accepted and queued.
/// Labels: `kind`.
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.submitted")
        .with_description("Number of tasks accepted and queued")
        .build()
}

/// Counter: submissions rejected by validation.
/// Labels: `kind`.
pub fn tasks_rejected() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.rejected")
        .with_description("Number of submissions rejected by validation")
        .build()
}

/// Counter: tasks that reached a terminal outcome.
/// Labels: `kind`, `status` ("done" | "error" | "dead_lettered").
pub fn tasks_processed() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.processed")
        .with_description("Number of tasks that reached a terminal outcome")
        .build()
}

/// Counter: items diverted to the dead-letter list.
/// Labels: `reason` ("unknown_kind" | "malformed").
pub fn tasks_dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.dead_lettered")
        .with_description("Items diverted to the dead-letter list")
        .build()
}

/// Histogram: task execution time in milliseconds.
/// Labels: `kind`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.task.duration_ms")
        .with_description("Task execution time in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: queue-level operations (push, pop, pop_empty).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Gauge: queue depth as observed by the last heartbeat.
/// Labels: `queue`.
pub fn queue_depth() -> Gauge<u64> {
    meter()
        .u64_gauge("taskq.queue.depth")
        .with_description("Queue depth at the last heartbeat")
        .build()
}

/// Counter: backing-store connection probes.
/// Labels: `result` ("ok" | "failed").
pub fn store_connect_attempts() -> Counter<u64> {
    meter()
        .u64_counter("taskq.store.connect_attempts")
        .with_description("Backing store connection probes")
        .build()
}
