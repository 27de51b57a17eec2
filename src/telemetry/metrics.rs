//! Metric instrument factories.
//!
//! Instruments come from the `"caseflow"` meter on the globally registered
//! `MeterProvider`. Without an OTLP endpoint the global provider is a no-op,
//! so recording is always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("caseflow")
}

/// Counter: committed status transitions.
/// Labels: `operation`, `from`, `to`.
pub fn case_transitions() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.case.transitions")
        .with_description("Number of committed case status transitions")
        .build()
}

/// Counter: assignment operations.
/// Labels: `operation` ("assign" | "release"), `stage`.
pub fn assignments() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.case.assignments")
        .with_description("Number of assignment grants and releases")
        .build()
}

/// Counter: operations rejected with an error.
/// Labels: `operation`, `error`.
pub fn rejected_operations() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.operation.rejected")
        .with_description("Number of engine operations that failed")
        .build()
}

/// Counter: automatic and manual priority changes.
/// Labels: `source` ("measurements" | "override"), `to`.
pub fn priority_changes() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.case.priority_changes")
        .with_description("Number of priority changes")
        .build()
}

/// Counter: notifications appended to the log.
/// Labels: `kind`.
pub fn notifications_emitted() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.notification.emitted")
        .with_description("Number of notifications appended to the log")
        .build()
}

/// Counter: failed notification deliveries.
/// Labels: `target`, `outcome` ("retry" | "dropped").
pub fn delivery_failures() -> Counter<u64> {
    meter()
        .u64_counter("caseflow.notification.delivery_failures")
        .with_description("Number of failed notification deliveries")
        .build()
}

/// Histogram: collaborator call latency in milliseconds.
/// Labels: `operation`, `result` ("ok" | "error" | "timeout").
pub fn collaborator_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("caseflow.collaborator.duration_ms")
        .with_description("Collaborator call duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: wait minutes per case at each recomputation.
/// Labels: `stage`, `band`.
pub fn wait_minutes() -> Histogram<f64> {
    meter()
        .f64_histogram("caseflow.queue.wait_minutes")
        .with_description("Minutes a case has been waiting in its stage")
        .with_unit("min")
        .build()
}
