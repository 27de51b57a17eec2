//! Case operation span helpers.

use tracing::Span;

use crate::model::{CaseId, Status};

/// Start a span for one engine operation on one case.
///
/// `case.status` is declared empty and filled in by [`record_transition`].
pub fn start_case_span(operation: &'static str, case_id: CaseId) -> Span {
    tracing::info_span!(
        "case.operation",
        "case.operation" = operation,
        "case.id" = %case_id,
        "case.status" = tracing::field::Empty,
    )
}

/// Record a committed status change on the span.
pub fn record_transition(span: &Span, from: Status, to: Status) {
    span.record("case.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "status_transition");
    });
}
