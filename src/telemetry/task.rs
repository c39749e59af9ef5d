//! Task execution span helpers.
//!
//! One span per dequeued item; worker state changes are recorded on it.

use tracing::Span;

/// Start a span for one dequeued task.
///
/// `kind` is the raw kind string so foreign kinds are visible too. The
/// `task.state` field starts empty and follows [`record_state_transition`].
pub fn start_task_span(kind: &str, id: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.kind" = kind,
        "task.id" = id,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit it as an event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("task.state", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
