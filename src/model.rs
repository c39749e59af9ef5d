//! Core data model.
//!
//! A task is a short unit of work: an id, a kind and a text payload. It
//! travels through the queue as a [`TaskMessage`] and leaves behind exactly
//! one [`TaskOutcome`] (or a [`DeadLetterEntry`]).

pub mod outcome;
pub mod task;

pub use outcome::{DEAD_LETTER_PREFIX, DeadLetterEntry, ERROR_PREFIX, TaskOutcome};
pub use task::{MAX_PAYLOAD_CHARS, Task, TaskId, TaskKind, TaskMessage, UnknownKind, kind_label, validate_payload};
