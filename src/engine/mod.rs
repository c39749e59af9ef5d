//! Worker runtime: store connection supervision, the worker loop, and the
//! state the loop owns.

pub mod state;
pub mod supervisor;
pub mod worker;

pub use state::{Heartbeat, Phase, WorkerReport, WorkerState};
pub use supervisor::{ConnectionSupervisor, RetryPolicy};
pub use worker::{Worker, WorkerConfig};
