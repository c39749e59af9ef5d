//! # taskq-rs
//!
//! Fire-and-forget task queue. Producers submit short tasks, workers drain
//! them from a durable FIFO queue, and clients poll a result store.
//!
//! Backing stores: Postgres with pgmq (`db`), Redis (feature `redis`), and an
//! in-process store for tests. Observability goes through `tracing` and
//! OpenTelemetry.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod processor;
pub mod store;
pub mod submit;
pub mod telemetry;
