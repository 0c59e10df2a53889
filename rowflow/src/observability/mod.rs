//! Observability utilities.
//!
//! Structured logging goes through `tracing`; [`init_tracing`] and
//! [`init_json_tracing`] install a subscriber honoring `RUST_LOG`.
//! [`run_summary`] builds the wide `run.completed` payload.

mod logging;
mod wide_events;

pub use logging::{init_json_tracing, init_tracing};
pub use wide_events::run_summary;
