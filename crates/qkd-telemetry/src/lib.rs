// Path: crates/qkd-telemetry/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # QKD Post-Processing Telemetry
//!
//! Structured logging initialization and the per-module [`Statistics`]
//! counters (§4.6, §5).

pub mod init;
pub mod stats;

pub use init::init_tracing;
pub use stats::{Metric, Statistics};
