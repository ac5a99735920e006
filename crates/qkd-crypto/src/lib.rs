// Path: crates/qkd-crypto/src/lib.rs
//! # QKD Post-Processing Crypto Crate Lints
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # QKD Post-Processing Cryptography
//!
//! The evaluation hash (§4.2) used to authenticate every peer-to-peer
//! control message, and the random sources (§6) that feed fair-bit draws
//! and QAuth init token generation.

pub mod evhash;
pub mod random;

pub use evhash::EvHash;
