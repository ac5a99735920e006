// Path: crates/qkd-sifting-bb84/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # BB84 Sifting Module
//!
//! Turns detector events into sifted key bits (§4.7) and, optionally,
//! authenticates the public basis exchange against tampering with a keyed
//! pseudorandom splice (QAuth, §4.8). Plugs into [`qkd_module::ModuleRuntime`]
//! as a [`qkd_module::Module`] implementation.

pub mod config;
pub mod keyid;
pub mod qauth;
pub mod sifting;

pub use config::Bb84Config;
pub use keyid::KeyIdCounter;
pub use sifting::Bb84Sifting;
