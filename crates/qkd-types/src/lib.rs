// Path: crates/qkd-types/src/lib.rs
//! # QKD Post-Processing Types Crate Lints
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # QKD Post-Processing Data Model
//!
//! The types that flow between modules and across the wire: key records
//! (§3), basis events and tables (§3, §4.7), and the framed message codec
//! (§4.3).

pub mod basis;
pub mod key;
pub mod message;
pub mod wire;

pub use basis::{BasisEvent, BasisTable};
pub use key::{KeyRecord, KeyState};
pub use message::{Message, MessageHeader, MessageType};
