// Path: crates/qkd-connection/src/lib.rs
//! # QKD Post-Processing Connection Crate Lints
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # QKD Post-Processing Connection Layer
//!
//! The four endpoints every module exposes (§2, §4.4): `pipe_in`,
//! `pipe_out`, `listen`, `peer`. [`url`] parses the endpoint URL grammar
//! (§6); [`transport`] implements the underlying byte streams; [`channel`]
//! layers the framed, authenticated message protocol (§4.3) on top.

pub mod channel;
pub mod endpoint;
pub mod transport;
pub mod url;

pub use channel::Channel;
pub use endpoint::{connect, Listener};
pub use transport::Transport;
pub use url::{EndpointKind, EndpointUrl};
