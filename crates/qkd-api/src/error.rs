// Path: crates/qkd-api/src/error.rs
//! Error taxonomy for the QKD post-processing framework.
//!
//! Mirrors the failure classes laid out in the error handling design:
//! configuration, transport, protocol, cryptographic and invariant errors.
//! Only [`InvariantError`] is meant to be treated as a bug; everything else
//! is expected to occur during normal operation and is recoverable at some
//! layer above the one that raised it.

use thiserror::Error;

/// A stable, machine-readable string code for an error variant, used in log
/// lines and statistics so operators can grep for a specific failure class.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while applying or validating module configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An option carried a URL scheme this endpoint does not recognize.
    #[error("unknown url scheme: {0}")]
    UnknownScheme(String),
    /// A numeric option could not be parsed.
    #[error("malformed numeric option {key}: {value}")]
    MalformedNumber { key: String, value: String },
    /// A required option was absent.
    #[error("missing required option: {0}")]
    Missing(String),
    /// The option value was syntactically valid but semantically invalid.
    #[error("invalid option {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownScheme(_) => "CONFIG_UNKNOWN_SCHEME",
            Self::MalformedNumber { .. } => "CONFIG_MALFORMED_NUMBER",
            Self::Missing(_) => "CONFIG_MISSING",
            Self::Invalid { .. } => "CONFIG_INVALID",
        }
    }
}

/// Errors from the connection layer: sockets, timeouts, remote hang-ups.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying socket returned an I/O error.
    #[error("socket error: {0}")]
    Io(String),
    /// The operation did not complete within its timeout budget.
    #[error("timeout after {0}ms")]
    Timeout(i64),
    /// The remote end closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// The endpoint was not yet connected or listening.
    #[error("endpoint not ready: {0}")]
    NotReady(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "TRANSPORT_IO",
            Self::Timeout(_) => "TRANSPORT_TIMEOUT",
            Self::Closed => "TRANSPORT_CLOSED",
            Self::NotReady(_) => "TRANSPORT_NOT_READY",
        }
    }
}

/// Errors from message exchange and protocol-level bookkeeping. Fatal to the
/// current cycle but not to the module.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A message of an unexpected type arrived after the type-queue walk was
    /// exhausted.
    #[error("unexpected message type: wanted {wanted}, queue exhausted")]
    UnexpectedType { wanted: u8 },
    /// A fixed-length payload had the wrong size.
    #[error("size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },
    /// QAuth verification of an extracted basis failed.
    #[error("qauth verification failed at position {0}")]
    QAuthMismatch(u64),
    /// A sync or handshake message was structurally malformed.
    #[error("malformed protocol message: {0}")]
    Malformed(String),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedType { .. } => "PROTOCOL_UNEXPECTED_TYPE",
            Self::SizeMismatch { .. } => "PROTOCOL_SIZE_MISMATCH",
            Self::QAuthMismatch(_) => "PROTOCOL_QAUTH_MISMATCH",
            Self::Malformed(_) => "PROTOCOL_MALFORMED",
        }
    }
}

/// Errors from cryptographic construction: fatal, always at construction
/// time, never mid-stream.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The requested field width has no evhash variant.
    #[error("unsupported evhash width: {0} bits")]
    UnsupportedWidth(usize),
    /// The key supplied did not match the expected size for the operation.
    #[error("wrong key size: expected {expected} bytes, got {got}")]
    WrongKeySize { expected: usize, got: usize },
    /// Two hash contexts with incompatible parameters were combined.
    #[error("cannot combine incompatible hash contexts")]
    IncompatibleContexts,
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedWidth(_) => "CRYPTO_UNSUPPORTED_WIDTH",
            Self::WrongKeySize { .. } => "CRYPTO_WRONG_KEY_SIZE",
            Self::IncompatibleContexts => "CRYPTO_INCOMPATIBLE_CONTEXTS",
        }
    }
}

/// Internal consistency violations. These are bugs: the module that raises
/// one terminates rather than attempting to continue.
#[derive(Error, Debug)]
pub enum InvariantError {
    /// More bytes were consumed from a buffer than it contained.
    #[error("buffer underrun: needed {needed}, had {had}")]
    BufferUnderrun { needed: usize, had: usize },
    /// A state transition was requested that the state machine does not
    /// permit from its current state.
    #[error("impossible state transition: {from} -> {to}")]
    ImpossibleTransition { from: String, to: String },
}

impl ErrorCode for InvariantError {
    fn code(&self) -> &'static str {
        match self {
            Self::BufferUnderrun { .. } => "INVARIANT_BUFFER_UNDERRUN",
            Self::ImpossibleTransition { .. } => "INVARIANT_IMPOSSIBLE_TRANSITION",
        }
    }
}

/// The union of all error classes a module's public API can return.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

impl ErrorCode for Error {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Transport(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::Crypto(e) => e.code(),
            Self::Invariant(e) => e.code(),
        }
    }
}
