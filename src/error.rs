// src/error.rs

//! Typed errors for the parts of the crate that fail in the `Result` sense.
//!
//! Expected network conditions (would-block, peer closed, no pending
//! connection) are NOT errors here; they travel as status enums from the
//! socket layer. What remains are configuration mistakes and setup
//! failures that the caller has to act on.

use thiserror::Error;

// --- AddressError ---
/// Failure to turn a textual IPv4 address into its binary form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The text is not a dotted-quad IPv4 address.
    #[error("invalid IPv4 address: {0:?}")]
    Malformed(String),
    /// The OS conversion routine itself failed.
    #[error("address conversion failed for {ip:?} (errno {errno})")]
    Conversion { ip: String, errno: i32 },
}

// --- PoolError ---
/// Failures while building the worker pool or its supervisor.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("a worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

// --- ServerError ---
/// Errors surfaced by the server binary and its setup path.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not listen on {0}")]
    Listen(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result type for server setup.
pub type Result<T> = std::result::Result<T, ServerError>;
