//! Error types for the lifecycle engine and its collaborators.

use thiserror::Error;

use crate::transport::ResponseCode;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures observed while driving the client lifecycle.
///
/// None of these terminate the engine. Each operation catches them and decides
/// the next lifecycle state.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The peer did not answer in time.
    #[error("no response from peer (timeout)")]
    Timeout,

    /// The peer answered with a non-success code.
    #[error("request rejected: {0}")]
    Rejected(ResponseCode),

    /// There is no usable server information to act on.
    #[error("not configured: {0}")]
    Unconfigured(String),

    /// A bootstrap session is already running.
    #[error("a bootstrap session is already active")]
    SessionConflict,

    /// The object store lists more device management servers than the engine
    /// drives.
    #[error("{0} device management servers configured, exactly one is supported")]
    UnsupportedServers(usize),

    /// A server URI could not be understood.
    #[error("invalid server URI `{0}`")]
    InvalidUri(String),
}
