//! Error model shared by the transport core, the codec and the binary.

use thiserror::Error;

/// Result alias used across the `crpc` crates.
pub type CrpcResult<T> = Result<T, CrpcError>;

/// Failures reported by server setup and by individual connections.
///
/// Would-block and interrupted socket calls are retried on the next poll cycle and never
/// become a `CrpcError`. Inside `poll`, a per-connection error only moves that connection to
/// draining.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrpcError {
    /// Rejected server parameters: zero slots, an empty receive buffer, or an unparseable
    /// listen address.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Operation on a connection or listener in the wrong state, such as socket I/O on a
    /// draining slot or a TCP address query on a Unix listener.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Received bytes that can never form a message, including a full receive buffer that
    /// still holds no complete message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket, option, bind or listen failure during setup; peer close, recv or send failure
    /// on a live connection; signal handler or worker thread startup failure.
    #[error("io error: {0}")]
    Io(String),
}
