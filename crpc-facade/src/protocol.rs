//! Message boundary contract and standard error codes.

use crpc_common::error::CrpcResult;

/// Result of one decode attempt over the occupied span of a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus<M> {
    /// The span holds no complete message yet. Nothing is consumed.
    Incomplete,
    /// One message was decoded from the first `consumed` bytes of the span.
    Complete {
        /// Decoded message.
        message: M,
        /// Number of prefix bytes that belong to `message`.
        consumed: usize,
    },
}

/// Byte-stream to message boundary detector.
///
/// The receive path calls `decode` after every successful read and again after each complete
/// message until `Incomplete` is returned.
pub trait MessageDecoder {
    /// Decoded message handed to the request handler.
    type Message;

    /// Tries to decode one message from the start of `bytes`.
    ///
    /// Implementations must be idempotent over a growing prefix and must never report more
    /// consumed bytes than `bytes.len()`.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::Protocol` when `bytes` can never become a valid message. The
    /// connection that produced them is closed.
    fn decode(&self, bytes: &[u8]) -> CrpcResult<ParseStatus<Self::Message>>;
}

/// Standard JSON-RPC error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Application-defined code outside the reserved set.
    Other(i32),
}

impl RpcErrorCode {
    /// Numeric code written into error responses.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Other(code) => code,
        }
    }

    /// Maps a numeric code back to its category.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            other => Self::Other(other),
        }
    }

    /// Human-readable reason used as the error `message`.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid parameters",
            Self::InternalError => "Internal error",
            Self::Other(_) => "Error",
        }
    }
}
