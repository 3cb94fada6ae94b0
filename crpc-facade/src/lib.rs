//! Facade layer between raw connection bytes and application dispatch.
//!
//! The transport core only knows the [`protocol::MessageDecoder`] contract. [`jsonrpc`] is the
//! JSON-RPC 2.0 implementation of that contract plus the matching response encoder.

pub mod jsonrpc;
pub mod protocol;
