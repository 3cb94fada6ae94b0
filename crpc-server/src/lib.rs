//! Connection and transport layer of the control-plane RPC server.
//!
//! [`network::RpcServer`] owns the listening socket and a fixed pool of connection slots. The
//! caller drives it by invoking [`network::RpcServer::poll`] repeatedly; every socket call is
//! non-blocking and nothing inside waits. Decoded messages reach the application as
//! [`network::RpcRequest`] values, which can be answered from any thread.

pub mod network;

pub use network::{PollReport, RequestHandler, RpcRequest, RpcServer, submit_response};
