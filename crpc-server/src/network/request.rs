//! Requests handed to the application and the per-connection response queue.
//!
//! The response queue is the only structure shared with non-poller threads. Everything else a
//! request touches on the way out (offsets, the in-flight slot, the outstanding counter) belongs
//! to the poller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crpc_common::ids::ConnectionId;
use crpc_facade::jsonrpc::{encode_error, encode_result};
use crpc_facade::protocol::RpcErrorCode;
use serde_json::Value;
use tracing::error;

/// Encoded response bytes travelling from a handler to the send path.
#[derive(Debug)]
pub(super) struct OutboundResponse {
    connection: ConnectionId,
    send_buffer: Vec<u8>,
    send_offset: usize,
}

impl OutboundResponse {
    pub(super) fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Bytes not yet accepted by the socket.
    pub(super) fn remaining(&self) -> &[u8] {
        &self.send_buffer[self.send_offset..]
    }

    pub(super) fn is_drained(&self) -> bool {
        self.send_offset >= self.send_buffer.len()
    }

    pub(super) fn advance(&mut self, written: usize) {
        self.send_offset = self
            .send_offset
            .saturating_add(written)
            .min(self.send_buffer.len());
    }
}

/// FIFO of completed responses for one connection slot.
///
/// The lock is held only for one push or pop, never across socket I/O.
#[derive(Debug, Default)]
pub(super) struct ResponseQueue {
    pending: Mutex<VecDeque<OutboundResponse>>,
}

impl ResponseQueue {
    fn push(&self, response: OutboundResponse) {
        self.lock().push_back(response);
    }

    pub(super) fn pop(&self) -> Option<OutboundResponse> {
        self.lock().pop_front()
    }

    pub(super) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OutboundResponse>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One decoded call waiting for its response.
///
/// Every request must eventually be submitted, with or without payload. The connection it came
/// from keeps its slot reserved until that happens, even after the peer disconnects.
#[derive(Debug)]
pub struct RpcRequest {
    connection: ConnectionId,
    queue: Arc<ResponseQueue>,
    send_buffer: Vec<u8>,
}

impl RpcRequest {
    pub(super) fn new(connection: ConnectionId, queue: Arc<ResponseQueue>) -> Self {
        Self {
            connection,
            queue,
            send_buffer: Vec::new(),
        }
    }

    /// Connection that delivered this request.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Buffer that will be written to the peer on submission.
    ///
    /// External encoders can serialize into it directly and then call [`submit_response`].
    pub fn send_buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.send_buffer
    }

    /// Replaces the send buffer with `encoded` and queues it.
    pub fn respond(mut self, encoded: Vec<u8>) {
        self.send_buffer = encoded;
        submit_response(self);
    }

    /// Encodes a JSON-RPC success response and queues it.
    pub fn respond_result(self, id: Option<&Value>, result: &Value) {
        match encode_result(id, result) {
            Ok(encoded) => self.respond(encoded),
            Err(err) => {
                error!(connection = %self.connection, %err, "dropping unencodable result");
                self.respond_error(id, RpcErrorCode::InternalError);
            }
        }
    }

    /// Encodes a standard JSON-RPC error response for `code` and queues it.
    pub fn respond_error(self, id: Option<&Value>, code: RpcErrorCode) {
        match encode_error(id, code) {
            Ok(encoded) => self.respond(encoded),
            Err(err) => {
                error!(connection = %self.connection, %err, "dropping unencodable error");
                self.finish();
            }
        }
    }

    /// Completes the request without sending anything, as for notifications.
    pub fn finish(mut self) {
        self.send_buffer.clear();
        submit_response(self);
    }
}

/// Queues a completed request on its connection.
///
/// Safe to call from any thread, including from inside the handler while the poller is running
/// it. If the connection has already closed the bytes are discarded by the poller.
pub fn submit_response(request: RpcRequest) {
    let RpcRequest {
        connection,
        queue,
        send_buffer,
    } = request;
    queue.push(OutboundResponse {
        connection,
        send_buffer,
        send_offset: 0,
    });
}
