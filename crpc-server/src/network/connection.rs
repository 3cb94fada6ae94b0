//! Per-client connection slot: socket, receive buffer, and response bookkeeping.

use std::io::Read;
use std::sync::Arc;

use crpc_common::error::{CrpcError, CrpcResult};
use crpc_common::ids::{ConnectionId, SlotIndex};
use crpc_facade::protocol::{MessageDecoder, ParseStatus};
use socket2::Socket;
use tracing::{debug, error, warn};

use super::{RequestHandler, is_transient};
use super::request::{OutboundResponse, ResponseQueue, RpcRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ConnectionLifecycle {
    /// Slot sits in the free set.
    Free,
    /// Socket is live and serviced every poll cycle.
    Open,
    /// Socket is closed; the slot waits for outstanding requests to come back.
    Draining,
}

/// Fixed-capacity receive buffer with a fill offset.
#[derive(Debug)]
pub(super) struct RecvBuffer {
    bytes: Box<[u8]>,
    filled: usize,
}

impl RecvBuffer {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0_u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub(super) fn occupied(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }

    fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.filled..]
    }

    fn commit(&mut self, read_len: usize) {
        self.filled = self.filled.saturating_add(read_len).min(self.bytes.len());
    }

    /// Drops the first `consumed` bytes and moves the remainder to the front.
    pub(super) fn consume(&mut self, consumed: usize) {
        let consumed = consumed.min(self.filled);
        self.bytes.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
    }

    pub(super) fn len(&self) -> usize {
        self.filled
    }

    pub(super) fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn is_full(&self) -> bool {
        self.filled == self.bytes.len()
    }

    fn clear(&mut self) {
        self.filled = 0;
    }
}

#[derive(Debug)]
pub(super) struct ServerConnection {
    id: ConnectionId,
    socket: Option<Socket>,
    lifecycle: ConnectionLifecycle,
    recv: RecvBuffer,
    outstanding_requests: usize,
    responses: Arc<ResponseQueue>,
    in_flight: Option<OutboundResponse>,
}

impl ServerConnection {
    pub(super) fn new(slot: SlotIndex, recv_buffer_bytes: usize) -> Self {
        Self {
            id: ConnectionId {
                slot,
                generation: 0,
            },
            socket: None,
            lifecycle: ConnectionLifecycle::Free,
            recv: RecvBuffer::with_capacity(recv_buffer_bytes),
            outstanding_requests: 0,
            responses: Arc::new(ResponseQueue::default()),
            in_flight: None,
        }
    }

    /// Hands this slot to a freshly accepted client.
    pub(super) fn open(&mut self, socket: Socket) -> ConnectionId {
        debug_assert_eq!(self.lifecycle, ConnectionLifecycle::Free);
        self.id.generation = self.id.generation.wrapping_add(1);
        self.socket = Some(socket);
        self.lifecycle = ConnectionLifecycle::Open;
        self.recv.clear();
        self.outstanding_requests = 0;
        self.in_flight = None;
        self.id
    }

    /// Returns every per-connection field to its free-slot state.
    pub(super) fn reset(&mut self) {
        debug_assert_eq!(self.outstanding_requests, 0);
        self.socket = None;
        self.lifecycle = ConnectionLifecycle::Free;
        self.recv.clear();
        self.outstanding_requests = 0;
        self.in_flight = None;
    }

    /// Closes the socket immediately and starts draining.
    pub(super) fn close(&mut self) {
        self.socket = None;
        self.lifecycle = ConnectionLifecycle::Draining;
    }

    pub(super) fn id(&self) -> ConnectionId {
        self.id
    }

    #[cfg(test)]
    pub(super) fn lifecycle(&self) -> ConnectionLifecycle {
        self.lifecycle
    }

    pub(super) fn is_open(&self) -> bool {
        self.lifecycle == ConnectionLifecycle::Open
    }

    pub(super) fn is_draining(&self) -> bool {
        self.lifecycle == ConnectionLifecycle::Draining
    }

    pub(super) fn outstanding_requests(&self) -> usize {
        self.outstanding_requests
    }

    #[cfg(test)]
    pub(super) fn pending_recv_bytes(&self) -> usize {
        self.recv.len()
    }

    #[cfg(test)]
    pub(super) fn queued_responses(&self) -> usize {
        self.responses.len()
    }

    #[cfg(test)]
    pub(super) fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Frees the in-flight response and everything queued behind it.
    ///
    /// Returns how many responses were dropped.
    pub(super) fn discard_pending_responses(&mut self) -> usize {
        let mut discarded = 0_usize;
        if self.in_flight.take().is_some() {
            self.release_response();
            discarded += 1;
        }
        while let Some(response) = self.next_response() {
            drop(response);
            self.release_response();
            discarded += 1;
        }
        discarded
    }

    /// Writes queued responses in FIFO order until the socket stops accepting bytes.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::Io` on any write failure other than would-block or interrupted.
    pub(super) fn try_send(&mut self) -> CrpcResult<()> {
        loop {
            if self.outstanding_requests == 0 {
                return Ok(());
            }
            if self.in_flight.is_none() {
                self.in_flight = self.next_response();
            }
            let Some(response) = self.in_flight.as_mut() else {
                return Ok(());
            };

            if !response.is_drained() {
                let Some(socket) = self.socket.as_ref() else {
                    return Err(CrpcError::InvalidState("send on a closed connection"));
                };
                match socket.send(response.remaining()) {
                    Ok(0) => {
                        return Err(CrpcError::Io("send accepted zero bytes".to_owned()));
                    }
                    Ok(written) => response.advance(written),
                    Err(error) if is_transient(&error) => return Ok(()),
                    Err(error) => {
                        debug!(connection = %self.id, %error, "send failed");
                        return Err(CrpcError::Io(format!("send failed: {error}")));
                    }
                }
            }

            if !response.is_drained() {
                return Ok(());
            }
            self.in_flight = None;
            self.release_response();
        }
    }

    /// Reads once into the buffer, then hands every complete message to `handler`.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::Io` when the peer closed or the read failed, and
    /// `CrpcError::Protocol` when the buffered bytes cannot be decoded.
    pub(super) fn try_receive<D, H>(&mut self, decoder: &D, handler: &mut H) -> CrpcResult<()>
    where
        D: MessageDecoder,
        H: RequestHandler<D::Message>,
    {
        if self.recv.is_full() {
            return Err(CrpcError::Protocol(format!(
                "receive buffer of {} bytes is full without a complete message",
                self.recv.capacity()
            )));
        }
        let Some(socket) = self.socket.as_mut() else {
            return Err(CrpcError::InvalidState("receive on a closed connection"));
        };

        match socket.read(self.recv.spare_mut()) {
            Ok(0) => {
                debug!(connection = %self.id, "remote closed connection");
                return Err(CrpcError::Io("remote closed connection".to_owned()));
            }
            Ok(read_len) => self.recv.commit(read_len),
            Err(error) if is_transient(&error) => return Ok(()),
            Err(error) => {
                debug!(connection = %self.id, %error, "recv failed");
                return Err(CrpcError::Io(format!("recv failed: {error}")));
            }
        }

        self.dispatch_buffered(decoder, handler)
    }

    fn dispatch_buffered<D, H>(&mut self, decoder: &D, handler: &mut H) -> CrpcResult<()>
    where
        D: MessageDecoder,
        H: RequestHandler<D::Message>,
    {
        loop {
            let status = decoder.decode(self.recv.occupied()).inspect_err(|err| {
                error!(connection = %self.id, %err, "parse request failed");
            })?;
            let ParseStatus::Complete { message, consumed } = status else {
                return Ok(());
            };
            if consumed == 0 || consumed > self.recv.len() {
                return Err(CrpcError::InvalidState(
                    "decoder reported a consumed length outside the buffered bytes",
                ));
            }

            self.recv.consume(consumed);
            self.outstanding_requests += 1;
            handler.handle(RpcRequest::new(self.id, Arc::clone(&self.responses)), message);
        }
    }

    fn next_response(&mut self) -> Option<OutboundResponse> {
        while let Some(response) = self.responses.pop() {
            if response.connection() == self.id {
                return Some(response);
            }
            warn!(
                connection = %self.id,
                stale = %response.connection(),
                "dropping response addressed to a previous tenant of this slot"
            );
        }
        None
    }

    fn release_response(&mut self) {
        debug_assert!(self.outstanding_requests > 0);
        self.outstanding_requests = self.outstanding_requests.saturating_sub(1);
    }
}
