//! Busy-poll network core for control-plane RPC connections.
//!
//! There is no readiness multiplexer here. The owner calls [`RpcServer::poll`] on whatever
//! cadence its latency budget allows; each call reclaims drained slots, accepts at most one
//! client, then gives every open connection one send attempt and one receive attempt. All
//! sockets are non-blocking, so a cycle never waits.

mod connection;
mod pool;
mod request;


use std::net::SocketAddr;

use crpc_common::config::{LISTEN_BACKLOG, ListenAddress, ServerConfig};
use crpc_common::error::{CrpcError, CrpcResult};
use crpc_common::ids::ConnectionId;
use crpc_facade::protocol::MessageDecoder;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, error, info, warn};

use self::connection::ServerConnection;
use self::pool::SlotPool;

pub use self::request::{RpcRequest, submit_response};

/// Application entry point for decoded messages.
///
/// `handle` runs on the poller thread. It may respond before returning or move the request to
/// another thread and respond later.
pub trait RequestHandler<M> {
    fn handle(&mut self, request: RpcRequest, message: M);
}

impl<M, F> RequestHandler<M> for F
where
    F: FnMut(RpcRequest, M),
{
    fn handle(&mut self, request: RpcRequest, message: M) {
        self(request, message);
    }
}

/// What one [`RpcServer::poll`] cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Client accepted during this cycle.
    pub accepted: Option<ConnectionId>,
    /// Connections closed by a send/receive failure during this cycle.
    pub closed: usize,
    /// Drained connections returned to the free set during this cycle.
    pub reclaimed: usize,
}

/// Listening socket plus a fixed pool of client connections.
pub struct RpcServer<D, H> {
    listener: Socket,
    address: ListenAddress,
    pool: SlotPool,
    decoder: D,
    handler: H,
}

impl<D, H> RpcServer<D, H>
where
    D: MessageDecoder,
    H: RequestHandler<D::Message>,
{
    /// Creates the listening socket and allocates every connection slot.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::InvalidConfig` for an unusable config and `CrpcError::Io` when any
    /// socket setup step fails. Nothing is left open on failure.
    pub fn listen(
        address: &ListenAddress,
        config: ServerConfig,
        decoder: D,
        handler: H,
    ) -> CrpcResult<Self> {
        config.validate()?;
        let listener = open_listener(address)?;
        info!(
            %address,
            max_connections = config.max_connections.get(),
            recv_buffer_bytes = config.recv_buffer_bytes,
            "rpc server listening"
        );
        Ok(Self {
            listener,
            address: address.clone(),
            pool: SlotPool::new(config.max_connections, config.recv_buffer_bytes),
            decoder,
            handler,
        })
    }

    /// Runs exactly one orchestration cycle.
    pub fn poll(&mut self) -> PollReport {
        let reclaimed = self.reclaim_drained_connections();
        let accepted = if self.pool.has_free_slot() {
            self.accept_one()
        } else {
            None
        };
        let closed = self.service_open_connections();
        PollReport {
            accepted,
            closed,
            reclaimed,
        }
    }

    /// Closes the listener and every client socket.
    ///
    /// Requests still held by handlers can be submitted afterwards; their bytes go nowhere.
    pub fn shutdown(mut self) {
        let active = self.pool.active_len();
        self.pool.close_all();
        info!(address = %self.address, active, "rpc server shut down");
    }

    /// Bound TCP address, including the kernel-chosen port for `:0` binds.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::InvalidState` for Unix listeners and `CrpcError::Io` if the socket
    /// cannot report its address.
    pub fn local_addr(&self) -> CrpcResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|error| CrpcError::Io(format!("query local address failed: {error}")))?
            .as_socket()
            .ok_or(CrpcError::InvalidState("listener is not bound to an IP address"))
    }

    /// Address the server was created with.
    #[must_use]
    pub fn address(&self) -> &ListenAddress {
        &self.address
    }

    /// Slots currently open or draining.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.pool.active_len()
    }

    /// Slots available for new clients.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.pool.free_len()
    }

    /// Requests decoded on `id` and not yet fully sent or discarded.
    ///
    /// Returns `None` once the slot has been handed to a different connection or freed.
    #[must_use]
    pub fn outstanding_requests(&self, id: ConnectionId) -> Option<usize> {
        let connection = self.active_connection(id)?;
        Some(connection.outstanding_requests())
    }

    fn active_connection(&self, id: ConnectionId) -> Option<&ServerConnection> {
        self.pool
            .active_slots()
            .iter()
            .map(|&slot| self.pool.connection(slot))
            .find(|connection| connection.id() == id)
    }

    fn reclaim_drained_connections(&mut self) -> usize {
        let mut reclaimed = 0_usize;
        let mut position = 0_usize;
        while position < self.pool.active_len() {
            let connection = self.pool.connection_mut(self.pool.active_slot(position));
            if connection.is_draining() {
                let discarded = connection.discard_pending_responses();
                if discarded > 0 {
                    debug!(
                        connection = %connection.id(),
                        discarded,
                        "discarded responses for closed connection"
                    );
                }
                if connection.outstanding_requests() == 0 {
                    debug!(connection = %connection.id(), "all outstanding requests completed");
                    self.pool.release(position);
                    reclaimed += 1;
                    continue;
                }
            }
            position += 1;
        }
        reclaimed
    }

    fn accept_one(&mut self) -> Option<ConnectionId> {
        match self.listener.accept() {
            Ok((socket, peer)) => {
                if let Err(error) = socket.set_nonblocking(true) {
                    error!(%error, "cannot set nonblocking mode for accepted socket");
                    return None;
                }
                let id = self.pool.acquire(socket)?;
                debug!(connection = %id, peer = ?peer.as_socket(), "accepted connection");
                Some(id)
            }
            Err(error) if is_transient(&error) => None,
            Err(error) => {
                warn!(address = %self.address, %error, "accept failed");
                None
            }
        }
    }

    fn service_open_connections(&mut self) -> usize {
        let mut closed = 0_usize;
        for position in 0..self.pool.active_len() {
            let connection = self.pool.connection_mut(self.pool.active_slot(position));
            if !connection.is_open() {
                continue;
            }
            if let Err(error) =
                Self::service_connection(connection, &self.decoder, &mut self.handler)
            {
                debug!(
                    connection = %connection.id(),
                    outstanding = connection.outstanding_requests(),
                    %error,
                    "closing connection"
                );
                connection.close();
                closed += 1;
            }
        }
        closed
    }

    fn service_connection(
        connection: &mut ServerConnection,
        decoder: &D,
        handler: &mut H,
    ) -> CrpcResult<()> {
        connection.try_send()?;
        connection.try_receive(decoder, handler)
    }
}

fn open_listener(address: &ListenAddress) -> CrpcResult<Socket> {
    let (domain, protocol, sock_addr) = match address {
        ListenAddress::Tcp(addr) => (
            Domain::for_address(*addr),
            Some(Protocol::TCP),
            SockAddr::from(*addr),
        ),
        #[cfg(unix)]
        ListenAddress::Unix(path) => (
            Domain::UNIX,
            None,
            SockAddr::unix(path)
                .map_err(|error| setup_error(address, "resolve unix path", &error))?,
        ),
    };

    let socket = Socket::new(domain, Type::STREAM, protocol)
        .map_err(|error| setup_error(address, "socket", &error))?;
    socket
        .set_reuse_address(true)
        .map_err(|error| setup_error(address, "set SO_REUSEADDR", &error))?;
    if address.is_tcp() {
        socket
            .set_nodelay(true)
            .map_err(|error| setup_error(address, "set TCP_NODELAY", &error))?;
    }
    socket
        .set_nonblocking(true)
        .map_err(|error| setup_error(address, "set nonblocking", &error))?;
    socket
        .bind(&sock_addr)
        .map_err(|error| setup_error(address, "bind", &error))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|error| setup_error(address, "listen", &error))?;
    Ok(socket)
}

fn setup_error(address: &ListenAddress, step: &'static str, error: &std::io::Error) -> CrpcError {
    error!(%address, step, %error, "could not start rpc server");
    CrpcError::Io(format!("{step} failed for {address}: {error}"))
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
