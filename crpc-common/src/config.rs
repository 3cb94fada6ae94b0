//! Server configuration shared by bootstrap code and the transport core.

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CrpcError, CrpcResult};
use crate::ids::SlotCount;

/// Backlog passed to `listen(2)` for every server socket.
pub const LISTEN_BACKLOG: i32 = 512;

/// Default number of connection slots.
pub const DEFAULT_MAX_CONNECTIONS: u16 = 64;

/// Default per-connection receive buffer size.
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 32 * 1024;

const UNIX_ADDRESS_PREFIX: &str = "unix:";

/// Address the server listens on.
///
/// The variant selects the socket domain and transport protocol: TCP addresses use their IP
/// family with `IPPROTO_TCP`, Unix paths use `AF_UNIX` with the default protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    /// TCP listener on an IPv4 or IPv6 address.
    Tcp(SocketAddr),
    /// Stream listener on a filesystem path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl ListenAddress {
    /// Returns `true` for TCP listeners, which also get `TCP_NODELAY`.
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "{UNIX_ADDRESS_PREFIX}{}", path.display()),
        }
    }
}

impl FromStr for ListenAddress {
    type Err = CrpcError;

    fn from_str(raw: &str) -> CrpcResult<Self> {
        if let Some(path) = raw.strip_prefix(UNIX_ADDRESS_PREFIX) {
            return parse_unix_path(path);
        }
        raw.parse::<SocketAddr>()
            .map(Self::Tcp)
            .map_err(|_| CrpcError::InvalidConfig("listen address must be host:port or unix:/path"))
    }
}

#[cfg(unix)]
fn parse_unix_path(path: &str) -> CrpcResult<ListenAddress> {
    if path.is_empty() {
        return Err(CrpcError::InvalidConfig("unix listen path is empty"));
    }
    Ok(ListenAddress::Unix(PathBuf::from(path)))
}

#[cfg(not(unix))]
fn parse_unix_path(_path: &str) -> CrpcResult<ListenAddress> {
    Err(CrpcError::InvalidConfig(
        "unix listen addresses are not supported on this platform",
    ))
}

/// Transport core configuration fixed at server creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Number of connection slots. Clients beyond this stay in the kernel backlog.
    pub max_connections: SlotCount,
    /// Fixed capacity of every connection's receive buffer.
    pub recv_buffer_bytes: usize,
}

impl ServerConfig {
    /// Checks values that cannot be expressed by the field types alone.
    ///
    /// # Errors
    ///
    /// Returns `CrpcError::InvalidConfig` when the receive buffer is empty.
    pub fn validate(&self) -> CrpcResult<()> {
        if self.recv_buffer_bytes == 0 {
            return Err(CrpcError::InvalidConfig(
                "receive buffer must hold at least one byte",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: SlotCount(DEFAULT_MAX_CONNECTIONS),
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}
