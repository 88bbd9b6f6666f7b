use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default RemoteXY TCP port.
pub const DEFAULT_PORT: u16 = 6377;

const DEFAULT_READ_CHUNK: usize = 1024;
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(120);

/// Controls how dashboard connections are served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Close a connection after this long without inbound data. `None` never times out.
    pub socket_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on accepted sockets.
    pub nodelay: bool,
    /// Size of each socket read.
    pub read_chunk: usize,
    /// Idle time before TCP keepalive starts checking the peer. `None` leaves keepalive off.
    pub keepalive: Option<Duration>,
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind.set_port(port);
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, idle: Option<Duration>) -> Self {
        self.keepalive = idle;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            socket_timeout: None,
            nodelay: true,
            read_chunk: DEFAULT_READ_CHUNK,
            keepalive: Some(DEFAULT_KEEPALIVE),
        }
    }
}
