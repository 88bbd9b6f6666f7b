use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dashboard::Dashboard;
use crate::error::{DashboardError, Result};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptFailure {
    /// No connection pending.
    Idle,
    /// One pending connection failed; take the next.
    Retry,
    /// Out of descriptors or memory; wait before accepting again.
    Backoff,
    /// The listener itself is unusable.
    Fatal,
}

pub(crate) fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        ErrorKind::WouldBlock => AcceptFailure::Idle,
        ErrorKind::Interrupted
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::PermissionDenied
        | ErrorKind::TimedOut => AcceptFailure::Retry,
        ErrorKind::InvalidInput | ErrorKind::Unsupported => AcceptFailure::Fatal,
        _ => AcceptFailure::Backoff,
    }
}

/// Blocking TCP server for one dashboard, one thread per connection.
pub struct DashboardServer {
    listener: TcpListener,
    dashboard: Arc<Dashboard>,
    config: ServerConfig,
}

impl DashboardServer {
    /// Bind the listening socket described by `config`.
    pub fn bind(dashboard: Arc<Dashboard>, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).map_err(|source| DashboardError::Bind {
            addr: config.bind,
            source,
        })?;
        info!(addr = %config.bind, "dashboard listening");
        Ok(Self {
            listener,
            dashboard,
            config,
        })
    }

    /// Bound address, with the real port when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dashboard(&self) -> &Arc<Dashboard> {
        &self.dashboard
    }

    /// Accept one connection and serve it on its own thread.
    pub fn accept(&self) -> Result<JoinHandle<()>> {
        let (stream, peer) = self.listener.accept().map_err(DashboardError::Accept)?;
        Ok(self.spawn_connection(stream, peer))
    }

    /// Accept connections until `shutdown` is set.
    ///
    /// Open connections keep running until their client disconnects. A
    /// connection that fails before it is served is dropped; only a broken
    /// listener ends the loop with an error.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        self.listener.set_nonblocking(true)?;

        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!(%peer, error = %err, "dropping connection");
                        continue;
                    }
                    self.spawn_connection(stream, peer);
                }
                Err(err) => match classify_accept_error(&err) {
                    AcceptFailure::Idle => thread::sleep(ACCEPT_POLL_INTERVAL),
                    AcceptFailure::Retry => {
                        if err.kind() != ErrorKind::Interrupted {
                            warn!(error = %err, "accept failed");
                        }
                    }
                    AcceptFailure::Backoff => {
                        warn!(
                            error = %err,
                            backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
                            "accept failed, backing off"
                        );
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                    AcceptFailure::Fatal => return Err(DashboardError::Accept(err)),
                },
            }
        }

        info!("dashboard server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> JoinHandle<()> {
        let dashboard = Arc::clone(&self.dashboard);
        let config = self.config.clone();
        thread::spawn(move || {
            if let Err(err) = serve_connection(stream, &dashboard, &config) {
                warn!(%peer, error = %err, "connection failed");
            }
        })
    }
}

/// Serve one client until it disconnects or stays idle past the socket timeout.
pub fn serve_connection(
    mut stream: TcpStream,
    dashboard: &Arc<Dashboard>,
    config: &ServerConfig,
) -> Result<()> {
    // A zero read timeout is rejected by the OS; treat it as no timeout.
    stream.set_read_timeout(config.socket_timeout.filter(|t| !t.is_zero()))?;
    stream.set_nodelay(config.nodelay)?;
    set_keepalive(SockRef::from(&stream), config.keepalive)?;

    let mut engine = dashboard.engine();
    if let Ok(peer) = stream.peer_addr() {
        debug!(connection = engine.id(), %peer, "serving connection");
    }
    let mut buf = vec![0u8; config.read_chunk.max(1)];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                info!(connection = engine.id(), "idle timeout, closing connection");
                break;
            }
            Err(err) => return Err(err.into()),
        };

        let output = engine.on_bytes(&buf[..n]);
        for response in &output.responses {
            stream.write_all(response)?;
        }
        if let Some(pause) = output.pause {
            thread::sleep(pause);
        }
    }

    engine.close();
    Ok(())
}

/// Enable TCP keepalive once the socket has been idle for `idle`.
pub(crate) fn set_keepalive(socket: SockRef<'_>, idle: Option<Duration>) -> io::Result<()> {
    match idle {
        Some(time) => socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time)),
        None => Ok(()),
    }
}
