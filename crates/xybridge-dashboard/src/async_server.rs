//! Tokio server for a dashboard, one task per connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xybridge_frame::{Frame, FrameError, XyCodec};

use crate::config::ServerConfig;
use crate::dashboard::Dashboard;
use crate::error::{DashboardError, Result};
use crate::server::{classify_accept_error, set_keepalive, AcceptFailure, ACCEPT_BACKOFF};

type Frames = FramedRead<TrackedRead<OwnedReadHalf>, XyCodec>;

/// Bind the listening socket described by `config`.
pub async fn bind_async(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|source| DashboardError::Bind {
            addr: config.bind,
            source,
        })?;
    info!(addr = %config.bind, "dashboard listening");
    Ok(listener)
}

/// Accept connections until `shutdown` is cancelled.
///
/// Cancelling also closes every open connection. Failed accepts are logged
/// and skipped; only a broken listener ends the loop with an error.
pub async fn serve_async(
    listener: TcpListener,
    dashboard: Arc<Dashboard>,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => match classify_accept_error(&err) {
                        AcceptFailure::Fatal => return Err(DashboardError::Accept(err)),
                        AcceptFailure::Backoff => {
                            warn!(
                                error = %err,
                                backoff_ms = ACCEPT_BACKOFF.as_millis() as u64,
                                "accept failed, backing off"
                            );
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                        AcceptFailure::Idle | AcceptFailure::Retry => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    },
                };
                let dashboard = Arc::clone(&dashboard);
                let config = config.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection_async(stream, dashboard, &config, token).await {
                        warn!(%peer, error = %err, "connection failed");
                    }
                });
            }
        }
    }

    info!("dashboard server stopped");
    Ok(())
}

/// Serve one client until it disconnects, idles out, or `shutdown` fires.
///
/// Each frame is handled under its own store lock. The idle timeout restarts
/// whenever bytes arrive, complete frame or not.
pub async fn serve_connection_async(
    stream: TcpStream,
    dashboard: Arc<Dashboard>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(config.nodelay)?;
    set_keepalive(SockRef::from(&stream), config.keepalive)?;
    let session = dashboard.open_session();
    let codec = XyCodec::new(dashboard.layout().max_inbound_frame_len());
    let (read_half, mut write_half) = stream.into_split();
    let mut frames =
        FramedRead::with_capacity(TrackedRead::new(read_half), codec, config.read_chunk.max(1));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = next_frame(&mut frames, config) => next,
        };
        let frame = match next {
            Next::Frame(frame) => frame,
            Next::Closed => break,
            Next::TimedOut => {
                info!(connection = session.id(), "idle timeout, closing connection");
                break;
            }
            Next::Failed(err) => return Err(err.into()),
        };

        match dashboard.handle_frame(&frame) {
            Ok(reply) => {
                debug!(
                    connection = session.id(),
                    command = reply.command.name(),
                    response_len = reply.bytes.len(),
                    "frame handled"
                );
                write_half.write_all(&reply.bytes).await?;
                if let Some(pause) = reply.pause {
                    tokio::time::sleep(pause).await;
                }
            }
            Err(err) => {
                warn!(
                    connection = session.id(),
                    command = frame.command,
                    error = %err,
                    "frame rejected"
                );
            }
        }
    }

    Ok(())
}

enum Next {
    Frame(Frame),
    Closed,
    TimedOut,
    Failed(FrameError),
}

/// Read half that records when bytes last arrived.
struct TrackedRead<R> {
    inner: R,
    last_read: Instant,
}

impl<R> TrackedRead<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            last_read: Instant::now(),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TrackedRead<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.last_read = Instant::now();
        }
        polled
    }
}

async fn next_frame(frames: &mut Frames, config: &ServerConfig) -> Next {
    let next = match config.socket_timeout.filter(|t| !t.is_zero()) {
        Some(limit) => {
            let waiting_since = Instant::now();
            loop {
                let deadline = frames.get_ref().last_read.max(waiting_since) + limit;
                match tokio::time::timeout_at(deadline, frames.next()).await {
                    Ok(next) => break next,
                    // Bytes arrived since the deadline was set.
                    Err(_) if frames.get_ref().last_read + limit > Instant::now() => continue,
                    Err(_) => return Next::TimedOut,
                }
            }
        }
        None => frames.next().await,
    };
    match next {
        Some(Ok(frame)) => Next::Frame(frame),
        Some(Err(err)) => Next::Failed(err),
        None => Next::Closed,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use xybridge_frame::{encode_frame, Command};

    use super::*;
    use crate::dashboard::ACK_FRAME;

    const CONFIG: &str = "unsigned char RemoteXY_CONF[] = { 1,2,1,0,4 };
  // input variable
  char btn;
  // output variable
  char led; /* =0..255 */
  char dim; /* =-100..100 */
  // other variable
";

    fn loopback() -> ServerConfig {
        ServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
            ..ServerConfig::default()
        }
    }

    fn wire(command: Command, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(command.as_byte(), payload, &mut buf).unwrap();
        buf
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut header = [0u8; 3];
        stream.read_exact(&mut header).await.unwrap();
        let len = usize::from(u16::from_le_bytes([header[1], header[2]]));
        let mut frame = header.to_vec();
        frame.resize(len, 0);
        stream.read_exact(&mut frame[3..]).await.unwrap();
        frame
    }

    async fn start(config: ServerConfig) -> (Arc<Dashboard>, std::net::SocketAddr, CancellationToken) {
        let dashboard = Dashboard::from_config_text(CONFIG).unwrap();
        let listener = bind_async(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        tokio::spawn(serve_async(
            listener,
            Arc::clone(&dashboard),
            config,
            token.clone(),
        ));
        (dashboard, addr, token)
    }

    async fn wait_for_connections(dashboard: &Dashboard, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dashboard.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn answers_requests_in_order() {
        let (dashboard, addr, token) = start(loopback()).await;
        dashboard.write_output(1, -1).unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut requests = wire(Command::ReceiveInputVariables, &[9]);
        requests.extend_from_slice(&wire(Command::SendAllVariables, &[]));
        stream.write_all(&requests).await.unwrap();

        assert_eq!(read_frame(&mut stream).await, ACK_FRAME);
        let all = read_frame(&mut stream).await;
        assert_eq!(&all[4..7], &[9, 0, 0xFF]);
        assert_eq!(dashboard.read_input(0).unwrap(), 9);

        token.cancel();
    }

    #[tokio::test]
    async fn skips_noise_between_frames() {
        let (dashboard, addr, token) = start(loopback()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0x01, 0x02, 0x55, 0x00]).await.unwrap();
        stream
            .write_all(&wire(Command::SendConfig, &[]))
            .await
            .unwrap();

        let config = read_frame(&mut stream).await;
        assert_eq!(config.as_slice(), dashboard.layout().config_response().as_ref());
        token.cancel();
    }

    #[tokio::test]
    async fn idle_connection_is_closed() {
        let config = loopback().with_socket_timeout(Some(Duration::from_millis(100)));
        let (dashboard, addr, token) = start(config).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        wait_for_connections(&dashboard, 1).await;
        wait_for_connections(&dashboard, 0).await;

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap_or(0), 0);
        token.cancel();
    }

    #[tokio::test]
    async fn trickled_frame_outlives_idle_timeout() {
        let config = loopback().with_socket_timeout(Some(Duration::from_millis(150)));
        let (dashboard, addr, token) = start(config).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        for byte in wire(Command::SendConfig, &[]).iter() {
            stream.write_all(&[*byte]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }

        let config = read_frame(&mut stream).await;
        assert_eq!(config.as_slice(), dashboard.layout().config_response().as_ref());
        token.cancel();
    }

    #[tokio::test]
    async fn streaming_noise_keeps_connection_open() {
        let config = loopback().with_socket_timeout(Some(Duration::from_millis(150)));
        let (dashboard, addr, token) = start(config).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        wait_for_connections(&dashboard, 1).await;
        for _ in 0..10 {
            stream.write_all(&[0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(dashboard.connection_count(), 1);

        // Quiet from here on.
        wait_for_connections(&dashboard, 0).await;
        token.cancel();
    }

    #[tokio::test]
    async fn cancel_closes_open_connections() {
        let (dashboard, addr, token) = start(loopback()).await;
        let _stream = TcpStream::connect(addr).await.unwrap();
        wait_for_connections(&dashboard, 1).await;

        token.cancel();
        wait_for_connections(&dashboard, 0).await;
    }
}
