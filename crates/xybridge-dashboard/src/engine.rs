use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use xybridge_frame::{DecoderStats, FrameDecoder};

use crate::dashboard::Dashboard;

/// One open connection of a dashboard.
///
/// Counts towards [`Dashboard::connection_count`] until dropped.
#[derive(Debug)]
pub struct Session {
    id: String,
    dashboard: Arc<Dashboard>,
}

impl Session {
    pub(crate) fn new(id: String, dashboard: Arc<Dashboard>) -> Self {
        Self { id, dashboard }
    }

    /// Connection id, `conn-N`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dashboard(&self) -> &Arc<Dashboard> {
        &self.dashboard
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dashboard.close_session(&self.id);
    }
}

/// What one delivery of stream bytes produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Response frames, in the order their requests arrived.
    pub responses: Vec<Bytes>,
    /// Pause inbound delivery for this long once the responses are written.
    pub pause: Option<Duration>,
    /// Frames handled, including ones that failed dispatch.
    pub frames: usize,
}

/// Turns one connection's byte stream into dashboard responses.
#[derive(Debug)]
pub struct FrameEngine {
    session: Session,
    decoder: FrameDecoder,
}

impl FrameEngine {
    pub fn new(session: Session) -> Self {
        let max_frame_len = session.dashboard.layout().max_inbound_frame_len();
        Self {
            session,
            decoder: FrameDecoder::new(max_frame_len),
        }
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn dashboard(&self) -> &Arc<Dashboard> {
        self.session.dashboard()
    }

    /// Feed a chunk of received bytes and dispatch every frame it completes.
    ///
    /// All frames completed by one chunk are handled under a single store
    /// lock. A frame that fails dispatch is logged and produces no response.
    pub fn on_bytes(&mut self, data: &[u8]) -> EngineOutput {
        self.decoder.push(data);

        let mut output = EngineOutput::default();
        let dashboard = Arc::clone(&self.session.dashboard);
        let mut store = None;

        while let Some(frame) = self.decoder.next_frame() {
            output.frames += 1;
            let store = store.get_or_insert_with(|| dashboard.lock_store());

            match dashboard.dispatch(store, &frame) {
                Ok(reply) => {
                    debug!(
                        connection = %self.session.id,
                        command = reply.command.name(),
                        request_len = frame.wire_size(),
                        response_len = reply.bytes.len(),
                        "frame handled"
                    );
                    output.pause = output.pause.max(reply.pause);
                    output.responses.push(reply.bytes);
                }
                Err(err) => {
                    warn!(
                        connection = %self.session.id,
                        command = frame.command,
                        error = %err,
                        "frame rejected"
                    );
                }
            }
        }
        output
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Bytes held while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Discard any partial frame and end the session.
    pub fn close(mut self) {
        self.decoder.clear();
    }
}
