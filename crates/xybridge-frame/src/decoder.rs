use bytes::BytesMut;
use tracing::{debug, warn};

use crate::codec::{decode_frame, Frame, MIN_FRAME_SIZE};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Counters describing what the decoder has seen on one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames that passed validation.
    pub frames: u64,
    /// Frames rejected by checksum.
    pub checksum_errors: u64,
    /// Start bytes rejected because their length field was out of range.
    pub length_errors: u64,
    /// Bytes discarded while resynchronizing.
    pub discarded_bytes: u64,
}

/// Accumulates stream bytes and yields validated frames.
///
/// Handles partial deliveries internally: bytes may arrive in chunks of any
/// size, and several frames may arrive in one chunk. Noise and corrupted
/// frames are skipped by rescanning for the next start marker.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder that accepts frames up to `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.min(max_frame_len * 2)),
            max_frame_len: max_frame_len.max(MIN_FRAME_SIZE),
            stats: DecoderStats::default(),
        }
    }

    /// Append newly received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Return the next validated frame, or `None` once more data is needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let before = self.buf.len();
            let result = decode_frame(&mut self.buf, self.max_frame_len);
            let consumed = before - self.buf.len();

            match result {
                Ok(Some(frame)) => {
                    self.count_discarded(consumed - frame.wire_size());
                    self.stats.frames += 1;
                    return Some(frame);
                }
                Ok(None) => {
                    self.count_discarded(consumed);
                    return None;
                }
                Err(err) => {
                    self.count_discarded(consumed);
                    match err {
                        FrameError::ChecksumMismatch { .. } => self.stats.checksum_errors += 1,
                        FrameError::InvalidLength { .. } => self.stats.length_errors += 1,
                        _ => {}
                    }
                    warn!(error = %err, buffered = self.buf.len(), "dropping frame start, resyncing");
                }
            }
        }
    }

    /// Bytes currently held while waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Largest frame this decoder will wait for.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Discard any partially received frame.
    pub fn clear(&mut self) {
        if !self.buf.is_empty() {
            debug!(discarded = self.buf.len(), "discarding partial frame");
        }
        self.buf.clear();
    }

    fn count_discarded(&mut self, n: usize) {
        self.stats.discarded_bytes += n as u64;
    }
}
