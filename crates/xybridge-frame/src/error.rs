/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The trailing checksum does not match the frame contents.
    #[error("checksum mismatch (frame carries {expected:#06x}, computed {actual:#06x})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The declared frame length cannot belong to a legal frame.
    #[error("invalid frame length {len} (allowed 6..={max})")]
    InvalidLength { len: usize, max: usize },

    /// The payload does not fit in a 16-bit frame length.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the decoder can continue after this error by rescanning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::ChecksumMismatch { .. } | FrameError::InvalidLength { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
