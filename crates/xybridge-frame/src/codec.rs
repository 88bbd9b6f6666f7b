use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::checksum::crc16;
use crate::error::{FrameError, Result};

/// Start marker identifying the beginning of a frame.
pub const START_BYTE: u8 = 0x55;

/// Frame header: start (1) + length (2) + command (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Trailing CRC-16, little-endian.
pub const CHECKSUM_SIZE: usize = 2;

/// Smallest legal frame: header + checksum, no payload.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Request the widget configuration.
    SendConfig = 0x00,
    /// Request input and output variables together.
    SendAllVariables = 0x40,
    /// Push input variables from the app.
    ReceiveInputVariables = 0x80,
    /// Poll output variables.
    SendOutputVariables = 0xC0,
}

impl Command {
    /// Map a wire byte to a known command.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Command::SendConfig),
            0x40 => Some(Command::SendAllVariables),
            0x80 => Some(Command::ReceiveInputVariables),
            0xC0 => Some(Command::SendOutputVariables),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Human-readable command name.
    pub fn name(self) -> &'static str {
        match self {
            Command::SendConfig => "SEND_CONFIG",
            Command::SendAllVariables => "SEND_ALL_VARIABLES",
            Command::ReceiveInputVariables => "RECEIVE_INPUT_VARIABLES",
            Command::SendOutputVariables => "SEND_OUTPUT_VARIABLES",
        }
    }
}

/// A checksum-validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command byte; may not map to a known [`Command`].
    pub command: u8,
    /// Bytes between the command and the checksum.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// A payload-less request for `command`.
    pub fn request(command: Command) -> Self {
        Self::new(command.as_byte(), Bytes::new())
    }

    /// The known command, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_byte(self.command)
    }

    /// The total wire size of this frame (header + payload + checksum).
    pub fn wire_size(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────┬───────────┬─────────┬──────────────┬───────────┐
/// │ Start │ Length    │ Command │ Payload      │ CRC-16    │
/// │ 0x55  │ (2B LE)   │ (1B)    │ (Length - 6) │ (2B LE)   │
/// └───────┴───────────┴─────────┴──────────────┴───────────┘
/// ```
pub fn encode_frame(command: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    encode_frame_parts(command, &[payload], dst)
}

/// Encode a frame whose payload is the concatenation of `parts`.
pub fn encode_frame_parts(command: u8, parts: &[&[u8]], dst: &mut BytesMut) -> Result<()> {
    let payload_len: usize = parts.iter().map(|part| part.len()).sum();
    let total = MIN_FRAME_SIZE + payload_len;
    if total > MAX_FRAME_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: MAX_FRAME_SIZE - MIN_FRAME_SIZE,
        });
    }

    let start = dst.len();
    dst.reserve(total);
    dst.put_u8(START_BYTE);
    dst.put_u16_le(total as u16);
    dst.put_u8(command);
    for part in parts {
        dst.put_slice(part);
    }
    let crc = crc16(&dst[start..]);
    dst.put_u16_le(crc);
    Ok(())
}

/// Decode one frame from the front of a buffer.
///
/// Leading bytes that are not the start marker are discarded first. Returns
/// `Ok(None)` if the buffer doesn't contain a complete frame yet. On success,
/// consumes the frame bytes (checksum included) from the buffer.
///
/// A declared length outside `6..=max_frame_len` or a checksum mismatch is
/// reported as an error *after* the offending start byte has been dropped, so
/// calling again resumes the scan further along the stream.
pub fn decode_frame(src: &mut BytesMut, max_frame_len: usize) -> Result<Option<Frame>> {
    match src.iter().position(|&byte| byte == START_BYTE) {
        Some(0) => {}
        Some(skip) => src.advance(skip),
        None => {
            src.clear();
            return Ok(None);
        }
    }

    if src.len() < MIN_FRAME_SIZE {
        return Ok(None); // Need more data
    }

    let len = usize::from(u16::from_le_bytes([src[1], src[2]]));
    if !(MIN_FRAME_SIZE..=max_frame_len).contains(&len) {
        src.advance(1);
        return Err(FrameError::InvalidLength {
            len,
            max: max_frame_len,
        });
    }

    if src.len() < len {
        return Ok(None); // Need more data
    }

    let body = len - CHECKSUM_SIZE;
    let expected = u16::from_le_bytes([src[body], src[body + 1]]);
    let actual = crc16(&src[..body]);
    if expected != actual {
        src.advance(1);
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let mut raw = src.split_to(len);
    let command = raw[3];
    raw.advance(HEADER_SIZE);
    raw.truncate(len - MIN_FRAME_SIZE);

    Ok(Some(Frame {
        command,
        payload: raw.freeze(),
    }))
}
