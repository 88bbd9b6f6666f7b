//! Start-byte, length and CRC-16 framing for the RemoteXY dashboard protocol.
//!
//! Every message on the wire is framed as:
//! - A 1-byte start marker (`0x55`) for stream synchronization
//! - A 2-byte little-endian total frame length (header and checksum included)
//! - A 1-byte command
//! - The command payload
//! - A 2-byte little-endian CRC-16 over everything before it
//!
//! The decoder resynchronizes on the start marker after noise or corruption,
//! so callers only ever see checksum-validated frames.

pub mod checksum;
pub mod codec;
pub mod decoder;
pub mod error;

#[cfg(feature = "async")]
pub mod async_codec;

pub use checksum::{crc16, verify};
pub use codec::{
    decode_frame, encode_frame, encode_frame_parts, Command, Frame, CHECKSUM_SIZE, HEADER_SIZE,
    MAX_FRAME_SIZE, MIN_FRAME_SIZE, START_BYTE,
};
pub use decoder::{DecoderStats, FrameDecoder};
pub use error::{FrameError, Result};

#[cfg(feature = "async")]
pub use async_codec::XyCodec;
