//! `tokio_util::codec` adapter over the resynchronizing decoder.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{decode_frame, encode_frame, Frame, MIN_FRAME_SIZE};
use crate::error::FrameError;

/// Tokio codec yielding validated [`Frame`]s.
///
/// Checksum and length errors never surface as stream errors; they are
/// logged and the codec keeps scanning, like [`crate::FrameDecoder`].
#[derive(Debug, Clone)]
pub struct XyCodec {
    max_frame_len: usize,
}

impl XyCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.max(MIN_FRAME_SIZE),
        }
    }
}

impl Decoder for XyCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match decode_frame(src, self.max_frame_len) {
                Ok(frame) => return Ok(frame),
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "dropping frame start, resyncing");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let frame = self.decode(src)?;
        if frame.is_none() {
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Frame> for XyCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item.command, item.payload.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::Command;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(256);
        let mut writer = FramedWrite::new(client, XyCodec::new(16));
        let mut reader = FramedRead::new(server, XyCodec::new(16));

        writer
            .send(Frame::new(Command::ReceiveInputVariables.as_byte(), vec![1u8, 2]))
            .await
            .unwrap();
        writer.send(Frame::request(Command::SendConfig)).await.unwrap();

        let first = reader.next().await.unwrap().unwrap();
        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), &[1, 2]);
        assert_eq!(second.command(), Some(Command::SendConfig));
    }

    #[test]
    fn decode_skips_corrupt_frame() {
        let mut src = BytesMut::new();
        encode_frame(0x80, &[7], &mut src).unwrap();
        src[4] ^= 0x10;
        encode_frame(0x80, &[8], &mut src).unwrap();

        let mut codec = XyCodec::new(16);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[8]);
    }

    #[test]
    fn decode_eof_discards_partial_frame() {
        let mut src = BytesMut::from(&[0x55, 0x08, 0x00][..]);
        let mut codec = XyCodec::new(16);
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }
}
