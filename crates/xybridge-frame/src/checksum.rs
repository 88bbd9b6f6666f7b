//! CRC-16 as used by the RemoteXY protocol (reflected polynomial `0xA001`,
//! initial register `0xFFFF`, no final XOR).

use crate::codec::CHECKSUM_SIZE;
use crate::error::{FrameError, Result};

const INITIAL: u16 = 0xFFFF;
const POLYNOMIAL: u16 = 0xA001;

/// Compute the checksum of `bytes`.
///
/// Callers checksum a frame prefix by slicing, e.g. `crc16(&frame[..len - 2])`.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = INITIAL;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Check the trailing little-endian checksum of a complete frame.
pub fn verify(frame: &[u8]) -> Result<()> {
    if frame.len() < CHECKSUM_SIZE {
        return Err(FrameError::InvalidLength {
            len: frame.len(),
            max: usize::from(u16::MAX),
        });
    }
    let split = frame.len() - CHECKSUM_SIZE;
    let expected = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let actual = crc16(&frame[..split]);
    if expected == actual {
        Ok(())
    } else {
        Err(FrameError::ChecksumMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out.extend_from_slice(&crc16(bytes).to_le_bytes());
        out
    }

    #[test]
    fn empty_input_keeps_initial_register() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn matches_reference_check_value() {
        // CRC-16/MODBUS check value.
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn sealed_bytes_verify() {
        for input in [&[0x55u8, 0x06][..], b"remotexy", &[0u8; 64], &[0xFF; 3]] {
            assert!(verify(&seal(input)).is_ok(), "input {input:?}");
        }
    }

    #[test]
    fn any_single_bit_flip_is_detected() {
        let sealed = seal(&[0x55, 0x08, 0x00, 0x80, 0x01, 0x00]);
        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut corrupted = sealed.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(verify(&corrupted), Err(FrameError::ChecksumMismatch { .. })),
                    "flip at byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn too_short_to_carry_checksum() {
        assert!(matches!(
            verify(&[0x55]),
            Err(FrameError::InvalidLength { len: 1, .. })
        ));
    }
}
