// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! RTU frame codec.
//!
//! An RTU frame is laid out as
//!
//! ```text
//! ┌─────────┬──────────┬────────────────┬─────────┬─────────┐
//! │ address │ function │ payload ...    │ CRC lo  │ CRC hi  │
//! └─────────┴──────────┴────────────────┴─────────┴─────────┘
//! ```
//!
//! The CRC is CRC-16/MODBUS (seed 0xFFFF, reflected polynomial 0xA001)
//! computed over every byte before it and sent low byte first.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::ProtocolError;
use crate::types::EXCEPTION_BIT;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Smallest decodable frame: address, function, one byte, two CRC bytes.
pub const MIN_FRAME_LEN: usize = 5;

/// Computes the Modbus CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Encodes an RTU frame with its trailing CRC.
pub fn encode(address: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(address);
    frame.push(function);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Decodes and CRC-checks a received frame.
///
/// # Errors
///
/// `ShortResponse` below [`MIN_FRAME_LEN`] bytes, `CrcMismatch` when the
/// trailing CRC does not match the bytes before it.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::ShortResponse { len: bytes.len() });
    }

    let (body, tail) = bytes.split_at(bytes.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(ProtocolError::crc_mismatch(computed, received));
    }

    Ok(Frame {
        raw: bytes.to_vec(),
    })
}

/// Formats bytes as upper-case hex pairs separated by spaces.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Frame
// =============================================================================

/// A CRC-verified RTU frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Vec<u8>,
}

impl Frame {
    /// Address byte.
    #[inline]
    pub fn address(&self) -> u8 {
        self.raw[0]
    }

    /// Function byte as received, exception bit included.
    #[inline]
    pub fn function(&self) -> u8 {
        self.raw[1]
    }

    /// Returns `true` if the exception bit is set.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function() & EXCEPTION_BIT != 0
    }

    /// Exception code for exception frames.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.payload().first().copied()
        } else {
            None
        }
    }

    /// Bytes between the function byte and the CRC.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.raw[2..self.raw.len() - 2]
    }

    /// The complete frame as received, CRC included.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the frame and returns the complete received bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// Reads big-endian register pairs from the complete frame starting at
    /// `offset`, up to `max` values, ignoring the trailing CRC.
    pub fn words_from(&self, offset: usize, max: usize) -> Vec<u16> {
        let body = &self.raw[..self.raw.len() - 2];
        body.get(offset..)
            .unwrap_or_default()
            .chunks_exact(2)
            .take(max)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_known_vector() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16(&frame).to_le_bytes(), [0xC5, 0xCD]);
        assert_eq!(
            encode(0x01, 0x03, &[0x00, 0x00, 0x00, 0x0A]),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn test_decode_recovers_encoded_fields() {
        let payload = [0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x10, 0x00, 0x20];
        let frame = decode(&encode(0x07, 0x10, &payload)).unwrap();
        assert_eq!(frame.address(), 0x07);
        assert_eq!(frame.function(), 0x10);
        assert_eq!(frame.payload(), &payload);
        assert!(!frame.is_exception());
    }

    #[test]
    fn test_decode_short() {
        let err = decode(&[0x01, 0x03, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortResponse { len: 4 }));
    }

    #[test]
    fn test_decode_crc_mismatch() {
        let mut bytes = encode(0x01, 0x03, &[0x02, 0x00, 0x2A]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            ProtocolError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_decode_exception_frame() {
        let frame = decode(&encode(0x01, 0x90, &[0x02])).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.exception_code(), Some(0x02));
    }

    #[test]
    fn test_words_from_skips_crc() {
        let frame = decode(&encode(0x0F, 0x11, &[0, 0, 0, 0, 0, 0, 0x12, 0x34, 0x56])).unwrap();
        // Offset 8 of the complete frame holds 0x12 0x34; 0x56 is unpaired.
        assert_eq!(frame.words_from(8, 10), vec![0x1234]);
        assert_eq!(frame.words_from(40, 10), Vec::<u16>::new());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x0F, 0x11, 0xAB]), "0F 11 AB");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_empty_payload_is_short() {
        // Address, function and CRC only: below the minimum frame length.
        let bytes = encode(0x01, 0x03, &[]);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            ProtocolError::ShortResponse { len: 4 }
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Frames with at least one payload byte, up to the RTU maximum.
        fn frame_strategy() -> impl Strategy<Value = (u8, u8, Vec<u8>)> {
            (
                any::<u8>(),
                any::<u8>(),
                prop::collection::vec(any::<u8>(), 1..=250),
            )
        }

        proptest! {
            #[test]
            fn test_decode_inverts_encode((address, function, payload) in frame_strategy()) {
                let bytes = encode(address, function, &payload);
                prop_assert_eq!(bytes.len(), payload.len() + 4);

                let frame = decode(&bytes).unwrap();
                prop_assert_eq!(frame.address(), address);
                prop_assert_eq!(frame.function(), function);
                prop_assert_eq!(frame.payload(), payload.as_slice());
            }

            #[test]
            fn test_single_bit_flip_is_detected(
                (address, function, payload) in frame_strategy(),
                position in any::<prop::sample::Index>(),
                bit in 0u8..8,
            ) {
                let mut bytes = encode(address, function, &payload);
                let at = position.index(bytes.len());
                bytes[at] ^= 1 << bit;

                let result = decode(&bytes);
                prop_assert!(
                    matches!(result, Err(ProtocolError::CrcMismatch { .. })),
                    "flip at byte {} bit {} not detected: {:?}", at, bit, result
                );
            }
        }
    }
}
