// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device identification payload decoder.
//!
//! The identification reply (function 0x11) has a fixed layout. Offsets are
//! counted from the address byte of the complete frame:
//!
//! ```text
//!  0      1      2..3    4..7    8..9   10..11  12..15      16..19  20..23   28..31
//! ┌──────┬──────┬───────┬───────┬──────┬──────┬───────────┬───────┬────────┬─────────┐
//! │ addr │ 0x11 │ hdr   │ magic │ sw   │ hw   │ ver status│ status│ I/O    │ product │
//! └──────┴──────┴───────┴───────┴──────┴──────┴───────────┴───────┴────────┴─────────┘
//! ```
//!
//! Multi-byte fields are transmitted low byte first. A field that lies
//! beyond the received bytes is left out; a partial identity is still
//! returned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{to_hex, Frame};

/// Magic number reported by supported controllers.
pub const EXPECTED_MAGIC: u32 = 0x7741_8799;

// =============================================================================
// Version
// =============================================================================

/// Firmware or hardware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major number.
    pub major: u8,
    /// Minor number.
    pub minor: u8,
}

impl Version {
    fn from_le(bytes: [u8; 2]) -> Self {
        Self {
            major: bytes[1],
            minor: bytes[0],
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}.{:02}", self.major, self.minor)
    }
}

// =============================================================================
// IoCounts
// =============================================================================

/// Channel counts of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoCounts {
    /// Digital inputs.
    pub digital_inputs: u8,
    /// Digital outputs.
    pub digital_outputs: u8,
    /// Analog inputs.
    pub analog_inputs: u8,
    /// Analog outputs.
    pub analog_outputs: u8,
}

impl fmt::Display for IoCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.digital_inputs, self.digital_outputs, self.analog_inputs, self.analog_outputs
        )
    }
}

// =============================================================================
// DeviceIdentity
// =============================================================================

/// Decoded identification reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Address byte of the reply.
    pub address: Option<u8>,
    /// Magic number.
    pub magic: Option<u32>,
    /// Software version.
    pub software_version: Option<Version>,
    /// Hardware version.
    pub hardware_version: Option<Version>,
    /// Version status word, as sent.
    pub version_status: Option<u32>,
    /// Status text, or `0x`-prefixed hex when not printable.
    pub status: Option<String>,
    /// I/O channel counts.
    pub io: Option<IoCounts>,
    /// Product identifier.
    pub product_id: Option<u32>,
    /// The bytes the identity was decoded from.
    pub raw: Vec<u8>,
}

impl DeviceIdentity {
    /// Decodes an identification reply.
    ///
    /// `bytes` starts at the address byte. Decoding never fails.
    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            address: bytes.first().copied(),
            magic: field::<4>(bytes, 4).map(u32::from_le_bytes),
            software_version: field::<2>(bytes, 8).map(Version::from_le),
            hardware_version: field::<2>(bytes, 10).map(Version::from_le),
            version_status: field::<4>(bytes, 12).map(u32::from_be_bytes),
            status: field::<4>(bytes, 16).map(status_text),
            io: field::<4>(bytes, 20).map(|b| IoCounts {
                digital_inputs: b[3],
                digital_outputs: b[2],
                analog_inputs: b[1],
                analog_outputs: b[0],
            }),
            product_id: field::<4>(bytes, 28).map(u32::from_le_bytes),
            raw: bytes.to_vec(),
        }
    }

    /// Decodes a CRC-checked frame. The CRC bytes are kept in `raw` but
    /// never read as fields.
    pub fn from_frame(frame: &Frame) -> Self {
        let raw = frame.raw();
        let mut identity = Self::decode(&raw[..raw.len().saturating_sub(2)]);
        identity.raw = raw.to_vec();
        identity
    }

    /// Returns `true` if the magic number identifies a supported controller.
    pub fn is_recognized(&self) -> bool {
        self.magic == Some(EXPECTED_MAGIC)
    }

    /// Raw bytes as `XX XX ..`.
    pub fn raw_hex(&self) -> String {
        to_hex(&self.raw)
    }

    /// Decoded fields as label/value pairs, in wire order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(magic) = self.magic {
            out.push(("Magic", format!("{:#010X}", magic)));
        }
        if let Some(v) = self.software_version {
            out.push(("Software", v.to_string()));
        }
        if let Some(v) = self.hardware_version {
            out.push(("Hardware", v.to_string()));
        }
        if let Some(v) = self.version_status {
            out.push(("Version status", format!("{:#010X} ({})", v, v)));
        }
        if let Some(status) = &self.status {
            out.push(("Status", status.clone()));
        }
        if let Some(io) = self.io {
            out.push(("DI/DO/AI/AO", io.to_string()));
        }
        if let Some(id) = self.product_id {
            out.push(("Product ID", format!("{:#010X}", id)));
        }
        out
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields();
        if fields.is_empty() {
            return write!(f, "(no identity fields) {}", self.raw_hex());
        }
        let parts: Vec<String> = fields
            .into_iter()
            .map(|(label, value)| format!("{}: {}", label, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset + N)?.try_into().ok()
}

/// Status word: printable ASCII when possible, otherwise hex.
fn status_text(le: [u8; 4]) -> String {
    let mut be = le;
    be.reverse();
    let text: String = be
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| b as char)
        .collect();
    let text = text.trim();
    if text.is_empty() {
        format!("0x{:08X}", u32::from_be_bytes(be))
    } else {
        text.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 38] = [
        0x0F, 0x11, 0x0F, 0xFF, 0x99, 0x87, 0x41, 0x77, 0x07, 0x00, 0x01, 0x01, 0x0F, 0x00, 0x00,
        0x00, 0x2F, 0x48, 0x50, 0x4F, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFB, 0x5F,
        0x19, 0x63, 0x19, 0x62, 0xB1, 0xB2, 0xEB, 0xD7,
    ];

    #[test]
    fn test_decode_sample() {
        let id = DeviceIdentity::decode(&SAMPLE);

        assert_eq!(id.address, Some(0x0F));
        assert_eq!(id.magic, Some(EXPECTED_MAGIC));
        assert!(id.is_recognized());
        assert_eq!(id.software_version.unwrap().to_string(), "V00.07");
        assert_eq!(id.hardware_version.unwrap().to_string(), "V01.01");
        assert_eq!(id.status.as_deref(), Some("OPH/"));
        assert_eq!(id.io.unwrap().to_string(), "0/32/0/0");
        assert_eq!(id.product_id, Some(0x6319_5FFB));
        assert_eq!(id.raw.len(), 38);
    }

    #[test]
    fn test_decode_partial() {
        let id = DeviceIdentity::decode(&SAMPLE[..12]);
        assert!(id.magic.is_some());
        assert!(id.hardware_version.is_some());
        assert_eq!(id.version_status, None);
        assert_eq!(id.status, None);
        assert_eq!(id.io, None);
        assert_eq!(id.product_id, None);
    }

    #[test]
    fn test_decode_empty() {
        let id = DeviceIdentity::decode(&[]);
        assert_eq!(id.address, None);
        assert!(id.fields().is_empty());
    }

    #[test]
    fn test_status_hex_fallback() {
        assert_eq!(status_text([0x01, 0x02, 0x00, 0x00]), "0x00000201");
        assert_eq!(status_text([0x4B, 0x4F, 0x00, 0x00]), "OK");
    }

    #[test]
    fn test_from_frame_skips_crc() {
        let bytes = crate::codec::encode(0x01, 0x11, &[0x00, 0x00, 0x99, 0x87, 0x41, 0x77]);
        let frame = crate::codec::decode(&bytes).unwrap();
        let id = DeviceIdentity::from_frame(&frame);
        assert_eq!(id.magic, Some(EXPECTED_MAGIC));
        assert_eq!(id.software_version, None);
        assert_eq!(id.raw, bytes);
    }
}
