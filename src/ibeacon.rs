//! iBeacon advertisement decoding.
//!
//! An iBeacon scan record carries a fixed layout: BLE flags, then an Apple
//! manufacturer-specific block whose sub-type `0x02`/`0x15` marks the beacon.
//!
//! | Offset | Field                      |
//! |--------|----------------------------|
//! | 0-2    | BLE flags                  |
//! | 3      | manufacturer block length  |
//! | 4      | AD type (`0xFF`)           |
//! | 5-6    | manufacturer id            |
//! | 7      | beacon identifier (`0x02`) |
//! | 8      | sub-type length (`0x15`)   |
//! | 9-24   | proximity UUID             |
//! | 25-26  | major (big-endian)         |
//! | 27-28  | minor (big-endian)         |
//! | 29     | measured signal power      |
//!
//! See: https://en.wikipedia.org/wiki/IBeacon#Technical_details

use std::fmt;
use thiserror::Error;

/// Sub-type byte identifying an iBeacon inside Apple manufacturer data.
pub const IBEACON_IDENTIFIER: u8 = 0x02;

/// Length of the iBeacon body that follows the sub-type header.
pub const IBEACON_SUBTYPE_LENGTH: u8 = 0x15;

/// Minimum payload length needed to extract every iBeacon field.
pub const IBEACON_PAYLOAD_LEN: usize = 30;

const IDENTIFIER_INDEX: usize = 7;
const SUBTYPE_LENGTH_INDEX: usize = 8;
const UUID_START_INDEX: usize = 9;
const UUID_LEN: usize = 16;

// Offsets below are relative to the UUID start.
const MAJOR_OFFSET: usize = 16;
const MINOR_OFFSET: usize = 18;
const SIGNAL_POWER_OFFSET: usize = 20;

/// Reasons an advertisement did not yield a beacon.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Identifier bytes at offsets 7 and 8 do not match an iBeacon
    #[error("not an iBeacon advertisement")]
    NotIBeacon,
    /// Identifier matched but the payload ends before the last field
    #[error("iBeacon payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Identity broadcast by a single iBeacon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedBeacon {
    /// Proximity UUID as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, uppercase hex
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    /// Raw byte at offset 29, unsigned as broadcast
    pub signal_power: u8,
}

impl DecodedBeacon {
    /// Calibrated RSSI at one metre in dBm (the signal power byte read as two's complement).
    pub fn measured_power(&self) -> i8 {
        self.signal_power as i8
    }
}

impl fmt::Display for DecodedBeacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} major={} minor={} power={}dBm",
            self.uuid,
            self.major,
            self.minor,
            self.measured_power()
        )
    }
}

/// Check whether an advertisement payload carries the iBeacon identifier.
///
/// Only the identifier bytes are inspected; a payload can pass this check
/// and still be too short for [`decode`].
pub fn is_ibeacon(payload: &[u8]) -> bool {
    matches!(
        (payload.get(IDENTIFIER_INDEX), payload.get(SUBTYPE_LENGTH_INDEX)),
        (Some(&IBEACON_IDENTIFIER), Some(&IBEACON_SUBTYPE_LENGTH))
    )
}

/// Decode an iBeacon identity from a raw advertisement payload.
///
/// # Errors
/// - [`DecodeError::NotIBeacon`] if [`is_ibeacon`] rejects the payload
/// - [`DecodeError::Truncated`] if the payload is shorter than
///   [`IBEACON_PAYLOAD_LEN`] bytes
pub fn decode(payload: &[u8]) -> Result<DecodedBeacon, DecodeError> {
    if !is_ibeacon(payload) {
        return Err(DecodeError::NotIBeacon);
    }

    let Some(body) = payload.get(UUID_START_INDEX..IBEACON_PAYLOAD_LEN) else {
        return Err(DecodeError::Truncated {
            expected: IBEACON_PAYLOAD_LEN,
            actual: payload.len(),
        });
    };

    Ok(DecodedBeacon {
        uuid: format_uuid(&body[..UUID_LEN]),
        major: u16::from_be_bytes([body[MAJOR_OFFSET], body[MAJOR_OFFSET + 1]]),
        minor: u16::from_be_bytes([body[MINOR_OFFSET], body[MINOR_OFFSET + 1]]),
        signal_power: body[SIGNAL_POWER_OFFSET],
    })
}

/// Render 16 UUID bytes in the 8-4-4-4-12 grouping.
fn format_uuid(bytes: &[u8]) -> String {
    let hex = hex::encode_upper(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
