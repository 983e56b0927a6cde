use crate::ibeacon::IBEACON_PAYLOAD_LEN;
use crate::scanner::{APPLE_COMPANY_ID, manufacturer_scan_record};

/// UUID bytes `0x01..=0x10`, decoding to `01020304-0506-0708-090A-0B0C0D0E0F10`.
pub const SEQUENTIAL_UUID: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
];

/// Build a complete 30-byte iBeacon scan record.
pub fn ibeacon_payload(uuid: [u8; 16], major: u16, minor: u16, signal_power: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(23);
    body.extend_from_slice(&[0x02, 0x15]);
    body.extend_from_slice(&uuid);
    body.extend_from_slice(&major.to_be_bytes());
    body.extend_from_slice(&minor.to_be_bytes());
    body.push(signal_power);

    let payload = manufacturer_scan_record(APPLE_COMPANY_ID, &body);
    debug_assert_eq!(payload.len(), IBEACON_PAYLOAD_LEN);
    payload
}

/// A scan record that does not carry an iBeacon (Eddystone-like service data).
pub fn non_ibeacon_payload() -> Vec<u8> {
    vec![
        0x02, 0x01, 0x06, 0x03, 0x03, 0xAA, 0xFE, 0x11, 0x16, 0xAA, 0xFE, 0x10, 0x00, 0x03,
    ]
}
