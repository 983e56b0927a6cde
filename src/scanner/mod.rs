//! BLE scanner backends feeding raw advertisements to the beacon core.
//!
//! Each backend opens the radio without scanning, hands back a
//! [`RadioControl`] the scheduler uses to switch scanning on and off, and a
//! channel of raw scan records.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::scheduler::RadioControl;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// The bytes of a single advertisement event, as laid out on air.
pub type RawAdvertisement = Vec<u8>;

/// Apple Inc. Bluetooth SIG company identifier.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Flags AD structure (LE General Discoverable, BR/EDR not supported).
const FLAGS_AD_STRUCTURE: [u8; 3] = [0x02, 0x01, 0x06];

/// Channel buffer size for raw advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// A running backend: scan control plus the stream of advertisements it produces.
pub struct ScanSession {
    pub radio: Arc<dyn RadioControl>,
    pub advertisements: mpsc::Receiver<RawAdvertisement>,
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Rebuild a scan record from one manufacturer-data entry.
///
/// Backends that only expose parsed manufacturer data (BlueZ) use this to
/// present the same byte layout a raw advertisement has: the flags AD
/// structure followed by the manufacturer AD structure with its
/// little-endian company id.
pub fn manufacturer_scan_record(company_id: u16, data: &[u8]) -> RawAdvertisement {
    let mut record = Vec::with_capacity(FLAGS_AD_STRUCTURE.len() + 4 + data.len());
    record.extend_from_slice(&FLAGS_AD_STRUCTURE);
    // Length covers the type byte and the two company id bytes
    record.push(data.len().saturating_add(3).min(u8::MAX as usize) as u8);
    record.push(MANUFACTURER_DATA_TYPE);
    record.extend_from_slice(&company_id.to_le_bytes());
    record.extend_from_slice(data);
    record
}

/// Open the given backend, ready to scan once the scheduler asks it to.
pub async fn start_scan(backend: Backend) -> Result<ScanSession, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}
