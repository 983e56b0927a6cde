//! A beacon identity as reported by the listener.

use std::time::SystemTime;

/// One iBeacon sighting delivered to the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconSighting {
    /// Proximity UUID in 8-4-4-4-12 form
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    /// When the listener received the beacon
    pub timestamp: SystemTime,
}

impl BeaconSighting {
    /// Record a sighting received now.
    pub fn new(uuid: &str, major: u16, minor: u16) -> Self {
        Self {
            uuid: uuid.to_string(),
            major,
            minor,
            timestamp: SystemTime::now(),
        }
    }
}
