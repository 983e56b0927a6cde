//! `ibeacon-listener` library.
//!
//! The core is three pieces: [`ibeacon`] decodes raw advertisements,
//! [`scheduler`] duty-cycles the radio scan, and [`dispatcher`] forwards
//! decoded beacons to a single listener. [`IBeaconManager`] ties them together
//! for a host that owns the radio transport.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The run loop lives in [`crate::app`] where it can be tested
//! deterministically with an injected scanner and output stream.

pub mod app;
pub mod dispatcher;
pub mod duration;
pub mod ibeacon;
pub mod manager;
pub mod output;
pub mod scanner;
pub mod scheduler;
pub mod sighting;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use dispatcher::{BeaconListener, EventDispatcher};
pub use duration::parse_duration;
pub use ibeacon::{DecodeError, DecodedBeacon, decode, is_ibeacon};
pub use manager::IBeaconManager;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use scanner::{Backend, RawAdvertisement, ScanError, ScanSession};
pub use scheduler::{
    DEFAULT_SCAN_INTERVAL, RadioControl, ScanScheduler, ScanState, ScheduleError,
};
pub use sighting::BeaconSighting;
