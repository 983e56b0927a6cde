//! Delivery of decoded beacons to the registered listener.

use crate::ibeacon;
use log::{debug, trace};
use parking_lot::RwLock;
use std::sync::Arc;

/// Receiver of discovered iBeacon identities.
///
/// Called from whichever task delivers advertisements, so implementations
/// should return quickly.
pub trait BeaconListener: Send + Sync {
    fn received_ibeacon(&self, uuid: &str, major: u16, minor: u16);
}

impl<F> BeaconListener for F
where
    F: Fn(&str, u16, u16) + Send + Sync,
{
    fn received_ibeacon(&self, uuid: &str, major: u16, minor: u16) {
        self(uuid, major, minor)
    }
}

/// Holds at most one listener and forwards decoded beacons to it.
#[derive(Default)]
pub struct EventDispatcher {
    listener: RwLock<Option<Arc<dyn BeaconListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered listener, or clear it with `None`.
    pub fn set_listener(&self, listener: Option<Arc<dyn BeaconListener>>) {
        *self.listener.write() = listener;
    }

    pub fn has_listener(&self) -> bool {
        self.listener.read().is_some()
    }

    /// Handle one raw advertisement.
    ///
    /// Payloads that are not iBeacons, or that are too short to decode, are
    /// dropped without notifying the listener.
    pub fn on_advertisement(&self, payload: &[u8]) {
        if !ibeacon::is_ibeacon(payload) {
            return;
        }

        let beacon = match ibeacon::decode(payload) {
            Ok(beacon) => beacon,
            Err(e) => {
                trace!("Dropping advertisement: {e}");
                return;
            }
        };
        debug!("iBeacon {beacon}");

        // Clone the handle out so the listener may re-register without deadlocking.
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.received_ibeacon(&beacon.uuid, beacon.major, beacon.minor);
        }
    }
}
