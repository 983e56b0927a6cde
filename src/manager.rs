//! Host-facing entry point tying the scan cycle to beacon delivery.

use crate::dispatcher::{BeaconListener, EventDispatcher};
use crate::scheduler::{
    DEFAULT_SCAN_INTERVAL, RadioControl, ScanScheduler, ScanState, ScheduleError,
};
use std::sync::Arc;
use std::time::Duration;

/// Discovers iBeacons and reports them to a single listener.
///
/// The host owns the radio transport: it hands a [`RadioControl`] in at
/// construction and feeds each advertisement it receives to
/// [`IBeaconManager::on_advertisement`].
pub struct IBeaconManager {
    scheduler: ScanScheduler,
    dispatcher: Arc<EventDispatcher>,
}

impl IBeaconManager {
    /// Create a manager with the default 5 second scan interval.
    pub fn new(radio: Option<Arc<dyn RadioControl>>) -> Self {
        Self::with_interval(radio, DEFAULT_SCAN_INTERVAL)
    }

    pub fn with_interval(radio: Option<Arc<dyn RadioControl>>, interval: Duration) -> Self {
        Self {
            scheduler: ScanScheduler::new(radio, interval),
            dispatcher: Arc::new(EventDispatcher::new()),
        }
    }

    /// Register the listener for discovered beacons, replacing any previous one.
    /// `None` clears it.
    pub fn set_listener(&self, listener: Option<Arc<dyn BeaconListener>>) {
        self.dispatcher.set_listener(listener);
    }

    /// Start the duty-cycled scan.
    ///
    /// Fails only when neither construction nor this call happened inside a
    /// Tokio runtime.
    pub fn start_listening(&self) -> Result<(), ScheduleError> {
        self.scheduler.start_listening()
    }

    pub fn stop_listening(&self) {
        self.scheduler.stop_listening();
    }

    pub fn on_advertisement(&self, payload: &[u8]) {
        self.dispatcher.on_advertisement(payload);
    }

    pub fn state(&self) -> ScanState {
        self.scheduler.state()
    }

    /// Shared handle for delivering advertisements from another task.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }
}
