//! BlueZ D-Bus backend for iBeacon scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ only runs discovery while a discovery session is held, so the
//! scheduler's start/stop requests flip a watch flag and the discovery task
//! opens or drops the session to follow it.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, RawAdvertisement, ScanError, ScanSession,
    manufacturer_scan_record,
};
use crate::scheduler::RadioControl;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;

/// Delay before reopening discovery after BlueZ ended it unexpectedly
const DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(1);

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scan control backed by a flag the discovery task watches.
pub struct BluerRadio {
    enabled: watch::Sender<bool>,
}

impl BluerRadio {
    fn set_enabled(&self, enabled: bool) -> Result<(), ScanError> {
        self.enabled
            .send(enabled)
            .map_err(|_| ScanError::Bluetooth("discovery task has stopped".into()))
    }
}

impl RadioControl for BluerRadio {
    fn start_scan(&self) -> Result<(), ScanError> {
        self.set_enabled(true)
    }

    fn stop_scan(&self) -> Result<(), ScanError> {
        self.set_enabled(false)
    }
}

/// Connect to BlueZ and prepare LE discovery on the default adapter.
///
/// Discovery starts when the returned radio's `start_scan` is called.
pub async fn start_scan() -> Result<ScanSession, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
    let (enabled_tx, enabled_rx) = watch::channel(false);

    // Spawn a task that owns all Bluetooth state and runs the discovery loop
    tokio::spawn(async move {
        // Keep the D-Bus session alive by moving it into this task
        let _session = session;
        run_discovery(adapter, enabled_rx, tx).await;
        debug!("BlueZ discovery task finished");
    });

    Ok(ScanSession {
        radio: Arc::new(BluerRadio {
            enabled: enabled_tx,
        }),
        advertisements: rx,
    })
}

async fn run_discovery(
    adapter: Adapter,
    mut enabled: watch::Receiver<bool>,
    tx: mpsc::Sender<RawAdvertisement>,
) {
    loop {
        // Sender dropped means the radio handle is gone
        if enabled.wait_for(|on| *on).await.is_err() {
            return;
        }

        let mut events = match adapter.discover_devices_with_changes().await {
            Ok(events) => Box::pin(events),
            Err(e) => {
                warn!("Failed to start discovery: {e}");
                if enabled.wait_for(|on| !*on).await.is_err() {
                    return;
                }
                continue;
            }
        };
        debug!("Discovery on");

        loop {
            tokio::select! {
                changed = enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*enabled.borrow_and_update() {
                        break;
                    }
                }
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if forward_device(&adapter, address, &tx).await.is_err() {
                            debug!("Advertisement receiver closed, stopping discovery");
                            return;
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!("BlueZ ended discovery");
                        time::sleep(DISCOVERY_RETRY_DELAY).await;
                        break;
                    }
                }
            }
        }

        // Dropping the stream ends the discovery session
        drop(events);
        debug!("Discovery off");
    }
}

/// Send one scan record per manufacturer-data entry of the device.
///
/// Returns `Err` only when the advertisement receiver is gone; Bluetooth
/// errors for a single device are logged and skipped.
async fn forward_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<RawAdvertisement>,
) -> Result<(), ()> {
    let records = match device_scan_records(adapter, address).await {
        Ok(records) => records,
        Err(e) => {
            debug!("Skipping {address}: {e}");
            return Ok(());
        }
    };

    for record in records {
        tx.send(record).await.map_err(|_| ())?;
    }
    Ok(())
}

async fn device_scan_records(
    adapter: &Adapter,
    address: Address,
) -> Result<Vec<RawAdvertisement>, ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(Vec::new());
    };

    Ok(manufacturer_data
        .iter()
        .map(|(company_id, data)| manufacturer_scan_record(*company_id, data))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_toggles_flag() {
        let (enabled_tx, enabled_rx) = watch::channel(false);
        let radio = BluerRadio {
            enabled: enabled_tx,
        };

        radio.start_scan().unwrap();
        assert!(*enabled_rx.borrow());
        radio.stop_scan().unwrap();
        assert!(!*enabled_rx.borrow());
    }

    #[test]
    fn test_radio_reports_stopped_task() {
        let (enabled_tx, enabled_rx) = watch::channel(false);
        drop(enabled_rx);
        let radio = BluerRadio {
            enabled: enabled_tx,
        };

        assert!(matches!(radio.start_scan(), Err(ScanError::Bluetooth(_))));
    }
}
