//! Core application runner (business logic) for `ibeacon-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::dispatcher::BeaconListener;
use crate::manager::IBeaconManager;
use crate::output::{OutputFormat, OutputFormatter};
use crate::scanner::{Backend, ScanError, ScanSession};
use crate::scheduler::{DEFAULT_SCAN_INTERVAL, ScheduleError};
use crate::sighting::BeaconSighting;
use clap::Parser;
use log::info;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Time the radio spends scanning, and then idle, in each cycle.
    /// Accepts duration with suffix: 5s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "5s", value_parser = crate::duration::parse_duration)]
    pub scan_interval: Duration,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ibeacon")]
    pub influxdb_measurement: String,

    /// Verbose output, log scan cycle and decoding details to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            format: OutputFormat::default(),
            influxdb_measurement: "ibeacon".to_string(),
            verbose: false,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<ScanSession, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<ScanSession, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

fn write_sighting(
    formatter: &dyn OutputFormatter,
    sighting: &BeaconSighting,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(sighting);
    writeln!(out, "{line}")
}

/// Run the core processing loop, writing one formatted line per beacon to `out`.
///
/// Listening starts once the backend is open. It stops when the advertisement
/// stream ends, writing fails or `shutdown` resolves; in every case the radio
/// is asked to stop scanning before this returns.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let formatter = options.format.formatter(options.influxdb_measurement);

    let ScanSession {
        radio,
        mut advertisements,
    } = scanner.start_scan(options.backend).await?;
    info!(
        "Listening for iBeacons ({} backend, {:?} scan interval)",
        options.backend, options.scan_interval
    );

    let manager = IBeaconManager::with_interval(Some(radio), options.scan_interval);

    let (sightings_tx, mut sightings) = mpsc::unbounded_channel();
    let listener: Arc<dyn BeaconListener> = Arc::new(move |uuid: &str, major: u16, minor: u16| {
        // Receiver only goes away once the run loop has returned
        let _ = sightings_tx.send(BeaconSighting::new(uuid, major, minor));
    });
    manager.set_listener(Some(listener));

    let result = async {
        manager.start_listening()?;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                advertisement = advertisements.recv() => {
                    let Some(advertisement) = advertisement else {
                        info!("Advertisement stream ended");
                        break;
                    };
                    manager.on_advertisement(&advertisement);
                    while let Ok(sighting) = sightings.try_recv() {
                        write_sighting(formatter.as_ref(), &sighting, out)?;
                    }
                }
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
        Ok::<(), RunError>(())
    }
    .await;

    manager.stop_listening();
    manager.set_listener(None);
    info!("Stopped listening");

    result
}
