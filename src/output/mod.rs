//! Output formatters for beacon sightings.
//!
//! This module provides a trait for formatting sightings and the formats the
//! command line can select: InfluxDB line protocol and plain text.

pub mod influxdb;
pub mod text;

use crate::sighting::BeaconSighting;

/// Trait for formatting sightings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a sighting as a single line, without the trailing newline.
    fn format(&self, sighting: &BeaconSighting) -> String;
}

/// Output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol (Telegraf compatible)
    #[default]
    Influxdb,
    /// `<uuid> <major> <minor>`
    Text,
}

impl OutputFormat {
    /// Build the formatter for this format.
    ///
    /// `measurement_name` is only used by the InfluxDB format.
    pub fn formatter(self, measurement_name: String) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(measurement_name)),
            OutputFormat::Text => Box::new(text::TextFormatter),
        }
    }
}
