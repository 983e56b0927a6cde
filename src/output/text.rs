//! Plain text output, one beacon per line.

use crate::output::OutputFormatter;
use crate::sighting::BeaconSighting;

/// Writes `<uuid> <major> <minor>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, sighting: &BeaconSighting) -> String {
        format!("{} {} {}", sighting.uuid, sighting.major, sighting.minor)
    }
}
