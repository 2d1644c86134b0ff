//! The device capability consumed by the shell.
//!
//! A [`Transport`] hands out connected [`Device`] handles. Everything below
//! the handle (radio link, protocol decoding) lives behind these traits.

use std::{collections::HashMap, fmt, sync::LazyLock};

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection to {id} failed: {reason}")]
    ConnectionFailed { id: String, reason: String },

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("device {0} is not connected")]
    NotConnected(String),

    #[error("unknown measurement {0:?}")]
    UnknownMeasurement(String),

    #[error("reading {measurement:?} failed: {reason}")]
    ReadFailed { measurement: String, reason: String },
}

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}-\d{3}$").expect("static pattern"));

/// Short code identifying a device within a session, e.g. `344-124`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse an id typed by the operator. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Result<DeviceId, String> {
        let text = text.trim();
        if ID_PATTERN.is_match(text) {
            Ok(DeviceId(text.to_string()))
        } else {
            Err(format!("expected an id like 344-124, got {text:?}"))
        }
    }

    /// Derive the id from an advertised name: the last word, cut to 7 characters.
    pub fn from_advertised_name(name: &str) -> DeviceId {
        let last = name.split_whitespace().last().unwrap_or_default();
        DeviceId(last.chars().take(7).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live connection to one physical unit.
pub trait Device {
    /// Advertised name, e.g. `Wireless Force Sensor 344-124`.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self) -> Result<(), Error>;

    fn sensor_list(&self) -> Vec<String>;

    /// Measurements of one sensor, or of the whole device when `sensor` is `None`.
    fn measurement_list(&self, sensor: Option<&str>) -> Vec<String>;

    fn measurement_unit(&self, measurement: &str) -> Result<String, Error>;

    fn read(&mut self, measurement: &str) -> Result<f64, Error>;

    fn read_many(&mut self, measurements: &[String]) -> Result<HashMap<String, f64>, Error>;
}

/// Source of device handles.
pub trait Transport {
    fn connect_by_id(&mut self, id: &DeviceId) -> Result<Box<dyn Device>, Error>;

    /// Advertised names of every device currently in range.
    fn scan(&mut self) -> Result<Vec<String>, Error>;
}
