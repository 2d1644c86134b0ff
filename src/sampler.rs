//! One synchronized read across every participating device.

use std::fmt;

use chrono::Utc;
use log::debug;

use crate::{
    acquisition::CancelToken,
    device::{self, DeviceId},
    registry::Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no connected devices")]
    NoConnectedDevices,

    #[error("no devices support measurement {0}")]
    Unsupported(String),

    #[error("device {0} disconnected")]
    DeviceLost(DeviceId),

    #[error("device {id}: {source}")]
    Device { id: DeviceId, source: device::Error },

    #[error("device {id} returned no value for {measurement:?}")]
    MissingValue { id: DeviceId, measurement: String },
}

/// Which measurements take part in a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every measurement of every connected device.
    All,
    /// One measurement, on the devices that support it.
    Measurement(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str("all measurements"),
            Selector::Measurement(m) => write!(f, "{m}"),
        }
    }
}

/// One data column of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub device: DeviceId,
    pub measurement: String,
    pub unit: String,
}

impl Column {
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.device, self.measurement, self.unit)
    }
}

#[derive(Debug, Clone)]
struct Group {
    device: DeviceId,
    measurements: Vec<String>,
}

/// Column layout of one acquisition run, fixed before the first tick.
#[derive(Debug, Clone)]
pub struct Plan {
    selector: Selector,
    groups: Vec<Group>,
    columns: Vec<Column>,
}

impl Plan {
    /// Lay out the columns for `selector` over the currently connected devices.
    ///
    /// Fails when nothing is connected, or when no connected device supports
    /// the selected measurement. Devices without it are left out.
    pub fn new(registry: &mut Registry, selector: &Selector) -> Result<Plan, Error> {
        let devices = registry.active_devices();
        if devices.is_empty() {
            return Err(Error::NoConnectedDevices);
        }

        let mut groups = Vec::new();
        let mut columns = Vec::new();
        for device in devices.iter() {
            let measurements = match selector {
                Selector::All => device.measurements().to_vec(),
                Selector::Measurement(m) if device.supports(m) => vec![m.clone()],
                Selector::Measurement(_) => continue,
            };

            for measurement in &measurements {
                let unit = device
                    .handle()
                    .measurement_unit(measurement)
                    .map_err(|source| Error::Device {
                        id: device.id().clone(),
                        source,
                    })?;
                columns.push(Column {
                    device: device.id().clone(),
                    measurement: measurement.clone(),
                    unit,
                });
            }
            groups.push(Group {
                device: device.id().clone(),
                measurements,
            });
        }

        if let Selector::Measurement(m) = selector {
            if groups.is_empty() {
                return Err(Error::Unsupported(m.clone()));
            }
        }

        Ok(Plan {
            selector: selector.clone(),
            groups,
            columns,
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn labels(&self) -> Vec<String> {
        self.columns.iter().map(Column::label).collect()
    }

    /// Participating devices, in column order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.groups.iter().map(|group| &group.device)
    }

    /// Values per record, timestamp included.
    pub fn width(&self) -> usize {
        1 + self.columns.len()
    }
}

/// One time-stamped row of values, in plan column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: f64,
    pub values: Vec<f64>,
}

impl Record {
    pub fn width(&self) -> usize {
        1 + self.values.len()
    }
}

/// Outcome of one sampling attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Sampled(Record),
    /// Nothing was connected, no read was issued.
    Idle,
    /// Cancelled before every device was read.
    Cancelled,
}

/// Wall clock in seconds since the Unix epoch.
pub fn now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 * 1e-6
}

/// Read every device in `plan` once, one after another.
///
/// The record's timestamp is the midpoint between the clock readings taken
/// before the first read and after the last one.
pub fn sample_all(
    registry: &mut Registry,
    plan: &Plan,
    cancel: &CancelToken,
) -> Result<Tick, Error> {
    let devices = registry.active_devices();
    if devices.is_empty() {
        return Ok(Tick::Idle);
    }

    let mut values = Vec::with_capacity(plan.columns.len());
    let before = now();
    for group in &plan.groups {
        if cancel.is_cancelled() {
            return Ok(Tick::Cancelled);
        }

        let device = devices
            .iter_mut()
            .find(|device| device.id() == &group.device)
            .ok_or_else(|| Error::DeviceLost(group.device.clone()))?;
        let failed = |source| Error::Device {
            id: group.device.clone(),
            source,
        };

        match &plan.selector {
            Selector::All => {
                let read = device
                    .handle_mut()
                    .read_many(&group.measurements)
                    .map_err(failed)?;
                for measurement in &group.measurements {
                    let value = read.get(measurement).ok_or_else(|| Error::MissingValue {
                        id: group.device.clone(),
                        measurement: measurement.clone(),
                    })?;
                    values.push(*value);
                }
            }
            Selector::Measurement(m) => {
                values.push(device.handle_mut().read(m).map_err(failed)?);
            }
        }
    }
    let after = now();
    debug!("sampled {} values in {:.03}s", values.len(), after - before);

    Ok(Tick::Sampled(Record {
        timestamp: 0.5 * (before + after),
        values,
    }))
}
