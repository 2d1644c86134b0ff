//! Simulated wireless sensors.
//!
//! Stands in for the radio transport: a fixed catalog of units that can be
//! connected by id, read, unplugged and made to fail. Clones of a
//! [`SimTransport`] share unit state, so a test can keep one clone and drop
//! devices out from under a registry that holds handles from another.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::device::{Device, DeviceId, Error, Transport};

#[derive(Debug, Clone)]
pub struct SimSensor {
    pub name: String,
    /// `(measurement, unit)` pairs.
    pub measurements: Vec<(String, String)>,
}

impl SimSensor {
    pub fn new(name: &str, measurements: &[(&str, &str)]) -> SimSensor {
        SimSensor {
            name: name.to_string(),
            measurements: measurements
                .iter()
                .map(|(m, u)| (m.to_string(), u.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct UnitState {
    connected: AtomicBool,
    failing: AtomicBool,
    reads: AtomicU64,
}

#[derive(Debug, Clone)]
struct SimUnit {
    name: String,
    id: DeviceId,
    sensors: Vec<SimSensor>,
    state: Arc<UnitState>,
}

#[derive(Debug, Clone)]
pub struct SimTransport {
    units: Arc<Vec<SimUnit>>,
    latency: Duration,
    attempts: Arc<AtomicU64>,
}

impl Default for SimTransport {
    fn default() -> Self {
        SimTransport::new()
            .with_unit(
                "Wireless Force Sensor 344-124",
                vec![SimSensor::new("Force", &[("Force", "N")])],
            )
            .with_unit(
                "Wireless Force Sensor 125-500",
                vec![SimSensor::new("Force", &[("Force", "N")])],
            )
            .with_unit(
                "Wireless Temperature Sensor 402-881",
                vec![SimSensor::new("Temperature", &[("Temperature", "°C")])],
            )
    }
}

impl SimTransport {
    /// An empty catalog.
    pub fn new() -> SimTransport {
        SimTransport {
            units: Arc::new(Vec::new()),
            latency: Duration::ZERO,
            attempts: Arc::default(),
        }
    }

    pub fn with_unit(mut self, name: &str, sensors: Vec<SimSensor>) -> SimTransport {
        Arc::make_mut(&mut self.units).push(SimUnit {
            name: name.to_string(),
            id: DeviceId::from_advertised_name(name),
            sensors,
            state: Arc::default(),
        });
        self
    }

    /// Delay added to every read.
    pub fn with_latency(mut self, latency: Duration) -> SimTransport {
        self.latency = latency;
        self
    }

    /// Drop the unit's link. Existing handles report disconnected from now on.
    pub fn unplug(&self, id: &DeviceId) {
        if let Some(unit) = self.unit(id) {
            unit.state.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Make every subsequent read on the unit fail.
    pub fn fail_reads(&self, id: &DeviceId) {
        if let Some(unit) = self.unit(id) {
            unit.state.failing.store(true, Ordering::Relaxed);
        }
    }

    /// Successful reads on the unit so far, across all handles.
    pub fn reads(&self, id: &DeviceId) -> u64 {
        self.unit(id)
            .map_or(0, |unit| unit.state.reads.load(Ordering::Relaxed))
    }

    /// Calls to `connect_by_id` on this transport or any clone, found or not.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.unit(id)
            .is_some_and(|unit| unit.state.connected.load(Ordering::Relaxed))
    }

    fn unit(&self, id: &DeviceId) -> Option<&SimUnit> {
        self.units.iter().find(|unit| &unit.id == id)
    }
}

impl Transport for SimTransport {
    fn connect_by_id(&mut self, id: &DeviceId) -> Result<Box<dyn Device>, Error> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let unit = self.unit(id).ok_or_else(|| Error::ConnectionFailed {
            id: id.to_string(),
            reason: "no device with this id in range".to_string(),
        })?;

        unit.state.connected.store(true, Ordering::Relaxed);
        unit.state.failing.store(false, Ordering::Relaxed);
        log::debug!("sim: connected {}", unit.name);

        Ok(Box::new(SimDevice {
            name: unit.name.clone(),
            sensors: unit.sensors.clone(),
            state: unit.state.clone(),
            started: Instant::now(),
            latency: self.latency,
        }))
    }

    fn scan(&mut self) -> Result<Vec<String>, Error> {
        Ok(self.units.iter().map(|unit| unit.name.clone()).collect())
    }
}

pub struct SimDevice {
    name: String,
    sensors: Vec<SimSensor>,
    state: Arc<UnitState>,
    started: Instant,
    latency: Duration,
}

impl SimDevice {
    fn position(&self, measurement: &str) -> Option<usize> {
        self.sensors
            .iter()
            .flat_map(|sensor| sensor.measurements.iter())
            .position(|(m, _)| m == measurement)
    }

    fn check_link(&self, measurement: &str) -> Result<(), Error> {
        if !self.state.connected.load(Ordering::Relaxed) {
            return Err(Error::NotConnected(self.name.clone()));
        }
        if self.state.failing.load(Ordering::Relaxed) {
            return Err(Error::ReadFailed {
                measurement: measurement.to_string(),
                reason: "no response from device".to_string(),
            });
        }
        Ok(())
    }

    fn value(&self, index: usize) -> f64 {
        let t = self.started.elapsed().as_secs_f64();
        let phase = index as f64 * 0.7;
        let noise: f64 = rand::thread_rng().gen_range(-0.05..0.05);
        (t * 0.5 + phase).sin() + noise
    }
}

impl Device for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        self.state.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn sensor_list(&self) -> Vec<String> {
        self.sensors.iter().map(|sensor| sensor.name.clone()).collect()
    }

    fn measurement_list(&self, sensor: Option<&str>) -> Vec<String> {
        self.sensors
            .iter()
            .filter(|s| sensor.is_none_or(|name| s.name == name))
            .flat_map(|s| s.measurements.iter().map(|(m, _)| m.clone()))
            .collect()
    }

    fn measurement_unit(&self, measurement: &str) -> Result<String, Error> {
        self.sensors
            .iter()
            .flat_map(|sensor| sensor.measurements.iter())
            .find(|(m, _)| m == measurement)
            .map(|(_, unit)| unit.clone())
            .ok_or_else(|| Error::UnknownMeasurement(measurement.to_string()))
    }

    fn read(&mut self, measurement: &str) -> Result<f64, Error> {
        self.check_link(measurement)?;
        let index = self
            .position(measurement)
            .ok_or_else(|| Error::UnknownMeasurement(measurement.to_string()))?;
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.state.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.value(index))
    }

    fn read_many(&mut self, measurements: &[String]) -> Result<HashMap<String, f64>, Error> {
        if let Some(first) = measurements.first() {
            self.check_link(first)?;
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let values = measurements
            .iter()
            .map(|measurement| {
                let index = self
                    .position(measurement)
                    .ok_or_else(|| Error::UnknownMeasurement(measurement.clone()))?;
                Ok((measurement.clone(), self.value(index)))
            })
            .collect::<Result<HashMap<_, _>, Error>>()?;
        self.state.reads.fetch_add(1, Ordering::Relaxed);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> DeviceId {
        DeviceId::parse(text).unwrap()
    }

    #[test]
    fn connects_known_units_only() {
        let mut transport = SimTransport::default();
        let device = transport.connect_by_id(&id("344-124")).unwrap();
        assert_eq!(device.name(), "Wireless Force Sensor 344-124");
        assert!(device.is_connected());

        let err = transport.connect_by_id(&id("999-999")).err().unwrap();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }

    #[test]
    fn connect_attempts_are_shared_between_clones() {
        let mut transport = SimTransport::default();
        let observer = transport.clone();
        assert_eq!(observer.connect_attempts(), 0);

        transport.connect_by_id(&id("344-124")).unwrap();
        assert!(transport.connect_by_id(&id("999-999")).is_err());
        assert_eq!(observer.connect_attempts(), 2);
    }

    #[test]
    fn unplug_is_seen_by_existing_handles() {
        let mut transport = SimTransport::default();
        let observer = transport.clone();
        let mut device = transport.connect_by_id(&id("125-500")).unwrap();

        observer.unplug(&id("125-500"));
        assert!(!device.is_connected());
        assert!(matches!(device.read("Force"), Err(Error::NotConnected(_))));
    }

    #[test]
    fn failing_reads_are_reported() {
        let mut transport = SimTransport::default();
        let mut device = transport.connect_by_id(&id("344-124")).unwrap();
        transport.fail_reads(&id("344-124"));
        assert!(matches!(
            device.read_many(&["Force".to_string()]),
            Err(Error::ReadFailed { .. })
        ));
    }

    #[test]
    fn lists_measurements_and_units() {
        let mut transport = SimTransport::new().with_unit(
            "Smart Cart 412-123",
            vec![
                SimSensor::new("Position", &[("Position", "m"), ("Velocity", "m/s")]),
                SimSensor::new("Force", &[("Force", "N")]),
            ],
        );
        let mut device = transport.connect_by_id(&id("412-123")).unwrap();

        assert_eq!(device.sensor_list(), vec!["Position", "Force"]);
        assert_eq!(device.measurement_list(None), vec!["Position", "Velocity", "Force"]);
        assert_eq!(device.measurement_list(Some("Force")), vec!["Force"]);
        assert_eq!(device.measurement_unit("Velocity").unwrap(), "m/s");
        assert!(device.measurement_unit("Mass").is_err());

        let values = device
            .read_many(&["Velocity".to_string(), "Force".to_string()])
            .unwrap();
        assert_eq!(values.len(), 2);
        assert!(values["Force"].is_finite());
        assert_eq!(transport.reads(&id("412-123")), 1);
    }
}
