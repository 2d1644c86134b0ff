//! Connected devices of one shell session.
//!
//! Liveness is refreshed lazily: every read access drops handles whose
//! `is_connected()` reports false before the entries are handed out. A
//! dropped device stays gone until it is connected again by id.

use log::{debug, info, warn};

use crate::device::{self, Device, DeviceId, Transport};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device {0} is already connected")]
    AlreadyConnected(DeviceId),

    #[error(transparent)]
    Device(#[from] device::Error),
}

/// A registry entry. The measurement list is captured at connect time and
/// stays fixed for the entry's lifetime.
pub struct Connected {
    id: DeviceId,
    handle: Box<dyn Device>,
    measurements: Vec<String>,
}

impl Connected {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn handle(&self) -> &dyn Device {
        self.handle.as_ref()
    }

    pub fn handle_mut(&mut self) -> &mut dyn Device {
        self.handle.as_mut()
    }

    pub fn measurements(&self) -> &[String] {
        &self.measurements
    }

    pub fn supports(&self, measurement: &str) -> bool {
        self.measurements.iter().any(|m| m == measurement)
    }
}

/// Devices in connection order.
#[derive(Default)]
pub struct Registry {
    devices: Vec<Connected>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    fn prune(&mut self) {
        self.devices.retain(|device| {
            let alive = device.handle.is_connected();
            if !alive {
                warn!("device {} is no longer connected", device.id);
            }
            alive
        });
    }

    /// Every device still connected, in connection order.
    pub fn active_devices(&mut self) -> &mut [Connected] {
        self.prune();
        &mut self.devices
    }

    pub fn ids(&mut self) -> Vec<DeviceId> {
        self.active_devices()
            .iter()
            .map(|device| device.id.clone())
            .collect()
    }

    pub fn is_empty(&mut self) -> bool {
        self.active_devices().is_empty()
    }

    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut Connected> {
        self.active_devices()
            .iter_mut()
            .find(|device| &device.id == id)
    }

    /// Connect `id` through `transport` and add it to the registry.
    ///
    /// Nothing is added when the transport fails. An id that is still
    /// connected is refused without touching the transport.
    pub fn connect(
        &mut self,
        transport: &mut dyn Transport,
        id: DeviceId,
    ) -> Result<&Connected, Error> {
        if self.get_mut(&id).is_some() {
            return Err(Error::AlreadyConnected(id));
        }

        let handle = transport.connect_by_id(&id)?;
        let measurements = handle.measurement_list(None);
        info!(
            "connected {} ({}) with {} measurements",
            id,
            handle.name(),
            measurements.len()
        );

        self.devices.push(Connected {
            id,
            handle,
            measurements,
        });
        Ok(&self.devices[self.devices.len() - 1])
    }

    /// Disconnect every device and empty the registry.
    pub fn disconnect_all(&mut self) {
        for mut device in self.devices.drain(..) {
            match device.handle.disconnect() {
                Ok(()) => debug!("disconnected {}", device.id),
                Err(e) => warn!("disconnecting {} failed: {}", device.id, e),
            }
        }
    }
}
