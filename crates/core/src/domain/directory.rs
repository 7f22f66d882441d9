//! Output device directory
//!
//! Enumerates output-capable devices and reads/writes the system default
//! output device through a [`PropertyBridge`].

use crate::domain::audio::{AudioError, Device, DeviceId, Result};
use crate::domain::property::{PropertyAddress, PropertyBridge, PropertyValue, Selector, MASTER_ELEMENT};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DeviceDirectory {
    bridge: Arc<dyn PropertyBridge>,
}

impl DeviceDirectory {
    pub fn new(bridge: Arc<dyn PropertyBridge>) -> Self {
        Self { bridge }
    }

    /// All devices with at least one output stream and a readable name
    pub fn list_output_devices(&self) -> Result<Vec<Device>> {
        let ids = self
            .bridge
            .get_ids(&PropertyAddress::system(Selector::Devices))?;

        let devices: Vec<Device> = ids
            .into_iter()
            .map(DeviceId::new)
            .filter(|&id| self.has_output_streams(id))
            .filter_map(|id| self.resolve(id))
            .collect();

        debug!(count = devices.len(), "Enumerated output devices");
        Ok(devices)
    }

    fn has_output_streams(&self, id: DeviceId) -> bool {
        let address = PropertyAddress::output(id.raw(), Selector::OutputStreams, MASTER_ELEMENT);
        match self.bridge.data_size(&address) {
            Ok(size) => size > 0,
            Err(e) => {
                debug!(device = %id, error = %e, "Skipping device, stream list unreadable");
                false
            }
        }
    }

    fn resolve(&self, id: DeviceId) -> Option<Device> {
        match self
            .bridge
            .get_text(&PropertyAddress::global(id.raw(), Selector::DeviceName))
        {
            Ok(name) => Some(Device::new(id, name)),
            Err(e) => {
                debug!(device = %id, error = %e, "Skipping device, name unreadable");
                None
            }
        }
    }

    /// Current system default output, if it is an enumerable output device
    pub fn default_output_device(&self) -> Result<Option<Device>> {
        let id = DeviceId::new(
            self.bridge
                .get_u32(&PropertyAddress::system(Selector::DefaultOutputDevice))?,
        );

        let device = self
            .list_output_devices()?
            .into_iter()
            .find(|device| device.id == id);
        if device.is_none() {
            warn!(device = %id, "Default output device is not an enumerated output");
        }
        Ok(device)
    }

    /// Make `device` the system default output
    pub fn set_default_output_device(&self, device: &Device) -> Result<()> {
        let address = PropertyAddress::system(Selector::DefaultOutputDevice);
        match self.bridge.set(&address, PropertyValue::U32(device.id.raw())) {
            Ok(()) => {
                info!(device = %device, "Default output device changed");
                Ok(())
            }
            Err(e) => {
                warn!(device = %device, error = %e, "Could not change default output device");
                Err(AudioError::Property(e))
            }
        }
    }

    /// Persistent UID of `device`, stable across reboots unlike its id
    pub fn device_uid(&self, device: &Device) -> Result<String> {
        self.bridge
            .get_text(&PropertyAddress::global(device.id.raw(), Selector::DeviceUid))
            .map_err(|source| AudioError::DeviceQuery {
                device: device.id,
                source,
            })
    }

    /// Find an output device by numeric id, UID or case-insensitive name
    pub fn find(&self, query: &str) -> Result<Device> {
        let devices = self.list_output_devices()?;
        let query = query.trim();

        if let Ok(raw) = query.parse::<u32>() {
            if let Some(device) = devices.iter().find(|d| d.id.raw() == raw) {
                return Ok(device.clone());
            }
        }

        if let Some(device) = devices
            .iter()
            .find(|d| self.device_uid(d).is_ok_and(|uid| uid == query))
        {
            return Ok(device.clone());
        }

        devices
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(query))
            .ok_or_else(|| AudioError::DeviceNotFound(query.to_string()))
    }
}
