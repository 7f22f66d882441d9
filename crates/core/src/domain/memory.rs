//! In-memory property bridge
//!
//! [`MemoryBridge`] stores properties in a map keyed by [`PropertyAddress`],
//! records every successful write and can inject failures. [`DeviceFixture`]
//! describes a device the way the OS would expose it, so a whole topology of
//! plain and aggregate devices can be installed in a few lines.

use crate::domain::property::{
    four_char_code, ObjectId, PropertyAddress, PropertyBridge, PropertyError, PropertyValue,
    Result, Selector, MASTER_ELEMENT, TRANSPORT_TYPE_AGGREGATE, TRANSPORT_TYPE_BUILT_IN,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// OS status reported for injected failures ('what')
pub const SIMULATED_FAILURE_STATUS: i32 = four_char_code(b"what") as i32;

/// A successful write, in call order
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyWrite {
    pub address: PropertyAddress,
    pub value: PropertyValue,
}

#[derive(Debug, Clone)]
struct Slot {
    /// `None` marks a phantom property: it exists but cannot be read
    value: Option<PropertyValue>,
    writable: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<PropertyAddress, Slot>,
    failing: HashSet<PropertyAddress>,
    writes: Vec<PropertyWrite>,
}

/// Property bridge backed by a map
#[derive(Debug, Default)]
pub struct MemoryBridge {
    state: Mutex<MemoryState>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge with the given devices installed and an optional default output
    pub fn with_devices(default_output: Option<ObjectId>, devices: &[DeviceFixture]) -> Self {
        let bridge = Self::new();
        for device in devices {
            bridge.install(device);
        }
        if let Some(id) = default_output {
            bridge.set_default_output(id);
        }
        bridge
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a readable, writable property
    pub fn insert(&self, address: PropertyAddress, value: PropertyValue) {
        self.lock().slots.insert(
            address,
            Slot {
                value: Some(value),
                writable: true,
            },
        );
    }

    /// Insert a property that rejects writes
    pub fn insert_read_only(&self, address: PropertyAddress, value: PropertyValue) {
        self.lock().slots.insert(
            address,
            Slot {
                value: Some(value),
                writable: false,
            },
        );
    }

    /// Insert a property that exists but fails every read
    pub fn insert_phantom(&self, address: PropertyAddress) {
        self.lock().slots.insert(
            address,
            Slot {
                value: None,
                writable: true,
            },
        );
    }

    /// Make every call against `address` fail with an OS status
    pub fn fail(&self, address: PropertyAddress) {
        self.lock().failing.insert(address);
    }

    pub fn heal(&self, address: &PropertyAddress) {
        self.lock().failing.remove(address);
    }

    /// Current stored value, bypassing failure injection
    pub fn value(&self, address: &PropertyAddress) -> Option<PropertyValue> {
        self.lock()
            .slots
            .get(address)
            .and_then(|slot| slot.value.clone())
    }

    /// Every successful write since creation or the last [`clear_writes`](Self::clear_writes)
    pub fn writes(&self) -> Vec<PropertyWrite> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Install a device and append it to the system device list
    pub fn install(&self, device: &DeviceFixture) {
        let id = device.id;
        let devices_address = PropertyAddress::system(Selector::Devices);

        let mut devices = match self.value(&devices_address) {
            Some(PropertyValue::Ids(ids)) => ids,
            _ => Vec::new(),
        };
        if !devices.contains(&id) {
            devices.push(id);
        }
        self.insert_read_only(devices_address, PropertyValue::Ids(devices));

        self.insert_read_only(
            PropertyAddress::global(id, Selector::TransportType),
            PropertyValue::U32(device.transport),
        );
        if let Some(name) = &device.name {
            self.insert_read_only(
                PropertyAddress::global(id, Selector::DeviceName),
                PropertyValue::Text(name.clone()),
            );
        }
        self.insert_read_only(
            PropertyAddress::global(id, Selector::DeviceUid),
            PropertyValue::Text(format!("aggvol-memory-{}", id)),
        );
        self.insert_read_only(
            PropertyAddress::output(id, Selector::OutputStreams, MASTER_ELEMENT),
            PropertyValue::Ids(device.output_streams.clone()),
        );
        if let Some(sub_devices) = &device.sub_devices {
            self.insert_read_only(
                PropertyAddress::global(id, Selector::ActiveSubDevices),
                PropertyValue::Ids(sub_devices.clone()),
            );
        }
        for &(channel, volume) in &device.volumes {
            self.insert(
                PropertyAddress::output(id, Selector::VolumeScalar, channel),
                PropertyValue::Scalar(volume),
            );
        }
        for &(channel, muted) in &device.mutes {
            self.insert(
                PropertyAddress::output(id, Selector::Mute, channel),
                PropertyValue::Flag(muted),
            );
        }
        for &channel in &device.phantom_volumes {
            self.insert_phantom(PropertyAddress::output(id, Selector::VolumeScalar, channel));
        }
        for &channel in &device.phantom_mutes {
            self.insert_phantom(PropertyAddress::output(id, Selector::Mute, channel));
        }
        if let Some(volume) = device.virtual_main_volume {
            self.insert(
                PropertyAddress::output(id, Selector::VirtualMainVolume, MASTER_ELEMENT),
                PropertyValue::Scalar(volume),
            );
        }
    }

    /// Point the system default output at `id`
    pub fn set_default_output(&self, id: ObjectId) {
        self.insert(
            PropertyAddress::system(Selector::DefaultOutputDevice),
            PropertyValue::U32(id),
        );
    }

    /// Drop a device from the system list, leaving its properties behind
    pub fn unplug(&self, id: ObjectId) {
        let devices_address = PropertyAddress::system(Selector::Devices);
        if let Some(PropertyValue::Ids(mut ids)) = self.value(&devices_address) {
            ids.retain(|&other| other != id);
            self.insert_read_only(devices_address, PropertyValue::Ids(ids));
        }
    }

    fn read_slot(&self, address: &PropertyAddress) -> Result<PropertyValue> {
        let state = self.lock();
        if state.failing.contains(address) {
            return Err(simulated_failure(address));
        }
        match state.slots.get(address) {
            None => Err(PropertyError::NotFound { address: *address }),
            Some(Slot { value: None, .. }) => Err(simulated_failure(address)),
            Some(Slot {
                value: Some(value), ..
            }) => Ok(value.clone()),
        }
    }
}

fn simulated_failure(address: &PropertyAddress) -> PropertyError {
    PropertyError::Os {
        address: *address,
        status: SIMULATED_FAILURE_STATUS,
    }
}

impl PropertyBridge for MemoryBridge {
    fn has_property(&self, address: &PropertyAddress) -> bool {
        self.lock().slots.contains_key(address)
    }

    fn data_size(&self, address: &PropertyAddress) -> Result<u32> {
        self.read_slot(address).map(|value| value.byte_size())
    }

    fn get(&self, address: &PropertyAddress) -> Result<PropertyValue> {
        let value = self.read_slot(address)?;
        trace!(%address, ?value, "memory read");
        Ok(value)
    }

    fn set(&self, address: &PropertyAddress, value: PropertyValue) -> Result<()> {
        let mut state = self.lock();
        if state.failing.contains(address) {
            return Err(simulated_failure(address));
        }

        let expected = address.selector.value_kind();
        if value.kind() != expected {
            return Err(PropertyError::TypeMismatch {
                address: *address,
                expected,
            });
        }

        let slot = state
            .slots
            .get_mut(address)
            .ok_or(PropertyError::NotFound { address: *address })?;
        if !slot.writable {
            return Err(PropertyError::NotWritable { address: *address });
        }
        if slot.value.is_none() {
            return Err(simulated_failure(address));
        }
        slot.value = Some(value.clone());

        trace!(%address, ?value, "memory write");
        state.writes.push(PropertyWrite {
            address: *address,
            value,
        });
        Ok(())
    }
}

/// Description of a device as the OS exposes it
#[derive(Debug, Clone)]
pub struct DeviceFixture {
    pub id: ObjectId,
    pub name: Option<String>,
    pub transport: u32,
    pub output_streams: Vec<ObjectId>,
    pub sub_devices: Option<Vec<ObjectId>>,
    pub volumes: Vec<(u32, f32)>,
    pub mutes: Vec<(u32, bool)>,
    pub phantom_volumes: Vec<u32>,
    pub phantom_mutes: Vec<u32>,
    pub virtual_main_volume: Option<f32>,
}

impl DeviceFixture {
    /// Built-in device with one output stream and no controls yet
    pub fn plain(id: ObjectId, name: &str) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            transport: TRANSPORT_TYPE_BUILT_IN,
            output_streams: vec![id + 10_000],
            sub_devices: None,
            volumes: Vec::new(),
            mutes: Vec::new(),
            phantom_volumes: Vec::new(),
            phantom_mutes: Vec::new(),
            virtual_main_volume: None,
        }
    }

    /// Aggregate device whose active sub-devices are `members`
    pub fn aggregate(id: ObjectId, name: &str, members: &[ObjectId]) -> Self {
        Self {
            transport: TRANSPORT_TYPE_AGGREGATE,
            sub_devices: Some(members.to_vec()),
            ..Self::plain(id, name)
        }
    }

    pub fn with_volume(mut self, channel: u32, volume: f32) -> Self {
        self.volumes.push((channel, volume));
        self
    }

    pub fn with_mute(mut self, channel: u32, muted: bool) -> Self {
        self.mutes.push((channel, muted));
        self
    }

    /// Stereo legs 1 and 2 with volume and an unmuted mute control each
    pub fn with_stereo(self, left: f32, right: f32) -> Self {
        self.with_volume(1, left)
            .with_volume(2, right)
            .with_mute(1, false)
            .with_mute(2, false)
    }

    pub fn with_phantom_volume(mut self, channel: u32) -> Self {
        self.phantom_volumes.push(channel);
        self
    }

    pub fn with_phantom_mute(mut self, channel: u32) -> Self {
        self.phantom_mutes.push(channel);
        self
    }

    pub fn with_virtual_main_volume(mut self, volume: f32) -> Self {
        self.virtual_main_volume = Some(volume);
        self
    }

    pub fn with_transport(mut self, transport: u32) -> Self {
        self.transport = transport;
        self
    }

    /// Input-only device: empty output stream list
    pub fn without_outputs(mut self) -> Self {
        self.output_streams.clear();
        self
    }

    /// Device whose name property is missing
    pub fn unnamed(mut self) -> Self {
        self.name = None;
        self
    }
}
