//! Device aggregation engine
//!
//! Presents one scalar volume and one mute flag for any output device. A
//! plain device is treated as a one-member aggregate; an aggregate device is
//! expanded to its active sub-devices. Reads average across controllable
//! channels and then across controllable members, writes fan out to every
//! controllable channel of every member.
//!
//! The engine holds no hardware state. Every call re-classifies the device
//! and re-probes its members, because sub-device membership and channel
//! layouts change at runtime.

use crate::domain::audio::{AudioError, ChannelIndex, Control, Device, DeviceClass, DeviceId, Result};
use crate::domain::channels::{ChannelDiscovery, ChannelSet, DEFAULT_PROBE_CHANNELS};
use crate::domain::property::{
    PropertyAddress, PropertyBridge, PropertyValue, Selector, MASTER_ELEMENT,
    TRANSPORT_TYPE_AGGREGATE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine tuning knobs, the `[engine]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Candidate channels probed on every device
    pub probe_channels: Vec<u32>,

    /// Use the vendor virtual main volume when a device exposes it
    pub virtual_main_volume: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            probe_channels: DEFAULT_PROBE_CHANNELS.to_vec(),
            virtual_main_volume: true,
        }
    }
}

/// Unified state of a device, recomputed on every read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeState {
    /// `None` when no member has a controllable volume
    pub volume: Option<f32>,
    pub muted: bool,
}

/// Per-member breakdown, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberReport {
    pub device: Device,
    pub uses_virtual_main_volume: bool,
    pub volume_channels: ChannelSet,
    pub mute_channels: ChannelSet,
    pub volume: Option<f32>,
    pub muted: bool,
}

/// Stateless volume/mute controller over a property bridge
pub struct VolumeEngine {
    bridge: Arc<dyn PropertyBridge>,
    discovery: ChannelDiscovery,
    virtual_main_volume: bool,
}

impl VolumeEngine {
    pub fn new(bridge: Arc<dyn PropertyBridge>, options: &EngineOptions) -> Self {
        let discovery = ChannelDiscovery::new(Arc::clone(&bridge), &options.probe_channels);
        Self {
            bridge,
            discovery,
            virtual_main_volume: options.virtual_main_volume,
        }
    }

    pub fn with_defaults(bridge: Arc<dyn PropertyBridge>) -> Self {
        Self::new(bridge, &EngineOptions::default())
    }

    pub fn bridge(&self) -> Arc<dyn PropertyBridge> {
        Arc::clone(&self.bridge)
    }

    /// Determine whether `device` is plain or aggregate
    ///
    /// Fails only when the transport type cannot be read. An aggregate whose
    /// sub-device list cannot be read is reported with no members.
    pub fn classify(&self, device: &Device) -> Result<DeviceClass> {
        let id = device.id;
        let transport = self
            .bridge
            .get_u32(&PropertyAddress::global(id.raw(), Selector::TransportType))
            .map_err(|source| AudioError::DeviceQuery { device: id, source })?;

        if transport != TRANSPORT_TYPE_AGGREGATE {
            return Ok(DeviceClass::Plain);
        }

        let address = PropertyAddress::global(id.raw(), Selector::ActiveSubDevices);
        match self.bridge.get_ids(&address) {
            Ok(ids) => Ok(DeviceClass::Aggregate(
                ids.into_iter().map(DeviceId::new).collect(),
            )),
            Err(e) => {
                warn!(device = %id, error = %e, "Could not read aggregate sub-device list");
                Ok(DeviceClass::Aggregate(Vec::new()))
            }
        }
    }

    /// Devices whose controls back `device`: itself, or its active sub-devices
    pub fn member_devices(&self, device: &Device) -> Result<Vec<Device>> {
        match self.classify(device)? {
            DeviceClass::Plain => Ok(vec![device.clone()]),
            DeviceClass::Aggregate(ids) => Ok(ids
                .into_iter()
                .map(|id| Device::new(id, self.device_name(id)))
                .collect()),
        }
    }

    fn member_ids(&self, device: &Device) -> Result<Vec<DeviceId>> {
        let members = match self.classify(device)? {
            DeviceClass::Plain => vec![device.id],
            DeviceClass::Aggregate(ids) => ids,
        };
        if members.is_empty() {
            debug!(device = %device.id, "Aggregate has no active sub-devices");
        }
        Ok(members)
    }

    fn device_name(&self, id: DeviceId) -> String {
        self.bridge
            .get_text(&PropertyAddress::global(id.raw(), Selector::DeviceName))
            .unwrap_or_else(|_| format!("Device {}", id))
    }

    /// Mean volume over controllable members, `None` if there are none
    pub fn read_volume(&self, device: &Device) -> Result<Option<f32>> {
        let members = self.member_ids(device)?;
        Ok(mean(members.into_iter().filter_map(|member| self.member_volume(member))))
    }

    /// Mean volume, or `0.0` with a warning when nothing is controllable
    ///
    /// Use [`read_volume`](Self::read_volume) to tell "no control" apart
    /// from a device that is really at zero.
    pub fn get_volume(&self, device: &Device) -> Result<f32> {
        match self.read_volume(device)? {
            Some(volume) => Ok(volume),
            None => {
                warn!(device = %device, "Device has no volume control, reporting 0.0");
                Ok(0.0)
            }
        }
    }

    /// Set the unified volume
    ///
    /// A target of zero engages mute instead of writing a zero gain, leaving
    /// the last non-zero level in hardware. A positive target clears mute
    /// first, then writes to every controllable channel of every member.
    pub fn set_volume(&self, device: &Device, target: f32) -> Result<()> {
        let target = if target.is_nan() {
            0.0
        } else {
            target.clamp(0.0, 1.0)
        };

        if target == 0.0 {
            if self.get_mute(device)? {
                debug!(device = %device, "Volume 0 requested, device already muted");
                return Ok(());
            }
            debug!(device = %device, "Volume 0 requested, engaging mute");
            return self.set_mute(device, true);
        }

        if self.get_mute(device)? {
            if let Err(e) = self.set_mute(device, false) {
                warn!(device = %device, error = %e, "Could not clear mute before raising volume");
            }
        }

        let mut written = 0usize;
        for member in self.member_ids(device)? {
            written += self.write_member_volume(member, target);
        }

        if written == 0 {
            return Err(AudioError::NoControllableChannel {
                device: device.id,
                control: Control::Volume,
            });
        }
        debug!(device = %device, target, written, "Volume set");
        Ok(())
    }

    /// True if any controllable mute channel of any member is muted
    pub fn get_mute(&self, device: &Device) -> Result<bool> {
        for member in self.member_ids(device)? {
            if self
                .discovery
                .mute_readings(member)
                .iter()
                .any(|(_, muted)| *muted)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Write `muted` to every mute-controllable channel of every member
    ///
    /// Members without a mute control are skipped. Fails with
    /// [`AudioError::NoControllableChannel`] only if nothing was written.
    pub fn set_mute(&self, device: &Device, muted: bool) -> Result<()> {
        let mut written = 0usize;
        for member in self.member_ids(device)? {
            for channel in self.discovery.discover(member, Control::Mute).iter() {
                if self.write_channel(member, Control::Mute, channel, PropertyValue::Flag(muted)) {
                    written += 1;
                }
            }
        }

        if written == 0 {
            return Err(AudioError::NoControllableChannel {
                device: device.id,
                control: Control::Mute,
            });
        }
        debug!(device = %device, muted, written, "Mute set");
        Ok(())
    }

    /// Invert the unified mute state and return the new state
    pub fn switch_mute(&self, device: &Device) -> Result<bool> {
        let muted = !self.get_mute(device)?;
        self.set_mute(device, muted)?;
        Ok(muted)
    }

    /// Volume and mute in one pass
    pub fn state(&self, device: &Device) -> Result<VolumeState> {
        Ok(VolumeState {
            volume: self.read_volume(device)?,
            muted: self.get_mute(device)?,
        })
    }

    /// What each member contributes to the unified state
    pub fn report(&self, device: &Device) -> Result<Vec<MemberReport>> {
        let members = self.member_devices(device)?;
        Ok(members
            .into_iter()
            .map(|member| {
                let id = member.id;
                let virtual_main = self.virtual_main_volume(id);
                let volume_readings = self.discovery.volume_readings(id);
                let mute_readings = self.discovery.mute_readings(id);
                MemberReport {
                    device: member,
                    uses_virtual_main_volume: virtual_main.is_some(),
                    volume_channels: volume_readings.iter().map(|(c, _)| *c).collect(),
                    mute_channels: mute_readings.iter().map(|(c, _)| *c).collect(),
                    volume: virtual_main
                        .or_else(|| mean(volume_readings.iter().map(|(_, v)| *v))),
                    muted: mute_readings.iter().any(|(_, m)| *m),
                }
            })
            .collect())
    }

    fn member_volume(&self, member: DeviceId) -> Option<f32> {
        if let Some(volume) = self.virtual_main_volume(member) {
            return Some(volume);
        }
        let readings = self.discovery.volume_readings(member);
        let volume = mean(readings.iter().map(|(_, volume)| *volume));
        if volume.is_none() {
            debug!(device = %member, "Member has no volume control, excluded from average");
        }
        volume
    }

    fn virtual_main_address(&self, member: DeviceId) -> Option<PropertyAddress> {
        if !self.virtual_main_volume {
            return None;
        }
        let address =
            PropertyAddress::output(member.raw(), Selector::VirtualMainVolume, MASTER_ELEMENT);
        self.bridge.has_property(&address).then_some(address)
    }

    fn virtual_main_volume(&self, member: DeviceId) -> Option<f32> {
        let address = self.virtual_main_address(member)?;
        match self.bridge.get_scalar(&address) {
            Ok(volume) if volume.is_finite() => Some(volume.clamp(0.0, 1.0)),
            Ok(_) => None,
            Err(e) => {
                debug!(device = %member, error = %e, "Virtual main volume unreadable, probing channels");
                None
            }
        }
    }

    /// Returns the number of successful writes
    fn write_member_volume(&self, member: DeviceId, target: f32) -> usize {
        if let Some(address) = self.virtual_main_address(member) {
            match self.bridge.set(&address, PropertyValue::Scalar(target)) {
                Ok(()) => return 1,
                Err(e) => {
                    debug!(device = %member, error = %e, "Virtual main volume write failed, probing channels");
                }
            }
        }

        self.discovery
            .volume_readings(member)
            .into_iter()
            .filter(|&(channel, _)| {
                self.write_channel(member, Control::Volume, channel, PropertyValue::Scalar(target))
            })
            .count()
    }

    fn write_channel(
        &self,
        member: DeviceId,
        control: Control,
        channel: ChannelIndex,
        value: PropertyValue,
    ) -> bool {
        let address = PropertyAddress::output(member.raw(), control.selector(), channel.0);
        match self.bridge.set(&address, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(device = %member, %channel, %control, error = %e, "Channel write failed");
                false
            }
        }
    }
}

/// Arithmetic mean, `None` for an empty input
fn mean(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f32, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f32)
}
