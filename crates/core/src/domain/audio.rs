//! Audio device models and errors
//!
//! This module defines the platform-agnostic view of output devices: their
//! identity, their class (plain or aggregate) and the controls the engine
//! drives. Platform transports live in the `infra` crate.

use crate::domain::property::{ObjectId, PropertyError, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// A property bridge call failed where no fallback exists
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    /// The device's transport type could not be read
    #[error("Could not classify device {device}: {source}")]
    DeviceQuery {
        device: DeviceId,
        #[source]
        source: PropertyError,
    },

    /// No member or channel accepted the requested control
    #[error("Device {device} has no controllable {control} channel")]
    NoControllableChannel { device: DeviceId, control: Control },

    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The platform has no property bridge
    #[error("Unsupported platform: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Platform identifier for an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(ObjectId);

impl DeviceId {
    pub fn new(id: ObjectId) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> ObjectId {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An enumerated output device
///
/// Identity is by `id`. The name is display-only and may be stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// Structural class of a device, derived on demand and never cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Plain,
    Aggregate(Vec<DeviceId>),
}

impl DeviceClass {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, DeviceClass::Aggregate(_))
    }
}

/// Addressable control point on a device (0 = master, 1/2 = stereo legs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelIndex(pub u32);

impl ChannelIndex {
    pub const MASTER: ChannelIndex = ChannelIndex(0);
    pub const LEFT: ChannelIndex = ChannelIndex(1);
    pub const RIGHT: ChannelIndex = ChannelIndex(2);

    pub fn is_master(&self) -> bool {
        *self == Self::MASTER
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-channel control the engine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    Volume,
    Mute,
}

impl Control {
    pub fn selector(self) -> Selector {
        match self {
            Control::Volume => Selector::VolumeScalar,
            Control::Mute => Selector::Mute,
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Volume => write!(f, "volume"),
            Control::Mute => write!(f, "mute"),
        }
    }
}
