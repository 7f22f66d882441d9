//! Events consumed by the controller loop

use crate::domain::audio::DeviceId;
use crate::domain::property::{ObjectId, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Media-key style input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HotkeyEvent {
    VolumeUp,
    VolumeDown,
    MuteToggle,
}

impl FromStr for HotkeyEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "+" | "volume-up" => Ok(HotkeyEvent::VolumeUp),
            "down" | "-" | "volume-down" => Ok(HotkeyEvent::VolumeDown),
            "mute" | "m" | "toggle" => Ok(HotkeyEvent::MuteToggle),
            other => Err(format!("Unknown hotkey: {}", other)),
        }
    }
}

impl fmt::Display for HotkeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotkeyEvent::VolumeUp => write!(f, "volume up"),
            HotkeyEvent::VolumeDown => write!(f, "volume down"),
            HotkeyEvent::MuteToggle => write!(f, "mute toggle"),
        }
    }
}

/// Hardware-side change reported by a platform listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceChange {
    /// The system default output device changed
    DefaultOutputChanged,
    /// A device was added or removed
    DeviceListChanged,
    /// A volume or mute control changed on this device
    ControlChanged(DeviceId),
}

impl DeviceChange {
    /// Map a platform property notification to a change, if it is one we track
    pub fn from_notification(object: ObjectId, selector_code: u32) -> Option<Self> {
        const CONTROLS: [Selector; 3] = [
            Selector::VolumeScalar,
            Selector::Mute,
            Selector::VirtualMainVolume,
        ];

        if selector_code == Selector::DefaultOutputDevice.code() {
            Some(DeviceChange::DefaultOutputChanged)
        } else if selector_code == Selector::Devices.code()
            || selector_code == Selector::ActiveSubDevices.code()
        {
            Some(DeviceChange::DeviceListChanged)
        } else if CONTROLS.iter().any(|s| s.code() == selector_code) {
            Some(DeviceChange::ControlChanged(DeviceId::new(object)))
        } else {
            None
        }
    }

    /// Whether the device list and selection must be rebuilt
    pub fn requires_device_refresh(&self) -> bool {
        !matches!(self, DeviceChange::ControlChanged(_))
    }
}
