//! Domain entities and business rules

pub mod audio;
pub mod channels;
pub mod config;
pub mod controller;
pub mod directory;
pub mod engine;
pub mod events;
pub mod memory;
pub mod property;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, ChannelIndex, Control, Device, DeviceClass, DeviceId};
pub use channels::{ChannelDiscovery, ChannelSet, DEFAULT_PROBE_CHANNELS};
pub use config::*;
pub use controller::{StatusSnapshot, VolumeController, VolumeIcon};
pub use directory::DeviceDirectory;
pub use engine::{EngineOptions, MemberReport, VolumeEngine, VolumeState};
pub use events::{DeviceChange, HotkeyEvent};
pub use memory::{DeviceFixture, MemoryBridge, PropertyWrite};
pub use property::{
    PropertyAddress, PropertyBridge, PropertyError, PropertyValue, Scope, Selector, ValueKind,
};
