//! Shared fixtures for the aggvol integration tests

use aggvol_core::domain::{
    AggvolConfig, Device, DeviceFixture, DeviceId, MemoryBridge, PropertyAddress, PropertyValue,
    Selector, VolumeController, VolumeEngine,
};
use std::sync::Arc;

/// Aggregate id used by [`scenario_bridge`]
pub const AGGREGATE: u32 = 100;

/// A{0: 0.2}, B{1: 0.5, 2: 0.9}, C{} behind aggregate 100, which is the default
pub fn scenario_fixtures() -> Vec<DeviceFixture> {
    vec![
        DeviceFixture::plain(1, "A").with_volume(0, 0.2).with_mute(0, false),
        DeviceFixture::plain(2, "B")
            .with_volume(1, 0.5)
            .with_volume(2, 0.9)
            .with_mute(1, false)
            .with_mute(2, false),
        DeviceFixture::plain(3, "C"),
        DeviceFixture::aggregate(AGGREGATE, "Aggregate", &[1, 2, 3]),
    ]
}

pub fn scenario_bridge() -> Arc<MemoryBridge> {
    Arc::new(MemoryBridge::with_devices(Some(AGGREGATE), &scenario_fixtures()))
}

pub fn device(id: u32, name: &str) -> Device {
    Device::new(DeviceId::new(id), name)
}

pub fn engine(bridge: &Arc<MemoryBridge>) -> VolumeEngine {
    VolumeEngine::with_defaults(bridge.clone())
}

/// Controller already following the bridge's default device
pub fn controller(bridge: &Arc<MemoryBridge>) -> VolumeController {
    let mut controller = VolumeController::new(bridge.clone(), &AggvolConfig::default());
    controller.refresh_devices();
    controller.refresh_current_device();
    controller
}

/// Stored volume scalar, bypassing failure injection
pub fn stored_volume(bridge: &MemoryBridge, id: u32, channel: u32) -> Option<f32> {
    match bridge.value(&PropertyAddress::output(id, Selector::VolumeScalar, channel)) {
        Some(PropertyValue::Scalar(v)) => Some(v),
        _ => None,
    }
}

/// Stored mute flag, bypassing failure injection
pub fn stored_mute(bridge: &MemoryBridge, id: u32, channel: u32) -> Option<bool> {
    match bridge.value(&PropertyAddress::output(id, Selector::Mute, channel)) {
        Some(PropertyValue::Flag(v)) => Some(v),
        _ => None,
    }
}

pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}
