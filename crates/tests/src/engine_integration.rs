//! Integration tests for the volume engine
//!
//! These tests drive whole device topologies through the engine, directory
//! and controller, including partial failures and devices that change shape
//! between calls.

use aggvol_core::domain::{
    AggvolConfig, AudioError, ConfigManager, Control, DeviceChange, DeviceClass, DeviceDirectory,
    DeviceFixture, DeviceId, EngineOptions, HotkeyEvent, MemoryBridge, PropertyAddress,
    PropertyValue, Selector, VolumeController, VolumeEngine, VolumeIcon,
};
use aggvol_infra::audio::{simulated_bridge, AGGREGATE_ID, HDMI_ID, USB_DAC_ID};
use aggvol_tests::*;
use std::sync::Arc;

// ============================================================================
// AVERAGING
// ============================================================================

#[test]
fn test_end_to_end_average() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    let volume = engine.get_volume(&aggregate).unwrap();
    assert!(approx_eq(volume, 0.45), "expected 0.45, got {}", volume);
    assert!(!engine.get_mute(&aggregate).unwrap());
}

#[test]
fn test_single_device_is_one_member_aggregate() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);

    let b = device(2, "B");
    assert_eq!(engine.classify(&b).unwrap(), DeviceClass::Plain);
    assert_eq!(engine.member_devices(&b).unwrap(), vec![b.clone()]);
    assert!(approx_eq(engine.get_volume(&b).unwrap(), 0.7));
}

#[test]
fn test_master_precedence_on_member() {
    let bridge = Arc::new(MemoryBridge::with_devices(
        None,
        &[
            DeviceFixture::plain(1, "Surround")
                .with_volume(0, 0.8)
                .with_volume(1, 0.1)
                .with_volume(2, 0.1),
            DeviceFixture::aggregate(10, "Agg", &[1]),
        ],
    ));
    let engine = engine(&bridge);
    let aggregate = device(10, "Agg");

    assert!(approx_eq(engine.get_volume(&aggregate).unwrap(), 0.8));

    engine.set_volume(&aggregate, 0.3).unwrap();
    assert_eq!(stored_volume(&bridge, 1, 0), Some(0.3));
    // Legs are never touched when the master exists
    assert_eq!(stored_volume(&bridge, 1, 1), Some(0.1));
    assert_eq!(stored_volume(&bridge, 1, 2), Some(0.1));
}

#[test]
fn test_sub_device_list_changes_between_calls() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    assert!(approx_eq(engine.get_volume(&aggregate).unwrap(), 0.45));

    // B leaves the aggregate
    bridge.insert_read_only(
        PropertyAddress::global(AGGREGATE, Selector::ActiveSubDevices),
        PropertyValue::Ids(vec![1, 3]),
    );
    assert!(approx_eq(engine.get_volume(&aggregate).unwrap(), 0.2));
}

#[test]
fn test_nested_aggregate_is_not_expanded() {
    let bridge = Arc::new(MemoryBridge::with_devices(
        None,
        &[
            DeviceFixture::plain(1, "Leaf").with_volume(0, 0.4),
            DeviceFixture::aggregate(10, "Inner", &[1]),
            DeviceFixture::aggregate(20, "Outer", &[10]),
        ],
    ));
    let engine = engine(&bridge);

    // The inner aggregate exposes no controls of its own
    assert_eq!(engine.read_volume(&device(20, "Outer")).unwrap(), None);
}

// ============================================================================
// WRITES
// ============================================================================

#[test]
fn test_set_volume_zero_mutes_and_preserves_levels() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    engine.set_volume(&aggregate, 0.0).unwrap();

    let writes = bridge.writes();
    assert!(writes.iter().all(|w| w.address.selector == Selector::Mute));
    assert_eq!(writes.len(), 3);
    assert_eq!(stored_mute(&bridge, 1, 0), Some(true));
    assert_eq!(stored_mute(&bridge, 2, 1), Some(true));
    assert_eq!(stored_mute(&bridge, 2, 2), Some(true));
    assert_eq!(stored_volume(&bridge, 1, 0), Some(0.2));
    assert_eq!(stored_volume(&bridge, 2, 1), Some(0.5));
    assert_eq!(stored_volume(&bridge, 2, 2), Some(0.9));
}

#[test]
fn test_set_volume_positive_unmutes_then_fans_out() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    engine.set_mute(&aggregate, true).unwrap();
    bridge.clear_writes();

    engine.set_volume(&aggregate, 0.6).unwrap();

    let writes = bridge.writes();
    let (mutes, scalars): (Vec<_>, Vec<_>) = writes
        .iter()
        .partition(|w| w.address.selector == Selector::Mute);
    assert_eq!(mutes.len(), 3);
    assert_eq!(scalars.len(), 3);
    assert!(writes[..3].iter().all(|w| w.address.selector == Selector::Mute));
    assert!(scalars
        .iter()
        .all(|w| w.value == PropertyValue::Scalar(0.6)));
    assert!(!engine.get_mute(&aggregate).unwrap());
    assert!(approx_eq(engine.get_volume(&aggregate).unwrap(), 0.6));
}

#[test]
fn test_failing_member_does_not_block_others() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    // A's master exists but every call on it fails
    bridge.fail(PropertyAddress::output(1, Selector::VolumeScalar, 0));

    assert!(approx_eq(engine.get_volume(&aggregate).unwrap(), 0.7));
    engine.set_volume(&aggregate, 0.4).unwrap();
    assert_eq!(stored_volume(&bridge, 2, 1), Some(0.4));
    assert_eq!(stored_volume(&bridge, 1, 0), Some(0.2));
}

#[test]
fn test_read_only_channel_write_failure_is_skipped() {
    let bridge = scenario_bridge();
    bridge.insert_read_only(
        PropertyAddress::output(2, Selector::VolumeScalar, 2),
        PropertyValue::Scalar(0.9),
    );
    let engine = engine(&bridge);

    engine.set_volume(&device(AGGREGATE, "Aggregate"), 0.5).unwrap();
    assert_eq!(stored_volume(&bridge, 1, 0), Some(0.5));
    assert_eq!(stored_volume(&bridge, 2, 1), Some(0.5));
    assert_eq!(stored_volume(&bridge, 2, 2), Some(0.9));
}

#[test]
fn test_all_writes_failing_is_reported() {
    let bridge = Arc::new(MemoryBridge::with_devices(
        None,
        &[DeviceFixture::plain(1, "Locked").with_volume(0, 0.5)],
    ));
    bridge.insert_read_only(
        PropertyAddress::output(1, Selector::VolumeScalar, 0),
        PropertyValue::Scalar(0.5),
    );
    let engine = engine(&bridge);

    let err = engine.set_volume(&device(1, "Locked"), 0.8).unwrap_err();
    assert!(matches!(
        err,
        AudioError::NoControllableChannel {
            control: Control::Volume,
            ..
        }
    ));
}

#[test]
fn test_set_volume_nan_is_treated_as_zero() {
    let bridge = scenario_bridge();
    let engine = engine(&bridge);
    let aggregate = device(AGGREGATE, "Aggregate");

    engine.set_volume(&aggregate, f32::NAN).unwrap();
    assert!(engine.get_mute(&aggregate).unwrap());
    assert_eq!(stored_volume(&bridge, 1, 0), Some(0.2));
}

#[test]
fn test_virtual_main_volume_disabled_by_config() {
    let fixtures = [DeviceFixture::plain(1, "AirPods")
        .with_virtual_main_volume(0.25)
        .with_stereo(0.5, 0.5)];
    let bridge = Arc::new(MemoryBridge::with_devices(None, &fixtures));
    let airpods = device(1, "AirPods");

    let shortcut = VolumeEngine::with_defaults(bridge.clone());
    assert!(approx_eq(shortcut.get_volume(&airpods).unwrap(), 0.25));

    let probing = VolumeEngine::new(
        bridge.clone(),
        &EngineOptions {
            virtual_main_volume: false,
            ..EngineOptions::default()
        },
    );
    assert!(approx_eq(probing.get_volume(&airpods).unwrap(), 0.5));
}

// ============================================================================
// DIRECTORY
// ============================================================================

#[test]
fn test_directory_filters_and_default() {
    let bridge = Arc::new(MemoryBridge::with_devices(
        Some(4),
        &[
            DeviceFixture::plain(1, "Speakers"),
            DeviceFixture::plain(2, "Mic").without_outputs(),
            DeviceFixture::plain(3, "Nameless").unnamed(),
            DeviceFixture::plain(4, "Mic 2").without_outputs(),
        ],
    ));
    let directory = DeviceDirectory::new(bridge);

    let devices = directory.list_output_devices().unwrap();
    assert_eq!(devices, vec![device(1, "Speakers")]);
    assert_eq!(directory.default_output_device().unwrap(), None);
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[test]
fn test_controller_media_keys() {
    let bridge = scenario_bridge();
    let mut controller = controller(&bridge);

    assert!(approx_eq(controller.current_volume(), 0.45));

    controller.handle_hotkey(HotkeyEvent::VolumeUp);
    assert!(approx_eq(controller.current_volume(), 0.5125));
    assert_eq!(stored_volume(&bridge, 1, 0), Some(controller.current_volume()));

    controller.handle_hotkey(HotkeyEvent::MuteToggle);
    let snapshot = controller.snapshot();
    assert!(snapshot.muted);
    assert_eq!(snapshot.icon, VolumeIcon::Muted);
    assert_eq!(snapshot.tooltip, "Muted\nDevice: Aggregate");

    controller.handle_hotkey(HotkeyEvent::MuteToggle);
    let snapshot = controller.snapshot();
    assert!(!snapshot.muted);
    assert_eq!(snapshot.icon, VolumeIcon::Medium);
    assert_eq!(snapshot.tooltip, "Volume: 51%\nDevice: Aggregate");
}

#[test]
fn test_controller_follows_default_change() {
    let bridge = scenario_bridge();
    let mut controller = controller(&bridge);

    bridge.set_default_output(2);
    let change = DeviceChange::DefaultOutputChanged;
    assert!(change.requires_device_refresh());
    controller.refresh_devices();
    controller.refresh_current_device();

    assert_eq!(controller.current_device().unwrap().id, DeviceId::new(2));
    assert!(approx_eq(controller.current_volume(), 0.7));
}

#[test]
fn test_controller_survives_unclassifiable_device() {
    let bridge = scenario_bridge();
    bridge.fail(PropertyAddress::global(AGGREGATE, Selector::TransportType));
    let mut controller = controller(&bridge);

    assert!(controller.current_device().is_some());
    assert!(!controller.volume_available());
    controller.handle_hotkey(HotkeyEvent::VolumeUp);
    controller.handle_hotkey(HotkeyEvent::MuteToggle);
    assert!(!controller.is_muted());
}

#[test]
fn test_simulated_studio() {
    let bridge = simulated_bridge();
    let mut controller = VolumeController::new(bridge.clone(), &AggvolConfig::default());
    controller.refresh_devices();
    controller.refresh_current_device();

    assert_eq!(controller.current_device().unwrap().id, DeviceId::new(AGGREGATE_ID));

    let report = controller
        .engine()
        .report(controller.current_device().unwrap())
        .unwrap();
    let hdmi = report
        .iter()
        .find(|m| m.device.id == DeviceId::new(HDMI_ID))
        .unwrap();
    assert_eq!(hdmi.volume, None);
    let dac = report
        .iter()
        .find(|m| m.device.id == DeviceId::new(USB_DAC_ID))
        .unwrap();
    assert_eq!(dac.volume, Some(0.7));

    controller.set_current_volume(0.0);
    assert!(controller.is_muted());
    assert!(controller.refresh_levels());
    assert!(approx_eq(controller.current_volume(), 0.6));
}

#[test]
fn test_snapshot_serializes() {
    let bridge = scenario_bridge();
    let controller = controller(&bridge);

    let json = serde_json::to_value(controller.snapshot()).unwrap();
    assert_eq!(json["percent"], 45);
    assert_eq!(json["icon"], "medium");
    assert_eq!(json["muted"], false);
}

// ============================================================================
// CONFIG
// ============================================================================

#[tokio::test]
async fn test_config_drives_controller_step() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let manager = ConfigManager::new(temp_dir.path().to_path_buf());

    let mut config = AggvolConfig::factory_default();
    config.control.volume_step = 0.1;
    manager.save(&config).await.unwrap();

    let loaded = manager.load().await;
    assert_eq!(loaded.control.volume_step, 0.1);

    let bridge = scenario_bridge();
    let mut controller = VolumeController::new(bridge.clone(), &loaded);
    controller.refresh_devices();
    controller.refresh_current_device();

    controller.handle_hotkey(HotkeyEvent::VolumeDown);
    assert!(approx_eq(controller.current_volume(), 0.35));
}
