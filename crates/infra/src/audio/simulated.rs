// Simulated output devices for running without CoreAudio

use aggvol_core::domain::memory::{DeviceFixture, MemoryBridge};
use aggvol_core::domain::property::TRANSPORT_TYPE_USB;
use std::sync::Arc;
use tracing::info;

pub const SPEAKERS_ID: u32 = 40;
pub const USB_DAC_ID: u32 = 41;
pub const HDMI_ID: u32 = 42;
pub const MICROPHONE_ID: u32 = 43;
pub const AGGREGATE_ID: u32 = 60;

/// A small studio: built-in speakers, a USB DAC, an HDMI output without
/// controls, a microphone, and an aggregate of the three outputs set as the
/// system default.
pub fn studio_topology() -> Vec<DeviceFixture> {
    vec![
        DeviceFixture::plain(SPEAKERS_ID, "MacBook Pro Speakers").with_stereo(0.5, 0.5),
        DeviceFixture::plain(USB_DAC_ID, "USB Audio DAC")
            .with_transport(TRANSPORT_TYPE_USB)
            .with_volume(0, 0.7)
            .with_mute(0, false),
        DeviceFixture::plain(HDMI_ID, "LG HDR 4K"),
        DeviceFixture::plain(MICROPHONE_ID, "MacBook Pro Microphone").without_outputs(),
        DeviceFixture::aggregate(
            AGGREGATE_ID,
            "Multi-Output Device",
            &[SPEAKERS_ID, USB_DAC_ID, HDMI_ID],
        ),
    ]
}

/// In-memory bridge pre-loaded with [`studio_topology`]
pub fn simulated_bridge() -> Arc<MemoryBridge> {
    let devices = studio_topology();
    info!(devices = devices.len(), "Using simulated audio devices");
    Arc::new(MemoryBridge::with_devices(Some(AGGREGATE_ID), &devices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvol_core::domain::{AggvolConfig, DeviceDirectory, VolumeController};

    #[test]
    fn test_simulated_directory() {
        let directory = DeviceDirectory::new(simulated_bridge());
        let devices = directory.list_output_devices().unwrap();

        assert_eq!(devices.len(), 4);
        assert_eq!(
            directory.default_output_device().unwrap().unwrap().name,
            "Multi-Output Device"
        );
    }

    #[test]
    fn test_simulated_aggregate_volume() {
        let mut controller = VolumeController::new(simulated_bridge(), &AggvolConfig::default());
        controller.refresh_devices();
        controller.refresh_current_device();

        // Speakers 0.5 and DAC 0.7; HDMI has no control
        assert!((controller.current_volume() - 0.6).abs() < 1e-5);
        assert!(controller.volume_available());
        assert!(!controller.is_muted());
    }
}
