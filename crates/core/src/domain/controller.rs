//! Volume controller
//!
//! Holds the only process-side state: the selected device, the cached
//! volume/mute values shown to the user and the output device list. Every
//! mutator is a no-op while no device is selected.

use crate::domain::audio::Device;
use crate::domain::config::AggvolConfig;
use crate::domain::directory::DeviceDirectory;
use crate::domain::engine::VolumeEngine;
use crate::domain::events::HotkeyEvent;
use crate::domain::property::PropertyBridge;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Named icon state for a status-bar renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeIcon {
    Muted,
    Low,
    Medium,
    High,
}

impl VolumeIcon {
    pub fn for_level(volume: f32, muted: bool) -> Self {
        if muted || volume <= 0.0 {
            VolumeIcon::Muted
        } else if volume < 0.33 {
            VolumeIcon::Low
        } else if volume < 0.66 {
            VolumeIcon::Medium
        } else {
            VolumeIcon::High
        }
    }

    /// SF Symbols name used by the macOS status item
    pub fn symbol_name(self) -> &'static str {
        match self {
            VolumeIcon::Muted => "speaker.slash.fill",
            VolumeIcon::Low => "speaker.wave.1.fill",
            VolumeIcon::Medium => "speaker.wave.2.fill",
            VolumeIcon::High => "speaker.wave.3.fill",
        }
    }
}

/// What a status item should display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device: Option<Device>,
    pub volume: f32,
    pub percent: u32,
    pub muted: bool,
    pub available: bool,
    pub icon: VolumeIcon,
    pub tooltip: String,
}

fn percent(volume: f32) -> u32 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn tooltip(volume: f32, muted: bool, device: Option<&Device>) -> String {
    let mut lines = Vec::with_capacity(2);
    if muted {
        lines.push("Muted".to_string());
    } else {
        lines.push(format!("Volume: {}%", percent(volume)));
    }
    if let Some(device) = device {
        lines.push(format!("Device: {}", device.name));
    }
    lines.join("\n")
}

pub struct VolumeController {
    engine: VolumeEngine,
    directory: DeviceDirectory,
    volume_step: f32,
    current_device: Option<Device>,
    current_volume: f32,
    is_muted: bool,
    volume_available: bool,
    output_devices: Vec<Device>,
}

impl VolumeController {
    /// Build a controller with no device selected
    ///
    /// Call [`refresh_devices`](Self::refresh_devices) and
    /// [`refresh_current_device`](Self::refresh_current_device) to populate it.
    pub fn new(bridge: Arc<dyn PropertyBridge>, config: &AggvolConfig) -> Self {
        Self {
            engine: VolumeEngine::new(Arc::clone(&bridge), &config.engine),
            directory: DeviceDirectory::new(bridge),
            volume_step: config.control.volume_step,
            current_device: None,
            current_volume: 0.0,
            is_muted: false,
            volume_available: false,
            output_devices: Vec::new(),
        }
    }

    pub fn engine(&self) -> &VolumeEngine {
        &self.engine
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn current_device(&self) -> Option<&Device> {
        self.current_device.as_ref()
    }

    pub fn current_volume(&self) -> f32 {
        self.current_volume
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn volume_available(&self) -> bool {
        self.volume_available
    }

    pub fn output_devices(&self) -> &[Device] {
        &self.output_devices
    }

    /// Apply a reloaded config; engine options take effect on the next pass
    pub fn apply_config(&mut self, config: &AggvolConfig) {
        self.volume_step = config.control.volume_step;
        self.engine = VolumeEngine::new(self.engine.bridge(), &config.engine);
        debug!(step = self.volume_step, "Controller settings updated");
    }

    /// Re-enumerate output devices
    pub fn refresh_devices(&mut self) {
        match self.directory.list_output_devices() {
            Ok(devices) => self.output_devices = devices,
            Err(e) => {
                warn!(error = %e, "Could not enumerate output devices");
                self.output_devices.clear();
            }
        }
    }

    /// Select the system default output and re-read its levels
    pub fn refresh_current_device(&mut self) {
        match self.directory.default_output_device() {
            Ok(Some(device)) => {
                if self.current_device.as_ref() != Some(&device) {
                    info!(device = %device, "Following default output device");
                }
                self.current_device = Some(device);
                self.read_levels();
            }
            Ok(None) => self.clear_device(),
            Err(e) => {
                warn!(error = %e, "Could not read default output device");
                self.clear_device();
            }
        }
    }

    fn clear_device(&mut self) {
        if self.current_device.take().is_some() {
            info!("No output device selected");
        }
        self.current_volume = 0.0;
        self.is_muted = false;
        self.volume_available = false;
    }

    /// Re-read volume and mute of the selected device
    ///
    /// Returns whether the displayed state changed.
    pub fn refresh_levels(&mut self) -> bool {
        self.read_levels()
    }

    fn read_levels(&mut self) -> bool {
        let Some(device) = self.current_device.as_ref() else {
            return false;
        };
        let before = (self.current_volume, self.is_muted, self.volume_available);

        match self.engine.state(device) {
            Ok(state) => {
                self.volume_available = state.volume.is_some();
                self.current_volume = state.volume.unwrap_or(0.0);
                self.is_muted = state.muted;
            }
            Err(e) => {
                warn!(device = %device, error = %e, "Volume control unavailable");
                self.volume_available = false;
                self.current_volume = 0.0;
                self.is_muted = false;
            }
        }

        before != (self.current_volume, self.is_muted, self.volume_available)
    }

    /// Make `device` the system default (best effort) and control it
    pub fn select_device(&mut self, device: Device) {
        // Failures are already logged by the directory
        let _ = self.directory.set_default_output_device(&device);
        info!(device = %device, "Selected output device");
        self.current_device = Some(device);
        self.read_levels();
    }

    pub fn set_current_volume(&mut self, volume: f32) {
        let Some(device) = self.current_device.as_ref() else {
            debug!("No device selected, ignoring volume change");
            return;
        };
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.current_volume = volume;

        match self.engine.set_volume(device, volume) {
            Ok(()) => self.is_muted = volume == 0.0,
            Err(e) => {
                warn!(device = %device, error = %e, "Could not set volume");
                self.read_levels();
            }
        }
    }

    pub fn adjust_volume(&mut self, delta: f32) {
        if self.current_device.is_none() {
            return;
        }
        self.set_current_volume(self.current_volume + delta);
    }

    pub fn toggle_mute(&mut self) {
        let Some(device) = self.current_device.as_ref() else {
            debug!("No device selected, ignoring mute toggle");
            return;
        };
        match self.engine.switch_mute(device) {
            Ok(muted) => self.is_muted = muted,
            Err(e) => warn!(device = %device, error = %e, "Could not toggle mute"),
        }
    }

    pub fn handle_hotkey(&mut self, event: HotkeyEvent) {
        debug!(%event, "Hotkey");
        match event {
            HotkeyEvent::VolumeUp => self.adjust_volume(self.volume_step),
            HotkeyEvent::VolumeDown => self.adjust_volume(-self.volume_step),
            HotkeyEvent::MuteToggle => self.toggle_mute(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            device: self.current_device.clone(),
            volume: self.current_volume,
            percent: percent(self.current_volume),
            muted: self.is_muted,
            available: self.volume_available,
            icon: VolumeIcon::for_level(self.current_volume, self.is_muted),
            tooltip: tooltip(
                self.current_volume,
                self.is_muted,
                self.current_device.as_ref(),
            ),
        }
    }
}
