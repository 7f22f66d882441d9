//! OS change notifications for the run loop

use aggvol_core::domain::{DeviceChange, VolumeController};
use tokio::sync::mpsc;
use tracing::debug;

#[cfg(target_os = "macos")]
use aggvol_infra::audio::ChangeSubscription;
#[cfg(target_os = "macos")]
use tracing::warn;

/// Forwards platform notifications into the loop's change channel
pub struct ChangeListener {
    #[cfg(target_os = "macos")]
    subscription: Option<ChangeSubscription>,
}

impl ChangeListener {
    #[cfg(target_os = "macos")]
    pub fn start(tx: mpsc::UnboundedSender<DeviceChange>, enabled: bool) -> Self {
        if !enabled {
            debug!("Change notifications disabled, polling only");
            return Self { subscription: None };
        }

        let mut subscription = ChangeSubscription::new(tx);
        match subscription.watch_system() {
            Ok(()) => Self {
                subscription: Some(subscription),
            },
            Err(e) => {
                warn!(error = %e, "Could not subscribe to device changes, polling only");
                Self { subscription: None }
            }
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(_tx: mpsc::UnboundedSender<DeviceChange>, enabled: bool) -> Self {
        if enabled {
            debug!("Change notifications unavailable on this platform, polling only");
        }
        Self {}
    }

    /// Point control listeners at the controller's current device
    #[cfg(target_os = "macos")]
    pub fn follow(&mut self, controller: &VolumeController, channels: &[u32]) {
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };
        let Some(device) = controller.current_device() else {
            subscription.unwatch_device();
            return;
        };

        let members: Vec<_> = controller
            .engine()
            .member_devices(device)
            .map(|members| members.into_iter().map(|m| m.id).collect())
            .unwrap_or_default();
        let bridge = controller.engine().bridge();
        if let Err(e) = subscription.watch_device(bridge.as_ref(), device.id, &members, channels) {
            warn!(device = %device, error = %e, "Could not watch device controls");
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn follow(&mut self, _controller: &VolumeController, _channels: &[u32]) {}
}
