//! Channel discovery
//!
//! Determines which channel indices of a device actually support a control.
//! Candidates are probed in a fixed order (master, left, right by default):
//! a channel counts only if the property exists *and* one read succeeds.
//! When the master channel is present together with per-leg channels the
//! set collapses to the master alone, so a device exposing both a master
//! fader and leg faders is never scaled or averaged twice.

use crate::domain::audio::{ChannelIndex, Control, DeviceId};
use crate::domain::property::{self, PropertyAddress, PropertyBridge, PropertyError, ValueKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Master, left, right
pub const DEFAULT_PROBE_CHANNELS: [u32; 3] = [0, 1, 2];

/// Ordered set of controllable channels, in probe order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSet {
    channels: Vec<ChannelIndex>,
}

impl ChannelSet {
    /// Build a set, dropping duplicates but keeping first-seen order
    pub fn new(channels: impl IntoIterator<Item = ChannelIndex>) -> Self {
        let mut unique = Vec::new();
        for channel in channels {
            if !unique.contains(&channel) {
                unique.push(channel);
            }
        }
        Self { channels: unique }
    }

    /// Apply master precedence: `{0, ..}` with any other channel becomes `{0}`
    pub fn collapsed(self) -> Self {
        Self {
            channels: collapse(self.channels, |channel| *channel),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChannelIndex> + '_ {
        self.channels.iter().copied()
    }

    pub fn as_slice(&self) -> &[ChannelIndex] {
        &self.channels
    }
}

impl FromIterator<ChannelIndex> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = ChannelIndex>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Keep only the master entry when it coexists with other channels
fn collapse<T>(items: Vec<T>, channel_of: impl Fn(&T) -> ChannelIndex) -> Vec<T> {
    if items.len() > 1 && items.iter().any(|item| channel_of(item).is_master()) {
        items
            .into_iter()
            .filter(|item| channel_of(item).is_master())
            .take(1)
            .collect()
    } else {
        items
    }
}

/// Probes devices for controllable channels
pub struct ChannelDiscovery {
    bridge: Arc<dyn PropertyBridge>,
    candidates: Vec<ChannelIndex>,
}

impl ChannelDiscovery {
    /// Create a discovery pass over the given candidate channels
    pub fn new(bridge: Arc<dyn PropertyBridge>, candidates: &[u32]) -> Self {
        let candidates = ChannelSet::new(candidates.iter().map(|&c| ChannelIndex(c)));
        Self {
            bridge,
            candidates: candidates.channels,
        }
    }

    pub fn with_default_candidates(bridge: Arc<dyn PropertyBridge>) -> Self {
        Self::new(bridge, &DEFAULT_PROBE_CHANNELS)
    }

    pub fn candidates(&self) -> &[ChannelIndex] {
        &self.candidates
    }

    /// Channels of `device` that support `control`, after the collapse rule
    ///
    /// An empty set means the device is not controllable for that control.
    pub fn discover(&self, device: DeviceId, control: Control) -> ChannelSet {
        match control {
            Control::Volume => self
                .volume_readings(device)
                .into_iter()
                .map(|(channel, _)| channel)
                .collect(),
            Control::Mute => self
                .mute_readings(device)
                .into_iter()
                .map(|(channel, _)| channel)
                .collect(),
        }
    }

    /// Controllable volume channels with the value read while probing
    ///
    /// Readings are clamped into `[0, 1]`; non-finite readings are treated as
    /// phantom properties.
    pub fn volume_readings(&self, device: DeviceId) -> Vec<(ChannelIndex, f32)> {
        self.probe(device, Control::Volume, |bridge, address| {
            let volume = bridge.get_scalar(address)?;
            if volume.is_finite() {
                Ok(volume.clamp(0.0, 1.0))
            } else {
                Err(PropertyError::TypeMismatch {
                    address: *address,
                    expected: ValueKind::Scalar,
                })
            }
        })
    }

    /// Controllable mute channels with the state read while probing
    pub fn mute_readings(&self, device: DeviceId) -> Vec<(ChannelIndex, bool)> {
        self.probe(device, Control::Mute, |bridge, address| bridge.get_flag(address))
    }

    fn probe<T: std::fmt::Debug>(
        &self,
        device: DeviceId,
        control: Control,
        read: impl Fn(&dyn PropertyBridge, &PropertyAddress) -> property::Result<T>,
    ) -> Vec<(ChannelIndex, T)> {
        let mut readings = Vec::with_capacity(self.candidates.len());

        for &channel in &self.candidates {
            let address = PropertyAddress::output(device.raw(), control.selector(), channel.0);
            if !self.bridge.has_property(&address) {
                continue;
            }
            match read(self.bridge.as_ref(), &address) {
                Ok(value) => {
                    trace!(%device, %channel, %control, ?value, "channel probed");
                    readings.push((channel, value));
                }
                Err(e) => {
                    debug!(%device, %channel, %control, error = %e, "Ignoring phantom channel property");
                }
            }
        }

        let readings = collapse(readings, |(channel, _)| *channel);
        if readings.is_empty() {
            debug!(%device, %control, "No controllable channels");
        }
        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory::{DeviceFixture, MemoryBridge};
    use proptest::prelude::*;

    fn set(channels: &[u32]) -> ChannelSet {
        channels.iter().map(|&c| ChannelIndex(c)).collect()
    }

    fn discovery(fixture: DeviceFixture) -> ChannelDiscovery {
        let bridge = MemoryBridge::with_devices(None, &[fixture]);
        ChannelDiscovery::with_default_candidates(Arc::new(bridge))
    }

    #[test]
    fn test_master_takes_precedence() {
        let discovery = discovery(
            DeviceFixture::plain(1, "Surround")
                .with_volume(0, 0.3)
                .with_volume(1, 0.5)
                .with_volume(2, 0.9),
        );
        assert_eq!(discovery.discover(DeviceId::new(1), Control::Volume), set(&[0]));
        assert_eq!(
            discovery.volume_readings(DeviceId::new(1)),
            vec![(ChannelIndex::MASTER, 0.3)]
        );
    }

    #[test]
    fn test_stereo_legs_without_master() {
        let discovery = discovery(DeviceFixture::plain(1, "Stereo").with_stereo(0.5, 0.9));
        assert_eq!(
            discovery.discover(DeviceId::new(1), Control::Volume),
            set(&[1, 2])
        );
    }

    #[test]
    fn test_phantom_channel_excluded() {
        let discovery = discovery(
            DeviceFixture::plain(1, "Flaky")
                .with_phantom_volume(0)
                .with_volume(1, 0.4)
                .with_volume(2, 0.6),
        );
        // Channel 0 exists but cannot be read, so it must not trigger the collapse
        assert_eq!(
            discovery.discover(DeviceId::new(1), Control::Volume),
            set(&[1, 2])
        );
    }

    #[test]
    fn test_phantom_mute_excluded() {
        let discovery = discovery(
            DeviceFixture::plain(1, "Flaky")
                .with_phantom_mute(0)
                .with_mute(1, true)
                .with_mute(2, false),
        );
        let id = DeviceId::new(1);
        assert_eq!(discovery.discover(id, Control::Mute), set(&[1, 2]));
        assert_eq!(
            discovery.mute_readings(id),
            vec![(ChannelIndex::LEFT, true), (ChannelIndex::RIGHT, false)]
        );
    }

    #[test]
    fn test_volume_and_mute_discovered_independently() {
        let discovery = discovery(
            DeviceFixture::plain(1, "Odd")
                .with_volume(1, 0.5)
                .with_volume(2, 0.5)
                .with_mute(0, true),
        );
        let id = DeviceId::new(1);
        assert_eq!(discovery.discover(id, Control::Volume), set(&[1, 2]));
        assert_eq!(discovery.discover(id, Control::Mute), set(&[0]));
        assert_eq!(discovery.mute_readings(id), vec![(ChannelIndex::MASTER, true)]);
    }

    #[test]
    fn test_no_controls_is_empty() {
        let discovery = discovery(DeviceFixture::plain(1, "Fixed"));
        assert!(discovery.discover(DeviceId::new(1), Control::Volume).is_empty());
        assert!(discovery.discover(DeviceId::new(1), Control::Mute).is_empty());
    }

    #[test]
    fn test_out_of_range_reading_is_clamped() {
        let discovery = discovery(DeviceFixture::plain(1, "Hot").with_volume(0, 1.4));
        assert_eq!(
            discovery.volume_readings(DeviceId::new(1)),
            vec![(ChannelIndex::MASTER, 1.0)]
        );
    }

    #[test]
    fn test_custom_candidates() {
        let bridge = MemoryBridge::with_devices(
            None,
            &[DeviceFixture::plain(1, "5.1")
                .with_volume(3, 0.2)
                .with_volume(4, 0.4)],
        );
        let discovery = ChannelDiscovery::new(Arc::new(bridge), &[0, 1, 2, 3, 4, 4]);
        assert_eq!(discovery.candidates().len(), 5);
        assert_eq!(
            discovery.discover(DeviceId::new(1), Control::Volume),
            set(&[3, 4])
        );
    }

    #[test]
    fn test_channel_set_dedup_keeps_order() {
        let channels = set(&[2, 1, 2, 0]);
        assert_eq!(
            channels.as_slice(),
            &[ChannelIndex(2), ChannelIndex(1), ChannelIndex(0)]
        );
        assert_eq!(channels.collapsed(), set(&[0]));
    }

    proptest! {
        #[test]
        fn prop_collapse_rule(present in proptest::collection::btree_set(0u32..6, 0..6)) {
            let channels: Vec<u32> = present.iter().copied().collect();
            let collapsed = set(&channels).collapsed();

            if present.contains(&0) && present.len() > 1 {
                prop_assert_eq!(collapsed, set(&[0]));
            } else {
                prop_assert_eq!(collapsed, set(&channels));
            }
        }

        #[test]
        fn prop_discovery_matches_collapse(present in proptest::collection::btree_set(0u32..3, 0..4)) {
            let mut fixture = DeviceFixture::plain(1, "Probe");
            for &channel in &present {
                fixture = fixture.with_volume(channel, 0.5);
            }
            let discovery = discovery(fixture);
            let channels: Vec<u32> = present.iter().copied().collect();

            prop_assert_eq!(
                discovery.discover(DeviceId::new(1), Control::Volume),
                set(&channels).collapsed()
            );
        }
    }
}
