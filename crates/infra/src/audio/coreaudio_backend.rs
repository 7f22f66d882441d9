// CoreAudio property bridge and change listeners
//
// All HAL access goes through four calls: AudioObjectHasProperty,
// AudioObjectGetPropertyDataSize, AudioObjectGetPropertyData and
// AudioObjectSetPropertyData. Listener callbacks run on a HAL thread and
// only forward a DeviceChange into an unbounded channel.

use aggvol_core::domain::audio::{DeviceId, Result as AudioResult};
use aggvol_core::domain::events::DeviceChange;
use aggvol_core::domain::property::{
    four_char_code, PropertyAddress, PropertyBridge, PropertyError, PropertyValue, Result,
    Selector, ValueKind, MASTER_ELEMENT,
};
use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use coreaudio_sys::{
    AudioObjectAddPropertyListener, AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize,
    AudioObjectHasProperty, AudioObjectID, AudioObjectIsPropertySettable,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
    OSStatus,
};
use std::ffi::c_void;
use std::mem;
use std::ptr;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// kAudioHardwareUnknownPropertyError ('who?')
const UNKNOWN_PROPERTY: OSStatus = four_char_code(b"who?") as OSStatus;

fn native(address: &PropertyAddress) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: address.selector.code(),
        mScope: address.scope.code(),
        mElement: address.element,
    }
}

fn check(address: &PropertyAddress, status: OSStatus) -> Result<()> {
    match status {
        0 => Ok(()),
        UNKNOWN_PROPERTY => Err(PropertyError::NotFound { address: *address }),
        status => Err(PropertyError::Os {
            address: *address,
            status,
        }),
    }
}

/// Property bridge over the CoreAudio HAL
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreAudioBridge;

impl CoreAudioBridge {
    pub fn new() -> Self {
        Self
    }

    /// Read a fixed-size value
    fn read_pod<T: Copy + Default>(&self, address: &PropertyAddress) -> Result<T> {
        let native = native(address);
        let mut value = T::default();
        let mut size = mem::size_of::<T>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                address.object,
                &native,
                0,
                ptr::null(),
                &mut size,
                &mut value as *mut T as *mut c_void,
            )
        };
        check(address, status)?;

        if size as usize != mem::size_of::<T>() {
            return Err(PropertyError::TypeMismatch {
                address: *address,
                expected: address.selector.value_kind(),
            });
        }
        Ok(value)
    }

    fn read_ids(&self, address: &PropertyAddress) -> Result<Vec<AudioObjectID>> {
        let size = self.data_size(address)?;
        let count = size as usize / mem::size_of::<AudioObjectID>();
        if count == 0 {
            return Ok(Vec::new());
        }

        let native = native(address);
        let mut ids: Vec<AudioObjectID> = vec![0; count];
        let mut size = (count * mem::size_of::<AudioObjectID>()) as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                address.object,
                &native,
                0,
                ptr::null(),
                &mut size,
                ids.as_mut_ptr() as *mut c_void,
            )
        };
        check(address, status)?;

        // The list may shrink between the size query and the read
        ids.truncate(size as usize / mem::size_of::<AudioObjectID>());
        Ok(ids)
    }

    fn read_text(&self, address: &PropertyAddress) -> Result<String> {
        let native = native(address);
        let mut text: CFStringRef = ptr::null();
        let mut size = mem::size_of::<CFStringRef>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                address.object,
                &native,
                0,
                ptr::null(),
                &mut size,
                &mut text as *mut CFStringRef as *mut c_void,
            )
        };
        check(address, status)?;

        if text.is_null() {
            return Err(PropertyError::TypeMismatch {
                address: *address,
                expected: ValueKind::Text,
            });
        }
        // CFString-valued properties are returned retained
        let text = unsafe { CFString::wrap_under_create_rule(text) };
        Ok(text.to_string())
    }

    fn write_pod<T: Copy>(&self, address: &PropertyAddress, value: T) -> Result<()> {
        let native = native(address);

        let mut settable: u8 = 0;
        let status = unsafe { AudioObjectIsPropertySettable(address.object, &native, &mut settable) };
        check(address, status)?;
        if settable == 0 {
            return Err(PropertyError::NotWritable { address: *address });
        }

        let status = unsafe {
            AudioObjectSetPropertyData(
                address.object,
                &native,
                0,
                ptr::null(),
                mem::size_of::<T>() as u32,
                &value as *const T as *const c_void,
            )
        };
        check(address, status)
    }
}

impl PropertyBridge for CoreAudioBridge {
    fn has_property(&self, address: &PropertyAddress) -> bool {
        let native = native(address);
        unsafe { AudioObjectHasProperty(address.object, &native) != 0 }
    }

    fn data_size(&self, address: &PropertyAddress) -> Result<u32> {
        let native = native(address);
        let mut size: u32 = 0;
        let status = unsafe {
            AudioObjectGetPropertyDataSize(address.object, &native, 0, ptr::null(), &mut size)
        };
        check(address, status)?;
        Ok(size)
    }

    fn get(&self, address: &PropertyAddress) -> Result<PropertyValue> {
        let value = match address.selector.value_kind() {
            ValueKind::Scalar => PropertyValue::Scalar(self.read_pod::<f32>(address)?),
            ValueKind::Flag => PropertyValue::Flag(self.read_pod::<u32>(address)? != 0),
            ValueKind::U32 => PropertyValue::U32(self.read_pod::<u32>(address)?),
            ValueKind::Ids => PropertyValue::Ids(self.read_ids(address)?),
            ValueKind::Text => PropertyValue::Text(self.read_text(address)?),
        };
        trace!(%address, ?value, "HAL read");
        Ok(value)
    }

    fn set(&self, address: &PropertyAddress, value: PropertyValue) -> Result<()> {
        let expected = address.selector.value_kind();
        if value.kind() != expected {
            return Err(PropertyError::TypeMismatch {
                address: *address,
                expected,
            });
        }

        trace!(%address, ?value, "HAL write");
        match value {
            PropertyValue::Scalar(v) => self.write_pod(address, v),
            PropertyValue::Flag(v) => self.write_pod(address, v as u32),
            PropertyValue::U32(v) => self.write_pod(address, v),
            PropertyValue::Ids(_) | PropertyValue::Text(_) => {
                Err(PropertyError::NotWritable { address: *address })
            }
        }
    }
}

/// Channel end the HAL callback writes into; boxed so its address is stable
struct ListenerSink {
    tx: mpsc::UnboundedSender<DeviceChange>,
}

unsafe extern "C" fn property_listener(
    object: AudioObjectID,
    count: u32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() || addresses.is_null() {
        return 0;
    }
    let sink = &*(client_data as *const ListenerSink);
    let addresses = std::slice::from_raw_parts(addresses, count as usize);

    for address in addresses {
        if let Some(change) = DeviceChange::from_notification(object, address.mSelector) {
            // Receiver gone means the loop is shutting down
            let _ = sink.tx.send(change);
        }
    }
    0
}

/// Device, members and channels whose controls are being listened to
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchTarget {
    device: DeviceId,
    members: Vec<DeviceId>,
    channels: Vec<u32>,
}

impl WatchTarget {
    fn new(device: DeviceId, members: &[DeviceId], channels: &[u32]) -> Self {
        Self {
            device,
            members: members.iter().copied().filter(|&m| m != device).collect(),
            channels: channels.to_vec(),
        }
    }

    /// Every address a listener should be registered on, present or not
    fn candidates(&self) -> Vec<PropertyAddress> {
        let mut candidates = vec![PropertyAddress::global(
            self.device.raw(),
            Selector::ActiveSubDevices,
        )];
        for object in std::iter::once(self.device).chain(self.members.iter().copied()) {
            for &channel in &self.channels {
                candidates.push(PropertyAddress::output(object.raw(), Selector::VolumeScalar, channel));
                candidates.push(PropertyAddress::output(object.raw(), Selector::Mute, channel));
            }
            candidates.push(PropertyAddress::output(
                object.raw(),
                Selector::VirtualMainVolume,
                MASTER_ELEMENT,
            ));
        }
        candidates
    }
}

/// Registered HAL listeners, removed on drop
pub struct ChangeSubscription {
    sink: Box<ListenerSink>,
    system: Vec<PropertyAddress>,
    device: Vec<PropertyAddress>,
    watched: Option<WatchTarget>,
}

impl ChangeSubscription {
    pub fn new(tx: mpsc::UnboundedSender<DeviceChange>) -> Self {
        Self {
            sink: Box::new(ListenerSink { tx }),
            system: Vec::new(),
            device: Vec::new(),
            watched: None,
        }
    }

    fn client_data(&self) -> *mut c_void {
        &*self.sink as *const ListenerSink as *mut c_void
    }

    fn add(&self, address: &PropertyAddress) -> Result<()> {
        let native = native(address);
        let status = unsafe {
            AudioObjectAddPropertyListener(
                address.object,
                &native,
                Some(property_listener),
                self.client_data(),
            )
        };
        check(address, status)
    }

    fn remove(&self, address: &PropertyAddress) {
        let native = native(address);
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                address.object,
                &native,
                Some(property_listener),
                self.client_data(),
            )
        };
        if status != 0 {
            debug!(%address, status, "Listener removal failed");
        }
    }

    /// Listen for default-output and device-list changes
    pub fn watch_system(&mut self) -> AudioResult<()> {
        for selector in [Selector::DefaultOutputDevice, Selector::Devices] {
            let address = PropertyAddress::system(selector);
            if self.system.contains(&address) {
                continue;
            }
            self.add(&address)?;
            self.system.push(address);
        }
        info!("Listening for output device changes");
        Ok(())
    }

    /// Listen for volume/mute changes on `device` and its members
    ///
    /// Replaces the listeners of the previously watched target, unless the
    /// device, its members and the channel list are all unchanged.
    pub fn watch_device(
        &mut self,
        bridge: &dyn PropertyBridge,
        device: DeviceId,
        members: &[DeviceId],
        channels: &[u32],
    ) -> AudioResult<()> {
        let target = WatchTarget::new(device, members, channels);
        if self.watched.as_ref() == Some(&target) {
            return Ok(());
        }
        self.unwatch_device();

        for address in target.candidates() {
            if !bridge.has_property(&address) {
                continue;
            }
            match self.add(&address) {
                Ok(()) => self.device.push(address),
                Err(e) => warn!(%address, error = %e, "Could not listen for control changes"),
            }
        }

        debug!(
            %device,
            members = target.members.len(),
            listeners = self.device.len(),
            "Watching device controls"
        );
        self.watched = Some(target);
        Ok(())
    }

    pub fn unwatch_device(&mut self) {
        for address in mem::take(&mut self.device) {
            self.remove(&address);
        }
        self.watched = None;
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.unwatch_device();
        for address in mem::take(&mut self.system) {
            self.remove(&address);
        }
    }
}
