//! Property bridge abstraction
//!
//! The core never talks to hardware directly. Every query goes through a
//! [`PropertyBridge`], addressed by an immutable [`PropertyAddress`] and
//! answered with a [`PropertyValue`]. Platform implementations (CoreAudio)
//! live in the `infra` crate; [`crate::domain::memory::MemoryBridge`] is the
//! in-memory implementation used by tests and simulation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw platform object identifier
pub type ObjectId = u32;

/// The system object owns the device list and the default-device properties
pub const SYSTEM_OBJECT: ObjectId = 1;

/// Element 0 addresses the master channel
pub const MASTER_ELEMENT: u32 = 0;

/// Transport type reported by aggregate devices ('grup')
pub const TRANSPORT_TYPE_AGGREGATE: u32 = four_char_code(b"grup");

/// Transport type reported by built-in devices ('bltn')
pub const TRANSPORT_TYPE_BUILT_IN: u32 = four_char_code(b"bltn");

/// Transport type reported by USB devices ('usb ')
pub const TRANSPORT_TYPE_USB: u32 = four_char_code(b"usb ");

/// Pack a four-character tag into its big-endian integer code
pub const fn four_char_code(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

/// Errors returned by a property bridge call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("{address} does not exist")]
    NotFound { address: PropertyAddress },

    #[error("{address} failed with OS status {status}")]
    Os { address: PropertyAddress, status: i32 },

    #[error("{address} returned a value of the wrong kind (expected {expected:?})")]
    TypeMismatch {
        address: PropertyAddress,
        expected: ValueKind,
    },

    #[error("{address} is not writable")]
    NotWritable { address: PropertyAddress },
}

pub type Result<T> = std::result::Result<T, PropertyError>;

/// Property selectors the core needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    DefaultOutputDevice,
    Devices,
    TransportType,
    DeviceName,
    DeviceUid,
    OutputStreams,
    ActiveSubDevices,
    VolumeScalar,
    Mute,
    /// Vendor "virtual main volume", used opportunistically when present
    VirtualMainVolume,
}

impl Selector {
    /// Platform four-char code for this selector
    pub fn code(self) -> u32 {
        match self {
            Selector::DefaultOutputDevice => four_char_code(b"dOut"),
            Selector::Devices => four_char_code(b"dev#"),
            Selector::TransportType => four_char_code(b"tran"),
            Selector::DeviceName => four_char_code(b"lnam"),
            Selector::DeviceUid => four_char_code(b"uid "),
            Selector::OutputStreams => four_char_code(b"stm#"),
            Selector::ActiveSubDevices => four_char_code(b"agrp"),
            Selector::VolumeScalar => four_char_code(b"volm"),
            Selector::Mute => four_char_code(b"mute"),
            Selector::VirtualMainVolume => four_char_code(b"vmvc"),
        }
    }

    /// Shape of the data stored behind this selector
    pub fn value_kind(self) -> ValueKind {
        match self {
            Selector::DefaultOutputDevice | Selector::TransportType => ValueKind::U32,
            Selector::Devices | Selector::OutputStreams | Selector::ActiveSubDevices => {
                ValueKind::Ids
            }
            Selector::DeviceName | Selector::DeviceUid => ValueKind::Text,
            Selector::VolumeScalar | Selector::VirtualMainVolume => ValueKind::Scalar,
            Selector::Mute => ValueKind::Flag,
        }
    }
}

/// Property scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Output,
}

impl Scope {
    pub fn code(self) -> u32 {
        match self {
            Scope::Global => four_char_code(b"glob"),
            Scope::Output => four_char_code(b"outp"),
        }
    }
}

/// Fully-qualified property request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyAddress {
    pub object: ObjectId,
    pub selector: Selector,
    pub scope: Scope,
    pub element: u32,
}

impl PropertyAddress {
    pub fn new(object: ObjectId, selector: Selector, scope: Scope, element: u32) -> Self {
        Self {
            object,
            selector,
            scope,
            element,
        }
    }

    /// Global-scope, master-element address
    pub fn global(object: ObjectId, selector: Selector) -> Self {
        Self::new(object, selector, Scope::Global, MASTER_ELEMENT)
    }

    /// Output-scope address on a specific element
    pub fn output(object: ObjectId, selector: Selector, element: u32) -> Self {
        Self::new(object, selector, Scope::Output, element)
    }

    /// Property of the system object
    pub fn system(selector: Selector) -> Self {
        Self::global(SYSTEM_OBJECT, selector)
    }
}

impl fmt::Display for PropertyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}[object={}, scope={:?}, element={}]",
            self.selector, self.object, self.scope, self.element
        )
    }
}

/// Shape of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Scalar,
    Flag,
    U32,
    Ids,
    Text,
}

/// Typed property payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Scalar(f32),
    Flag(bool),
    U32(u32),
    Ids(Vec<ObjectId>),
    Text(String),
}

impl PropertyValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Scalar(_) => ValueKind::Scalar,
            PropertyValue::Flag(_) => ValueKind::Flag,
            PropertyValue::U32(_) => ValueKind::U32,
            PropertyValue::Ids(_) => ValueKind::Ids,
            PropertyValue::Text(_) => ValueKind::Text,
        }
    }

    /// Size in bytes the platform reports for this payload
    pub fn byte_size(&self) -> u32 {
        match self {
            PropertyValue::Scalar(_) | PropertyValue::Flag(_) | PropertyValue::U32(_) => 4,
            PropertyValue::Ids(ids) => (ids.len() * std::mem::size_of::<ObjectId>()) as u32,
            // CFStringRef
            PropertyValue::Text(_) => std::mem::size_of::<usize>() as u32,
        }
    }
}

/// Narrow interface to the OS audio property service
///
/// Implementations must be cheap to call repeatedly: the engine re-queries
/// device structure on every operation instead of caching it.
pub trait PropertyBridge: Send + Sync {
    /// Whether the property exists on the object
    fn has_property(&self, address: &PropertyAddress) -> bool;

    /// Size in bytes of the property's current value
    fn data_size(&self, address: &PropertyAddress) -> Result<u32>;

    /// Read the property's current value
    fn get(&self, address: &PropertyAddress) -> Result<PropertyValue>;

    /// Write a new value
    fn set(&self, address: &PropertyAddress, value: PropertyValue) -> Result<()>;

    fn get_scalar(&self, address: &PropertyAddress) -> Result<f32> {
        match self.get(address)? {
            PropertyValue::Scalar(v) => Ok(v),
            _ => Err(mismatch(address, ValueKind::Scalar)),
        }
    }

    fn get_flag(&self, address: &PropertyAddress) -> Result<bool> {
        match self.get(address)? {
            PropertyValue::Flag(v) => Ok(v),
            PropertyValue::U32(v) => Ok(v != 0),
            _ => Err(mismatch(address, ValueKind::Flag)),
        }
    }

    fn get_u32(&self, address: &PropertyAddress) -> Result<u32> {
        match self.get(address)? {
            PropertyValue::U32(v) => Ok(v),
            _ => Err(mismatch(address, ValueKind::U32)),
        }
    }

    fn get_ids(&self, address: &PropertyAddress) -> Result<Vec<ObjectId>> {
        match self.get(address)? {
            PropertyValue::Ids(v) => Ok(v),
            _ => Err(mismatch(address, ValueKind::Ids)),
        }
    }

    fn get_text(&self, address: &PropertyAddress) -> Result<String> {
        match self.get(address)? {
            PropertyValue::Text(v) => Ok(v),
            _ => Err(mismatch(address, ValueKind::Text)),
        }
    }
}

fn mismatch(address: &PropertyAddress, expected: ValueKind) -> PropertyError {
    PropertyError::TypeMismatch {
        address: *address,
        expected,
    }
}
