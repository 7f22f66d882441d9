//! Platform-specific property bridges
//!
//! - macOS: CoreAudio HAL via `coreaudio-sys`, with property listeners
//! - everywhere: an in-memory simulated topology for `--simulate`

#[cfg(target_os = "macos")]
pub mod coreaudio_backend;
pub mod simulated;

#[cfg(target_os = "macos")]
pub use coreaudio_backend::*;
pub use simulated::*;

use aggvol_core::domain::audio::Result;
use aggvol_core::domain::property::PropertyBridge;
use std::sync::Arc;

/// The OS property bridge for this platform
#[cfg(target_os = "macos")]
pub fn system_bridge() -> Result<Arc<dyn PropertyBridge>> {
    Ok(Arc::new(CoreAudioBridge::new()))
}

/// The OS property bridge for this platform
#[cfg(not(target_os = "macos"))]
pub fn system_bridge() -> Result<Arc<dyn PropertyBridge>> {
    Err(aggvol_core::domain::audio::AudioError::Unsupported(
        "CoreAudio is only available on macOS, use --simulate".to_string(),
    ))
}

/// Whether OS change notifications can be subscribed to on this platform
pub const fn supports_change_listeners() -> bool {
    cfg!(target_os = "macos")
}
