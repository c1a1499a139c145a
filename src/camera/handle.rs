//! Capture handle contract and the slot that owns the open handle.

use std::sync::{Mutex, MutexGuard};

use super::device::ControlBlock;
use super::types::{CameraError, CaptureFormat, Surface};

/// UVC status interrupt reported by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub status_class: i32,
    pub event: i32,
    pub selector: i32,
    pub status_attribute: i32,
    pub data: Vec<u8>,
}

/// Hardware button press reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: i32,
    pub state: i32,
}

pub type StatusCallback = Box<dyn Fn(StatusEvent) + Send + Sync>;
pub type ButtonCallback = Box<dyn Fn(ButtonEvent) + Send + Sync>;

/// An opened UVC camera.
///
/// Not safe to drive from several threads at once; the owning session keeps
/// it in a [`CaptureSlot`].
pub trait CaptureHandle: Send {
    fn open(&mut self, control: &ControlBlock) -> Result<(), CameraError>;

    fn set_auto_focus(&mut self, enabled: bool) -> Result<(), CameraError>;

    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<(), CameraError>;

    fn set_status_callback(&mut self, callback: Option<StatusCallback>);

    fn set_button_callback(&mut self, callback: Option<ButtonCallback>);

    /// Negotiate the preview stream. Rejects unsupported formats with
    /// [`CameraError::UnsupportedFormat`].
    fn set_preview_size(&mut self, format: &CaptureFormat) -> Result<(), CameraError>;

    fn set_preview_display(&mut self, surface: Option<Surface>) -> Result<(), CameraError>;

    fn start_preview(&mut self) -> Result<(), CameraError>;

    fn stop_preview(&mut self) -> Result<(), CameraError>;

    fn close(&mut self);

    /// Free the native camera. The handle must not be used afterwards.
    fn destroy(&mut self);
}

/// Creates unopened capture handles.
pub trait CaptureHandleFactory: Send + Sync {
    fn create(&self) -> Box<dyn CaptureHandle>;
}

/// Exclusive owner of a session's capture handle.
///
/// Connect and disconnect notifications can race with an explicit stop, so
/// the handle is only replaced or released under the slot lock. Releasing an
/// empty slot is a no-op.
#[derive(Default)]
pub struct CaptureSlot {
    handle: Mutex<Option<Box<dyn CaptureHandle>>>,
}

impl std::fmt::Debug for CaptureSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSlot")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a previous release panicked mid-way; the
    // slot content is still the handle (or nothing).
    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn CaptureHandle>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    /// Store a freshly started handle, releasing whatever was held before.
    pub fn install(&self, handle: Box<dyn CaptureHandle>) {
        let previous = self.lock().replace(handle);
        if let Some(previous) = previous {
            log::warn!("Replacing a capture handle that was still installed");
            release_handle(previous);
        }
    }

    /// Stop and free the held handle.
    ///
    /// Returns `false` when the slot was already empty.
    pub fn release(&self) -> bool {
        let handle = self.lock().take();
        match handle {
            Some(handle) => {
                release_handle(handle);
                true
            }
            None => false,
        }
    }
}

/// Tear a handle down in the order the UVC backend expects.
fn release_handle(mut handle: Box<dyn CaptureHandle>) {
    handle.set_status_callback(None);
    handle.set_button_callback(None);
    if let Err(e) = handle.stop_preview() {
        log::warn!("Failed to stop camera preview during release: {}", e);
    }
    handle.close();
    handle.destroy();
}
