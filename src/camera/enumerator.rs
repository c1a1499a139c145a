//! Camera enumeration over the USB host.

use std::sync::Arc;

use super::capturer::{CameraCapturer, UvcCameraCapturer};
use super::host::{CaptureBackend, SessionEvents};
use super::types::{CameraSettings, CaptureFormat};

/// Host-facing capability of a camera enumerator.
pub trait CameraEnumerator: Send + Sync {
    fn device_names(&self) -> Vec<String>;

    fn is_front_facing(&self, device_name: &str) -> bool;

    fn is_back_facing(&self, device_name: &str) -> bool;

    fn supported_formats(&self, device_name: &str) -> Vec<CaptureFormat>;

    fn create_capturer(
        &self,
        device_name: &str,
        events: Arc<dyn SessionEvents>,
    ) -> Box<dyn CameraCapturer>;
}

/// Enumerates every attached USB device as a UVC camera.
#[derive(Debug, Clone)]
pub struct UvcCameraEnumerator {
    backend: CaptureBackend,
    settings: CameraSettings,
}

impl UvcCameraEnumerator {
    pub fn new(backend: CaptureBackend, settings: CameraSettings) -> Self {
        Self { backend, settings }
    }

    /// Concrete capturer, for callers that need more than the trait.
    pub fn uvc_capturer(
        &self,
        device_name: &str,
        events: Arc<dyn SessionEvents>,
    ) -> UvcCameraCapturer {
        UvcCameraCapturer::new(
            device_name,
            self.backend.clone(),
            events,
            self.settings.clone(),
        )
    }
}

impl CameraEnumerator for UvcCameraEnumerator {
    fn device_names(&self) -> Vec<String> {
        self.backend
            .usb
            .device_list()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    // USB cameras have no facing.
    fn is_front_facing(&self, _device_name: &str) -> bool {
        false
    }

    fn is_back_facing(&self, _device_name: &str) -> bool {
        false
    }

    // Formats are only known once the camera is open; the session negotiates
    // and falls back instead.
    fn supported_formats(&self, _device_name: &str) -> Vec<CaptureFormat> {
        Vec::new()
    }

    fn create_capturer(
        &self,
        device_name: &str,
        events: Arc<dyn SessionEvents>,
    ) -> Box<dyn CameraCapturer> {
        Box::new(self.uvc_capturer(device_name, events))
    }
}
