//! Camera capturer: owner of the current session of one UVC camera.
//!
//! The capturer is the only place that holds "the" session. Starting,
//! reformatting or switching hands the current session explicitly to
//! [`UvcCameraSession::create`], which stops it before the new one starts.

use std::sync::{Arc, Mutex, MutexGuard};

use super::host::{CaptureBackend, SessionEvents};
use super::session::UvcCameraSession;
use super::types::{CameraError, CameraSettings, CaptureFormat};

/// Host-facing capability of a video capturer.
pub trait CameraCapturer: Send + Sync {
    /// Start (or restart) capturing in the given format.
    fn start_capture(&self, width: u32, height: u32, frame_rate: u32) -> Result<(), CameraError>;

    /// Stop capturing. Blocks until the current session has been torn down.
    fn stop_capture(&self);

    /// Replace the running session with one using the new format.
    fn change_capture_format(
        &self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<(), CameraError>;

    /// Capture from another camera, keeping the current format.
    fn switch_camera(&self, device_name: &str) -> Result<(), CameraError>;

    fn is_screencast(&self) -> bool {
        false
    }
}

struct CapturerState {
    device_name: String,
    format: Option<CaptureFormat>,
    session: Option<UvcCameraSession>,
}

/// Capturer for USB video class cameras.
pub struct UvcCameraCapturer {
    backend: CaptureBackend,
    events: Arc<dyn SessionEvents>,
    settings: CameraSettings,
    state: Mutex<CapturerState>,
}

impl std::fmt::Debug for UvcCameraCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("UvcCameraCapturer")
            .field("device_name", &state.device_name)
            .field("format", &state.format)
            .field("session", &state.session.as_ref().map(|s| s.id()))
            .finish_non_exhaustive()
    }
}

impl UvcCameraCapturer {
    pub fn new(
        device_name: &str,
        backend: CaptureBackend,
        events: Arc<dyn SessionEvents>,
        settings: CameraSettings,
    ) -> Self {
        Self {
            backend,
            events,
            settings,
            state: Mutex::new(CapturerState {
                device_name: device_name.to_string(),
                format: None,
                session: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CapturerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn device_name(&self) -> String {
        self.lock().device_name.clone()
    }

    /// The session currently owned by this capturer, if any.
    pub fn current_session(&self) -> Option<UvcCameraSession> {
        self.lock().session.clone()
    }

    /// Supersede the current session with a new one for the current device.
    fn replace_session(
        &self,
        state: &mut CapturerState,
        format: CaptureFormat,
    ) -> Result<(), CameraError> {
        let previous = state.session.take();
        let session = UvcCameraSession::create(
            previous,
            &state.device_name,
            format,
            self.backend.clone(),
            Arc::clone(&self.events),
            self.settings.clone(),
        )?;
        log::info!(
            "Capturing {} from {} in {}",
            session.id(),
            state.device_name,
            format
        );
        state.format = Some(format);
        state.session = Some(session);
        Ok(())
    }
}

impl Drop for UvcCameraCapturer {
    fn drop(&mut self) {
        let session = self.lock().session.take();
        if let Some(session) = session {
            log::debug!("Capturer dropped, stopping {}", session.id());
            session.stop();
        }
    }
}

impl CameraCapturer for UvcCameraCapturer {
    fn start_capture(&self, width: u32, height: u32, frame_rate: u32) -> Result<(), CameraError> {
        let mut state = self.lock();
        self.replace_session(&mut state, CaptureFormat::new(width, height, frame_rate))
    }

    fn stop_capture(&self) {
        let session = self.lock().session.take();
        match session {
            Some(session) => {
                log::info!("Stopping {}", session.id());
                session.stop_and_wait();
            }
            None => log::debug!("stop_capture without a running session"),
        }
    }

    fn change_capture_format(
        &self,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<(), CameraError> {
        let mut state = self.lock();
        if state.session.is_none() {
            log::warn!("change_capture_format ignored, capturer is not started");
            return Ok(());
        }
        self.replace_session(&mut state, CaptureFormat::new(width, height, frame_rate))
    }

    fn switch_camera(&self, device_name: &str) -> Result<(), CameraError> {
        let mut state = self.lock();
        state.device_name = device_name.to_string();
        match (state.session.is_some(), state.format) {
            (true, Some(format)) => self.replace_session(&mut state, format),
            _ => Ok(()),
        }
    }
}
