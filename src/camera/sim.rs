//! In-process simulated UVC backend.
//!
//! Implements every collaborator a session depends on (USB host, capture
//! handles, frame source, display, event sink) without hardware. Events are
//! injected explicitly: plug a device, connect it, emit frames. Used by the
//! test-suite and the `simulate` subcommand.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::capturer::UvcCameraCapturer;
use super::device::{ControlBlock, DeviceEvent, DeviceListener, DeviceMonitor, UsbDevice, UsbHost};
use super::enumerator::UvcCameraEnumerator;
use super::handle::{
    ButtonCallback, CaptureHandle, CaptureHandleFactory, StatusCallback, StatusEvent,
};
use super::host::{CaptureBackend, DisplayRotation, FrameCallback, FrameSource, SessionEvents};
use super::session::UvcCameraSession;
use super::types::{
    CameraError, CameraSettings, CaptureFormat, RawFrame, Rotation, SessionId, Surface,
    TextureBuffer, VideoFrame,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// USB host
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UsbState {
    devices: Vec<UsbDevice>,
    granted: HashSet<String>,
    auto_grant: bool,
    listeners: HashMap<u64, Arc<dyn DeviceListener>>,
    next_monitor: u64,
    next_fd: i32,
    permission_requests: Vec<String>,
    monitors_created: usize,
    monitors_destroyed: usize,
}

impl UsbState {
    fn control_block(&mut self, device: &UsbDevice) -> ControlBlock {
        self.next_fd += 1;
        let address = self
            .devices
            .iter()
            .position(|d| d == device)
            .map(|i| i as u8 + 1)
            .unwrap_or(0);
        ControlBlock {
            device: device.clone(),
            file_descriptor: 100 + self.next_fd,
            bus_number: 1,
            device_address: address,
        }
    }
}

/// Simulated USB subsystem. Clones share the same bus.
#[derive(Clone, Default)]
pub struct SimulatedUsbHost {
    shared: Arc<Mutex<UsbState>>,
}

impl SimulatedUsbHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant permission as soon as it is requested.
    pub fn set_auto_grant(&self, enabled: bool) {
        lock(&self.shared).auto_grant = enabled;
    }

    /// Attach a device and notify every registered monitor.
    pub fn plug(&self, device: UsbDevice) {
        {
            let mut state = lock(&self.shared);
            if !state.devices.contains(&device) {
                state.devices.push(device.clone());
            }
        }
        self.broadcast(DeviceEvent::Attached(device));
    }

    /// Grant permission for `name` and deliver a connect notification.
    ///
    /// Returns `false` when no such device is attached.
    pub fn connect(&self, name: &str) -> bool {
        let event = {
            let mut state = lock(&self.shared);
            let Some(device) = state.devices.iter().find(|d| d.matches(name)).cloned() else {
                return false;
            };
            state.granted.insert(device.name.clone());
            let control = state.control_block(&device);
            DeviceEvent::Connected {
                device,
                control,
                is_new: true,
            }
        };
        self.broadcast(event);
        true
    }

    /// Deliver a disconnect notification for `name`, keeping it attached.
    pub fn disconnect(&self, name: &str) -> bool {
        let event = {
            let mut state = lock(&self.shared);
            let Some(device) = state.devices.iter().find(|d| d.matches(name)).cloned() else {
                return false;
            };
            let control = state.control_block(&device);
            DeviceEvent::Disconnected { device, control }
        };
        self.broadcast(event);
        true
    }

    /// Disconnect and detach `name`.
    pub fn unplug(&self, name: &str) -> bool {
        if !self.disconnect(name) {
            return false;
        }
        let device = {
            let mut state = lock(&self.shared);
            let Some(index) = state.devices.iter().position(|d| d.matches(name)) else {
                return false;
            };
            state.granted.remove(name);
            state.devices.remove(index)
        };
        self.broadcast(DeviceEvent::Detached(device));
        true
    }

    /// The user declines the permission prompt for `name`.
    pub fn deny(&self, name: &str) -> bool {
        let device = {
            let state = lock(&self.shared);
            state.devices.iter().find(|d| d.matches(name)).cloned()
        };
        match device {
            Some(device) => {
                self.broadcast(DeviceEvent::Cancelled(device));
                true
            }
            None => false,
        }
    }

    /// Deliver an arbitrary event, e.g. one for a device that is not attached.
    pub fn inject(&self, event: DeviceEvent) {
        self.broadcast(event);
    }

    /// Device names permission was requested for, in request order.
    pub fn permission_requests(&self) -> Vec<String> {
        lock(&self.shared).permission_requests.clone()
    }

    pub fn registered_monitors(&self) -> usize {
        lock(&self.shared).listeners.len()
    }

    pub fn monitors_created(&self) -> usize {
        lock(&self.shared).monitors_created
    }

    pub fn monitors_destroyed(&self) -> usize {
        lock(&self.shared).monitors_destroyed
    }

    fn broadcast(&self, event: DeviceEvent) {
        let listeners: Vec<_> = lock(&self.shared).listeners.values().cloned().collect();
        for listener in listeners {
            listener.on_device_event(event.clone());
        }
    }
}

impl UsbHost for SimulatedUsbHost {
    fn device_list(&self) -> Vec<UsbDevice> {
        lock(&self.shared).devices.clone()
    }

    fn create_monitor(&self, listener: Arc<dyn DeviceListener>) -> Box<dyn DeviceMonitor> {
        let id = {
            let mut state = lock(&self.shared);
            state.next_monitor += 1;
            state.monitors_created += 1;
            state.next_monitor
        };
        Box::new(SimulatedMonitor {
            id,
            shared: Arc::clone(&self.shared),
            listener: Some(listener),
        })
    }
}

struct SimulatedMonitor {
    id: u64,
    shared: Arc<Mutex<UsbState>>,
    listener: Option<Arc<dyn DeviceListener>>,
}

impl DeviceMonitor for SimulatedMonitor {
    fn register(&mut self) -> Result<(), CameraError> {
        let listener = self
            .listener
            .clone()
            .ok_or_else(|| CameraError::Monitor("monitor destroyed".to_string()))?;
        lock(&self.shared).listeners.insert(self.id, listener);
        Ok(())
    }

    fn unregister(&mut self) {
        lock(&self.shared).listeners.remove(&self.id);
    }

    fn destroy(&mut self) {
        self.unregister();
        if self.listener.take().is_some() {
            lock(&self.shared).monitors_destroyed += 1;
        }
    }

    fn device_list(&self) -> Vec<UsbDevice> {
        lock(&self.shared).devices.clone()
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        lock(&self.shared).granted.contains(&device.name)
    }

    fn request_permission(&mut self, device: &UsbDevice) -> Result<(), CameraError> {
        let connected = {
            let mut state = lock(&self.shared);
            state.permission_requests.push(device.name.clone());
            if state.auto_grant {
                state.granted.insert(device.name.clone());
            }
            if state.granted.contains(&device.name) {
                let control = state.control_block(device);
                Some(DeviceEvent::Connected {
                    device: device.clone(),
                    control,
                    is_new: true,
                })
            } else {
                None
            }
        };
        if let (Some(event), Some(listener)) = (connected, self.listener.as_ref()) {
            listener.on_device_event(event);
        }
        Ok(())
    }

    fn open_device(&mut self, device: &UsbDevice) -> Result<ControlBlock, CameraError> {
        let mut state = lock(&self.shared);
        if !state.granted.contains(&device.name) {
            return Err(CameraError::PermissionDenied(device.name.clone()));
        }
        Ok(state.control_block(device))
    }
}

impl Drop for SimulatedMonitor {
    fn drop(&mut self) {
        lock(&self.shared).listeners.remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Capture handles
// ---------------------------------------------------------------------------

/// Counters describing what happened to simulated capture handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub created: usize,
    pub opened: usize,
    pub previews_started: usize,
    pub destroyed: usize,
    /// Calls made on a handle after it was destroyed
    pub used_after_destroy: usize,
    /// Every preview format the cameras were asked for, in order
    pub preview_requests: Vec<CaptureFormat>,
}

impl CameraStats {
    /// Handles created and not yet destroyed.
    pub fn live(&self) -> usize {
        self.created - self.destroyed
    }
}

#[derive(Default)]
struct CameraState {
    supported: Option<Vec<CaptureFormat>>,
    fail_open: bool,
    fail_start_preview: bool,
    stats: CameraStats,
}

/// Factory of simulated UVC cameras.
#[derive(Clone, Default)]
pub struct SimulatedCameras {
    shared: Arc<Mutex<CameraState>>,
}

impl SimulatedCameras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept these preview formats. Others are rejected.
    pub fn accept_only(&self, formats: &[CaptureFormat]) {
        lock(&self.shared).supported = Some(formats.to_vec());
    }

    pub fn accept_any(&self) {
        lock(&self.shared).supported = None;
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.shared).fail_open = fail;
    }

    pub fn fail_start_preview(&self, fail: bool) {
        lock(&self.shared).fail_start_preview = fail;
    }

    pub fn stats(&self) -> CameraStats {
        lock(&self.shared).stats.clone()
    }
}

impl CaptureHandleFactory for SimulatedCameras {
    fn create(&self) -> Box<dyn CaptureHandle> {
        lock(&self.shared).stats.created += 1;
        Box::new(SimulatedCamera {
            shared: Arc::clone(&self.shared),
            destroyed: false,
            status_callback: None,
            button_callback: None,
        })
    }
}

struct SimulatedCamera {
    shared: Arc<Mutex<CameraState>>,
    destroyed: bool,
    status_callback: Option<StatusCallback>,
    button_callback: Option<ButtonCallback>,
}

impl SimulatedCamera {
    fn check_alive(&self) -> Result<(), CameraError> {
        if self.destroyed {
            lock(&self.shared).stats.used_after_destroy += 1;
            return Err(CameraError::OpenFailed("camera destroyed".to_string()));
        }
        Ok(())
    }
}

impl CaptureHandle for SimulatedCamera {
    fn open(&mut self, control: &ControlBlock) -> Result<(), CameraError> {
        self.check_alive()?;
        let mut state = lock(&self.shared);
        if state.fail_open {
            return Err(CameraError::OpenFailed(format!(
                "no UVC interface on {}",
                control.device.name
            )));
        }
        state.stats.opened += 1;
        Ok(())
    }

    fn set_auto_focus(&mut self, _enabled: bool) -> Result<(), CameraError> {
        self.check_alive()
    }

    fn set_auto_white_balance(&mut self, _enabled: bool) -> Result<(), CameraError> {
        self.check_alive()
    }

    fn set_status_callback(&mut self, callback: Option<StatusCallback>) {
        if self.check_alive().is_ok() {
            self.status_callback = callback;
        }
    }

    fn set_button_callback(&mut self, callback: Option<ButtonCallback>) {
        if self.check_alive().is_ok() {
            self.button_callback = callback;
        }
    }

    fn set_preview_size(&mut self, format: &CaptureFormat) -> Result<(), CameraError> {
        self.check_alive()?;
        let mut state = lock(&self.shared);
        state.stats.preview_requests.push(*format);
        match &state.supported {
            Some(supported) if !supported.contains(format) => {
                Err(CameraError::UnsupportedFormat(*format))
            }
            _ => Ok(()),
        }
    }

    fn set_preview_display(&mut self, _surface: Option<Surface>) -> Result<(), CameraError> {
        self.check_alive()
    }

    fn start_preview(&mut self) -> Result<(), CameraError> {
        self.check_alive()?;
        {
            let mut state = lock(&self.shared);
            if state.fail_start_preview {
                return Err(CameraError::PreviewFailed("isochronous bandwidth".to_string()));
            }
            state.stats.previews_started += 1;
        }
        if let Some(callback) = &self.status_callback {
            callback(StatusEvent {
                status_class: 1,
                event: 0,
                selector: 0,
                status_attribute: 0,
                data: Vec::new(),
            });
        }
        Ok(())
    }

    fn stop_preview(&mut self) -> Result<(), CameraError> {
        self.check_alive()
    }

    fn close(&mut self) {
        let _ = self.check_alive();
    }

    fn destroy(&mut self) {
        if self.check_alive().is_ok() {
            self.destroyed = true;
            self.status_callback = None;
            self.button_callback = None;
            lock(&self.shared).stats.destroyed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Frame source and display
// ---------------------------------------------------------------------------

struct FrameSourceState {
    callback: Option<Arc<FrameCallback>>,
    texture_size: (u32, u32),
    next_texture_id: u32,
    listen_calls: usize,
}

/// Simulated texture helper.
pub struct SimulatedFrameSource {
    state: Mutex<FrameSourceState>,
}

impl Default for SimulatedFrameSource {
    fn default() -> Self {
        Self {
            state: Mutex::new(FrameSourceState {
                callback: None,
                texture_size: (0, 0),
                next_texture_id: 1,
                listen_calls: 0,
            }),
        }
    }
}

impl SimulatedFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.state).callback.is_some()
    }

    /// How often a sink was attached.
    pub fn listen_calls(&self) -> usize {
        lock(&self.state).listen_calls
    }

    pub fn texture_size(&self) -> (u32, u32) {
        lock(&self.state).texture_size
    }

    /// Render one frame and hand it to the attached sink.
    ///
    /// Returns a weak reference to the frame's texture so callers can check
    /// it was released, or `None` when no sink is attached.
    pub fn emit_frame(&self, timestamp_ns: i64) -> Option<Weak<TextureBuffer>> {
        let (callback, buffer) = {
            let mut state = lock(&self.state);
            let callback = state.callback.clone()?;
            state.next_texture_id += 1;
            let (width, height) = state.texture_size;
            let buffer = Arc::new(TextureBuffer {
                texture_id: state.next_texture_id,
                width,
                height,
            });
            (callback, buffer)
        };
        let weak = Arc::downgrade(&buffer);
        callback(RawFrame {
            buffer,
            timestamp_ns,
        });
        Some(weak)
    }
}

impl FrameSource for SimulatedFrameSource {
    fn set_texture_size(&self, width: u32, height: u32) {
        lock(&self.state).texture_size = (width, height);
    }

    fn start_listening(&self, callback: FrameCallback) {
        let mut state = lock(&self.state);
        state.callback = Some(Arc::new(callback));
        state.listen_calls += 1;
    }

    fn stop_listening(&self) {
        let callback = lock(&self.state).callback.take();
        drop(callback);
    }

    fn surface(&self) -> Surface {
        Surface { texture_id: 1 }
    }
}

/// Display whose rotation is set by hand.
#[derive(Debug, Default)]
pub struct SimulatedDisplay {
    rotation: AtomicU8,
}

impl SimulatedDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        self.rotation.store(rotation.index(), Ordering::SeqCst);
    }
}

impl DisplayRotation for SimulatedDisplay {
    fn rotation(&self) -> Rotation {
        Rotation::from_index(self.rotation.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

/// A host notification, as recorded by [`RecordingEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Opening(SessionId),
    Frame {
        session: SessionId,
        rotation: u32,
        timestamp_ns: i64,
    },
    Closed(SessionId),
    Muted {
        session: SessionId,
        muted: bool,
    },
}

impl HostEvent {
    pub fn session(&self) -> SessionId {
        match self {
            HostEvent::Opening(session) | HostEvent::Closed(session) => *session,
            HostEvent::Frame { session, .. } | HostEvent::Muted { session, .. } => *session,
        }
    }
}

/// Event sink that records every notification in order.
#[derive(Default)]
pub struct RecordingEvents {
    records: Mutex<Vec<HostEvent>>,
    retain_frames: AtomicBool,
    retained: Mutex<Vec<VideoFrame>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a clone of every forwarded frame.
    pub fn retain_frames(&self, retain: bool) {
        self.retain_frames.store(retain, Ordering::SeqCst);
    }

    pub fn retained_frames(&self) -> Vec<VideoFrame> {
        lock(&self.retained).clone()
    }

    pub fn records(&self) -> Vec<HostEvent> {
        lock(&self.records).clone()
    }

    pub fn records_for(&self, session: SessionId) -> Vec<HostEvent> {
        self.records()
            .into_iter()
            .filter(|e| e.session() == session)
            .collect()
    }

    pub fn frame_count(&self, session: SessionId) -> usize {
        self.records_for(session)
            .iter()
            .filter(|e| matches!(e, HostEvent::Frame { .. }))
            .count()
    }

    pub fn closed_count(&self, session: SessionId) -> usize {
        self.records_for(session)
            .iter()
            .filter(|e| matches!(e, HostEvent::Closed(_)))
            .count()
    }

    /// Index of the first recorded event matching `predicate`.
    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&HostEvent) -> bool,
    {
        self.records().iter().position(predicate)
    }

    fn push(&self, event: HostEvent) {
        log::debug!("host event: {:?}", event);
        lock(&self.records).push(event);
    }
}

impl SessionEvents for RecordingEvents {
    fn on_camera_opening(&self, session: SessionId) {
        self.push(HostEvent::Opening(session));
    }

    fn on_frame_captured(&self, session: SessionId, frame: &VideoFrame) {
        if self.retain_frames.load(Ordering::SeqCst) {
            lock(&self.retained).push(frame.clone());
        }
        self.push(HostEvent::Frame {
            session,
            rotation: frame.rotation,
            timestamp_ns: frame.timestamp_ns,
        });
    }

    fn on_camera_closed(&self, session: SessionId) {
        self.push(HostEvent::Closed(session));
    }

    fn on_video_muted(&self, session: SessionId, muted: bool) {
        self.push(HostEvent::Muted { session, muted });
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Every simulated collaborator, wired together.
pub struct SimulatedBackend {
    pub usb: Arc<SimulatedUsbHost>,
    pub cameras: Arc<SimulatedCameras>,
    pub frames: Arc<SimulatedFrameSource>,
    pub display: Arc<SimulatedDisplay>,
    pub events: Arc<RecordingEvents>,
    pub settings: CameraSettings,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_settings(CameraSettings::default())
    }

    pub fn with_settings(settings: CameraSettings) -> Self {
        Self {
            usb: Arc::new(SimulatedUsbHost::new()),
            cameras: Arc::new(SimulatedCameras::new()),
            frames: Arc::new(SimulatedFrameSource::new()),
            display: Arc::new(SimulatedDisplay::new()),
            events: Arc::new(RecordingEvents::new()),
            settings,
        }
    }

    pub fn backend(&self) -> CaptureBackend {
        CaptureBackend {
            usb: self.usb.clone(),
            cameras: self.cameras.clone(),
            frames: self.frames.clone(),
            display: self.display.clone(),
        }
    }

    pub fn enumerator(&self) -> UvcCameraEnumerator {
        UvcCameraEnumerator::new(self.backend(), self.settings.clone())
    }

    pub fn capturer(&self, device_name: &str) -> UvcCameraCapturer {
        UvcCameraCapturer::new(
            device_name,
            self.backend(),
            self.events.clone(),
            self.settings.clone(),
        )
    }

    /// Create a session directly, bypassing a capturer.
    pub fn create_session(
        &self,
        previous: Option<UvcCameraSession>,
        device_name: &str,
        format: CaptureFormat,
    ) -> Result<UvcCameraSession, CameraError> {
        UvcCameraSession::create(
            previous,
            device_name,
            format,
            self.backend(),
            self.events.clone(),
            self.settings.clone(),
        )
    }
}
