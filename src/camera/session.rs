//! UVC camera session: lifecycle of one opened camera.
//!
//! A session goes `Created -> Running -> Stopped`. It is created for a named
//! USB device, waits for the device to be attached and connected, opens a
//! capture handle, and forwards frames to the host until stopped. Device
//! connect/disconnect swap the capture handle without leaving `Running`.
//!
//! All state lives on the session's [`SerialExecutor`] worker. USB monitor
//! notifications and frames arrive on foreign threads and are posted onto it.

use std::sync::Arc;
use std::time::Instant;

use super::device::{find_device, ControlBlock, DeviceEvent, DeviceListener, DeviceMonitor, UsbDevice};
use super::executor::{self, PendingWorker, SerialExecutor};
use super::handle::{CaptureHandle, CaptureSlot};
use super::host::{CaptureBackend, SessionEvents};
use super::types::{
    CameraError, CameraSettings, CaptureFormat, RawFrame, SessionId, SessionState, VideoFrame,
};

/// Host-facing capability of a camera session.
pub trait CameraSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Request teardown. Idempotent.
    fn stop(&self);
}

/// Handle to a running camera session. Cheap to clone.
#[derive(Clone)]
pub struct UvcCameraSession {
    id: SessionId,
    device_name: Arc<str>,
    format: CaptureFormat,
    executor: SerialExecutor<SessionCore>,
}

impl std::fmt::Debug for UvcCameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UvcCameraSession")
            .field("id", &self.id)
            .field("device_name", &self.device_name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl UvcCameraSession {
    /// Create a session for `device_name`.
    ///
    /// Returns immediately. When `previous` is given, its stop is posted onto
    /// its own executor and this session only starts once that stop has
    /// completed, so two sessions never feed the frame source at once.
    ///
    /// # Errors
    /// * `CameraError::Spawn` - If the worker thread cannot be spawned
    pub fn create(
        previous: Option<UvcCameraSession>,
        device_name: &str,
        format: CaptureFormat,
        backend: CaptureBackend,
        events: Arc<dyn SessionEvents>,
        settings: CameraSettings,
    ) -> Result<Self, CameraError> {
        let id = SessionId::next();
        log::debug!("Open camera {} as {} ({})", device_name, id, format);

        let (executor, worker) = SerialExecutor::new(format!("uvc-session-{}", id.as_u64()));
        let core = SessionCore {
            id,
            device_name: device_name.to_string(),
            format,
            settings,
            backend,
            events,
            state: SessionState::Created,
            current_device: None,
            monitor: None,
            capture: CaptureSlot::new(),
            listening: false,
            first_frame_reported: false,
            constructed_at: Instant::now(),
            executor: Some(executor.clone()),
        };
        executor.post(SessionCore::open)?;

        match previous {
            None => {
                worker.start(core)?;
            }
            Some(previous) => {
                log::debug!("{} waits for {} to stop", id, previous.id);
                previous.stop_then(move || launch(worker, core));
            }
        }

        Ok(Self {
            id,
            device_name: Arc::from(device_name),
            format,
            executor,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn capture_format(&self) -> CaptureFormat {
        self.format
    }

    /// Post the teardown onto the session executor. Idempotent.
    pub fn stop(&self) {
        if self.executor.post(SessionCore::stop).is_err() {
            log::debug!("{} already closed", self.id);
        }
    }

    /// Tear the session down and block until teardown completed.
    ///
    /// A session whose executor is already gone counts as stopped. Called
    /// from a session worker (e.g. inside a [`SessionEvents`] callback) the
    /// stop is only posted, and completes after the current job returns.
    pub fn stop_and_wait(&self) {
        if executor::on_worker_thread() {
            log::debug!("{} stop requested from a session worker, not waiting", self.id);
            self.stop();
            return;
        }
        if self.executor.run_sync(SessionCore::stop).is_err() {
            log::debug!("{} already closed", self.id);
        }
    }

    /// Current lifecycle state, read on the session executor.
    ///
    /// # Errors
    /// * `CameraError::SessionClosed` - If the executor is gone
    /// * `CameraError::WouldDeadlock` - If called from this session's own callbacks
    pub fn state(&self) -> Result<SessionState, CameraError> {
        self.executor.run_sync(|core| core.state)
    }

    /// Whether a capture handle is currently open.
    ///
    /// # Errors
    /// * `CameraError::SessionClosed` - If the executor is gone
    /// * `CameraError::WouldDeadlock` - If called from this session's own callbacks
    pub fn has_capture_handle(&self) -> Result<bool, CameraError> {
        self.executor.run_sync(|core| core.capture.is_occupied())
    }

    /// Block until every job posted so far has run.
    ///
    /// # Errors
    /// * `CameraError::SessionClosed` - If the executor is gone
    /// * `CameraError::WouldDeadlock` - If called from this session's own callbacks
    pub fn wait_idle(&self) -> Result<(), CameraError> {
        self.executor.run_sync(|_| ())
    }

    /// Stop this session, then run `continuation` on its executor.
    ///
    /// The continuation also runs if the stop job can never execute because
    /// the worker is already gone.
    fn stop_then<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let after = AfterStop::new(continuation);
        let posted = self.executor.post(move |core| {
            core.stop();
            after.run();
        });
        if posted.is_err() {
            log::debug!("{} already closed, starting successor now", self.id);
        }
    }
}

impl CameraSession for UvcCameraSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn stop(&self) {
        UvcCameraSession::stop(self);
    }
}

fn launch(worker: PendingWorker<SessionCore>, core: SessionCore) {
    let id = core.id;
    if let Err(e) = worker.start(core) {
        log::error!("Failed to start {}: {}", id, e);
    }
}

/// Runs its continuation exactly once: explicitly via [`AfterStop::run`], or
/// when dropped unrun because the owning job was discarded.
struct AfterStop(Option<Box<dyn FnOnce() + Send>>);

impl AfterStop {
    fn new<F: FnOnce() + Send + 'static>(continuation: F) -> Self {
        AfterStop(Some(Box::new(continuation)))
    }

    fn fire(&mut self) {
        if let Some(continuation) = self.0.take() {
            continuation();
        }
    }

    fn run(mut self) {
        self.fire();
    }
}

impl Drop for AfterStop {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Redirects monitor notifications onto the session executor.
struct SessionListener {
    session: SessionId,
    executor: SerialExecutor<SessionCore>,
}

impl DeviceListener for SessionListener {
    fn on_device_event(&self, event: DeviceEvent) {
        let kind = event.kind();
        if self
            .executor
            .post(move |core| core.handle_device_event(event))
            .is_err()
        {
            log::debug!("Dropping {} event for closed {}", kind, self.session);
        }
    }
}

/// Session state, owned by the executor worker.
struct SessionCore {
    id: SessionId,
    device_name: String,
    format: CaptureFormat,
    settings: CameraSettings,
    backend: CaptureBackend,
    events: Arc<dyn SessionEvents>,
    state: SessionState,
    current_device: Option<UsbDevice>,
    monitor: Option<Box<dyn DeviceMonitor>>,
    capture: CaptureSlot,
    listening: bool,
    first_frame_reported: bool,
    constructed_at: Instant,
    // Dropped on stop so the worker can exit once the handles are gone
    executor: Option<SerialExecutor<SessionCore>>,
}

impl SessionCore {
    fn open(&mut self) {
        let Some(executor) = self.executor.clone() else {
            return;
        };
        log::debug!("Create usb camera session {} on camera {}", self.id, self.device_name);

        let listener = Arc::new(SessionListener {
            session: self.id,
            executor,
        });
        let mut monitor = self.backend.usb.create_monitor(listener);
        // Register before listing so an attach in between is not lost.
        if let Err(e) = monitor.register() {
            log::error!("Failed to register USB monitor for {}: {}", self.device_name, e);
        }
        self.current_device = find_device(&monitor.device_list(), &self.device_name);
        self.monitor = Some(monitor);

        self.backend
            .frames
            .set_texture_size(self.format.width, self.format.height);
        self.events.on_camera_opening(self.id);

        match self.current_device.clone() {
            Some(device) => self.bind_device(&device),
            None => log::info!(
                "Camera {} is not attached yet, waiting for it",
                self.device_name
            ),
        }
    }

    fn handle_device_event(&mut self, event: DeviceEvent) {
        log::info!("Usb device({}), on {}", event.device().name, event.kind());
        if self.state == SessionState::Stopped {
            return;
        }
        if !event.device().matches(&self.device_name) {
            log::debug!(
                "Ignoring {} of {}, {} is bound to {}",
                event.kind(),
                event.device().name,
                self.id,
                self.device_name
            );
            return;
        }

        match event {
            DeviceEvent::Attached(device) => self.on_device_attached(device),
            DeviceEvent::Connected {
                device, control, ..
            } => self.on_device_connected(device, control),
            DeviceEvent::Disconnected { device, .. } => self.on_device_disconnected(device),
            DeviceEvent::Detached(device) => {
                log::info!("Camera {} detached", device);
            }
            DeviceEvent::Cancelled(device) => {
                log::warn!("USB permission request for {} was cancelled", device);
            }
        }
    }

    fn on_device_attached(&mut self, device: UsbDevice) {
        self.current_device = Some(device.clone());
        self.bind_device(&device);
    }

    /// Open the device if we may, otherwise ask for permission.
    fn bind_device(&mut self, device: &UsbDevice) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        if !monitor.has_permission(device) {
            if let Err(e) = monitor.request_permission(device) {
                log::warn!("Failed to request USB permission for {}: {}", device, e);
            }
            return;
        }

        match monitor.open_device(device) {
            Ok(control) => self.on_device_connected(device.clone(), control),
            Err(e) => log::error!("Failed to open USB device {}: {}", device, e),
        }
    }

    fn on_device_connected(&mut self, device: UsbDevice, control: ControlBlock) {
        if self.capture.release() {
            log::debug!("Released previous capture handle of {}", self.id);
        }
        self.current_device = Some(device);

        let handle = match self.open_handle(&control) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to start camera {}: {}", self.device_name, e);
                return;
            }
        };
        self.capture.install(handle);
        self.start_capturing();
        self.events.on_video_muted(self.id, false);
    }

    fn on_device_disconnected(&mut self, device: UsbDevice) {
        if self.capture.release() {
            log::info!("Released capture handle of {} after disconnect", device);
            self.events.on_video_muted(self.id, true);
        }
    }

    /// Create, open and start a capture handle. A handle that fails any
    /// step is destroyed before the error is returned.
    fn open_handle(&self, control: &ControlBlock) -> Result<Box<dyn CaptureHandle>, CameraError> {
        let mut handle = self.backend.cameras.create();
        match self.configure_handle(handle.as_mut(), control) {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.destroy();
                Err(e)
            }
        }
    }

    fn configure_handle(
        &self,
        handle: &mut dyn CaptureHandle,
        control: &ControlBlock,
    ) -> Result<(), CameraError> {
        handle.open(control)?;
        handle.set_auto_focus(self.settings.auto_focus)?;
        handle.set_auto_white_balance(self.settings.auto_white_balance)?;

        let session = self.id;
        handle.set_status_callback(Some(Box::new(move |status| {
            log::info!(
                "{} camera status: class={} event={} selector={} attribute={} data={:?}",
                session,
                status.status_class,
                status.event,
                status.selector,
                status.status_attribute,
                status.data
            );
        })));
        handle.set_button_callback(Some(Box::new(move |button| {
            log::info!(
                "{} camera button: button={} state={}",
                session,
                button.button,
                button.state
            );
        })));

        self.negotiate_preview(handle)?;
        handle.set_preview_display(Some(self.backend.frames.surface()))?;
        handle.start_preview()
    }

    /// Ask for the requested format, falling back to the default preview.
    /// The frame source texture follows whichever format was accepted.
    fn negotiate_preview(&self, handle: &mut dyn CaptureHandle) -> Result<(), CameraError> {
        let accepted = match handle.set_preview_size(&self.format) {
            Ok(()) => self.format,
            Err(e) => {
                let fallback = self.settings.fallback_format;
                log::warn!(
                    "Camera {} rejected {} ({}), falling back to {}",
                    self.device_name,
                    self.format,
                    e,
                    fallback
                );
                handle.set_preview_size(&fallback)?;
                fallback
            }
        };
        self.backend
            .frames
            .set_texture_size(accepted.width, accepted.height);
        Ok(())
    }

    /// Attach the frame sink and enter `Running`.
    fn start_capturing(&mut self) {
        if !self.listening {
            let Some(executor) = self.executor.clone() else {
                return;
            };
            let session = self.id;
            self.backend.frames.start_listening(Box::new(move |frame| {
                if executor.post(move |core| core.deliver_frame(frame)).is_err() {
                    log::trace!("Dropping frame for closed {}", session);
                }
            }));
            self.listening = true;
        }
        if self.state == SessionState::Created {
            log::debug!(
                "Start capturing uvc camera session {} on camera {}",
                self.id,
                self.device_name
            );
            self.state = SessionState::Running;
        }
    }

    fn deliver_frame(&mut self, frame: RawFrame) {
        if self.state != SessionState::Running {
            log::trace!("{} is {}, dropping frame", self.id, self.state);
            return;
        }

        let rotation = self.backend.display.rotation();
        let forwarded = VideoFrame {
            buffer: Arc::clone(&frame.buffer),
            rotation: rotation.degrees(),
            timestamp_ns: frame.timestamp_ns,
        };
        if !self.first_frame_reported {
            self.first_frame_reported = true;
            log::info!(
                "{} first frame after {:?}",
                self.id,
                self.constructed_at.elapsed()
            );
        }
        self.events.on_frame_captured(self.id, &forwarded);
        // Both references to the texture are released here; a sink that
        // cloned the frame keeps its own.
    }

    fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            log::debug!("{} already stopped", self.id);
            return;
        }
        log::debug!(
            "Stop uvc camera session {} on camera {}",
            self.id,
            self.current_device
                .as_ref()
                .map(|d| d.name.as_str())
                .unwrap_or(self.device_name.as_str())
        );

        self.state = SessionState::Stopped;
        self.capture.release();
        if self.listening {
            self.backend.frames.stop_listening();
            self.listening = false;
        }
        self.events.on_camera_closed(self.id);
        if let Some(mut monitor) = self.monitor.take() {
            monitor.unregister();
            monitor.destroy();
        }
        self.executor = None;
    }
}
