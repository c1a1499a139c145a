//! Session replacement through the capturer: restart, format change, camera switch.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uvc_session::camera::sim::{HostEvent, RecordingEvents, SimulatedBackend};
use uvc_session::camera::{
    CameraCapturer, CameraEnumerator, CaptureFormat, SessionEvents, SessionId, SessionState,
    UsbDevice, UvcCameraCapturer, VideoFrame,
};

fn attach(sim: &SimulatedBackend, name: &str) {
    sim.usb.plug(UsbDevice::new(name, 0x046d, 0x0825));
    sim.usb.connect(name);
}

fn index_of(records: &[HostEvent], wanted: &HostEvent) -> usize {
    records
        .iter()
        .position(|e| e == wanted)
        .unwrap_or_else(|| panic!("{:?} not recorded in {:?}", wanted, records))
}

fn first_frame_of(records: &[HostEvent], session: SessionId) -> usize {
    records
        .iter()
        .position(|e| matches!(e, HostEvent::Frame { session: s, .. } if *s == session))
        .unwrap_or_else(|| panic!("no frame for {} in {:?}", session, records))
}

#[test]
fn test_format_change_closes_old_session_before_new_frames() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let capturer = sim.capturer("usb:1");

    capturer.start_capture(640, 480, 30).unwrap();
    let first = capturer.current_session().unwrap();
    first.wait_idle().unwrap();
    sim.frames.emit_frame(1).unwrap();
    first.wait_idle().unwrap();

    capturer.change_capture_format(320, 240, 15).unwrap();
    let second = capturer.current_session().unwrap();
    second.wait_idle().unwrap();
    sim.frames.emit_frame(2).unwrap();
    second.wait_idle().unwrap();

    let records = sim.events.records();
    let closed = index_of(&records, &HostEvent::Closed(first.id()));
    assert!(closed < index_of(&records, &HostEvent::Opening(second.id())));
    assert!(closed < first_frame_of(&records, second.id()));

    assert_eq!(first.state().unwrap(), SessionState::Stopped);
    assert_eq!(second.state().unwrap(), SessionState::Running);
    assert_eq!(second.capture_format(), CaptureFormat::new(320, 240, 15));
    assert_eq!(sim.frames.texture_size(), (320, 240));
    assert_eq!(sim.frames.listen_calls(), 2);

    let stats = sim.cameras.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.live(), 1);

    capturer.stop_capture();
    assert_eq!(sim.cameras.stats().live(), 0);
}

#[test]
fn test_rapid_restarts_stop_each_session_once_in_order() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let capturer = sim.capturer("usb:1");

    let mut ids = Vec::new();
    for _ in 0..5 {
        capturer.start_capture(640, 480, 30).unwrap();
        ids.push(capturer.current_session().unwrap().id());
    }
    let last = capturer.current_session().unwrap();
    last.wait_idle().unwrap();

    let records = sim.events.records();
    for pair in ids.windows(2) {
        assert_eq!(sim.events.closed_count(pair[0]), 1);
        assert!(
            index_of(&records, &HostEvent::Closed(pair[0]))
                < index_of(&records, &HostEvent::Opening(pair[1]))
        );
    }
    assert_eq!(sim.events.closed_count(last.id()), 0);
    assert_eq!(sim.cameras.stats().live(), 1);
    assert_eq!(last.state().unwrap(), SessionState::Running);

    capturer.stop_capture();
    assert_eq!(sim.events.closed_count(last.id()), 1);
}

#[test]
fn test_switch_camera_moves_capture_to_new_device() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    attach(&sim, "usb:2");
    let capturer = sim.capturer("usb:1");

    capturer.start_capture(640, 480, 30).unwrap();
    let first = capturer.current_session().unwrap();

    capturer.switch_camera("usb:2").unwrap();
    let second = capturer.current_session().unwrap();
    second.wait_idle().unwrap();

    assert_eq!(second.device_name(), "usb:2");
    assert_eq!(second.capture_format(), first.capture_format());
    assert_eq!(first.state().unwrap(), SessionState::Stopped);
    assert_eq!(second.state().unwrap(), SessionState::Running);

    // The old device's events no longer reach a live session.
    sim.usb.disconnect("usb:1");
    second.wait_idle().unwrap();
    assert!(second.has_capture_handle().unwrap());

    capturer.stop_capture();
}

#[test]
fn test_stop_capture_blocks_until_closed() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let capturer = sim.capturer("usb:1");
    capturer.start_capture(640, 480, 30).unwrap();
    let session = capturer.current_session().unwrap();

    capturer.stop_capture();

    assert_eq!(sim.events.closed_count(session.id()), 1);
    assert!(!sim.frames.is_listening());
    assert_eq!(sim.cameras.stats().live(), 0);
    assert!(capturer.current_session().is_none());
}

#[test]
fn test_restart_after_stop_opens_fresh_session() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let capturer = sim.capturer("usb:1");

    capturer.start_capture(640, 480, 30).unwrap();
    let first = capturer.current_session().unwrap().id();
    capturer.stop_capture();

    capturer.start_capture(640, 480, 30).unwrap();
    let second = capturer.current_session().unwrap();
    second.wait_idle().unwrap();

    assert_ne!(first, second.id());
    assert_eq!(second.state().unwrap(), SessionState::Running);
    capturer.stop_capture();
}

#[test]
fn test_enumerated_capturer_runs_a_session() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let enumerator = sim.enumerator();
    assert_eq!(enumerator.device_names(), vec!["usb:1".to_string()]);

    let capturer = enumerator.create_capturer("usb:1", sim.events.clone());
    capturer.start_capture(640, 480, 30).unwrap();
    capturer.stop_capture();

    let records = sim.events.records();
    assert!(matches!(records.first(), Some(HostEvent::Opening(_))));
    assert!(matches!(records.last(), Some(HostEvent::Closed(_))));
}

#[test]
fn test_dropping_capturer_tears_session_down() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let session = {
        let capturer = sim.capturer("usb:1");
        capturer.start_capture(640, 480, 30).unwrap();
        let session = capturer.current_session().unwrap();
        session.wait_idle().unwrap();
        assert!(sim.frames.is_listening());
        session
    };
    session.wait_idle().unwrap();

    assert_eq!(session.state().unwrap(), SessionState::Stopped);
    assert_eq!(sim.usb.registered_monitors(), 0);
    assert_eq!(sim.cameras.stats().live(), 0);
    assert!(!sim.frames.is_listening());
    assert_eq!(sim.events.closed_count(session.id()), 1);
}

// ============================================================================
// Stopping from host callbacks
// ============================================================================

/// Host sink that stops the capturer from inside a session callback.
struct StopFromCallback {
    on_close: bool,
    capturer: Mutex<Option<Arc<UvcCameraCapturer>>>,
    done: Mutex<Option<Sender<()>>>,
    records: Arc<RecordingEvents>,
}

impl StopFromCallback {
    fn stop_capturer(&self) {
        let capturer = self.capturer.lock().unwrap().take();
        if let Some(capturer) = capturer {
            capturer.stop_capture();
            if let Some(done) = self.done.lock().unwrap().take() {
                done.send(()).unwrap();
            }
        }
    }
}

impl SessionEvents for StopFromCallback {
    fn on_camera_opening(&self, session: SessionId) {
        self.records.on_camera_opening(session);
    }

    fn on_frame_captured(&self, session: SessionId, frame: &VideoFrame) {
        self.records.on_frame_captured(session, frame);
        if !self.on_close {
            self.stop_capturer();
        }
    }

    fn on_camera_closed(&self, session: SessionId) {
        self.records.on_camera_closed(session);
        if self.on_close {
            self.stop_capturer();
        }
    }
}

fn callback_capturer(
    sim: &SimulatedBackend,
    on_close: bool,
) -> (Arc<UvcCameraCapturer>, mpsc::Receiver<()>) {
    let (done, finished) = mpsc::channel();
    let events = Arc::new(StopFromCallback {
        on_close,
        capturer: Mutex::new(None),
        done: Mutex::new(Some(done)),
        records: sim.events.clone(),
    });
    let capturer = Arc::new(UvcCameraCapturer::new(
        "usb:1",
        sim.backend(),
        events.clone(),
        sim.settings.clone(),
    ));
    *events.capturer.lock().unwrap() = Some(Arc::clone(&capturer));
    (capturer, finished)
}

#[test]
fn test_stop_capture_from_frame_callback_returns() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let (capturer, finished) = callback_capturer(&sim, false);

    capturer.start_capture(640, 480, 30).unwrap();
    let session = capturer.current_session().unwrap();
    session.wait_idle().unwrap();
    sim.frames.emit_frame(1).unwrap();

    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("stop_capture inside on_frame_captured did not return");
    session.wait_idle().unwrap();

    assert_eq!(session.state().unwrap(), SessionState::Stopped);
    assert_eq!(sim.events.closed_count(session.id()), 1);
    assert_eq!(sim.cameras.stats().live(), 0);
    assert!(capturer.current_session().is_none());
}

#[test]
fn test_stop_capture_from_close_callback_stops_successor() {
    let sim = SimulatedBackend::new();
    attach(&sim, "usb:1");
    let (capturer, finished) = callback_capturer(&sim, true);

    capturer.start_capture(640, 480, 30).unwrap();
    let first = capturer.current_session().unwrap();
    capturer.change_capture_format(320, 240, 15).unwrap();
    let second = capturer.current_session().unwrap();

    // Closing the first session stops the second from its close callback,
    // before the second's worker has even started.
    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("stop_capture inside on_camera_closed did not return");
    second.wait_idle().unwrap();

    assert_eq!(first.state().unwrap(), SessionState::Stopped);
    assert_eq!(second.state().unwrap(), SessionState::Stopped);
    assert_eq!(sim.events.closed_count(second.id()), 1);
    assert_eq!(sim.cameras.stats().live(), 0);
}
