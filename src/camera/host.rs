//! Host-side collaborators: frame source, display rotation and event sink.

use std::sync::Arc;

use super::device::UsbHost;
use super::handle::CaptureHandleFactory;
use super::types::{RawFrame, Rotation, SessionId, Surface, VideoFrame};

pub type FrameCallback = Box<dyn Fn(RawFrame) + Send + Sync>;

/// Texture helper that renders the camera preview and hands out frames.
pub trait FrameSource: Send + Sync {
    fn set_texture_size(&self, width: u32, height: u32);

    /// Attach the frame sink. Replaces a previously attached callback.
    fn start_listening(&self, callback: FrameCallback);

    /// Detach the frame sink. No frames are delivered afterwards.
    fn stop_listening(&self);

    /// Surface the camera renders its preview into.
    fn surface(&self) -> Surface;
}

/// Current rotation of the default display.
pub trait DisplayRotation: Send + Sync {
    fn rotation(&self) -> Rotation;
}

/// Host sink for session lifecycle notifications and frames.
///
/// Per session: exactly one `on_camera_opening` before any frame, and no
/// frame after `on_camera_closed`.
pub trait SessionEvents: Send + Sync {
    fn on_camera_opening(&self, session: SessionId);

    /// The frame is only borrowed; clone it to keep the texture alive.
    fn on_frame_captured(&self, session: SessionId, frame: &VideoFrame);

    fn on_camera_closed(&self, session: SessionId);

    /// Video muted state changed because the camera (dis)connected.
    fn on_video_muted(&self, _session: SessionId, _muted: bool) {}
}

/// Bundle of backend collaborators shared by every session of a capturer.
#[derive(Clone)]
pub struct CaptureBackend {
    pub usb: Arc<dyn UsbHost>,
    pub cameras: Arc<dyn CaptureHandleFactory>,
    pub frames: Arc<dyn FrameSource>,
    pub display: Arc<dyn DisplayRotation>,
}

impl std::fmt::Debug for CaptureBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBackend").finish_non_exhaustive()
    }
}
