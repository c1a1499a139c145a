//! Camera types and data structures.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Requested capture format of a session.
///
/// Immutable once the session has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl CaptureFormat {
    /// Preview format the UVC backend always accepts (640x480 @ 30fps).
    ///
    /// Used when the camera rejects the requested format.
    pub const DEFAULT_PREVIEW: CaptureFormat = CaptureFormat {
        width: 640,
        height: 480,
        frame_rate: 30,
    };

    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::DEFAULT_PREVIEW
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.frame_rate)
    }
}

/// Settings applied to every session a capturer creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// Preview format tried when the camera rejects the requested one
    pub fallback_format: CaptureFormat,
    /// Enable continuous auto-focus after opening
    pub auto_focus: bool,
    /// Enable automatic white balance after opening
    pub auto_white_balance: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fallback_format: CaptureFormat::DEFAULT_PREVIEW,
            auto_focus: true,
            auto_white_balance: true,
        }
    }
}

/// Process-unique identity of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Outer lifecycle state of a session.
///
/// `Stopped` is terminal. Device connect/disconnect swap the capture handle
/// without leaving `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Display rotation as reported by the window manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Rotation {
    /// Map the raw 0..=3 rotation index. Unknown values count as no rotation.
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => Rotation::Rotation90,
            2 => Rotation::Rotation180,
            3 => Rotation::Rotation270,
            _ => Rotation::Rotation0,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            Rotation::Rotation0 => 0,
            Rotation::Rotation90 => 1,
            Rotation::Rotation180 => 2,
            Rotation::Rotation270 => 3,
        }
    }

    /// Frame orientation in degrees.
    pub fn degrees(&self) -> u32 {
        u32::from(self.index()) * 90
    }
}

/// Opaque drawing surface backed by the frame source's texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub texture_id: u32,
}

/// GPU texture holding one decoded camera frame.
///
/// Shared by reference count: the controller drops its reference after
/// forwarding, a sink keeps the frame alive by cloning it.
#[derive(Debug, PartialEq)]
pub struct TextureBuffer {
    pub texture_id: u32,
    pub width: u32,
    pub height: u32,
}

/// Frame as produced by the frame source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub buffer: Arc<TextureBuffer>,
    pub timestamp_ns: i64,
}

/// Frame forwarded to the host sink.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub buffer: Arc<TextureBuffer>,
    /// Clockwise orientation in degrees (0, 90, 180 or 270)
    pub rotation: u32,
    pub timestamp_ns: i64,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    pub fn height(&self) -> u32 {
        self.buffer.height
    }
}

/// Errors that can occur during camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Requested preview size, rate or mode is not supported by the camera
    #[error("Unsupported preview format {0}")]
    UnsupportedFormat(CaptureFormat),
    /// Failed to open the camera through its control block
    #[error("Failed to open camera: {0}")]
    OpenFailed(String),
    /// Failed to start or stop the preview stream
    #[error("Failed to control camera preview: {0}")]
    PreviewFailed(String),
    /// Failed to change a camera control (focus, white balance)
    #[error("Failed to set camera control '{control}': {message}")]
    ControlFailed {
        control: &'static str,
        message: String,
    },
    /// USB permission has not been granted for the device
    #[error("USB permission denied for device '{0}'")]
    PermissionDenied(String),
    /// USB device monitor failure
    #[error("USB monitor error: {0}")]
    Monitor(String),
    /// The session's executor has shut down
    #[error("Camera session is closed")]
    SessionClosed,
    /// A blocking call was made from the session's own worker
    #[error("Blocking call on session worker '{0}' would deadlock")]
    WouldDeadlock(String),
    /// Failed to spawn the session worker thread
    #[error("Failed to spawn session worker: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preview_format() {
        let format = CaptureFormat::default();
        assert_eq!(format, CaptureFormat::DEFAULT_PREVIEW);
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);
        assert_eq!(format.frame_rate, 30);
    }

    #[test]
    fn test_camera_settings_default() {
        let settings = CameraSettings::default();
        assert_eq!(settings.fallback_format, CaptureFormat::DEFAULT_PREVIEW);
        assert!(settings.auto_focus);
        assert!(settings.auto_white_balance);
    }

    #[test]
    fn test_capture_format_display() {
        assert_eq!(CaptureFormat::new(1280, 720, 15).to_string(), "1280x720@15");
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(Rotation::from_index(0).degrees(), 0);
        assert_eq!(Rotation::from_index(1).degrees(), 90);
        assert_eq!(Rotation::from_index(2).degrees(), 180);
        assert_eq!(Rotation::from_index(3).degrees(), 270);
    }

    #[test]
    fn test_rotation_unknown_index_is_upright() {
        assert_eq!(Rotation::from_index(7), Rotation::Rotation0);
        assert_eq!(Rotation::from_index(255).degrees(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_camera_error_display() {
        assert_eq!(
            CameraError::UnsupportedFormat(CaptureFormat::new(1920, 1080, 60)).to_string(),
            "Unsupported preview format 1920x1080@60"
        );
        assert_eq!(
            CameraError::SessionClosed.to_string(),
            "Camera session is closed"
        );
        assert_eq!(
            CameraError::WouldDeadlock("uvc-session-3".to_string()).to_string(),
            "Blocking call on session worker 'uvc-session-3' would deadlock"
        );
        assert!(CameraError::PermissionDenied("usb:1".to_string())
            .to_string()
            .contains("usb:1"));
        let err = CameraError::ControlFailed {
            control: "auto_focus",
            message: "stall".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to set camera control 'auto_focus': stall"
        );
    }

    #[test]
    fn test_video_frame_dimensions() {
        let frame = VideoFrame {
            buffer: Arc::new(TextureBuffer {
                texture_id: 3,
                width: 320,
                height: 240,
            }),
            rotation: 90,
            timestamp_ns: 0,
        };
        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
    }
}
