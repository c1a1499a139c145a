//! UVC camera session lifecycle.
//!
//! This module provides the controller side of USB video class capture:
//! - Camera enumeration via [`UvcCameraEnumerator`]
//! - Session ownership and replacement via [`UvcCameraCapturer`]
//! - The per-camera lifecycle via [`UvcCameraSession`]
//! - Host collaborator contracts in [`device`], [`handle`] and [`host`]
//! - An in-process backend for tests and demos in [`sim`]

mod capturer;
pub mod device;
mod enumerator;
mod executor;
pub mod handle;
pub mod host;
mod session;
pub mod sim;
mod types;

pub use capturer::{CameraCapturer, UvcCameraCapturer};
pub use device::{ControlBlock, DeviceEvent, DeviceListener, DeviceMonitor, UsbDevice, UsbHost};
pub use enumerator::{CameraEnumerator, UvcCameraEnumerator};
pub use executor::{PendingWorker, SerialExecutor};
pub use handle::{CaptureHandle, CaptureHandleFactory, CaptureSlot};
pub use host::{CaptureBackend, DisplayRotation, FrameSource, SessionEvents};
pub use session::{CameraSession, UvcCameraSession};
pub use types::{
    CameraError, CameraSettings, CaptureFormat, RawFrame, Rotation, SessionId, SessionState,
    Surface, TextureBuffer, VideoFrame,
};
