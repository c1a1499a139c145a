//! USB device model and the device connection monitor contract.

use std::fmt;
use std::sync::Arc;

use super::types::CameraError;

/// A USB device as reported by the host's USB subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// Bus path, e.g. `/dev/bus/usb/001/004`. Used as the camera name.
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbDevice {
    pub fn new(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
        }
    }

    /// Whether this device is the one a session was opened for.
    pub fn matches(&self, requested_name: &str) -> bool {
        self.name == requested_name
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.name, self.vendor_id, self.product_id
        )
    }
}

/// Claimed connection to a USB device, handed out once permission is granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub device: UsbDevice,
    /// File descriptor of the opened device node
    pub file_descriptor: i32,
    pub bus_number: u8,
    pub device_address: u8,
}

/// Notifications delivered by a [`DeviceMonitor`].
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Attached(UsbDevice),
    Connected {
        device: UsbDevice,
        control: ControlBlock,
        /// False when the monitor reuses an already open control block
        is_new: bool,
    },
    Disconnected {
        device: UsbDevice,
        control: ControlBlock,
    },
    Detached(UsbDevice),
    /// The user declined the permission request
    Cancelled(UsbDevice),
}

impl DeviceEvent {
    pub fn device(&self) -> &UsbDevice {
        match self {
            DeviceEvent::Attached(device)
            | DeviceEvent::Detached(device)
            | DeviceEvent::Cancelled(device) => device,
            DeviceEvent::Connected { device, .. } | DeviceEvent::Disconnected { device, .. } => {
                device
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::Attached(_) => "attach",
            DeviceEvent::Connected { .. } => "connect",
            DeviceEvent::Disconnected { .. } => "disconnect",
            DeviceEvent::Detached(_) => "detach",
            DeviceEvent::Cancelled(_) => "cancel",
        }
    }
}

/// Receiver of monitor notifications.
///
/// Called on an unspecified thread; implementations must not assume they
/// run on the session's executor.
pub trait DeviceListener: Send + Sync {
    fn on_device_event(&self, event: DeviceEvent);
}

/// A registration with the host's USB subsystem, bound to one listener.
pub trait DeviceMonitor: Send {
    /// Start delivering events to the listener.
    fn register(&mut self) -> Result<(), CameraError>;

    /// Stop delivering events. Safe to call when not registered.
    fn unregister(&mut self);

    /// Release every resource held by the monitor. The monitor is unusable
    /// afterwards.
    fn destroy(&mut self);

    /// USB devices currently attached.
    fn device_list(&self) -> Vec<UsbDevice>;

    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Ask the user for access to `device`. The outcome arrives later as
    /// [`DeviceEvent::Connected`] or [`DeviceEvent::Cancelled`].
    fn request_permission(&mut self, device: &UsbDevice) -> Result<(), CameraError>;

    /// Claim a device the application already has permission for.
    fn open_device(&mut self, device: &UsbDevice) -> Result<ControlBlock, CameraError>;
}

/// Entry point into the host's USB subsystem.
pub trait UsbHost: Send + Sync {
    /// USB devices currently attached.
    fn device_list(&self) -> Vec<UsbDevice>;

    /// Create a monitor delivering its events to `listener`.
    fn create_monitor(&self, listener: Arc<dyn DeviceListener>) -> Box<dyn DeviceMonitor>;
}

/// Find the device named `name` in `devices`.
pub fn find_device(devices: &[UsbDevice], name: &str) -> Option<UsbDevice> {
    devices.iter().find(|d| d.matches(name)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        let device = UsbDevice::new("/dev/bus/usb/001/004", 0x046d, 0x0825);
        assert_eq!(device.to_string(), "/dev/bus/usb/001/004 (046d:0825)");
    }

    #[test]
    fn test_device_matches_by_name_only() {
        let device = UsbDevice::new("usb:1", 1, 2);
        assert!(device.matches("usb:1"));
        assert!(!device.matches("usb:2"));
    }

    #[test]
    fn test_find_device() {
        let devices = vec![UsbDevice::new("usb:1", 1, 1), UsbDevice::new("usb:2", 2, 2)];
        assert_eq!(find_device(&devices, "usb:2").map(|d| d.vendor_id), Some(2));
        assert!(find_device(&devices, "usb:3").is_none());
    }

    #[test]
    fn test_event_device_and_kind() {
        let device = UsbDevice::new("usb:1", 1, 1);
        let control = ControlBlock {
            device: device.clone(),
            file_descriptor: 7,
            bus_number: 1,
            device_address: 4,
        };
        let event = DeviceEvent::Disconnected {
            device: device.clone(),
            control,
        };
        assert_eq!(event.device(), &device);
        assert_eq!(event.kind(), "disconnect");
        assert_eq!(DeviceEvent::Cancelled(device).kind(), "cancel");
    }
}
