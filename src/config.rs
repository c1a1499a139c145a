//! Configuration file handling for uvc-session.
//!
//! Loads configuration from `~/.config/uvc-session/config.toml` or a custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::camera::{CameraSettings, CaptureFormat};

/// Configuration file structure for uvc-session.
/// Loaded from ~/.config/uvc-session/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// USB device name to open
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_true")]
    pub auto_focus: bool,
    #[serde(default = "default_true")]
    pub auto_white_balance: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
            auto_focus: true,
            auto_white_balance: true,
        }
    }
}

/// Preview format used when the camera rejects the requested one.
#[derive(Debug, Deserialize, PartialEq)]
pub struct FallbackConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_device() -> String {
    "/dev/bus/usb/001/002".to_string()
}

fn default_width() -> u32 {
    CaptureFormat::DEFAULT_PREVIEW.width
}

fn default_height() -> u32 {
    CaptureFormat::DEFAULT_PREVIEW.height
}

fn default_frame_rate() -> u32 {
    CaptureFormat::DEFAULT_PREVIEW.frame_rate
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Format requested when capture starts.
    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat::new(self.camera.width, self.camera.height, self.camera.frame_rate)
    }

    /// Settings applied to every session.
    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            fallback_format: CaptureFormat::new(
                self.fallback.width,
                self.fallback.height,
                self.fallback.frame_rate,
            ),
            auto_focus: self.camera.auto_focus,
            auto_white_balance: self.camera.auto_white_balance,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("uvc-session").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/uvc-session/config.toml")
        })
}

/// Contents written by `config init`.
pub const DEFAULT_CONFIG: &str = r#"# uvc-session configuration

[camera]
# USB device name (bus path)
device = "/dev/bus/usb/001/002"
# Requested capture format
width = 640
height = 480
frame_rate = 30
# Camera controls applied after opening
auto_focus = true
auto_white_balance = true

[fallback]
# Preview format used when the camera rejects the requested one
width = 640
height = 480
frame_rate = 30

[log]
# Log filter (RUST_LOG takes precedence)
filter = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.capture_format(), CaptureFormat::DEFAULT_PREVIEW);
        assert_eq!(config.camera_settings(), CameraSettings::default());
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[camera]\ndevice = \"usb:3\"\nwidth = 1280\nheight = 720\n\n[fallback]\nframe_rate = 15"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.camera.device, "usb:3");
        assert_eq!(config.capture_format(), CaptureFormat::new(1280, 720, 30));
        assert_eq!(
            config.camera_settings().fallback_format,
            CaptureFormat::new(640, 480, 15)
        );
        assert!(config.camera.auto_focus);
    }

    #[test]
    fn test_camera_controls_can_be_disabled() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nauto_focus = false\nauto_white_balance = false").unwrap();

        let settings = Config::load(Some(file.path())).unwrap().camera_settings();
        assert!(!settings.auto_focus);
        assert!(!settings.auto_white_balance);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[camera\nwidth = ").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().starts_with("Failed to parse config file"));
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nwidth = \"wide\"").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_default_config_template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = default_path();
        assert!(path.ends_with("uvc-session/config.toml"));
    }
}
