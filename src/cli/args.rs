//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Lifecycle controller for USB video class cameras
#[derive(Parser, Debug)]
#[command(name = "uvc-session")]
#[command(version, about = "UVC camera session controller", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a camera session against the simulated USB backend
    Simulate(SimulateArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SimulateArgs {
    /// USB device name (default: from config)
    #[arg(long, short)]
    pub device: Option<String>,

    /// Requested capture width (default: from config)
    #[arg(long, value_parser = parse_dimension)]
    pub width: Option<u32>,

    /// Requested capture height (default: from config)
    #[arg(long, value_parser = parse_dimension)]
    pub height: Option<u32>,

    /// Requested frame rate (default: from config)
    #[arg(long, value_parser = parse_framerate)]
    pub fps: Option<u32>,

    /// Frames to emit per session
    #[arg(long, short, default_value = "5")]
    pub frames: u32,

    /// Display rotation index (0-3, other values count as 0)
    #[arg(long, short, default_value = "0")]
    pub rotation: u8,

    /// Change the capture format mid-run, replacing the session
    #[arg(long)]
    pub replace: bool,

    /// Make the simulated camera reject the requested format
    #[arg(long)]
    pub reject_requested: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

/// Parse and validate a capture dimension (1-7680)
fn parse_dimension(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid dimension", s))?;
    if !(1..=7680).contains(&value) {
        return Err(format!("Dimension must be between 1 and 7680, got {}", value));
    }
    Ok(value)
}

/// Parse and validate framerate (1-120 fps)
fn parse_framerate(s: &str) -> Result<u32, String> {
    let fps: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid framerate", s))?;
    if !(1..=120).contains(&fps) {
        return Err(format!(
            "Framerate must be between 1 and 120 fps, got {}",
            fps
        ));
    }
    Ok(fps)
}
