//! Subcommand handlers for simulate and config actions.

use std::path::Path;

use super::args::{ConfigAction, SimulateArgs};
use crate::camera::sim::{HostEvent, SimulatedBackend};
use crate::camera::{
    CameraCapturer, CameraError, CaptureFormat, Rotation, UsbDevice, UvcCameraCapturer,
};
use crate::config::{default_path, Config, DEFAULT_CONFIG};

const SIMULATED_VENDOR: u16 = 0x046d;
const SIMULATED_PRODUCT: u16 = 0x0825;

/// Drive one capturer through attach, connect, capture and stop against the
/// simulated backend. Returns every host event in delivery order.
pub fn run_simulation(args: &SimulateArgs, config: &Config) -> Result<Vec<HostEvent>, CameraError> {
    let device = args
        .device
        .clone()
        .unwrap_or_else(|| config.camera.device.clone());
    let requested = config.capture_format();
    let format = CaptureFormat::new(
        args.width.unwrap_or(requested.width),
        args.height.unwrap_or(requested.height),
        args.fps.unwrap_or(requested.frame_rate),
    );

    let sim = SimulatedBackend::with_settings(config.camera_settings());
    if args.reject_requested {
        sim.cameras.accept_only(&[sim.settings.fallback_format]);
    }
    sim.display.set_rotation(Rotation::from_index(args.rotation));

    let capturer = sim.capturer(&device);
    capturer.start_capture(format.width, format.height, format.frame_rate)?;
    if let Some(session) = capturer.current_session() {
        session.wait_idle()?;
    }

    sim.usb
        .plug(UsbDevice::new(device.as_str(), SIMULATED_VENDOR, SIMULATED_PRODUCT));
    sim.usb.connect(&device);
    pump_frames(&sim, &capturer, format, args.frames)?;

    if args.replace {
        let smaller = CaptureFormat::new(
            (format.width / 2).max(1),
            (format.height / 2).max(1),
            format.frame_rate,
        );
        capturer.change_capture_format(smaller.width, smaller.height, smaller.frame_rate)?;
        pump_frames(&sim, &capturer, smaller, args.frames)?;
    }

    capturer.stop_capture();
    let stats = sim.cameras.stats();
    log::info!(
        "Simulation done: {} handles created, {} destroyed, {} preview requests",
        stats.created,
        stats.destroyed,
        stats.preview_requests.len()
    );
    Ok(sim.events.records())
}

/// Let the current session settle, then feed it `frames` frames.
fn pump_frames(
    sim: &SimulatedBackend,
    capturer: &UvcCameraCapturer,
    format: CaptureFormat,
    frames: u32,
) -> Result<(), CameraError> {
    let Some(session) = capturer.current_session() else {
        return Ok(());
    };
    session.wait_idle()?;
    let interval_ns = 1_000_000_000 / i64::from(format.frame_rate.max(1));
    for i in 0..frames {
        if sim.frames.emit_frame(i64::from(i) * interval_ns).is_none() {
            log::warn!("{} is not capturing, no frames emitted", session.id());
            break;
        }
    }
    session.wait_idle()
}

/// Run the simulation and print the host events to stdout.
pub fn simulate(args: &SimulateArgs, config: &Config) {
    match run_simulation(args, config) {
        Ok(events) => {
            println!("Host events:");
            for event in events {
                println!("  {}", describe(&event));
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn describe(event: &HostEvent) -> String {
    match event {
        HostEvent::Opening(session) => format!("{} opening", session),
        HostEvent::Frame {
            session,
            rotation,
            timestamp_ns,
        } => format!("{} frame t={}ns rotation={}", session, timestamp_ns, rotation),
        HostEvent::Closed(session) => format!("{} closed", session),
        HostEvent::Muted { session, muted } => {
            format!("{} {}", session, if *muted { "muted" } else { "unmuted" })
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>) {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
    match action {
        ConfigAction::Show => {
            let config = match Config::load(Some(&config_path)) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            let settings = config.camera_settings();
            println!("Current configuration:");
            println!("  Device: {}", config.camera.device);
            println!("  Capture format: {}", config.capture_format());
            println!("  Fallback format: {}", settings.fallback_format);
            println!("  Auto focus: {}", yes_no(settings.auto_focus));
            println!("  Auto white balance: {}", yes_no(settings.auto_white_balance));
            println!("  Log filter: {}", config.log.filter);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'uvc-session config show' to view current settings.");
                std::process::exit(1);
            }

            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Error creating config directory: {}", e);
                    std::process::exit(1);
                }
            }

            if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG) {
                eprintln!("Error writing config file: {}", e);
                std::process::exit(1);
            }

            println!("Created config file: {}", config_path.display());
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
