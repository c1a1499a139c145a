//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing and subcommand handlers.

mod args;
mod commands;

pub use args::{Args, Command, ConfigAction, SimulateArgs};
pub use commands::{handle_config_action, run_simulation, simulate};
