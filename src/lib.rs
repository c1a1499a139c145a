//! uvc-session library crate.
//!
//! Lifecycle controller for USB video class cameras: device monitoring,
//! capture handle management and frame forwarding, one serialized worker per
//! session.

pub mod camera;
pub mod cli;
pub mod config;
