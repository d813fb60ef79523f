//! # Mag Cal Monitor Library
//!
//! Watches a MAVLink vehicle during compass calibration.
//!
//! This library provides the pieces of the monitor: change detection for
//! flight modes and calibration messages, the session startup sequence and
//! the operator-facing event output.

pub mod config;
pub mod detector;
pub mod error;
pub mod link;
pub mod logging;
pub mod monitor;
pub mod session;
pub mod sink;
pub mod status;
