//! # Steering library.
//!
//! This library allows the steering executable, its tests and benchmarks to access the items
//! defined inside the steering crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// PID controller
pub mod pid;

/// Twiddle - tunes the gains of PID controllers while driving
pub mod twiddle;

/// Steering control module - converts telemetry into steering and throttle demands
pub mod steer_ctrl;

/// Simulator server - exchanges events and commands with the driving simulator
pub mod sim_server;
