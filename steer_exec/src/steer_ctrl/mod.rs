//! Steering control module
//!
//! Turns simulator telemetry into steering and throttle demands using a PID controller on the
//! cross track error, optionally tuning the controller's gains while driving.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::*;
pub use state::*;

use crate::twiddle::{RoundClockError, TwiddleError};
use util::{archive::ArchiveError, params::LoadError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Index of the steering controller within the tuned controllers.
pub const STEER_PID_IDX: usize = 0;

/// Archive of each step, relative to the session archive root.
pub const STEP_ARCHIVE_PATH: &str = "steer_ctrl/steps.csv";

/// Directory within the session holding the tuning round summaries.
pub const TUNING_SAVE_DIR: &str = "tuning";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while initialising SteerCtrl.
#[derive(Debug, thiserror::Error)]
pub enum SteerCtrlInitError {
    #[error("Could not load the parameters: {0}")]
    ParamLoad(#[from] LoadError),

    #[error("Invalid twiddle parameters: {0}")]
    Twiddle(#[from] TwiddleError),

    #[error("Invalid tuning round: {0}")]
    RoundClock(#[from] RoundClockError),

    #[error("Could not create the step archive: {0}")]
    Archive(#[from] ArchiveError)
}

/// Possible errors that can occur during SteerCtrl processing.
#[derive(Debug, thiserror::Error)]
pub enum SteerCtrlError {
    #[error("Tuning failed: {0}")]
    Twiddle(#[from] TwiddleError),

    #[error("Expected controller {0} to exist but couldn't find it")]
    MissingController(usize)
}
