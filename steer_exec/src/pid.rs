//! # PID controller
//!
//! A discrete PID controller driven once per simulation step. There is no notion of time in the
//! controller, the simulator steps at a fixed rate so the step period is folded into the gains.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of gains in a PID controller.
pub const NUM_GAINS: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidController {
    /// Proportional gain
    pub k_p: f64,

    /// Integral gain
    pub k_i: f64,

    /// Dervative gain
    pub k_d: f64,

    /// The most recent error
    #[serde(skip)]
    p_error: f64,

    /// Sum of all errors since the last reset
    #[serde(skip)]
    i_error: f64,

    /// Difference between the two most recent errors
    #[serde(skip)]
    d_error: f64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Identifies one of the gains of a `PidController`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    Kp,
    Ki,
    Kd
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Gain {
    /// All gains in order.
    pub const ALL: [Gain; NUM_GAINS] = [Gain::Kp, Gain::Ki, Gain::Kd];

    /// Position of this gain within a controller, `Kp` is 0.
    pub fn index(self) -> usize {
        match self {
            Gain::Kp => 0,
            Gain::Ki => 1,
            Gain::Kd => 2
        }
    }

    /// The following gain, and whether the sequence wrapped back to `Kp`.
    pub fn next(self) -> (Gain, bool) {
        match self {
            Gain::Kp => (Gain::Ki, false),
            Gain::Ki => (Gain::Kd, false),
            Gain::Kd => (Gain::Kp, true)
        }
    }
}

impl PidController {

    /// Create a new controller with the given gains.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self {
            k_p, k_i, k_d,
            ..Default::default()
        }
    }

    /// Pass a new error sample into the controller.
    ///
    /// On the first update after creation or `reset_errors` the previous error is zero, so the
    /// derivative term is the sample itself.
    pub fn update(&mut self, error: f64) {
        self.d_error = error - self.p_error;
        self.p_error = error;
        self.i_error += error;
    }

    /// The controller output for the current error state.
    ///
    /// The output opposes the error, a positive error gives a negative output.
    pub fn output(&self) -> f64 {
        -(self.k_p * self.p_error
            + self.k_i * self.i_error
            + self.k_d * self.d_error)
    }

    /// Update the controller with the error and return the new output.
    pub fn get(&mut self, error: f64) -> f64 {
        self.update(error);
        self.output()
    }

    /// Clear the error memory, keeping the gains.
    pub fn reset_errors(&mut self) {
        self.p_error = 0.0;
        self.i_error = 0.0;
        self.d_error = 0.0;
    }

    /// The current `(p, i, d)` error terms.
    pub fn errors(&self) -> (f64, f64, f64) {
        (self.p_error, self.i_error, self.d_error)
    }

    /// Get the value of one gain.
    pub fn gain(&self, gain: Gain) -> f64 {
        match gain {
            Gain::Kp => self.k_p,
            Gain::Ki => self.k_i,
            Gain::Kd => self.k_d
        }
    }

    /// Get a mutable reference to one gain.
    pub fn gain_mut(&mut self, gain: Gain) -> &mut f64 {
        match gain {
            Gain::Kp => &mut self.k_p,
            Gain::Ki => &mut self.k_i,
            Gain::Kd => &mut self.k_d
        }
    }

    /// All gains as `[k_p, k_i, k_d]`.
    pub fn gains(&self) -> [f64; NUM_GAINS] {
        [self.k_p, self.k_i, self.k_d]
    }
}
