//! Parameters structure for SteerCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for steering control.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {

    // ---- STEERING ----

    /// Initial proportional gain of the steering controller.
    pub steer_k_p: f64,

    /// Initial integral gain of the steering controller.
    pub steer_k_i: f64,

    /// Initial derivative gain of the steering controller.
    pub steer_k_d: f64,

    /// Largest steering demand magnitude the simulator accepts.
    pub max_steer: f64,

    // ---- THROTTLE ----

    /// Throttle when driving straight.
    pub throttle_base: f64,

    /// Throttle removed per unit of steering demand.
    pub throttle_steer_gain: f64,

    /// Below this speed the throttle is not allowed to drop under `min_throttle`.
    ///
    /// Units: miles per hour
    pub min_speed_mph: f64,

    /// Throttle floor used when driving slowly, so the car never stops.
    pub min_throttle: f64
}

impl Default for Params {
    fn default() -> Self {
        Self {
            steer_k_p: 0.171,
            steer_k_i: 0.0,
            steer_k_d: 1.62,
            max_steer: 1.0,
            throttle_base: 0.5,
            throttle_steer_gain: 1.75,
            min_speed_mph: 10.0,
            min_throttle: 0.1
        }
    }
}
