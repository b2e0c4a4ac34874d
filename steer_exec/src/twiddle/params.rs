//! Twiddle tuning parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for online gain tuning
#[derive(Deserialize, Debug, Clone)]
pub struct Params {

    /// If true the gains are tuned while driving.
    pub enabled: bool,

    /// The search stops once the sum of all step sizes drops below this value.
    pub tolerance: f64,

    /// Initial step sizes, `[k_p, k_i, k_d]` for each tuned controller in turn.
    pub step_sizes: Vec<f64>,

    /// Number of steps at the start of a round which are not recorded.
    pub warmup_steps: u64,

    /// Number of recorded steps in a round.
    pub round_steps: u64,

    /// Name of the twiddle log, relative to the session directory.
    pub log_file_name: String
}
