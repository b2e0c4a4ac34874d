//! Round summaries written to the twiddle log

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;
use serde::Serialize;

use crate::pid::NUM_GAINS;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Line written before the summary once the search has converged.
pub const CONVERGED_LINE: &str = "tolerance met";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Error statistics of one tuning round and the gains that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    /// Round number, starting from 1.
    pub round: u64,

    /// Number of samples recorded during the round
    pub num_samples: u64,

    /// Largest absolute error seen in the round
    pub max_error: f64,

    /// Sum of absolute errors over the round
    pub total_error: f64,

    /// Mean absolute error over the round
    pub avg_error: f64,

    /// `[k_p, k_i, k_d]` of every controller, in order
    pub gains: Vec<[f64; NUM_GAINS]>
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Max Error: {}", self.max_error)?;
        writeln!(f, "Tot Error: {}", self.total_error)?;
        writeln!(f, "Avg Error: {}", self.avg_error)?;

        for (i, gains) in self.gains.iter().enumerate() {
            writeln!(f, "PID {}", i + 1)?;
            writeln!(f, "    Kp = {}", gains[0])?;
            writeln!(f, "    Ki = {}", gains[1])?;
            writeln!(f, "    Kd = {}", gains[2])?;
        }

        Ok(())
    }
}
