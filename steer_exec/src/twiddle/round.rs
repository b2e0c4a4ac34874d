//! Tuning round timing
//!
//! Each tuning round starts with a number of warm-up steps, which let the car settle after the
//! simulator resets, followed by the steps over which the error is recorded.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Counts simulation steps through a tuning round.
#[derive(Debug, Clone)]
pub struct RoundClock {
    warmup_steps: u64,
    round_steps: u64,

    /// Number of the current step since the round started, the first step is 1.
    step_num: u64
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Where a step falls within the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoundPhase {
    /// The error is not recorded.
    WarmUp,

    /// The error is recorded.
    Record,

    /// The error is recorded and the round is over.
    End
}

#[derive(Debug, thiserror::Error)]
pub enum RoundClockError {
    #[error("A tuning round must record at least one step")]
    ZeroLengthRound
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RoundClock {
    /// Create a new clock.
    ///
    /// `round_steps` is the number of recorded steps per round and must not be zero, so that
    /// every round has samples to average.
    pub fn new(warmup_steps: u64, round_steps: u64) -> Result<Self, RoundClockError> {
        if round_steps == 0 {
            return Err(RoundClockError::ZeroLengthRound)
        }

        Ok(Self {
            warmup_steps,
            round_steps,
            step_num: 0
        })
    }

    /// Advance by one step and return the phase of that step.
    ///
    /// The clock restarts by itself after returning `RoundPhase::End`.
    pub fn tick(&mut self) -> RoundPhase {
        self.step_num += 1;

        if self.step_num <= self.warmup_steps {
            RoundPhase::WarmUp
        }
        else if self.step_num < self.warmup_steps + self.round_steps {
            RoundPhase::Record
        }
        else {
            self.restart();
            RoundPhase::End
        }
    }

    /// Start a new round from the beginning of the warm-up.
    pub fn restart(&mut self) {
        self.step_num = 0;
    }

    /// Number of steps taken in the current round.
    pub fn step_num(&self) -> u64 {
        self.step_num
    }
}
