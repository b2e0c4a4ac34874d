//! # Twiddle
//!
//! Online coordinate search over the gains of a set of PID controllers.
//!
//! The tuner considers one gain at a time. For each gain it first tries increasing the gain by its
//! step size, and if that does not reduce the error it tries decreasing it instead. A gain which
//! improved the error has its step grown, a gain for which neither direction helped has its step
//! shrunk. The search converges once the sum of all step sizes is below the tolerance.
//!
//! The error of a set of gains is measured over a whole round of driving, so the tuner is driven
//! from outside: the caller records one error sample per step with `record_sample` and calls
//! `step` when the round is over.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod report;
pub mod round;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf}
};
use log::{debug, info};
use serde::Serialize;

use crate::pid::{Gain, PidController, NUM_GAINS};

pub use params::Params;
pub use report::{RoundSummary, CONVERGED_LINE};
pub use round::{RoundClock, RoundClockError, RoundPhase};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Factor a step size grows by when moving the gain improved the error.
pub const STEP_GROWTH: f64 = 1.1;

/// Factor a step size shrinks by when moving the gain in either direction did not help.
pub const STEP_SHRINK: f64 = 0.9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Coordinate search tuner for a set of PID controllers.
///
/// The tuner owns the controllers it tunes, use `controller_mut` to drive them.
#[derive(Debug)]
pub struct Twiddler {
    tolerance: f64,

    controllers: Vec<PidController>,

    /// One step size per gain, in controller order then `[k_p, k_i, k_d]`.
    step_sizes: Vec<f64>,

    total_error: f64,
    max_error: f64,
    num_samples: u64,

    /// The gain currently being tuned
    cursor: Cursor,

    phase: TwiddlePhase,

    /// Number of rounds completed so far
    num_rounds: u64,

    log_path: PathBuf
}

/// Position of the gain being tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursor {
    /// Index of the controller
    pub pid_idx: usize,

    /// Gain within the controller
    pub gain: Gain
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What the tuner is waiting to learn from the round in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TwiddlePhase {
    /// The round measures the starting gains, there is no best error yet.
    Baseline,

    /// The gain under the cursor was increased by its step.
    Increased { best_error: f64 },

    /// The gain under the cursor was decreased by its step.
    Decreased { best_error: f64 }
}

/// The result of a completed round.
#[derive(Debug, Clone, PartialEq)]
pub enum TwiddleStatus {
    /// The gains were adjusted for the next round.
    Tuning(RoundSummary),

    /// The step sizes are below the tolerance, the gains were left untouched.
    Converged(RoundSummary)
}

#[derive(Debug, thiserror::Error)]
pub enum TwiddleError {
    #[error("At least one controller is required for tuning")]
    NoControllers,

    #[error("Expected {expected} step sizes (three per controller) but found {found}")]
    StepSizeCount {
        expected: usize,
        found: usize
    },

    #[error("The round ended without any error samples")]
    EmptyRound,

    #[error("Could not open the twiddle log at {0:?}: {1}")]
    LogOpen(PathBuf, io::Error),

    #[error("Could not write to the twiddle log: {0}")]
    LogWrite(io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Cursor {
    /// Position of the gain under the cursor in the flat step size list.
    pub fn flat_index(&self) -> usize {
        self.pid_idx * NUM_GAINS + self.gain.index()
    }

    /// Move to the next gain, moving on to the next controller after `k_d` and back to the first
    /// controller after the last one.
    fn advance(&mut self, num_controllers: usize) {
        let (gain, wrapped) = self.gain.next();
        self.gain = gain;

        if wrapped {
            self.pid_idx = (self.pid_idx + 1) % num_controllers;
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            pid_idx: 0,
            gain: Gain::Kp
        }
    }
}

impl TwiddlePhase {
    /// The lowest round error seen so far, if any round has completed.
    pub fn best_error(&self) -> Option<f64> {
        match self {
            TwiddlePhase::Baseline => None,
            TwiddlePhase::Increased { best_error }
            | TwiddlePhase::Decreased { best_error } => Some(*best_error)
        }
    }
}

impl TwiddleStatus {
    pub fn summary(&self) -> &RoundSummary {
        match self {
            TwiddleStatus::Tuning(s) | TwiddleStatus::Converged(s) => s
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, TwiddleStatus::Converged(_))
    }
}

impl Twiddler {

    /// Create a new tuner.
    ///
    /// `step_sizes` must contain three entries per controller. Round summaries are appended to
    /// the file at `log_path`, which is created on the first `step`.
    pub fn new<P: Into<PathBuf>>(
        tolerance: f64,
        controllers: Vec<PidController>,
        step_sizes: Vec<f64>,
        log_path: P
    ) -> Result<Self, TwiddleError> {
        if controllers.is_empty() {
            return Err(TwiddleError::NoControllers)
        }

        let expected = controllers.len() * NUM_GAINS;
        if step_sizes.len() != expected {
            return Err(TwiddleError::StepSizeCount {
                expected,
                found: step_sizes.len()
            })
        }

        Ok(Self {
            tolerance,
            controllers,
            step_sizes,
            total_error: 0.0,
            max_error: 0.0,
            num_samples: 0,
            cursor: Cursor::default(),
            phase: TwiddlePhase::Baseline,
            num_rounds: 0,
            log_path: log_path.into()
        })
    }

    /// Record the error of a single step of the current round.
    pub fn record_sample(&mut self, error: f64) {
        let abs_error = error.abs();

        self.total_error += abs_error;
        self.num_samples += 1;

        if abs_error > self.max_error {
            self.max_error = abs_error;
        }
    }

    /// End the current round, appending its summary to the twiddle log and adjusting the gains
    /// for the next round.
    pub fn step(&mut self) -> Result<TwiddleStatus, TwiddleError> {
        if self.num_samples == 0 {
            return Err(TwiddleError::EmptyRound)
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| TwiddleError::LogOpen(self.log_path.clone(), e))?;

        self.step_into(&mut log)
    }

    /// As `step`, but write the round summary to the given writer instead of the twiddle log.
    pub fn step_into<W: Write>(&mut self, log: &mut W) -> Result<TwiddleStatus, TwiddleError> {
        let summary = self.summary().ok_or(TwiddleError::EmptyRound)?;

        // Converged, report the round but leave the gains alone
        if self.step_sum() < self.tolerance {
            write!(log, "{}\n{}", CONVERGED_LINE, summary)
                .map_err(TwiddleError::LogWrite)?;

            info!(
                "Twiddle converged after {} rounds, avg error {:.6}",
                summary.round, summary.avg_error
            );

            self.finish_round();
            return Ok(TwiddleStatus::Converged(summary))
        }

        write!(log, "{}", summary).map_err(TwiddleError::LogWrite)?;

        info!(
            "Twiddle round {}: total error {:.6}, avg error {:.6}, max error {:.6}",
            summary.round, summary.total_error, summary.avg_error, summary.max_error
        );

        let total_error = summary.total_error;
        let phase = self.phase;

        self.phase = match phase {
            TwiddlePhase::Baseline => {
                debug!("Baseline error is {:.6}", total_error);
                self.probe(1.0);

                TwiddlePhase::Increased { best_error: total_error }
            },
            TwiddlePhase::Increased { best_error } if total_error < best_error => {
                debug!(
                    "Increasing {:?} improved the error to {:.6}, keeping it",
                    self.cursor, total_error
                );
                self.scale_step(STEP_GROWTH);
                self.advance_cursor();
                self.probe(1.0);

                TwiddlePhase::Increased { best_error: total_error }
            },
            TwiddlePhase::Increased { best_error } => {
                debug!("Increasing {:?} did not help, trying a decrease", self.cursor);
                self.probe(-2.0);

                TwiddlePhase::Decreased { best_error }
            },
            TwiddlePhase::Decreased { best_error } => {
                let best_error = if total_error < best_error {
                    debug!(
                        "Decreasing {:?} improved the error to {:.6}, keeping it",
                        self.cursor, total_error
                    );
                    self.scale_step(STEP_GROWTH);

                    total_error
                }
                else {
                    debug!("No improvement from {:?}, restoring it and moving on", self.cursor);
                    self.probe(1.0);
                    self.scale_step(STEP_SHRINK);

                    best_error
                };

                self.advance_cursor();
                self.probe(1.0);

                TwiddlePhase::Increased { best_error }
            }
        };

        self.finish_round();
        Ok(TwiddleStatus::Tuning(summary))
    }

    /// Summary of the round in progress, or `None` if no samples have been recorded.
    pub fn summary(&self) -> Option<RoundSummary> {
        if self.num_samples == 0 {
            return None
        }

        Some(RoundSummary {
            round: self.num_rounds + 1,
            num_samples: self.num_samples,
            max_error: self.max_error,
            total_error: self.total_error,
            avg_error: self.total_error / self.num_samples as f64,
            gains: self.controllers.iter().map(|c| c.gains()).collect()
        })
    }

    /// Sum of all step sizes.
    pub fn step_sum(&self) -> f64 {
        self.step_sizes.iter().sum()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn controllers(&self) -> &[PidController] {
        &self.controllers
    }

    /// Mutable access to the controllers, which can be updated but not added to or removed.
    pub fn controllers_mut(&mut self) -> &mut [PidController] {
        &mut self.controllers
    }

    pub fn controller(&self, idx: usize) -> Option<&PidController> {
        self.controllers.get(idx)
    }

    pub fn controller_mut(&mut self, idx: usize) -> Option<&mut PidController> {
        self.controllers.get_mut(idx)
    }

    pub fn step_sizes(&self) -> &[f64] {
        &self.step_sizes
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn phase(&self) -> TwiddlePhase {
        self.phase
    }

    /// The lowest round error seen so far.
    pub fn best_error(&self) -> Option<f64> {
        self.phase.best_error()
    }

    /// Sum of absolute errors recorded in the current round.
    pub fn total_error(&self) -> f64 {
        self.total_error
    }

    /// Largest absolute error recorded in the current round.
    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    /// Number of samples recorded in the current round.
    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    /// Number of rounds completed.
    pub fn num_rounds(&self) -> u64 {
        self.num_rounds
    }

    /// Discard the samples of the round in progress without ending it.
    ///
    /// Gains, step sizes and the search position are kept.
    pub fn reset_round(&mut self) {
        self.total_error = 0.0;
        self.max_error = 0.0;
        self.num_samples = 0;
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn advance_cursor(&mut self) {
        self.cursor.advance(self.controllers.len());
    }

    /// Move the gain under the cursor by `scale` times its step size.
    fn probe(&mut self, scale: f64) {
        let step = self.step_sizes[self.cursor.flat_index()];
        let gain = self.controllers[self.cursor.pid_idx].gain_mut(self.cursor.gain);

        *gain += scale * step;
    }

    fn scale_step(&mut self, factor: f64) {
        self.step_sizes[self.cursor.flat_index()] *= factor;
    }

    fn finish_round(&mut self) {
        self.reset_round();
        self.num_rounds += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn twiddler(step_sizes: Vec<f64>, tolerance: f64) -> Twiddler {
        Twiddler::new(
            tolerance,
            vec![PidController::new(1.0, 0.0, 0.0)],
            step_sizes,
            "unused.txt"
        ).unwrap()
    }

    /// Record samples and end the round, returning the status and the log text.
    fn round(tw: &mut Twiddler, samples: &[f64]) -> (TwiddleStatus, String) {
        for s in samples {
            tw.record_sample(*s);
        }

        let mut log = Vec::new();
        let status = tw.step_into(&mut log).unwrap();

        (status, String::from_utf8(log).unwrap())
    }

    #[test]
    fn test_new_checks_step_sizes() {
        let res = Twiddler::new(
            1e-5,
            vec![PidController::default(), PidController::default()],
            vec![0.1; 5],
            "unused.txt"
        );

        assert!(matches!(
            res,
            Err(TwiddleError::StepSizeCount { expected: 6, found: 5 })
        ));

        assert!(matches!(
            Twiddler::new(1e-5, vec![], vec![], "unused.txt"),
            Err(TwiddleError::NoControllers)
        ));
    }

    #[test]
    fn test_record_sample() {
        let mut tw = twiddler(vec![1.0; 3], 1e-5);

        tw.record_sample(0.5);
        tw.record_sample(-2.0);
        tw.record_sample(1.0);

        assert_eq!(tw.total_error(), 3.5);
        assert_eq!(tw.max_error(), 2.0);
        assert_eq!(tw.num_samples(), 3);
    }

    #[test]
    fn test_record_sample_order_independent() {
        let samples = [0.75, -2.5, 1.25, -0.5, 3.0, -1.0];

        let mut forward = twiddler(vec![1.0; 3], 1e-5);
        for s in samples.iter() {
            forward.record_sample(*s);
        }

        let mut reverse = twiddler(vec![1.0; 3], 1e-5);
        for s in samples.iter().rev() {
            reverse.record_sample(*s);
        }

        let mut shuffled = twiddler(vec![1.0; 3], 1e-5);
        for i in [3, 0, 5, 1, 4, 2].iter() {
            shuffled.record_sample(samples[*i]);
        }

        for tw in [&reverse, &shuffled].iter() {
            assert_eq!(tw.total_error(), forward.total_error());
            assert_eq!(tw.num_samples(), forward.num_samples());
            assert_eq!(tw.max_error(), forward.max_error());
        }

        assert_eq!(forward.total_error(), 9.0);
        assert_eq!(forward.num_samples(), 6);
        assert_eq!(forward.max_error(), 3.0);
    }

    #[test]
    fn test_reset_round() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 1e-5);

        round(&mut tw, &[10.0]);
        tw.record_sample(4.0);
        tw.record_sample(-7.0);
        tw.reset_round();

        assert_eq!(tw.total_error(), 0.0);
        assert_eq!(tw.max_error(), 0.0);
        assert_eq!(tw.num_samples(), 0);
        assert_eq!(tw.num_rounds(), 1);
        assert_eq!(tw.controllers()[0].gains(), [2.0, 0.0, 0.0]);
        assert_eq!(tw.best_error(), Some(10.0));

        // The next round only sees samples recorded after the reset
        let (status, _) = round(&mut tw, &[3.0]);
        assert_eq!(status.summary().total_error, 3.0);
        assert_eq!(status.summary().round, 2);
    }

    #[test]
    fn test_baseline_then_accept() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 1e-5);

        // Baseline round
        let (status, _) = round(&mut tw, &[4.0, -6.0]);
        assert!(!status.is_converged());
        assert_eq!(tw.best_error(), Some(10.0));
        assert_eq!(tw.controllers()[0].gains(), [2.0, 0.0, 0.0]);
        assert!(matches!(tw.phase(), TwiddlePhase::Increased { .. }));

        // Increase helped
        round(&mut tw, &[5.0]);
        assert_eq!(tw.best_error(), Some(5.0));
        assert_eq!(tw.step_sizes(), &[1.1, 1.0, 1.0]);
        assert_eq!(tw.cursor(), Cursor { pid_idx: 0, gain: Gain::Ki });
        assert_eq!(tw.controllers()[0].gains(), [2.0, 1.0, 0.0]);
        assert!(matches!(tw.phase(), TwiddlePhase::Increased { .. }));
    }

    #[test]
    fn test_reject_both_directions() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 1e-5);

        round(&mut tw, &[10.0]);
        assert_eq!(tw.controllers()[0].k_p, 2.0);

        // Increase made things worse
        round(&mut tw, &[12.0]);
        assert_eq!(tw.controllers()[0].k_p, 0.0);
        assert!(matches!(tw.phase(), TwiddlePhase::Decreased { best_error } if best_error == 10.0));

        // So did the decrease
        round(&mut tw, &[11.0]);
        assert_eq!(tw.controllers()[0].gains(), [1.0, 1.0, 0.0]);
        assert_eq!(tw.step_sizes(), &[0.9, 1.0, 1.0]);
        assert_eq!(tw.cursor(), Cursor { pid_idx: 0, gain: Gain::Ki });
        assert_eq!(tw.best_error(), Some(10.0));
    }

    #[test]
    fn test_decrease_accepted() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 1e-5);

        round(&mut tw, &[10.0]);
        round(&mut tw, &[12.0]);

        // Decrease helped
        round(&mut tw, &[8.0]);
        assert_eq!(tw.controllers()[0].gains(), [0.0, 1.0, 0.0]);
        assert_eq!(tw.step_sizes(), &[1.1, 1.0, 1.0]);
        assert_eq!(tw.best_error(), Some(8.0));
        assert_eq!(tw.cursor(), Cursor { pid_idx: 0, gain: Gain::Ki });
    }

    #[test]
    fn test_cursor_cycles_all_gains() {
        let mut cursor = Cursor::default();
        let mut visited = Vec::new();

        for _ in 0..6 {
            visited.push(cursor.flat_index());
            assert_eq!(cursor.flat_index(), cursor.pid_idx * 3 + cursor.gain.index());
            cursor.advance(2);
        }

        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(cursor, Cursor::default());
    }

    #[test]
    fn test_best_error_never_increases() {
        let mut tw = Twiddler::new(
            1e-5,
            vec![PidController::new(0.2, 0.0, 3.0), PidController::new(0.3, 0.0, 0.0)],
            vec![0.1; 6],
            "unused.txt"
        ).unwrap();

        let totals = [5.0, 6.0, 4.0, 4.5, 7.0, 3.0, 3.0, 9.0, 2.5, 8.0, 8.0, 1.0];
        let mut best = std::f64::INFINITY;

        for t in totals.iter() {
            round(&mut tw, &[*t]);

            let b = tw.best_error().unwrap();
            assert!(b <= best);
            best = b;

            assert_eq!(tw.step_sizes().len(), 6);
            assert_eq!(tw.controllers().len(), 2);
        }

        assert_eq!(best, 1.0);
    }

    #[test]
    fn test_converges_on_flat_error() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 0.1);

        let mut rounds = 0;
        loop {
            let (status, _) = round(&mut tw, &[3.0]);
            rounds += 1;

            if status.is_converged() {
                break
            }

            assert!(rounds < 10_000, "Twiddle did not converge");
            assert!(tw.step_sizes().iter().all(|s| *s > 0.0));
        }

        assert!(tw.step_sum() < 0.1);
    }

    #[test]
    fn test_converged_leaves_gains() {
        let mut tw = twiddler(vec![0.01, 0.01, 0.01], 0.1);

        let (status, log) = round(&mut tw, &[2.0, 1.0]);

        assert!(status.is_converged());
        assert!(log.starts_with("tolerance met\nMax Error: 2\n"));
        assert_eq!(tw.controllers()[0].gains(), [1.0, 0.0, 0.0]);
        assert_eq!(tw.step_sizes(), &[0.01, 0.01, 0.01]);
        assert_eq!(tw.cursor(), Cursor::default());
        assert_eq!(tw.num_samples(), 0);
        assert_eq!(tw.total_error(), 0.0);
    }

    #[test]
    fn test_empty_round() {
        let mut tw = twiddler(vec![1.0, 1.0, 1.0], 1e-5);

        assert!(matches!(tw.step(), Err(TwiddleError::EmptyRound)));
        assert!(matches!(tw.step_into(&mut Vec::new()), Err(TwiddleError::EmptyRound)));

        assert_eq!(tw.phase(), TwiddlePhase::Baseline);
        assert_eq!(tw.controllers()[0].gains(), [1.0, 0.0, 0.0]);
        assert_eq!(tw.num_rounds(), 0);
    }

    #[test]
    fn test_log_format() {
        let mut tw = Twiddler::new(
            1e-5,
            vec![PidController::new(0.5, 0.0, 1.5), PidController::new(1.0, 2.0, 3.0)],
            vec![0.1; 6],
            "unused.txt"
        ).unwrap();

        let (status, log) = round(&mut tw, &[1.0, -3.0]);

        assert_eq!(
            log,
            "Max Error: 3\n\
             Tot Error: 4\n\
             Avg Error: 2\n\
             PID 1\n    Kp = 0.5\n    Ki = 0\n    Kd = 1.5\n\
             PID 2\n    Kp = 1\n    Ki = 2\n    Kd = 3\n"
        );

        let summary = status.summary();
        assert_eq!(summary.round, 1);
        assert_eq!(summary.num_samples, 2);
    }

    #[test]
    fn test_step_appends_to_log_file() {
        let dir = std::env::temp_dir().join(format!("twiddle_log_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pid_coefficients.txt");
        std::fs::remove_file(&path).ok();

        let mut tw = Twiddler::new(
            1e-5,
            vec![PidController::new(1.0, 0.0, 0.0)],
            vec![1.0; 3],
            &path
        ).unwrap();

        tw.record_sample(1.0);
        tw.step().unwrap();
        tw.record_sample(2.0);
        tw.step().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Max Error:").count(), 2);
        assert!(text.contains("Max Error: 2\n"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
