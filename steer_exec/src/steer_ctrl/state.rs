//! Implementations for the SteerCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::path::PathBuf;
use log::{info, trace};
use serde::Serialize;

// Internal
use super::{
    Params, SteerCtrlError, SteerCtrlInitError,
    STEER_PID_IDX, STEP_ARCHIVE_PATH, TUNING_SAVE_DIR};
use crate::{
    pid::PidController,
    twiddle::{self, RoundClock, RoundPhase, Twiddler, TwiddleStatus}};
use comms_if::sim::{SimCmd, SteerCmd, Telemetry};
use util::{
    params,
    maths::saturate,
    module::State,
    archive::{Archived, Archiver, ArchiveError},
    session::{self, Session}};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Steering control module state
pub struct SteerCtrl {
    params: Params,

    /// Owns the steering controller, whether or not tuning is enabled.
    twiddler: Twiddler,

    clock: RoundClock,

    tuning: bool,

    step_num: u64,

    report: StatusReport,

    record: Option<StepRecord>,
    arch_record: Archiver
}

/// Data needed to initialise SteerCtrl.
#[derive(Debug, Clone)]
pub struct InitData {
    /// Name of the steering parameter file
    pub params_file: &'static str,

    /// Name of the twiddle parameter file
    pub twiddle_params_file: &'static str,

    /// Overrides the `enabled` flag in the twiddle parameters if set.
    pub tuning: Option<bool>
}

/// Input data to SteerCtrl.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputData {
    /// The latest telemetry from the simulator
    pub telemetry: Telemetry
}

/// Status report for SteerCtrl processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    pub cte: f64,

    /// Steering demand before it was limited
    pub steer_unclamped: f64,

    /// True if the steering demand was limited to `max_steer`.
    pub steer_limited: bool,

    /// True if the throttle was raised to `min_throttle`.
    pub throttle_floored: bool,

    /// True if tuning was enabled on this step.
    pub tuning: bool,

    /// Where in the tuning round this step fell, `None` when not tuning.
    pub round_phase: Option<RoundPhase>,

    /// True if a tuning round ended and the simulator is being reset.
    pub round_ended: bool,

    /// True if the tuning converged on this step.
    pub converged: bool
}

/// A single archived step.
#[derive(Debug, Clone, Copy, Serialize)]
struct StepRecord {
    step: u64,
    cte: f64,
    speed: f64,
    steering_angle: f64,
    steer_demand: f64,
    throttle_demand: f64,
    reset: bool,
    k_p: f64,
    k_i: f64,
    k_d: f64
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for SteerCtrl {
    type InitData = InitData;
    type InitError = SteerCtrlInitError;

    type InputData = InputData;
    type OutputData = SimCmd;
    type StatusReport = StatusReport;
    type ProcError = SteerCtrlError;

    /// Initialise the SteerCtrl module.
    ///
    /// The twiddle log is placed in the session directory.
    fn init(init_data: Self::InitData, session: &Session)
        -> Result<Self, Self::InitError>
    {
        let steer_params: Params = params::load(init_data.params_file)?;
        let mut twiddle_params: twiddle::Params = params::load(init_data.twiddle_params_file)?;

        if let Some(t) = init_data.tuning {
            twiddle_params.enabled = t;
        }

        let log_path = session.session_root.join(&twiddle_params.log_file_name);

        let mut steer_ctrl = Self::new(steer_params, &twiddle_params, log_path)?;
        steer_ctrl.arch_record = Archiver::from_path(session, STEP_ARCHIVE_PATH)?;

        info!(
            "SteerCtrl initialised with gains [{}, {}, {}], tuning {}",
            steer_ctrl.params.steer_k_p,
            steer_ctrl.params.steer_k_i,
            steer_ctrl.params.steer_k_d,
            if steer_ctrl.tuning { "enabled" } else { "disabled" }
        );

        Ok(steer_ctrl)
    }

    /// Perform cyclic processing of steering control.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let telem = input_data.telemetry;

        self.step_num += 1;
        self.report = StatusReport {
            cte: telem.cte,
            tuning: self.tuning,
            ..Default::default()
        };

        if self.tuning {
            let phase = self.clock.tick();
            self.report.round_phase = Some(phase);

            match phase {
                RoundPhase::WarmUp => (),
                RoundPhase::Record => self.twiddler.record_sample(telem.cte),
                RoundPhase::End => {
                    self.twiddler.record_sample(telem.cte);
                    self.end_round()?;
                    self.record = Some(self.step_record(&telem, 0.0, 0.0, true)?);

                    return Ok((SimCmd::Reset, self.report))
                }
            }
        }

        let steer_pid = self.steer_pid_mut()?;
        steer_pid.update(telem.cte);
        let steer_unclamped = steer_pid.output();

        let (steer, steer_limited) = saturate(steer_unclamped, self.params.max_steer);

        // Slow down when turning hard
        let mut throttle = self.params.throttle_base
            - (steer * self.params.throttle_steer_gain).abs();

        // But never stop
        if telem.speed < self.params.min_speed_mph && throttle < self.params.min_throttle {
            throttle = self.params.min_throttle;
            self.report.throttle_floored = true;
        }

        self.report.steer_unclamped = steer_unclamped;
        self.report.steer_limited = steer_limited;

        trace!(
            "CTE: {:.4}, steer: {:.4} (unclamped {:.4}), throttle: {:.4}",
            telem.cte, steer, steer_unclamped, throttle
        );

        self.record = Some(self.step_record(&telem, steer, throttle, false)?);

        Ok((
            SimCmd::Steer(SteerCmd {
                steering_angle: steer,
                throttle
            }),
            self.report
        ))
    }
}

impl Archived for SteerCtrl {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if let Some(r) = self.record.take() {
            self.arch_record.serialise(r)?;
        }

        Ok(())
    }
}

impl SteerCtrl {
    /// Create a new steering module without archiving.
    ///
    /// Twiddle round summaries are appended to `log_path`.
    pub fn new<P: Into<PathBuf>>(
        params: Params,
        twiddle_params: &twiddle::Params,
        log_path: P
    ) -> Result<Self, SteerCtrlInitError> {
        let steer_pid = PidController::new(
            params.steer_k_p,
            params.steer_k_i,
            params.steer_k_d
        );

        let twiddler = Twiddler::new(
            twiddle_params.tolerance,
            vec![steer_pid],
            twiddle_params.step_sizes.clone(),
            log_path
        )?;

        let clock = RoundClock::new(
            twiddle_params.warmup_steps,
            twiddle_params.round_steps
        )?;

        Ok(Self {
            params,
            twiddler,
            clock,
            tuning: twiddle_params.enabled,
            step_num: 0,
            report: StatusReport::default(),
            record: None,
            arch_record: Archiver::default()
        })
    }

    /// Enable or disable tuning. Enabling starts a fresh round.
    pub fn set_tuning(&mut self, enabled: bool) {
        if enabled && !self.tuning {
            self.restart_round();
        }

        self.tuning = enabled;
    }

    /// Abandon the round in progress and start again from the warm-up.
    ///
    /// Samples recorded so far in the round are discarded and the controllers' error memory is
    /// cleared, the gains are kept.
    pub fn restart_round(&mut self) {
        self.clock.restart();
        self.twiddler.reset_round();
        self.reset_errors();
    }

    pub fn is_tuning(&self) -> bool {
        self.tuning
    }

    pub fn twiddler(&self) -> &Twiddler {
        &self.twiddler
    }

    /// The steering controller.
    pub fn steer_pid(&self) -> Result<&PidController, SteerCtrlError> {
        self.twiddler
            .controller(STEER_PID_IDX)
            .ok_or(SteerCtrlError::MissingController(STEER_PID_IDX))
    }

    /// Clear the error memory of every controller, called when the simulator restarts.
    pub fn reset_errors(&mut self) {
        for pid in self.twiddler.controllers_mut() {
            pid.reset_errors();
        }
    }

    fn steer_pid_mut(&mut self) -> Result<&mut PidController, SteerCtrlError> {
        self.twiddler
            .controller_mut(STEER_PID_IDX)
            .ok_or(SteerCtrlError::MissingController(STEER_PID_IDX))
    }

    /// Finish the tuning round, the simulator is about to be reset.
    fn end_round(&mut self) -> Result<(), SteerCtrlError> {
        let status = self.twiddler.step()?;
        let summary = status.summary().clone();

        self.reset_errors();
        self.clock.restart();
        self.report.round_ended = true;

        session::save_with_timestamp(
            format!("{}/round_{}.json", TUNING_SAVE_DIR, summary.round),
            summary.clone()
        );

        if let TwiddleStatus::Converged(_) = status {
            info!(
                "Tuning converged, final gains {:?}",
                self.steer_pid()?.gains()
            );

            session::save(
                format!("{}/converged_gains.json", TUNING_SAVE_DIR),
                summary
            );

            self.tuning = false;
            self.report.converged = true;
        }

        Ok(())
    }

    fn step_record(
        &self,
        telem: &Telemetry,
        steer_demand: f64,
        throttle_demand: f64,
        reset: bool
    ) -> Result<StepRecord, SteerCtrlError> {
        let [k_p, k_i, k_d] = self.steer_pid()?.gains();

        Ok(StepRecord {
            step: self.step_num,
            cte: telem.cte,
            speed: telem.speed,
            steering_angle: telem.steering_angle,
            steer_demand,
            throttle_demand,
            reset,
            k_p, k_i, k_d
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-12;

    fn twiddle_params(enabled: bool) -> twiddle::Params {
        twiddle::Params {
            enabled,
            tolerance: 1e-5,
            step_sizes: vec![0.1, 0.01, 0.1],
            warmup_steps: 2,
            round_steps: 3,
            log_file_name: "pid_coefficients.txt".into()
        }
    }

    fn p_only_params() -> Params {
        Params {
            steer_k_p: 1.0,
            steer_k_i: 0.0,
            steer_k_d: 0.0,
            ..Default::default()
        }
    }

    fn temp_log(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("steer_ctrl_test_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("pid_coefficients.txt")
    }

    fn input(cte: f64, speed: f64) -> InputData {
        InputData {
            telemetry: Telemetry {
                cte,
                speed,
                steering_angle: 0.0
            }
        }
    }

    fn steer_cmd(cmd: SimCmd) -> SteerCmd {
        match cmd {
            SimCmd::Steer(s) => s,
            c => panic!("Expected a steer command, got {:?}", c)
        }
    }

    #[test]
    fn test_steer_and_throttle() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(false), "unused.txt")
            .unwrap();

        let (cmd, report) = sc.proc(&input(0.2, 20.0)).unwrap();
        let cmd = steer_cmd(cmd);

        assert!((cmd.steering_angle + 0.2).abs() < EPS);
        assert!((cmd.throttle - 0.15).abs() < EPS);
        assert!(!report.steer_limited);
        assert!(!report.throttle_floored);
        assert!(!report.tuning);
        assert_eq!(report.round_phase, None);
    }

    #[test]
    fn test_reference_gains() {
        let mut sc = SteerCtrl::new(Params::default(), &twiddle_params(false), "unused.txt")
            .unwrap();

        let cmd = steer_cmd(sc.proc(&input(0.5, 30.0)).unwrap().0);

        // First step, so p = i = d = 0.5
        let expected = -(0.171 * 0.5 + 1.62 * 0.5);
        assert!((cmd.steering_angle - expected).abs() < EPS);
    }

    #[test]
    fn test_steer_limited() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(false), "unused.txt")
            .unwrap();

        let (cmd, report) = sc.proc(&input(5.0, 20.0)).unwrap();
        let cmd = steer_cmd(cmd);

        assert_eq!(cmd.steering_angle, -1.0);
        assert_eq!(report.steer_unclamped, -5.0);
        assert!(report.steer_limited);

        // Fast enough that the throttle may go negative
        assert!((cmd.throttle + 1.25).abs() < EPS);
        assert!(!report.throttle_floored);
    }

    #[test]
    fn test_throttle_floor_when_slow() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(false), "unused.txt")
            .unwrap();

        let (cmd, report) = sc.proc(&input(-5.0, 5.0)).unwrap();
        let cmd = steer_cmd(cmd);

        assert_eq!(cmd.steering_angle, 1.0);
        assert_eq!(cmd.throttle, 0.1);
        assert!(report.throttle_floored);
    }

    #[test]
    fn test_tuning_round() {
        let log_path = temp_log("round");
        std::fs::remove_file(&log_path).ok();

        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(true), &log_path)
            .unwrap();

        let mut phases = Vec::new();
        for _ in 0..4 {
            let (cmd, report) = sc.proc(&input(0.5, 20.0)).unwrap();
            steer_cmd(cmd);
            phases.push(report.round_phase.unwrap());
        }

        assert_eq!(phases, vec![
            RoundPhase::WarmUp,
            RoundPhase::WarmUp,
            RoundPhase::Record,
            RoundPhase::Record
        ]);
        assert_eq!(sc.twiddler().num_samples(), 2);

        // The last step of the round resets the simulator
        let (cmd, report) = sc.proc(&input(0.5, 20.0)).unwrap();
        assert_eq!(cmd, SimCmd::Reset);
        assert!(report.round_ended);
        assert!(!report.converged);

        // Baseline round complete, k_p is probed upwards
        let pid = sc.steer_pid().unwrap();
        assert!((pid.k_p - 1.1).abs() < EPS);
        assert_eq!(pid.errors(), (0.0, 0.0, 0.0));
        assert_eq!(sc.twiddler().best_error(), Some(1.5));
        assert_eq!(sc.twiddler().num_samples(), 0);
        assert!(sc.is_tuning());

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.starts_with("Max Error: 0.5\nTot Error: 1.5\nAvg Error: 0.5\nPID 1\n"));

        // And the next round starts with a warm-up
        let (_, report) = sc.proc(&input(0.5, 20.0)).unwrap();
        assert_eq!(report.round_phase, Some(RoundPhase::WarmUp));

        std::fs::remove_dir_all(log_path.parent().unwrap()).ok();
    }

    #[test]
    fn test_tuning_stops_on_convergence() {
        let log_path = temp_log("converge");

        let mut tp = twiddle_params(true);
        tp.tolerance = 1.0;
        tp.warmup_steps = 0;
        tp.round_steps = 1;

        let mut sc = SteerCtrl::new(p_only_params(), &tp, &log_path).unwrap();

        let (cmd, report) = sc.proc(&input(0.3, 20.0)).unwrap();
        assert_eq!(cmd, SimCmd::Reset);
        assert!(report.converged);
        assert!(!sc.is_tuning());
        assert_eq!(sc.steer_pid().unwrap().gains(), [1.0, 0.0, 0.0]);

        // Back to normal driving
        let (cmd, report) = sc.proc(&input(0.3, 20.0)).unwrap();
        steer_cmd(cmd);
        assert!(!report.tuning);

        std::fs::remove_dir_all(log_path.parent().unwrap()).ok();
    }

    #[test]
    fn test_set_tuning_restarts_round() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(false), "unused.txt")
            .unwrap();

        sc.proc(&input(0.1, 20.0)).unwrap();
        sc.set_tuning(true);

        let (_, report) = sc.proc(&input(0.1, 20.0)).unwrap();
        assert!(report.tuning);
        assert_eq!(report.round_phase, Some(RoundPhase::WarmUp));
    }

    #[test]
    fn test_retoggled_tuning_records_full_round() {
        let log_path = temp_log("retoggle");

        let mut tp = twiddle_params(true);
        tp.warmup_steps = 0;
        tp.round_steps = 3;

        let mut sc = SteerCtrl::new(p_only_params(), &tp, &log_path).unwrap();

        for _ in 0..2 {
            sc.proc(&input(1.0, 20.0)).unwrap();
        }
        assert_eq!(sc.twiddler().num_samples(), 2);

        sc.set_tuning(false);
        sc.set_tuning(true);
        assert_eq!(sc.twiddler().num_samples(), 0);
        assert_eq!(sc.steer_pid().unwrap().errors(), (0.0, 0.0, 0.0));

        let mut last = None;
        for _ in 0..3 {
            last = Some(sc.proc(&input(1.0, 20.0)).unwrap().0);
        }

        assert_eq!(last, Some(SimCmd::Reset));
        assert_eq!(sc.twiddler().best_error(), Some(3.0));
        assert_eq!(sc.twiddler().num_rounds(), 1);

        std::fs::remove_dir_all(log_path.parent().unwrap()).ok();
    }

    #[test]
    fn test_restart_round() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(true), "unused.txt")
            .unwrap();

        // Through the warm-up and into the recorded part of the round
        for _ in 0..4 {
            sc.proc(&input(0.5, 20.0)).unwrap();
        }
        assert_eq!(sc.twiddler().num_samples(), 2);

        sc.restart_round();

        assert_eq!(sc.twiddler().num_samples(), 0);
        assert_eq!(sc.twiddler().total_error(), 0.0);
        assert_eq!(sc.steer_pid().unwrap().errors(), (0.0, 0.0, 0.0));
        assert_eq!(sc.steer_pid().unwrap().gains(), [1.0, 0.0, 0.0]);

        let (_, report) = sc.proc(&input(0.5, 20.0)).unwrap();
        assert_eq!(report.round_phase, Some(RoundPhase::WarmUp));
    }

    #[test]
    fn test_archive_record() {
        let mut sc = SteerCtrl::new(p_only_params(), &twiddle_params(false), "unused.txt")
            .unwrap();

        sc.proc(&input(0.2, 20.0)).unwrap();

        let record = sc.record.unwrap();
        assert_eq!(record.step, 1);
        assert_eq!(record.k_p, 1.0);
        assert!(!record.reset);

        // Without a session the record is discarded
        assert!(sc.write().is_ok());
        assert!(sc.record.is_none());
    }
}
