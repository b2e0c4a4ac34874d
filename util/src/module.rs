//! Processing module interface
//!
//! A processing module is built once from its parameters and then driven once per simulator
//! step. `steer_exec` modules implement `State` so the executable can drive them uniformly.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use crate::session::Session;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A cyclically processed module.
pub trait State: Sized {
    /// Everything needed to build the module, usually the names of its parameter files.
    type InitData;
    type InitError;

    /// Data consumed by each processing step.
    type InputData;
    /// Data produced by each processing step.
    type OutputData;
    /// Diagnostics produced alongside the output of each step.
    type StatusReport;
    type ProcError;

    /// Build the module.
    ///
    /// Modules which archive their data create their archive files under `session`.
    fn init(init_data: Self::InitData, session: &Session)
        -> Result<Self, Self::InitError>;

    /// Process one step, returning the output and a status report.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}
