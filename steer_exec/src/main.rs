//! Steering executable entry point.
//!
//! # Architecture
//!
//! The executable serves a single driving simulator at a time:
//!
//!     - Initialise the session, logger and steering module
//!     - Accept a connection from the simulator
//!     - Main loop:
//!         - Receive an event from the simulator
//!         - Telemetry is processed by steering control, which replies with either a steering
//!           demand or a reset at the end of a tuning round
//!         - Manual driving events are answered with a manual command
//!     - On disconnect go back to accepting connections

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, trace, warn};
use color_eyre::{Report, eyre::WrapErr};
use structopt::StructOpt;

// Internal
use comms_if::{
    net::{NetError, NetParams},
    sim::{SimCmd, SimEvent}
};
use steer_lib::{
    sim_server::{SimServer, SimServerError},
    steer_ctrl::{InitData, InputData, SteerCtrl}
};
use util::{
    archive::Archived,
    module::State,
    logger::{logger_init, LevelFilter},
    session::Session
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drives the simulated car around the track with a PID controller.
#[derive(Debug, StructOpt)]
#[structopt(name = "steer_exec")]
struct Opts {
    /// Tune the steering gains while driving, regardless of `twiddle.toml`.
    #[structopt(long, conflicts_with = "no-tune")]
    tune: bool,

    /// Never tune the steering gains, regardless of `twiddle.toml`.
    #[structopt(long)]
    no_tune: bool,

    /// Log every step at trace level.
    #[structopt(short, long)]
    verbose: bool
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "steer_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    let result = run(&opts, &session);

    // Flush any snapshots still queued, such as the last tuning round
    session.exit();

    result
}

/// Run the executable within the session, only returns on error.
fn run(opts: &Opts, session: &Session) -> Result<(), Report> {

    // Initialise logger
    let min_level = if opts.verbose { LevelFilter::Trace } else { LevelFilter::Debug };
    logger_init(min_level, session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Steering Executable\n");
    info!("Session directory: {:?}\n", session.session_root);
    debug!("CLI options: {:?}", opts);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load(
        "net.toml"
    ).wrap_err("Could not load net params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    let tuning = match (opts.tune, opts.no_tune) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None
    };

    let mut steer_ctrl = SteerCtrl::init(
        InitData {
            params_file: "steer_ctrl.toml",
            twiddle_params_file: "twiddle.toml",
            tuning
        },
        session
    ).wrap_err("Failed to initialise SteerCtrl")?;

    info!("SteerCtrl init complete");

    // ---- SERVER INITIALISATION ----

    let mut server = SimServer::new(&net_params)
        .wrap_err("Failed to initialise the simulator server")?;

    info!("Listening for the simulator on {}", server.local_addr()?);

    // ---- MAIN LOOP ----

    loop {
        server.accept().wrap_err("Failed to accept a simulator connection")?;

        // A new connection starts from a fresh episode, so any partial tuning round is void
        steer_ctrl.restart_round();

        serve(&mut server, &mut steer_ctrl)?;

        info!("Waiting for a new connection");
    }
}

/// Serve a connected simulator until it disconnects.
///
/// Connection problems end the function with `Ok`, so that the caller can wait for the simulator
/// to reconnect. Only steering control failures are returned as errors.
fn serve(server: &mut SimServer, steer_ctrl: &mut SteerCtrl) -> Result<(), Report> {
    loop {
        let event = match server.recv_event() {
            Ok(Some(e)) => e,
            Ok(None) => continue,
            Err(e) => return connection_lost(e)
        };

        let cmd = match event {
            SimEvent::Telemetry(telemetry) => {
                let input = InputData { telemetry };

                let (cmd, report) = steer_ctrl.proc(&input)
                    .wrap_err("Error during SteerCtrl processing")?;

                trace!("SteerCtrl status: {:?}", report);

                if let Err(e) = steer_ctrl.write() {
                    warn!("Could not archive SteerCtrl: {}", e);
                }

                if report.converged {
                    info!("Tuning complete, continuing with the converged gains");
                }

                cmd
            },
            SimEvent::Manual => SimCmd::Manual,
            SimEvent::Other(name) => {
                debug!("Ignoring {:?} event", name);
                continue
            }
        };

        if let Err(e) = server.send_cmd(&cmd) {
            return connection_lost(e)
        }
    }
}

fn connection_lost(e: SimServerError) -> Result<(), Report> {
    match e {
        SimServerError::SocketError(NetError::Disconnected) => {
            info!("Simulator disconnected");
        },
        e => warn!("Connection to the simulator failed: {}", e)
    }

    Ok(())
}
