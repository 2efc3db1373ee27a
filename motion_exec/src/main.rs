//! # Motion Controller Executable
//!
//! Runs a motion controller against a bus script. The tick clock runs the trajectory executor in
//! its own thread while the main thread plays the script's frames into the controller's protocol
//! handler and logs the replies. Once the script has ended and execution has stopped, or is held
//! by disabled motors, a summary of the run is saved in the session directory.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Parameters for the motion executable.
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use comms_if::{bus::Frame, status::StatusWord};
use motion_lib::{Controller, TrajectoryExecutor};
use params::MotionExecParams;
use util::{
    logger::{logger_init, LevelFilter},
    script_interpreter::{PendingFrames, ScriptInterpreter},
    session::Session,
    time::whole_periods,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest the tick thread sleeps between catching up with the clock.
const MAX_TICK_SLEEP: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "motion_exec", about = "Motion controller driven by a bus script")]
struct Opts {
    /// Bus script to run
    #[structopt(parse(from_os_str))]
    script: PathBuf,

    /// Parameter file, relative to the params directory
    #[structopt(short, long, default_value = "motion_exec.toml")]
    params: String,

    /// Minimum log level, one of info, debug or trace
    #[structopt(short, long, default_value = "debug")]
    log_level: LevelFilter,
}

/// Summary of a run, saved at exit.
#[derive(Debug, Serialize)]
struct RunSummary {
    script: PathBuf,
    clock_ticks: u64,
    ticks_executed: u64,
    instrs_retired: u64,
    instrs_remaining: usize,
    final_status: String,
    positions_steps: Vec<i64>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("motion_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger, keeping the executor quieter than everything else
    logger_init(
        opts.log_level,
        &[("motion_lib::executor", LevelFilter::Info)],
        &session,
    )
    .wrap_err("Failed to initialise logging")?;

    info!("Motion Controller Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MotionExecParams =
        util::params::load(&opts.params).wrap_err("Failed to load parameters")?;

    info!("Parameters loaded: {:#?}", params.motion);

    // ---- LOAD SCRIPT ----

    let mut script =
        ScriptInterpreter::new(&opts.script).wrap_err("Failed to load the bus script")?;

    info!(
        "Loaded script with {} entries lasting {:.3} s",
        script.get_num_entries(),
        script.get_duration()
    );

    // ---- CONTROLLER INITIALISATION ----

    let (mut controller, executor) =
        Controller::new(params.motion.clone()).wrap_err("Invalid controller configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let tick_period = params.motion.tick_period();
    let tick_thread = {
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("tick".into())
            .spawn(move || tick_loop(executor, tick_period, shutdown))
            .wrap_err("Failed to start the tick thread")?
    };

    info!("Initialisation complete, entering main loop");

    // ---- MAIN LOOP ----

    let poll_period = Duration::from_millis(params.script_poll_period_ms);

    loop {
        match script.get_pending_frames() {
            PendingFrames::Some(frames) => {
                for frame in frames {
                    handle_frame(&mut controller, frame);
                }
            }
            PendingFrames::None => (),
            PendingFrames::EndOfScript => {
                // Instructions left behind by a STOP or a fault are reported in the summary
                if execution_settled(controller.status()) {
                    break;
                }
            }
        }

        thread::sleep(poll_period);
    }

    info!("End of script reached and execution stopped, shutting down");

    // ---- SHUTDOWN ----

    shutdown.store(true, Ordering::SeqCst);
    let (executor, clock_ticks) = tick_thread
        .join()
        .map_err(|_| eyre!("The tick thread panicked"))?;

    let summary = RunSummary {
        script: opts.script,
        clock_ticks,
        ticks_executed: executor.ticks_executed(),
        instrs_retired: executor.instrs_retired(),
        instrs_remaining: controller.buffer_len(),
        final_status: controller.status().to_string(),
        positions_steps: executor.positions_steps(),
    };
    info!("Run summary: {:#?}", summary);

    session.save("summary.json", summary);
    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Pass a frame to the controller and log the reply.
fn handle_frame(controller: &mut Controller, frame: Frame) {
    let reply = controller.handle_frame(frame);

    match frame {
        Frame::Command(_) => {
            let status = StatusWord::from(reply);
            if status.has_fault() {
                warn!("{:02x?} -> {}", frame, status);
            } else {
                debug!("{:02x?} -> {}", frame, status);
            }
        }
        Frame::Word(_) => debug!("{:02x?} -> {:#010x}", frame, reply.0),
    }
}

/// True once the executor will not advance without another command: stopped, or held by
/// disabled motors.
fn execution_settled(status: StatusWord) -> bool {
    !status.running() || status.disabled()
}

/// Run the executor once per tick period until `shutdown` is set.
///
/// Ticks missed while sleeping are caught up before sleeping again, so the executor sees every
/// tick of the clock. Returns the executor and the number of clock ticks.
fn tick_loop(
    mut executor: TrajectoryExecutor,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> (TrajectoryExecutor, u64) {
    let start = Instant::now();
    let mut ticks: u64 = 0;
    let mut last_aux = None;

    while !shutdown.load(Ordering::SeqCst) {
        let due = whole_periods(start.elapsed(), period);

        while ticks < due {
            if let Some(out) = executor.tick() {
                if last_aux != Some(out.aux) {
                    debug!("AUX outputs {:#06x}", out.aux);
                    last_aux = Some(out.aux);
                }
            }
            ticks += 1;
        }

        thread::sleep(period.min(MAX_TICK_SLEEP));
    }

    (executor, ticks)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
