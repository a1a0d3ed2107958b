//! Main quadruped executable entry point.
//!
//! # Architecture
//!
//! The executable runs two threads next to the main one:
//!
//!     - `input_sampler`: polls the operator input device and publishes its latest sample,
//!     - `control`: runs the fixed rate control loop, the only writer of the controller state.
//!
//! Main initialises the session, the parameters and the modules, checks that the actuators (and
//! input device if required) are connected, then waits for the control loop to finish.
//!
//! # Usage
//!
//! Run with no arguments the operator input comes from the network. Given a script path the
//! input is replayed from the script, and the session ends once the script does.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{error, info, warn};
use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    thread,
};
use structopt::StructOpt;

// Internal
use comms_if::net::zmq;
use quad_lib::{
    control_loop::ControlLoop,
    data_store::DataStore,
    input_client::{InputClient, InputDevice, InputSampler, NullInput, ScriptedInput},
    leg::NUM_JOINTS,
    mech_client::ActuatorGroup,
    params::QuadExecParams,
    quad_ctrl::QuadCtrl,
    sim_mech::SimMech,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command line options
#[derive(Debug, StructOpt)]
#[structopt(name = "quad_exec", about = "Quadruped motion control")]
struct Opt {
    /// Replay the operator input from this script instead of the network
    #[structopt(parse(from_os_str))]
    script: Option<PathBuf>,

    /// Drive the simulated actuators
    #[structopt(long)]
    sim: bool,

    /// Run without an operator input device
    #[structopt(long)]
    no_input: bool,

    /// Log at trace level
    #[structopt(long)]
    trace: bool,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("quad_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(
        if opt.trace {
            LevelFilter::Trace
        } else {
            LevelFilter::Debug
        },
        &session,
    )
    .wrap_err("Failed to initialise logging")?;

    info!("Quadruped Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: QuadExecParams =
        util::params::load("quad_exec.toml").wrap_err("Could not load exec params")?;
    if opt.sim {
        params.use_sim = true;
    }
    session.save("quad_exec_params.json", params.clone());

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut quad_ctrl = QuadCtrl::default();
    quad_ctrl
        .init("quad_ctrl.toml", &session)
        .wrap_err("Failed to initialise QuadCtrl")?;
    session.save("quad_ctrl_params.json", quad_ctrl.params().clone());
    info!("QuadCtrl init complete");

    let ds = DataStore::new(quad_ctrl);

    info!("Module initialisation complete\n");

    // ---- INITIALISE DEVICES ----

    let zmq_ctx = zmq::Context::new();
    let stop = Arc::new(AtomicBool::new(false));

    let device: Box<dyn InputDevice + Send> = match opt.script {
        Some(ref path) => {
            info!("Replaying operator input from {:?}", path);
            Box::new(ScriptedInput::new(path).wrap_err("Failed to load the input script")?)
        }
        None if opt.no_input => {
            info!("Running without an operator input device");
            Box::new(NullInput)
        }
        None => Box::new(
            InputClient::new(&zmq_ctx, &params.input_endpoint)
                .wrap_err("Failed to initialise the InputClient")?,
        ),
    };

    let (sampler, input_rx) =
        InputSampler::spawn(device, params.input_poll_period(), stop.clone())
            .wrap_err("Failed to start the input sampler")?;
    info!("Input sampler started");

    let actuators = make_actuators(&zmq_ctx, &params, &ds)?;

    let mut control = ControlLoop::new(params, ds, actuators, stop.clone()).with_input(input_rx);

    if let Err(e) = control.open_archive(&session) {
        warn!("Could not open the feedback archive: {}", e);
    }

    control
        .check_connectivity()
        .wrap_err("Connectivity check failed")?;

    // ---- CONTROL ----

    let handle = thread::Builder::new()
        .name("control".into())
        .spawn(move || control.run())
        .wrap_err("Failed to start the control thread")?;

    let result = handle
        .join()
        .map_err(|_| eyre!("The control thread panicked"))?;

    // ---- SHUTDOWN ----

    sampler.join();

    let result = match result {
        Ok(stats) => {
            info!("Control statistics: {:#?}", stats);
            session.save("control_stats.json", stats);
            Ok(())
        }
        Err(e) => {
            error!("Control loop failed: {}", e);
            Err(e).wrap_err("The control loop failed")
        }
    };

    info!("End of execution");
    session.exit();

    result
}

/// Create the actuators the loop drives.
fn make_actuators(
    ctx: &zmq::Context,
    params: &QuadExecParams,
    ds: &DataStore,
) -> Result<Box<dyn ActuatorGroup + Send>, Report> {
    if params.use_sim {
        info!("Using simulated actuators");
        return Ok(Box::new(SimMech::new(
            &ds.quad_ctrl.params().legs,
            [0.0; NUM_JOINTS],
        )));
    }

    #[cfg(feature = "mech")]
    {
        let client = quad_lib::mech_client::MechClient::new(ctx, params)
            .wrap_err("Failed to initialise the MechClient")?;
        info!("MechClient initialised");
        return Ok(Box::new(client));
    }

    #[cfg(not(feature = "mech"))]
    {
        let _ = ctx;
        return Err(eyre!(
            "Built without the mech feature, only simulated actuators (--sim) are available"
        ));
    }
}
