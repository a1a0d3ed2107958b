//! # Control Loop
//!
//! The fixed rate loop run on the control thread. Each cycle:
//!
//!  1. records the measured cycle time,
//!  2. takes the newest operator input and applies the disconnect policy,
//!  3. stops if the operator asked to quit,
//!  4. reads the actuator feedback,
//!  5. archives the feedback,
//!  6. steps the control state machine,
//!  7. runs the quadruped controller,
//!  8. escalates persistently unreachable foot targets,
//!  9. sends the demands to the actuators,
//! 10. archives the demands.
//!
//! `run` sleeps only the remainder of the target period after each cycle. A cycle which overruns
//! is followed immediately by the next, which sees the larger measured cycle time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Receiver,
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    data_store::{DataStore, SafeModeCause},
    input_client::{latest_sample, InputSample},
    mech_client::{ActuatorGroup, MechClientError},
    params::{DisconnectPolicy, QuadExecParams},
    quad_ctrl::{self, QuadCtrlError},
};
use comms_if::eqpt::mech::{JointId, MechDems, MechSensData};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Poll period while waiting for connections at start up.
const CONNECT_POLL_PERIOD: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The control loop, generic over the actuators it drives.
pub struct ControlLoop<A: ActuatorGroup> {
    params: QuadExecParams,

    ds: DataStore,

    actuators: A,

    /// Operator input published by the input sampler, `None` when running without a device.
    input_rx: Option<Receiver<InputSample>>,

    stop: Arc<AtomicBool>,

    stats: ControlStats,

    last_fbk: Option<MechSensData>,

    arch_fbk: Archiver,
}

/// Timing and error counters of a control session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControlStats {
    /// Number of cycles executed.
    pub num_cycles: u64,

    /// Total number of cycles which took longer than the target period.
    pub num_overruns: u64,

    /// Number of overruns in a row up to the latest cycle.
    pub num_consec_overruns: u64,

    /// Measured time between the starts of the last two cycles.
    pub last_dt: Duration,

    /// Largest measured cycle time.
    pub max_dt: Duration,

    /// Cycles in which no fresh feedback was received.
    pub num_fbk_errors: u64,

    /// Demands which could not be delivered.
    pub num_send_errors: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the loop should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,

    /// The operator asked for the session to end.
    Quit,
}

#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("{0} not connected")]
    Connectivity(&'static str),

    #[error("A foot target has been unreachable for {0} consecutive cycles")]
    PersistentUnreachable(u64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<A: ActuatorGroup> ControlLoop<A> {
    /// Create a new loop driving `actuators`.
    ///
    /// Setting `stop` ends `run` after the current cycle.
    pub fn new(params: QuadExecParams, ds: DataStore, actuators: A, stop: Arc<AtomicBool>) -> Self {
        Self {
            params,
            ds,
            actuators,
            input_rx: None,
            stop,
            stats: ControlStats::default(),
            last_fbk: None,
            arch_fbk: Archiver::default(),
        }
    }

    /// Take the operator input from the given receiver.
    pub fn with_input(mut self, input_rx: Receiver<InputSample>) -> Self {
        self.input_rx = Some(input_rx);
        self
    }

    /// Archive the actuator feedback into the session, if enabled in the parameters.
    pub fn open_archive(&mut self, session: &Session) -> Result<(), ArchiveError> {
        if !self.params.archive_feedback {
            return Ok(());
        }

        let mut arch = Archiver::from_path(session, "quad_exec/fbk.csv")?;
        arch.write_header(fbk_header().as_slice())?;
        self.arch_fbk = arch;

        Ok(())
    }

    pub fn data_store(&self) -> &DataStore {
        &self.ds
    }

    pub fn stats(&self) -> &ControlStats {
        &self.stats
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.actuators
    }

    /// Wait for the actuators, and the input device if required, to connect.
    pub fn check_connectivity(&mut self) -> Result<(), ControlError> {
        let deadline = Instant::now() + self.params.connect_timeout();

        while !self.actuators.is_connected() {
            if Instant::now() >= deadline {
                error!("Actuators did not connect within {:?}", self.params.connect_timeout());
                return Err(ControlError::Connectivity("Actuator group"));
            }
            thread::sleep(CONNECT_POLL_PERIOD);
        }
        info!("Actuators connected");

        if !self.params.require_input_device {
            return Ok(());
        }

        loop {
            if let Some(rx) = self.input_rx.as_ref() {
                if let Some(sample) = latest_sample(rx).latest.filter(|s| s.connected) {
                    self.ds.input = sample.sanitised();
                    self.ds.input_connected = true;
                    info!("Input device connected");
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                error!("Input device did not connect within {:?}", self.params.connect_timeout());
                return Err(ControlError::Connectivity("Input device"));
            }
            thread::sleep(CONNECT_POLL_PERIOD);
        }
    }

    /// Run cycles at the target period until stopped, the operator quits or an error occurs.
    ///
    /// A final hold demand is sent before returning.
    pub fn run(&mut self) -> Result<ControlStats, ControlError> {
        let period = self.params.cycle_period();
        info!("Control loop starting, period {:?}", period);

        let result = self.run_cycles(period);

        self.send_final_hold();

        info!(
            "Control loop stopped after {} cycles, {} overruns, max cycle time {:.6} s",
            self.stats.num_cycles,
            self.stats.num_overruns,
            self.stats.max_dt.as_secs_f64()
        );

        result.map(|_| self.stats)
    }

    fn run_cycles(&mut self, period: Duration) -> Result<(), ControlError> {
        let mut last_start: Option<Instant> = None;

        while !self.stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();
            let dt = match last_start {
                Some(t) => cycle_start.duration_since(t),
                None => period,
            };
            last_start = Some(cycle_start);

            if self.tick(dt)? == TickOutcome::Quit {
                info!("Quit requested by the operator");
                break;
            }

            let cycle_dur = cycle_start.elapsed();
            match period.checked_sub(cycle_dur) {
                Some(d) => {
                    self.stats.num_consec_overruns = 0;
                    self.ds.num_consec_cycle_overruns = 0;
                    thread::sleep(d);
                }
                None => {
                    self.stats.num_overruns += 1;
                    self.stats.num_consec_overruns += 1;
                    self.ds.num_consec_cycle_overruns += 1;
                    warn!(
                        "Cycle overran by {:.06} s",
                        (cycle_dur - period).as_secs_f64()
                    );
                }
            }
        }

        if self.stop.load(Ordering::Relaxed) {
            info!("Stop requested");
        }

        Ok(())
    }

    /// Execute one cycle with the measured cycle time `dt`.
    pub fn tick(&mut self, dt: Duration) -> Result<TickOutcome, ControlError> {
        // ---- CYCLE START ----

        self.ds.cycle_start(dt);
        self.stats.last_dt = dt;
        self.stats.max_dt = self.stats.max_dt.max(dt);

        // ---- OPERATOR INPUT ----

        self.update_input();

        if self.ds.input.quit_requested {
            return Ok(TickOutcome::Quit);
        }

        // ---- FEEDBACK ----

        let fbk = match self.read_feedback() {
            Some(f) => f,
            None => {
                self.ds.cycle_end();
                self.stats.num_cycles += 1;
                return Ok(TickOutcome::Continue);
            }
        };

        if let Err(e) = self.write() {
            warn!("Could not archive the feedback: {}", e);
        }

        // ---- CONTROL ----

        // Held for unreachable targets the state machine keeps running, so the controller can
        // tell when its targets are back within reach
        let sequencing = !self.ds.safe
            || self.ds.safe_cause == Some(SafeModeCause::PersistentUnreachable);

        let step = if sequencing {
            let last_report = self.ds.quad_ctrl_status_rpt;
            Some(self.ds.ctrl_sm.step(dt, &self.ds.input, last_report.as_ref()))
        } else {
            None
        };
        self.ds.ctrl_sm_output = step;

        self.ds.quad_ctrl_input = quad_ctrl::InputData {
            fbk,
            dt,
            step,
            cmd: self.ds.input,
        };

        match self.ds.quad_ctrl.proc(&self.ds.quad_ctrl_input) {
            Ok((dems, report)) => {
                self.ds.quad_ctrl_output = Some(dems);
                self.ds.quad_ctrl_status_rpt = Some(report);
            }
            Err(QuadCtrlError::NoFeedback) => debug!("QuadCtrl waiting for feedback"),
            Err(e) => warn!("Error during QuadCtrl processing: {}", e),
        }

        self.check_unreachable()?;

        // ---- DEMANDS ----

        if let Some(dems) = self.ds.quad_ctrl_output.take() {
            self.send(&dems);
            self.ds.quad_ctrl_output = Some(dems);
        }

        if let Err(e) = self.ds.quad_ctrl.write() {
            warn!("Could not archive the QuadCtrl demands: {}", e);
        }

        self.ds.cycle_end();
        self.stats.num_cycles += 1;

        Ok(TickOutcome::Continue)
    }

    /// Take the newest operator sample and apply the disconnect policy.
    fn update_input(&mut self) {
        let rx = match self.input_rx {
            Some(ref rx) => rx,
            None => return,
        };

        let drained = latest_sample(rx);

        let connected = match drained.latest {
            Some(ref s) => s.connected,
            None if !drained.sampler_alive => false,
            None => self.ds.input_connected,
        };

        if let Some(sample) = drained.latest {
            if sample.connected {
                self.ds.input = sample.sanitised();
            } else {
                // Only the quit request of a disconnected device is honoured
                self.ds.input.quit_requested |= sample.quit_requested;
            }
        }

        if connected != self.ds.input_connected {
            self.ds.input_connected = connected;

            match (connected, self.params.disconnect_policy) {
                (false, DisconnectPolicy::ContinueLastCommand) => {
                    warn!("Input device disconnected, continuing with the last command")
                }
                (false, DisconnectPolicy::SafeStop) => warn!("Input device disconnected"),
                (true, _) => info!("Input device reconnected"),
            }
        }

        if self.params.disconnect_policy == DisconnectPolicy::SafeStop {
            if connected {
                self.ds.make_unsafe(SafeModeCause::OperatorDisconnected).ok();
            } else {
                self.ds.make_safe(SafeModeCause::OperatorDisconnected);
            }
        }
    }

    /// Read the actuator feedback, falling back on the last feedback received.
    fn read_feedback(&mut self) -> Option<MechSensData> {
        match self.actuators.get_feedback(self.params.fbk_timeout()) {
            Ok(fbk) => {
                if self.ds.num_consec_fbk_errors > 0 {
                    info!(
                        "Actuator feedback recovered after {} cycles",
                        self.ds.num_consec_fbk_errors
                    );
                }
                self.ds.num_consec_fbk_errors = 0;
                self.ds.make_unsafe(SafeModeCause::ActuatorsNotConnected).ok();
                self.last_fbk = Some(fbk.clone());
                return Some(fbk);
            }
            Err(MechClientError::NotConnected) => {
                if !self.ds.safe {
                    error!("Connection to the actuators lost");
                }
                self.ds.make_safe(SafeModeCause::ActuatorsNotConnected);
            }
            Err(e) => {
                if self.ds.num_consec_fbk_errors == 0 {
                    warn!("No actuator feedback: {}", e);
                }
            }
        }

        self.ds.num_consec_fbk_errors += 1;
        self.stats.num_fbk_errors += 1;

        if self.last_fbk.is_none() {
            trace!("No feedback received yet, skipping control");
        }
        self.last_fbk.clone()
    }

    /// Engage the safe stop, then end the session, if a foot target stays unreachable.
    ///
    /// The safe stop is released once every target is reachable again.
    fn check_unreachable(&mut self) -> Result<(), ControlError> {
        let failing = self
            .ds
            .quad_ctrl_status_rpt
            .map_or(false, |r| r.ik_failed.iter().any(|f| *f));
        let escalated = self.ds.safe_cause == Some(SafeModeCause::PersistentUnreachable);

        if !failing {
            if escalated {
                info!(
                    "Foot targets reachable again after {} cycles",
                    self.ds.num_consec_unreachable
                );
                self.ds.make_unsafe(SafeModeCause::PersistentUnreachable).ok();
            }
            self.ds.num_consec_unreachable = 0;
            return Ok(());
        }

        self.ds.num_consec_unreachable += 1;
        let count = self.ds.num_consec_unreachable;

        if count >= self.params.abort_consec_unreachable {
            error!("Foot target unreachable for {} consecutive cycles, stopping", count);
            return Err(ControlError::PersistentUnreachable(count));
        }

        if count >= self.params.max_consec_unreachable && !escalated {
            error!("Foot target unreachable for {} consecutive cycles", count);
            // A different cause may already hold the robot, escalation replaces it
            self.ds.safe = false;
            self.ds.safe_cause = None;
            self.ds.make_safe(SafeModeCause::PersistentUnreachable);
        }

        Ok(())
    }

    fn send(&mut self, dems: &MechDems) {
        match self.actuators.send_command(dems) {
            Ok(()) => (),
            Err(MechClientError::NotConnected) => {
                if !self.ds.safe {
                    error!("Connection to the actuators lost");
                }
                self.stats.num_send_errors += 1;
                self.ds.make_safe(SafeModeCause::ActuatorsNotConnected);
            }
            Err(e) => {
                self.stats.num_send_errors += 1;
                warn!("Could not send the demands: {}", e);
            }
        }
    }

    /// Hold the joints where they were last commanded, or measured if nothing was commanded.
    fn send_final_hold(&mut self) {
        let pos = match (self.ds.quad_ctrl.last_command(), self.last_fbk.as_ref()) {
            (Some(cmd), _) => *cmd,
            (None, Some(fbk)) if fbk.positions_valid() => fbk.pos_rad,
            _ => {
                warn!("Nothing to hold, no final demands sent");
                return;
            }
        };
        let effort = self
            .ds
            .quad_ctrl_output
            .as_ref()
            .map(|d| d.effort_nm)
            .unwrap_or_default();

        info!("Sending final hold demands");
        self.send(&MechDems::hold(pos, effort));
    }
}

impl<A: ActuatorGroup> Archived for ControlLoop<A> {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if !self.arch_fbk.is_open() {
            return Ok(());
        }

        if let Some(ref fbk) = self.last_fbk {
            let mut record = vec![session::get_elapsed_seconds()];
            record.extend_from_slice(&fbk.pos_rad);
            record.extend_from_slice(&fbk.speed_rads);
            record.extend_from_slice(&fbk.effort_nm);

            self.arch_fbk.serialise(record)?;
        }

        Ok(())
    }
}

/// Header of the feedback archive.
fn fbk_header() -> Vec<String> {
    let mut header = vec![String::from("time_s")];
    for prefix in ["pos", "vel", "eff"].iter() {
        for joint in JointId::ALL.iter() {
            header.push(format!("{}_{}", prefix, joint));
        }
    }
    header
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
