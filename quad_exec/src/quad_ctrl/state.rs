//! Implementations for the QuadCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace, warn};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::Serialize;
use std::time::Duration;

// Internal
use super::{distribute_foot_forces, re_orient, Params, QuadCtrlError};
use crate::{
    body_pose::BodyPose,
    ctrl_sm::{Behaviour, ControlState, StepOutput},
    gait::GaitScheduler,
    leg::{
        leg_slice, set_leg_slice, LegGroup, LegId, LegModel, JOINTS_PER_LEG, NUM_JOINTS,
        NUM_LEGS,
    },
};
use comms_if::eqpt::{
    input::InputSample,
    mech::{JointId, MechDems, MechSensData},
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    convert::Convert,
    maths::{clamp, rate_limit},
    module::State,
    params,
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Quadruped control module state
pub struct QuadCtrl {
    pub(crate) params: Params,

    legs: Vec<LegModel>,

    body: BodyPose,

    gait: GaitScheduler,

    /// Standing foot positions.
    ///
    /// Frame: body
    stance_feet_b: [Point3<f64>; NUM_LEGS],

    /// Spread foot positions.
    ///
    /// Frame: body
    spread_feet_b: [Point3<f64>; NUM_LEGS],

    /// Module attitudes captured when gravity estimation started.
    imu_ref: Option<[Option<UnitQuaternion<f64>>; NUM_LEGS]>,

    /// Estimated direction of gravity.
    ///
    /// Frame: body
    gravity_dir_b: Vector3<f64>,

    /// Positions commanded on the previous cycle.
    last_cmd: Option<[f64; NUM_JOINTS]>,

    consec_ik_failures: [u64; NUM_LEGS],

    safe: bool,

    pub(crate) report: StatusReport,

    pub(crate) output: Option<MechDems>,
    arch_output: Archiver,
}

/// Input data to the quadruped controller.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// Latest actuator feedback.
    pub fbk: MechSensData,

    /// Measured time since the previous cycle.
    pub dt: Duration,

    /// Output of the state machine on this cycle, `None` when a safe stop has frozen the state
    /// machine.
    pub step: Option<StepOutput>,

    /// Latest operator command.
    pub cmd: InputSample,
}

/// Status report for QuadCtrl processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// Legs whose foot target couldn't be reached this cycle.
    pub ik_failed: [bool; NUM_LEGS],

    /// Number of consecutive cycles each leg's target has been unreachable.
    pub consec_ik_failures: [u64; NUM_LEGS],

    /// Joints whose demand was limited to the joint's range.
    pub pos_limited: [bool; NUM_JOINTS],

    /// Joints whose demand was limited by the maximum joint rate.
    pub rate_limited: [bool; NUM_JOINTS],

    /// True if every leg is within tolerance of its goal.
    pub posture_reached: bool,

    /// True if the demands hold the robot in place because it is in safe mode.
    pub safe_stop: bool,
}

/// Where a leg should put its foot and what force it should take.
#[derive(Debug, Clone, Copy)]
struct LegGoal {
    /// Frame: body
    foot_b: Point3<f64>,

    /// Ground reaction force on the foot.
    ///
    /// Frame: body
    foot_force_b: Vector3<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for QuadCtrl {
    fn default() -> Self {
        Self::with_params(Params::default())
    }
}

impl StatusReport {
    /// Largest number of consecutive unreachable targets over all legs.
    pub fn max_consec_ik_failures(&self) -> u64 {
        self.consec_ik_failures.iter().copied().max().unwrap_or(0)
    }
}

impl State for QuadCtrl {
    type InitData = &'static str;
    type InitError = params::LoadError;

    type InputData = InputData;
    type OutputData = MechDems;
    type StatusReport = StatusReport;
    type ProcError = QuadCtrlError;

    /// Initialise the QuadCtrl module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        let params: Params = params::load(init_data)?;
        *self = Self::with_params(params);

        // A missing archive isn't worth stopping for
        match Archiver::from_path(session, "quad_ctrl/dems.csv") {
            Ok(mut a) => match a.write_header(dems_header().as_slice()) {
                Ok(()) => self.arch_output = a,
                Err(e) => warn!("Could not write the QuadCtrl archive header: {}", e),
            },
            Err(e) => warn!("Could not create the QuadCtrl archive: {}", e),
        }

        Ok(())
    }

    /// Perform cyclic processing of the quadruped controller.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        // Clear the status report
        self.report = StatusReport::default();

        let dt_s = input_data.dt.as_secs_f64();

        // Joints which didn't report are assumed to be where they were commanded
        let prev_cmd = match self.last_cmd {
            Some(c) => c,
            None if input_data.fbk.positions_valid() => input_data.fbk.pos_rad,
            None => return Err(QuadCtrlError::NoFeedback),
        };
        let mut measured = input_data.fbk.pos_rad;
        for (m, c) in measured.iter_mut().zip(prev_cmd.iter()) {
            if !m.is_finite() {
                *m = *c;
            }
        }

        for leg in self.legs.iter_mut() {
            let id = leg.id();
            leg.set_feedback(
                &leg_slice(&measured, id),
                &leg_slice(&input_data.fbk.speed_rads, id),
            );
        }

        self.update_gravity(&input_data.fbk.imu_attitude_q);
        let gravity_dir_b = self.gravity_dir_b;
        self.body.update_estimate(&gravity_dir_b);

        let (behaviour, entering) = match input_data.step {
            Some(ref step) => {
                if let Some(transition) = step.transition {
                    self.on_entry(transition.to, &prev_cmd, input_data);
                }
                (step.behaviour, step.transition.is_some())
            }
            None => (Behaviour::SafeStop, false),
        };

        // The entry tick's time belongs to the previous state
        let motion_dt_s = if entering { 0.0 } else { dt_s };

        let output = if self.safe {
            self.check_reach(behaviour);
            self.hold(&prev_cmd)
        } else {
            match self.leg_goals(behaviour, motion_dt_s) {
                Some(goals) => self.track(&goals, &prev_cmd, dt_s),
                None => self.hold(&prev_cmd),
            }
        };

        if !output.is_finite() {
            return Err(QuadCtrlError::NonFiniteOutput(output));
        }

        trace!(
            "QuadCtrl output:\n    pos: {:?}\n    effort: {:?}",
            output.pos_rad,
            output.effort_nm
        );

        self.report.consec_ik_failures = self.consec_ik_failures;
        self.last_cmd = Some(output.pos_rad);
        self.output = Some(output.clone());

        Ok((output, self.report))
    }
}

impl Archived for QuadCtrl {
    fn write(&mut self) -> Result<(), ArchiveError> {
        if !self.arch_output.is_open() {
            return Ok(());
        }

        if let Some(ref output) = self.output {
            let mut record = vec![session::get_elapsed_seconds()];
            record.extend_from_slice(&output.pos_rad);
            record.extend_from_slice(&output.speed_rads);
            record.extend_from_slice(&output.effort_nm);

            self.arch_output.serialise(record)?;
        }

        Ok(())
    }
}

impl QuadCtrl {
    /// Create the controller from a set of parameters.
    pub fn with_params(params: Params) -> Self {
        let legs: Vec<LegModel> = LegId::ALL
            .iter()
            .map(|id| LegModel::new(*id, params.legs[id.index()].clone()))
            .collect();

        let stance_lf: Vector3<f64> = params.stance_foot_lf.convert();
        let spread_lf: Vector3<f64> = params.spread_foot_lf.convert();

        let mut stance_feet_b = [Point3::origin(); NUM_LEGS];
        let mut spread_feet_b = [Point3::origin(); NUM_LEGS];
        for (i, leg) in legs.iter().enumerate() {
            stance_feet_b[i] = leg.base_frame() * Point3::from(stance_lf);
            spread_feet_b[i] = leg.base_frame() * Point3::from(spread_lf);
        }

        Self {
            body: BodyPose::new(params.balance_gain),
            gait: GaitScheduler::new(params.gait.clone(), stance_feet_b),
            legs,
            stance_feet_b,
            spread_feet_b,
            imu_ref: None,
            gravity_dir_b: -Vector3::z(),
            last_cmd: None,
            consec_ik_failures: [0; NUM_LEGS],
            safe: false,
            report: StatusReport::default(),
            output: None,
            arch_output: Archiver::default(),
            params,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn legs(&self) -> &[LegModel] {
        &self.legs
    }

    pub fn body(&self) -> &BodyPose {
        &self.body
    }

    pub fn gait(&self) -> &GaitScheduler {
        &self.gait
    }

    pub fn stance_feet(&self) -> &[Point3<f64>; NUM_LEGS] {
        &self.stance_feet_b
    }

    pub fn spread_feet(&self) -> &[Point3<f64>; NUM_LEGS] {
        &self.spread_feet_b
    }

    /// Estimated direction of gravity in the body frame.
    pub fn gravity_dir(&self) -> &Vector3<f64> {
        &self.gravity_dir_b
    }

    /// Positions commanded on the last cycle.
    pub fn last_command(&self) -> Option<&[f64; NUM_JOINTS]> {
        self.last_cmd.as_ref()
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    /// Hold every joint where it was last commanded until `clear_safe` is called.
    pub fn make_safe(&mut self) {
        if !self.safe {
            warn!("QuadCtrl holding position");
            self.safe = true;
            self.gait.stop(&self.stance_feet_b);
        }
    }

    /// Leave the safe stop, seeding the next solves from the nominal configuration.
    pub fn clear_safe(&mut self) {
        if self.safe {
            debug!("QuadCtrl leaving safe stop");
            self.safe = false;
            self.consec_ik_failures = [0; NUM_LEGS];
            for leg in self.legs.iter_mut() {
                leg.reset_seed();
            }
        }
    }

    /// Foot positions for the given joint angles.
    fn feet_for(&self, angles: &[f64; NUM_JOINTS]) -> [Point3<f64>; NUM_LEGS] {
        let mut feet = [Point3::origin(); NUM_LEGS];
        for (foot, leg) in feet.iter_mut().zip(self.legs.iter()) {
            *foot = leg.forward(&leg_slice(angles, leg.id()));
        }
        feet
    }

    /// Estimate the direction of gravity from the base module IMUs.
    ///
    /// Each module's rotation since estimation started, moved into the body frame, gives one
    /// estimate. Until estimation starts gravity is straight down.
    fn update_gravity(&mut self, imu_attitude_q: &[Option<[f64; 4]>; NUM_LEGS]) {
        let down = -Vector3::z();

        let refs = match self.imu_ref {
            Some(ref r) => r,
            None => {
                self.gravity_dir_b = down;
                return;
            }
        };

        let mut sum = Vector3::zeros();
        let mut num_valid = 0;

        for (i, leg) in self.legs.iter().enumerate() {
            let (init, q) = match (refs[i], imu_to_quat(&imu_attitude_q[i])) {
                (Some(init), Some(q)) => (init, q),
                _ => continue,
            };

            let mount = leg.geometry().mount_rotation();
            let rel_b = mount * (init.inverse() * q) * mount.inverse();

            sum += rel_b.inverse_transform_vector(&down);
            num_valid += 1;
        }

        let norm = sum.norm();
        if num_valid > 0 && norm.is_finite() && norm > 1e-9 {
            self.gravity_dir_b = sum / norm;
        }
    }

    /// Actions performed when the state machine enters a new state.
    fn on_entry(&mut self, state: ControlState, prev_cmd: &[f64; NUM_JOINTS], input: &InputData) {
        debug!("QuadCtrl entry actions for {:?}", state);

        match state {
            ControlState::StandUpPhase1 => {
                for leg in self.legs.iter_mut() {
                    leg.reset_seed();
                }
                self.imu_ref = None;
                self.body.reset_control();
                self.gait.stop(&self.stance_feet_b);
            }
            ControlState::StandUpPhase3 => {
                let mut refs = [None; NUM_LEGS];
                for (r, q) in refs.iter_mut().zip(input.fbk.imu_attitude_q.iter()) {
                    *r = imu_to_quat(q);
                }
                self.imu_ref = Some(refs);
            }
            ControlState::PassiveBalance => {
                self.body.capture_target();
                self.body.reset_control();
            }
            ControlState::SteadyGaitLeft | ControlState::SteadyGaitRight => {
                let group = match state {
                    ControlState::SteadyGaitLeft => LegGroup::A,
                    _ => LegGroup::B,
                };
                let swing_s = self.params.ctrl_sm.swing_s;
                let feet = self.feet_for(prev_cmd);

                self.gait
                    .set_step_from_command(&input.cmd.sanitised().translation_vel_cmd, swing_s);
                self.gait.prepare_swing(group, swing_s, &feet);
            }
            ControlState::StandUpPhase2 | ControlState::OrientTeleop => (),
        }
    }

    /// Goal of each leg for the behaviour, `None` if the robot should hold still.
    fn leg_goals(&mut self, behaviour: Behaviour, dt_s: f64) -> Option<[LegGoal; NUM_LEGS]> {
        let weight = self.params.weight_n();
        let up_b = -self.gravity_dir_b;
        let no_force = [Vector3::zeros(); NUM_LEGS];

        let mut swinging = [false; NUM_LEGS];

        let (feet, forces) = match behaviour {
            Behaviour::SpreadLegs => (self.spread_feet_b, no_force),
            Behaviour::PushLegs { progress } => (
                self.stance_feet_b,
                [up_b * (progress * weight / NUM_LEGS as f64); NUM_LEGS],
            ),
            Behaviour::StandQuad => (
                self.stance_feet_b,
                distribute_foot_forces(&self.stance_feet_b, &up_b, weight),
            ),
            Behaviour::Gait { group } => {
                let feet = self.gait.advance(dt_s);
                let mut forces = no_force;
                for leg in LegId::ALL.iter() {
                    if group.contains(*leg) {
                        swinging[leg.index()] = true;
                    } else {
                        forces[leg.index()] = up_b * (weight / 2.0);
                    }
                }
                (feet, forces)
            }
            Behaviour::ReOrient { target } => {
                let feet = re_orient(&target, &self.stance_feet_b);
                (feet, distribute_foot_forces(&feet, &up_b, weight))
            }
            Behaviour::PassiveBalance => {
                let gravity_dir_b = self.gravity_dir_b;
                let control = self.body.update(&gravity_dir_b);
                let feet = re_orient(&control, &self.stance_feet_b);
                (feet, distribute_foot_forces(&feet, &up_b, weight))
            }
            Behaviour::SafeStop => return None,
        };

        for (leg, swing) in self.legs.iter_mut().zip(swinging.iter()) {
            leg.set_swinging(*swing);
        }

        let mut goals = [LegGoal {
            foot_b: Point3::origin(),
            foot_force_b: Vector3::zeros(),
        }; NUM_LEGS];
        for (goal, (foot, force)) in goals.iter_mut().zip(feet.iter().zip(forces.iter())) {
            goal.foot_b = *foot;
            goal.foot_force_b = *force;
        }

        Some(goals)
    }

    /// Foot targets of the behaviour as it stands, without moving the gait or the balance on.
    fn behaviour_feet(&self, behaviour: Behaviour) -> Option<[Point3<f64>; NUM_LEGS]> {
        match behaviour {
            Behaviour::SpreadLegs => Some(self.spread_feet_b),
            Behaviour::PushLegs { .. } | Behaviour::StandQuad => Some(self.stance_feet_b),
            Behaviour::Gait { .. } => Some(self.gait.targets()),
            Behaviour::ReOrient { target } => Some(re_orient(&target, &self.stance_feet_b)),
            Behaviour::PassiveBalance => Some(re_orient(self.body.control(), &self.stance_feet_b)),
            Behaviour::SafeStop => None,
        }
    }

    /// Check the behaviour's foot targets can be reached, without commanding them.
    ///
    /// Used while holding, so that a target which becomes reachable again can be noticed.
    fn check_reach(&mut self, behaviour: Behaviour) {
        let feet = match self.behaviour_feet(behaviour) {
            Some(f) => f,
            None => return,
        };

        for (i, leg) in self.legs.iter().enumerate() {
            if leg.is_reachable(&feet[i]) {
                self.consec_ik_failures[i] = 0;
            } else {
                self.consec_ik_failures[i] += 1;
                self.report.ik_failed[i] = true;
            }
        }
    }

    /// Demands moving each leg towards its goal.
    fn track(
        &mut self,
        goals: &[LegGoal; NUM_LEGS],
        prev_cmd: &[f64; NUM_JOINTS],
        dt_s: f64,
    ) -> MechDems {
        let gravity_b = self.gravity_dir_b * self.params.gravity_mps2;
        let max_step = self.params.max_joint_rate_rads * dt_s;
        let tolerance = self.params.posture_tolerance_rad;

        let mut dems = MechDems::hold(*prev_cmd, [0.0; NUM_JOINTS]);
        let mut posture_reached = true;

        for (i, leg) in self.legs.iter_mut().enumerate() {
            let id = leg.id();
            let prev = leg_slice(prev_cmd, id);

            let (target, holding) = match leg.compute_ik_body(&goals[i].foot_b) {
                Ok(angles) => {
                    self.consec_ik_failures[i] = 0;
                    (angles, false)
                }
                Err(e) => {
                    self.consec_ik_failures[i] += 1;
                    if self.consec_ik_failures[i] == 1 {
                        warn!("{}, holding the leg", e);
                    }
                    self.report.ik_failed[i] = true;
                    (prev, true)
                }
            };

            let error: f64 = target
                .iter()
                .zip(leg.state().angles_rad.iter())
                .map(|(t, m)| (t - m).powi(2))
                .sum();
            if holding || error.sqrt() > tolerance {
                posture_reached = false;
            }

            let geom = leg.geometry();
            let mut cmd = [0.0; JOINTS_PER_LEG];
            let mut speed = [0.0; JOINTS_PER_LEG];

            for j in 0..JOINTS_PER_LEG {
                let k = id.index() * JOINTS_PER_LEG + j;

                let in_range = clamp(target[j], geom.joint_min_rad[j], geom.joint_max_rad[j]);
                if in_range != target[j] {
                    self.report.pos_limited[k] = true;
                }

                cmd[j] = rate_limit(prev[j], in_range, max_step);
                if cmd[j] != in_range {
                    self.report.rate_limited[k] = true;
                }

                if !holding && dt_s > 0.0 {
                    speed[j] = (cmd[j] - prev[j]) / dt_s;
                }
            }

            let effort = leg.compute_compensation_torque(
                &cmd,
                &leg.state().vels_rads,
                &gravity_b,
                &goals[i].foot_force_b,
            );

            set_leg_slice(&mut dems.pos_rad, id, &cmd);
            set_leg_slice(&mut dems.speed_rads, id, &speed);
            set_leg_slice(&mut dems.effort_nm, id, &effort.convert());
        }

        self.report.posture_reached = posture_reached;

        dems
    }

    /// Demands holding every joint at its last command against gravity.
    fn hold(&mut self, prev_cmd: &[f64; NUM_JOINTS]) -> MechDems {
        let gravity_b = self.gravity_dir_b * self.params.gravity_mps2;
        let mut effort = [0.0; NUM_JOINTS];

        for leg in self.legs.iter() {
            let id = leg.id();
            let torque = leg.compute_compensation_torque(
                &leg_slice(prev_cmd, id),
                &[0.0; JOINTS_PER_LEG],
                &gravity_b,
                &Vector3::zeros(),
            );
            set_leg_slice(&mut effort, id, &torque.convert());
        }

        self.report.safe_stop = true;

        MechDems::hold(*prev_cmd, effort)
    }
}

/// Header of the demands archive.
fn dems_header() -> Vec<String> {
    let mut header = vec![String::from("time_s")];
    for prefix in ["pos", "speed", "effort"].iter() {
        for joint in JointId::ALL.iter() {
            header.push(format!("{}_{}", prefix, joint));
        }
    }
    header
}

/// A valid module attitude, `None` for missing, zero or non-finite values.
fn imu_to_quat(q: &Option<[f64; 4]>) -> Option<UnitQuaternion<f64>> {
    match q {
        Some(q) if q.iter().all(|v| v.is_finite()) && q.iter().any(|v| *v != 0.0) => {
            Some(q.convert())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctrl_sm::Transition;
    use comms_if::eqpt::mech::IDENTITY_Q;

    const DT: Duration = Duration::from_millis(5);

    fn step(behaviour: Behaviour, entering: Option<ControlState>) -> Option<StepOutput> {
        Some(StepOutput {
            state: entering.unwrap_or(ControlState::StandUpPhase3),
            behaviour,
            transition: entering.map(|to| Transition { from: None, to }),
        })
    }

    /// Feedback at the given positions with the IMUs reporting a body attitude.
    fn fbk(pos_rad: [f64; NUM_JOINTS], ctrl: &QuadCtrl, body: UnitQuaternion<f64>) -> MechSensData {
        let mut imu = [None; NUM_LEGS];
        for (q, leg) in imu.iter_mut().zip(ctrl.legs().iter()) {
            *q = Some((body * leg.geometry().mount_rotation()).convert());
        }

        MechSensData {
            pos_rad,
            imu_attitude_q: imu,
            ..Default::default()
        }
    }

    /// Run the controller with feedback equal to its commands.
    fn run(
        ctrl: &mut QuadCtrl,
        behaviour: Behaviour,
        cycles: usize,
        start: [f64; NUM_JOINTS],
    ) -> (MechDems, StatusReport) {
        let mut pos = start;
        let mut out = None;
        for _ in 0..cycles {
            let input = InputData {
                fbk: fbk(pos, ctrl, UnitQuaternion::identity()),
                dt: DT,
                step: step(behaviour, None),
                cmd: InputSample::default(),
            };
            let (dems, report) = ctrl.proc(&input).unwrap();
            pos = dems.pos_rad;
            out = Some((dems, report));
        }
        out.unwrap()
    }

    #[test]
    fn test_stand_quad_reaches_stance() {
        let mut ctrl = QuadCtrl::default();
        let (dems, report) = run(&mut ctrl, Behaviour::StandQuad, 400, [0.0; NUM_JOINTS]);

        assert!(report.posture_reached);
        assert_eq!(report.ik_failed, [false; NUM_LEGS]);

        let feet = ctrl.feet_for(&dems.pos_rad);
        for (foot, stance) in feet.iter().zip(ctrl.stance_feet().iter()) {
            assert!((foot - stance).norm() < 1e-9);
        }

        // Holding still once there
        assert!(dems.speed_rads.iter().all(|s| s.abs() < 1e-9));
    }

    #[test]
    fn test_rate_limit() {
        let mut ctrl = QuadCtrl::default();
        let start = [0.0; NUM_JOINTS];

        let input = InputData {
            fbk: fbk(start, &ctrl, UnitQuaternion::identity()),
            dt: DT,
            step: step(Behaviour::SpreadLegs, Some(ControlState::StandUpPhase1)),
            cmd: InputSample::default(),
        };
        let (dems, report) = ctrl.proc(&input).unwrap();

        let max_step = ctrl.params().max_joint_rate_rads * 0.005;
        for k in 0..NUM_JOINTS {
            assert!(dems.pos_rad[k].abs() <= max_step + 1e-12);
            assert!(dems.speed_rads[k].abs() <= ctrl.params().max_joint_rate_rads + 1e-9);
        }

        // Shoulders and elbows have a long way to go
        assert!(report.rate_limited[JointId::FlShoulder.index()]);
        assert!(report.rate_limited[JointId::RrElbow.index()]);
        assert!(!report.posture_reached);
    }

    #[test]
    fn test_unreachable_leg_holds() {
        // The rear right leg can't stretch to its stance foot
        let mut params = Params::default();
        params.legs[LegId::RearRight.index()].lower_length_m = 0.05;
        let mut ctrl = QuadCtrl::with_params(params);

        let start = [0.0; NUM_JOINTS];
        let mut prev = start;
        for cycle in 1..=3 {
            let input = InputData {
                fbk: fbk(start, &ctrl, UnitQuaternion::identity()),
                dt: DT,
                step: step(Behaviour::StandQuad, None),
                cmd: InputSample::default(),
            };
            let (dems, report) = ctrl.proc(&input).unwrap();

            assert_eq!(report.ik_failed, [false, false, false, true]);
            assert_eq!(report.consec_ik_failures, [0, 0, 0, cycle]);
            assert_eq!(report.max_consec_ik_failures(), cycle);
            assert!(!report.posture_reached);

            // The failing leg holds while the others keep moving
            assert_eq!(
                leg_slice(&dems.pos_rad, LegId::RearRight),
                leg_slice(&start, LegId::RearRight)
            );
            assert_eq!(leg_slice(&dems.speed_rads, LegId::RearRight), [0.0; 3]);
            for leg in [LegId::FrontLeft, LegId::FrontRight, LegId::RearLeft].iter() {
                assert_ne!(leg_slice(&dems.pos_rad, *leg), leg_slice(&prev, *leg));
            }

            prev = dems.pos_rad;
        }
    }

    #[test]
    fn test_safe_stop_checks_reach() {
        let mut params = Params::default();
        params.spread_foot_lf = [2.0, 0.0, 0.0];
        let mut ctrl = QuadCtrl::with_params(params);
        let (dems, _) = run(&mut ctrl, Behaviour::StandQuad, 400, [0.0; NUM_JOINTS]);
        let seeds: Vec<_> = ctrl.legs().iter().map(|l| l.state().seed_rad).collect();

        ctrl.make_safe();

        let mut input = InputData {
            fbk: fbk(dems.pos_rad, &ctrl, UnitQuaternion::identity()),
            dt: DT,
            step: step(Behaviour::SpreadLegs, None),
            cmd: InputSample::default(),
        };
        let (held, report) = ctrl.proc(&input).unwrap();

        // Unreachable targets are reported but never commanded
        assert!(report.safe_stop);
        assert_eq!(report.ik_failed, [true; NUM_LEGS]);
        assert_eq!(held.pos_rad, dems.pos_rad);

        input.step = step(Behaviour::StandQuad, None);
        let (held, report) = ctrl.proc(&input).unwrap();
        assert!(report.safe_stop);
        assert_eq!(report.ik_failed, [false; NUM_LEGS]);
        assert_eq!(held.pos_rad, dems.pos_rad);

        for (leg, seed) in ctrl.legs().iter().zip(seeds.iter()) {
            assert_eq!(&leg.state().seed_rad, seed);
        }
    }

    #[test]
    fn test_gait_waits_on_entry() {
        let mut ctrl = QuadCtrl::default();
        let (dems, _) = run(&mut ctrl, Behaviour::StandQuad, 400, [0.0; NUM_JOINTS]);

        let gait = Behaviour::Gait { group: LegGroup::A };
        let mut input = InputData {
            fbk: fbk(dems.pos_rad, &ctrl, UnitQuaternion::identity()),
            dt: DT,
            step: step(gait, Some(ControlState::SteadyGaitLeft)),
            cmd: InputSample::default(),
        };
        ctrl.proc(&input).unwrap();
        assert_eq!(ctrl.gait().phase().a.time_in_swing_s, 0.0);

        input.step = step(gait, None);
        ctrl.proc(&input).unwrap();
        assert!((ctrl.gait().phase().a.time_in_swing_s - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_safe_stop_holds() {
        let mut ctrl = QuadCtrl::default();
        let (dems, _) = run(&mut ctrl, Behaviour::StandQuad, 400, [0.0; NUM_JOINTS]);

        ctrl.make_safe();
        assert!(ctrl.is_safe());

        let input = InputData {
            fbk: fbk(dems.pos_rad, &ctrl, UnitQuaternion::identity()),
            dt: DT,
            step: None,
            cmd: InputSample::default(),
        };
        let (held, report) = ctrl.proc(&input).unwrap();

        assert!(report.safe_stop);
        assert_eq!(held.pos_rad, dems.pos_rad);
        assert_eq!(held.speed_rads, [0.0; NUM_JOINTS]);
        assert!(held.effort_nm.iter().any(|e| e.abs() > 0.1));

        ctrl.clear_safe();
        for leg in ctrl.legs() {
            assert_eq!(leg.state().seed_rad, leg.geometry().nominal_seed_rad);
        }
    }

    #[test]
    fn test_missing_feedback() {
        let mut ctrl = QuadCtrl::default();
        let mut input = InputData::default();
        input.fbk.pos_rad[4] = f64::NAN;

        match ctrl.proc(&input) {
            Err(QuadCtrlError::NoFeedback) => (),
            r => panic!("Expected NoFeedback, got {:?}", r.map(|(_, s)| s)),
        }
    }

    #[test]
    fn test_gravity_estimate() {
        let mut ctrl = QuadCtrl::default();
        let start = [0.0; NUM_JOINTS];

        // Level at the start of estimation
        let input = InputData {
            fbk: fbk(start, &ctrl, UnitQuaternion::identity()),
            dt: DT,
            step: step(Behaviour::StandQuad, Some(ControlState::StandUpPhase3)),
            cmd: InputSample::default(),
        };
        ctrl.proc(&input).unwrap();
        assert_eq!(ctrl.gravity_dir(), &-Vector3::z());

        // Then tilted, with one module not reporting
        let tilt = UnitQuaternion::from_euler_angles(0.1, 0.05, 0.0);
        let mut tilted = fbk(start, &ctrl, tilt);
        tilted.imu_attitude_q[1] = None;
        tilted.imu_attitude_q[2] = Some([0.0; 4]);

        let input = InputData {
            fbk: tilted,
            dt: DT,
            step: step(Behaviour::StandQuad, None),
            cmd: InputSample::default(),
        };
        ctrl.proc(&input).unwrap();

        let expected = tilt.inverse_transform_vector(&-Vector3::z());
        assert!((ctrl.gravity_dir() - expected).norm() < 1e-9);
        assert!(ctrl.body().estimate().angle_to(&tilt) < 0.01);
    }

    #[test]
    fn test_foot_forces_carry_weight() {
        let mut ctrl = QuadCtrl::default();
        let start = [0.0; NUM_JOINTS];
        let (_, report) = run(&mut ctrl, Behaviour::PushLegs { progress: 0.0 }, 1, start);
        assert!(!report.safe_stop);

        let up = Vector3::z();
        let weight = ctrl.params().weight_n();

        match ctrl.leg_goals(Behaviour::StandQuad, 0.005) {
            Some(goals) => {
                let total: Vector3<f64> = goals.iter().map(|g| g.foot_force_b).sum();
                assert!((total - up * weight).norm() < 1e-9);
            }
            None => panic!("Expected goals"),
        }

        match ctrl.leg_goals(Behaviour::PushLegs { progress: 0.5 }, 0.005) {
            Some(goals) => {
                for g in goals.iter() {
                    assert!((g.foot_force_b - up * (weight / 8.0)).norm() < 1e-9);
                }
            }
            None => panic!("Expected goals"),
        }

        assert!(ctrl.leg_goals(Behaviour::SafeStop, 0.005).is_none());
    }

    #[test]
    fn test_identity_imu_is_valid() {
        assert!(imu_to_quat(&Some(IDENTITY_Q)).is_some());
        assert!(imu_to_quat(&Some([f64::NAN, 0.0, 0.0, 0.0])).is_none());
        assert!(imu_to_quat(&None).is_none());
    }
}
