//! # Control state machine
//!
//! Sequences the quadruped from lying on its belly through the three stand-up phases into one of
//! the steady states, and picks the behaviour the controller executes each cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::info;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Internal
use crate::{leg::LegGroup, quad_ctrl::StatusReport};
use comms_if::eqpt::input::InputSample;
use util::maths::lin_map;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrlSmParams {
    /// Duration of each stand-up phase.
    ///
    /// Units: seconds
    pub startup_s: f64,

    /// Duration of each gait half cycle.
    ///
    /// Units: seconds
    pub swing_s: f64,

    /// State entered once standing.
    pub post_stand_up: PostStandUp,

    /// If true the stand-up phases also wait for the controller to report the posture reached.
    pub require_posture_reached: bool,

    /// Body tilt at full rotation command in the teleoperated orientation state.
    ///
    /// Units: degrees
    pub max_tilt_deg: f64,
}

/// A change of state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    /// `None` when entering the initial state.
    pub from: Option<ControlState>,
    pub to: ControlState,
}

/// Result of stepping the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub state: ControlState,
    pub behaviour: Behaviour,
    pub transition: Option<Transition>,
}

/// The control state machine.
#[derive(Debug, Clone)]
pub struct CtrlSm {
    params: CtrlSmParams,
    startup: Duration,
    swing: Duration,
    state: Option<ControlState>,
    elapsed: Duration,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlState {
    /// Legs spread flat, belly on the ground.
    StandUpPhase1,
    /// Legs pushing the body up.
    StandUpPhase2,
    /// Standing on all four legs.
    StandUpPhase3,
    /// Group A swinging.
    SteadyGaitLeft,
    /// Group B swinging.
    SteadyGaitRight,
    /// Body orientation driven by the operator.
    OrientTeleop,
    /// Body held level against disturbances.
    PassiveBalance,
}

/// Steady state entered after standing up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostStandUp {
    PassiveBalance,
    OrientTeleop,
    SteadyGait,
}

/// What the controller does during a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    SpreadLegs,
    PushLegs { progress: f64 },
    StandQuad,
    Gait { group: LegGroup },
    ReOrient { target: UnitQuaternion<f64> },
    PassiveBalance,
    SafeStop,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for CtrlSmParams {
    fn default() -> Self {
        Self {
            startup_s: 1.9,
            swing_s: 0.5,
            post_stand_up: PostStandUp::PassiveBalance,
            require_posture_reached: false,
            max_tilt_deg: 16.0,
        }
    }
}

impl From<PostStandUp> for ControlState {
    fn from(post: PostStandUp) -> Self {
        match post {
            PostStandUp::PassiveBalance => ControlState::PassiveBalance,
            PostStandUp::OrientTeleop => ControlState::OrientTeleop,
            PostStandUp::SteadyGait => ControlState::SteadyGaitLeft,
        }
    }
}

impl ControlState {
    pub fn is_standing_up(self) -> bool {
        matches!(
            self,
            ControlState::StandUpPhase1 | ControlState::StandUpPhase2 | ControlState::StandUpPhase3
        )
    }
}

impl CtrlSm {
    pub fn new(params: CtrlSmParams) -> Self {
        Self {
            startup: secs(params.startup_s),
            swing: secs(params.swing_s),
            params,
            state: None,
            elapsed: Duration::default(),
        }
    }

    /// Current state, `None` before the first step.
    pub fn state(&self) -> Option<ControlState> {
        self.state
    }

    /// Time spent in the current state.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn params(&self) -> &CtrlSmParams {
        &self.params
    }

    /// Step the state machine by the measured cycle time `dt`.
    ///
    /// `last_report` is the controller's report from the previous cycle.
    pub fn step(
        &mut self,
        dt: Duration,
        input: &InputSample,
        last_report: Option<&StatusReport>,
    ) -> StepOutput {
        let transition = match self.state {
            None => Some(self.enter(None, ControlState::StandUpPhase1)),
            Some(state) => {
                self.elapsed += dt;

                self.next_state(state, last_report)
                    .map(|next| self.enter(Some(state), next))
            }
        };

        // A state is always set at this point
        let state = self.state.unwrap_or(ControlState::StandUpPhase1);

        StepOutput {
            state,
            behaviour: self.behaviour(state, input),
            transition,
        }
    }

    fn enter(&mut self, from: Option<ControlState>, to: ControlState) -> Transition {
        match from {
            Some(from) => info!(
                "{:?} -> {:?} after {:.3} s",
                from,
                to,
                self.elapsed.as_secs_f64()
            ),
            None => info!("Entering {:?}", to),
        }

        self.state = Some(to);
        self.elapsed = Duration::default();

        Transition { from, to }
    }

    fn next_state(
        &self,
        state: ControlState,
        last_report: Option<&StatusReport>,
    ) -> Option<ControlState> {
        let stood_up = self.elapsed >= self.startup
            && (!self.params.require_posture_reached
                || last_report.map_or(false, |r| r.posture_reached));

        match state {
            ControlState::StandUpPhase1 if stood_up => Some(ControlState::StandUpPhase2),
            ControlState::StandUpPhase2 if stood_up => Some(ControlState::StandUpPhase3),
            ControlState::StandUpPhase3 if stood_up => Some(self.params.post_stand_up.into()),
            ControlState::SteadyGaitLeft if self.elapsed >= self.swing => {
                Some(ControlState::SteadyGaitRight)
            }
            ControlState::SteadyGaitRight if self.elapsed >= self.swing => {
                Some(ControlState::SteadyGaitLeft)
            }
            _ => None,
        }
    }

    fn behaviour(&self, state: ControlState, input: &InputSample) -> Behaviour {
        match state {
            ControlState::StandUpPhase1 => Behaviour::SpreadLegs,
            ControlState::StandUpPhase2 => {
                let progress = if self.startup > Duration::default() {
                    self.elapsed.as_secs_f64() / self.startup.as_secs_f64()
                } else {
                    1.0
                };
                Behaviour::PushLegs {
                    progress: progress.max(0.0).min(1.0),
                }
            }
            ControlState::StandUpPhase3 => Behaviour::StandQuad,
            ControlState::SteadyGaitLeft => Behaviour::Gait { group: LegGroup::A },
            ControlState::SteadyGaitRight => Behaviour::Gait { group: LegGroup::B },
            ControlState::OrientTeleop => Behaviour::ReOrient {
                target: teleop_target(input, self.params.max_tilt_deg.to_radians()),
            },
            ControlState::PassiveBalance => Behaviour::PassiveBalance,
        }
    }
}

/// Body orientation commanded by the operator's rotation command.
pub fn teleop_target(input: &InputSample, max_tilt_rad: f64) -> UnitQuaternion<f64> {
    let rot = input.sanitised().rotation_vel_cmd;
    let tilt = |cmd: f64| lin_map((-1.0, 1.0), (-max_tilt_rad, max_tilt_rad), cmd);

    // Yaw stays fixed, the rotation is composed as Rz * Ry * Rx
    UnitQuaternion::from_euler_angles(tilt(rot[0]), tilt(rot[1]), 0.0)
}

fn secs(s: f64) -> Duration {
    if s.is_finite() && s > 0.0 {
        Duration::from_secs_f64(s)
    } else {
        Duration::default()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    const DT: Duration = Duration::from_millis(5);

    fn run_until(
        sm: &mut CtrlSm,
        state: ControlState,
        max_ticks: usize,
        report: Option<&StatusReport>,
    ) -> usize {
        let input = InputSample::default();
        for tick in 1..=max_ticks {
            if sm.step(DT, &input, report).state == state {
                return tick;
            }
        }
        panic!("{:?} not reached after {} ticks", state, max_ticks);
    }

    #[test]
    fn test_stand_up_sequence() {
        let mut sm = CtrlSm::new(CtrlSmParams::default());
        let input = InputSample::default();
        assert_eq!(sm.state(), None);

        let first = sm.step(DT, &input, None);
        assert_eq!(first.behaviour, Behaviour::SpreadLegs);
        assert_eq!(
            first.transition,
            Some(Transition {
                from: None,
                to: ControlState::StandUpPhase1
            })
        );

        // 1.9 s at 5 ms per tick in each phase
        let mut transitions = Vec::new();
        let mut ticks = 0;
        while sm.state() != Some(ControlState::PassiveBalance) {
            let out = sm.step(DT, &input, None);
            ticks += 1;
            if let Some(t) = out.transition {
                transitions.push((ticks, t.to));
            }
            assert!(ticks <= 2000);
        }

        assert_eq!(
            transitions,
            vec![
                (380, ControlState::StandUpPhase2),
                (760, ControlState::StandUpPhase3),
                (1140, ControlState::PassiveBalance),
            ]
        );

        // Nothing leaves passive balance
        for _ in 0..1000 {
            let out = sm.step(DT, &input, None);
            assert_eq!(out.transition, None);
            assert_eq!(out.behaviour, Behaviour::PassiveBalance);
        }
    }

    #[test]
    fn test_push_progress() {
        let mut sm = CtrlSm::new(CtrlSmParams::default());
        run_until(&mut sm, ControlState::StandUpPhase2, 1000, None);

        let input = InputSample::default();
        for _ in 0..189 {
            sm.step(DT, &input, None);
        }
        match sm.step(DT, &input, None).behaviour {
            Behaviour::PushLegs { progress } => assert!((progress - 0.5).abs() < 1e-9),
            b => panic!("Unexpected behaviour {:?}", b),
        }
    }

    #[test]
    fn test_posture_gate() {
        let mut sm = CtrlSm::new(CtrlSmParams {
            require_posture_reached: true,
            ..Default::default()
        });

        let not_reached = StatusReport::default();
        let reached = StatusReport {
            posture_reached: true,
            ..Default::default()
        };

        let input = InputSample::default();
        for _ in 0..2000 {
            sm.step(DT, &input, Some(&not_reached));
        }
        assert_eq!(sm.state(), Some(ControlState::StandUpPhase1));

        let out = sm.step(DT, &input, Some(&reached));
        assert_eq!(out.state, ControlState::StandUpPhase2);
    }

    #[test]
    fn test_gait_alternates() {
        let mut sm = CtrlSm::new(CtrlSmParams {
            post_stand_up: PostStandUp::SteadyGait,
            ..Default::default()
        });
        run_until(&mut sm, ControlState::SteadyGaitLeft, 2000, None);

        let input = InputSample::default();
        let mut groups = vec![LegGroup::A];
        for _ in 0..400 {
            let out = sm.step(DT, &input, None);
            if out.transition.is_some() {
                match out.behaviour {
                    Behaviour::Gait { group } => groups.push(group),
                    b => panic!("Unexpected behaviour {:?}", b),
                }
            }
        }

        // 2 s of 0.5 s swings
        assert_eq!(
            groups,
            vec![LegGroup::A, LegGroup::B, LegGroup::A, LegGroup::B, LegGroup::A]
        );
    }

    #[test]
    fn test_teleop_target() {
        let mut sm = CtrlSm::new(CtrlSmParams {
            post_stand_up: PostStandUp::OrientTeleop,
            ..Default::default()
        });
        run_until(&mut sm, ControlState::OrientTeleop, 2000, None);

        let input = InputSample {
            rotation_vel_cmd: [0.5, 0.0, 0.0],
            ..Default::default()
        };

        match sm.step(DT, &input, None).behaviour {
            Behaviour::ReOrient { target } => {
                let expected = 8.0f64.to_radians();
                assert!((target.angle() - expected).abs() < 1e-12);
                let axis = target.axis().unwrap();
                assert!((axis.into_inner() - Vector3::x()).norm() < 1e-12);
            }
            b => panic!("Unexpected behaviour {:?}", b),
        }

        // Commands are clamped to full scale
        let input = InputSample {
            rotation_vel_cmd: [0.0, -3.0, 0.0],
            ..Default::default()
        };
        let target = teleop_target(&input, 16.0f64.to_radians());
        assert!((target.angle() - 16.0f64.to_radians()).abs() < 1e-12);

        // Pitch applied after roll
        let input = InputSample {
            rotation_vel_cmd: [1.0, 0.5, 0.0],
            ..Default::default()
        };
        let roll = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 16.0f64.to_radians());
        let pitch = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 8.0f64.to_radians());
        let target = teleop_target(&input, 16.0f64.to_radians());
        assert!(target.angle_to(&(pitch * roll)) < 1e-12);
        assert!(target.angle_to(&(roll * pitch)) > 1e-4);
    }
}
