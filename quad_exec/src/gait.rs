//! # Gait scheduler
//!
//! Diagonal leg pairs take turns: while one group swings its feet forward along a lift-and-place
//! arc the other group's feet slide back to their home positions, carrying the body forward.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use nalgebra::{Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// Internal
use crate::leg::{LegGroup, LegId, NUM_LEGS};
use util::maths::min_jerk;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Gait shape parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaitParams {
    /// Peak height of a swinging foot above the straight line between its start and end.
    ///
    /// Units: meters
    pub swing_height_m: f64,

    /// Depth of the dip of a stance foot, lifting the body slightly mid-stance.
    ///
    /// Units: meters
    pub stance_dip_m: f64,

    /// Step used when the operator isn't commanding any motion.
    ///
    /// Units: meters
    pub default_step_m: [f64; 2],

    /// Units: meters
    pub max_step_m: f64,

    /// Body speed at full translation command.
    ///
    /// Units: meters/second
    pub max_speed_ms: f64,
}

/// Phase of one leg group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct GroupPhase {
    pub swinging: bool,

    /// Units: seconds
    pub time_in_swing_s: f64,
}

/// Phase of both leg groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct GaitPhase {
    pub a: GroupPhase,
    pub b: GroupPhase,

    /// Duration of the current swing.
    ///
    /// Units: seconds
    pub duration_s: f64,
}

/// Schedules the swing and stance motion of the feet.
#[derive(Debug, Clone)]
pub struct GaitScheduler {
    params: GaitParams,

    /// Home foot positions in the body frame.
    homes_b: [Point3<f64>; NUM_LEGS],

    trajectories: [FootTrajectory; NUM_LEGS],

    phase: GaitPhase,

    step_m: Vector2<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Path followed by a foot during one phase, in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FootTrajectory {
    Hold(Point3<f64>),
    Swing {
        start: Point3<f64>,
        end: Point3<f64>,
        height_m: f64,
    },
    Stance {
        start: Point3<f64>,
        end: Point3<f64>,
        dip_m: f64,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for GaitParams {
    fn default() -> Self {
        Self {
            swing_height_m: 0.08,
            stance_dip_m: 0.01,
            default_step_m: [0.10, 0.0],
            max_step_m: 0.15,
            max_speed_ms: 0.2,
        }
    }
}

impl GaitPhase {
    pub fn group(&self, group: LegGroup) -> &GroupPhase {
        match group {
            LegGroup::A => &self.a,
            LegGroup::B => &self.b,
        }
    }

    fn group_mut(&mut self, group: LegGroup) -> &mut GroupPhase {
        match group {
            LegGroup::A => &mut self.a,
            LegGroup::B => &mut self.b,
        }
    }

    /// The swinging group, if any.
    pub fn swinging_group(&self) -> Option<LegGroup> {
        if self.a.swinging {
            Some(LegGroup::A)
        } else if self.b.swinging {
            Some(LegGroup::B)
        } else {
            None
        }
    }
}

impl FootTrajectory {
    /// Position at normalised time `tau`.
    pub fn position(&self, tau: f64) -> Point3<f64> {
        let lift = (PI * tau.max(0.0).min(1.0)).sin();

        match *self {
            FootTrajectory::Hold(p) => p,
            FootTrajectory::Swing {
                start,
                end,
                height_m,
            } => start + (end - start) * min_jerk(tau) + Vector3::z() * (height_m * lift),
            FootTrajectory::Stance { start, end, dip_m } => {
                start + (end - start) * min_jerk(tau) - Vector3::z() * (dip_m * lift)
            }
        }
    }
}

impl GaitScheduler {
    /// Create a scheduler for feet whose home (stance) positions are `homes_b`.
    pub fn new(params: GaitParams, homes_b: [Point3<f64>; NUM_LEGS]) -> Self {
        let step_m = Vector2::from(params.default_step_m);

        Self {
            trajectories: [
                FootTrajectory::Hold(homes_b[0]),
                FootTrajectory::Hold(homes_b[1]),
                FootTrajectory::Hold(homes_b[2]),
                FootTrajectory::Hold(homes_b[3]),
            ],
            params,
            homes_b,
            phase: GaitPhase::default(),
            step_m,
        }
    }

    pub fn homes(&self) -> &[Point3<f64>; NUM_LEGS] {
        &self.homes_b
    }

    pub fn phase(&self) -> GaitPhase {
        self.phase
    }

    pub fn step(&self) -> Vector2<f64> {
        self.step_m
    }

    pub fn trajectory(&self, leg: LegId) -> &FootTrajectory {
        &self.trajectories[leg.index()]
    }

    /// Set the step used by the next swing, clamped to the maximum step length.
    pub fn set_step(&mut self, step_m: Vector2<f64>) {
        let norm = step_m.norm();

        self.step_m = if !norm.is_finite() {
            Vector2::from(self.params.default_step_m)
        } else if norm > self.params.max_step_m {
            step_m * (self.params.max_step_m / norm)
        } else {
            step_m
        };
    }

    /// Derive the step from the operator's normalised translation command.
    ///
    /// No command means the default step.
    pub fn set_step_from_command(&mut self, translation_cmd: &[f64; 3], swing_s: f64) {
        let cmd = Vector2::new(translation_cmd[0], translation_cmd[1]);

        if cmd.norm() > 1e-6 {
            self.set_step(cmd * (self.params.max_speed_ms * swing_s));
        } else {
            self.set_step(Vector2::from(self.params.default_step_m));
        }
    }

    /// Start a swing of `group`, ending any previous swing.
    ///
    /// Swing feet move from `current_feet_b` to their home plus the step, the other group's feet
    /// slide back to their homes.
    pub fn prepare_swing(
        &mut self,
        group: LegGroup,
        duration_s: f64,
        current_feet_b: &[Point3<f64>; NUM_LEGS],
    ) {
        let step = Vector3::new(self.step_m.x, self.step_m.y, 0.0);

        for leg in LegId::ALL.iter() {
            let i = leg.index();
            self.trajectories[i] = if group.contains(*leg) {
                FootTrajectory::Swing {
                    start: current_feet_b[i],
                    end: self.homes_b[i] + step,
                    height_m: self.params.swing_height_m,
                }
            } else {
                FootTrajectory::Stance {
                    start: current_feet_b[i],
                    end: self.homes_b[i],
                    dip_m: self.params.stance_dip_m,
                }
            };
        }

        *self.phase.group_mut(group.other()) = GroupPhase::default();
        *self.phase.group_mut(group) = GroupPhase {
            swinging: true,
            time_in_swing_s: 0.0,
        };
        self.phase.duration_s = duration_s.max(0.0);

        trace!("Swing of group {:?} prepared, step {:?}", group, self.step_m);
    }

    /// Advance the swing by `dt_s` and return every foot's target.
    pub fn advance(&mut self, dt_s: f64) -> [Point3<f64>; NUM_LEGS] {
        let duration = self.phase.duration_s;

        if let Some(group) = self.phase.swinging_group() {
            let phase = self.phase.group_mut(group);
            if dt_s.is_finite() && dt_s > 0.0 {
                phase.time_in_swing_s = (phase.time_in_swing_s + dt_s).min(duration);
            }
        }

        self.targets()
    }

    /// Every foot's target at the current point of the swing.
    pub fn targets(&self) -> [Point3<f64>; NUM_LEGS] {
        let duration = self.phase.duration_s;
        let mut tau = 1.0;

        if let Some(group) = self.phase.swinging_group() {
            if duration > 0.0 {
                tau = self.phase.group(group).time_in_swing_s / duration;
            }
        }

        [
            self.trajectories[0].position(tau),
            self.trajectories[1].position(tau),
            self.trajectories[2].position(tau),
            self.trajectories[3].position(tau),
        ]
    }

    /// Whether the current swing has finished (true when nothing is swinging).
    pub fn is_phase_complete(&self) -> bool {
        match self.phase.swinging_group() {
            Some(group) => self.phase.group(group).time_in_swing_s >= self.phase.duration_s,
            None => true,
        }
    }

    /// Stop swinging and hold the feet where they are.
    pub fn stop(&mut self, current_feet_b: &[Point3<f64>; NUM_LEGS]) {
        for (traj, foot) in self.trajectories.iter_mut().zip(current_feet_b.iter()) {
            *traj = FootTrajectory::Hold(*foot);
        }
        self.phase = GaitPhase::default();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn homes() -> [Point3<f64>; NUM_LEGS] {
        [
            Point3::new(0.4, 0.3, -0.3),
            Point3::new(0.4, -0.3, -0.3),
            Point3::new(-0.4, 0.3, -0.3),
            Point3::new(-0.4, -0.3, -0.3),
        ]
    }

    #[test]
    fn test_alternation() {
        let mut gait = GaitScheduler::new(GaitParams::default(), homes());
        let step = Vector3::new(0.1, 0.0, 0.0);
        let mut feet = homes();

        for (cycle, group) in [LegGroup::A, LegGroup::B, LegGroup::A].iter().enumerate() {
            gait.prepare_swing(*group, 0.5, &feet);

            // Only one group swings
            assert_eq!(gait.phase().swinging_group(), Some(*group));
            assert!(!gait.phase().group(group.other()).swinging);
            assert!(!gait.is_phase_complete());

            let mut max_lift = [f64::MIN; NUM_LEGS];
            for _ in 0..110 {
                feet = gait.advance(0.005);
                for (lift, foot) in max_lift.iter_mut().zip(feet.iter()) {
                    *lift = lift.max(foot.z);
                }
            }

            assert!(gait.is_phase_complete());

            for leg in LegId::ALL.iter() {
                let i = leg.index();
                if group.contains(*leg) {
                    assert!((feet[i] - (homes()[i] + step)).norm() < 1e-12, "cycle {}", cycle);
                    assert!(max_lift[i] > homes()[i].z + 0.07);
                } else {
                    assert!((feet[i] - homes()[i]).norm() < 1e-12);
                    assert!(max_lift[i] <= homes()[i].z + 0.1 + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_advance_is_clamped() {
        let mut gait = GaitScheduler::new(GaitParams::default(), homes());
        gait.prepare_swing(LegGroup::B, 0.5, &homes());

        let feet = gait.advance(0.3);
        assert!((gait.phase().b.time_in_swing_s - 0.3).abs() < 1e-12);

        // Reading the targets doesn't move the swing on
        assert_eq!(gait.targets(), feet);
        assert!((gait.phase().b.time_in_swing_s - 0.3).abs() < 1e-12);

        gait.advance(0.3);
        assert_eq!(gait.phase().b.time_in_swing_s, 0.5);
        assert!(gait.is_phase_complete());

        // Non-finite time steps are ignored
        gait.prepare_swing(LegGroup::A, 0.5, &homes());
        gait.advance(f64::NAN);
        assert_eq!(gait.phase().a.time_in_swing_s, 0.0);
    }

    #[test]
    fn test_stance_dips() {
        let traj = FootTrajectory::Stance {
            start: Point3::new(0.5, 0.0, -0.3),
            end: Point3::new(0.4, 0.0, -0.3),
            dip_m: 0.01,
        };

        assert_eq!(traj.position(0.0), Point3::new(0.5, 0.0, -0.3));
        assert!((traj.position(0.5).z - (-0.31)).abs() < 1e-12);
        assert!((traj.position(0.5).x - 0.45).abs() < 1e-12);
        assert!((traj.position(1.0) - Point3::new(0.4, 0.0, -0.3)).norm() < 1e-12);
    }

    #[test]
    fn test_step() {
        let mut gait = GaitScheduler::new(GaitParams::default(), homes());
        assert_eq!(gait.step(), Vector2::new(0.10, 0.0));

        gait.set_step(Vector2::new(0.0, 1.0));
        assert!((gait.step() - Vector2::new(0.0, 0.15)).norm() < 1e-12);

        // Half speed sideways for a 0.5 s swing
        gait.set_step_from_command(&[0.0, -0.5, 0.0], 0.5);
        assert!((gait.step() - Vector2::new(0.0, -0.05)).norm() < 1e-12);

        gait.set_step_from_command(&[0.0, 0.0, 0.0], 0.5);
        assert_eq!(gait.step(), Vector2::new(0.10, 0.0));
    }
}
