//! Parameters structure for QuadCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    body_pose::DEFAULT_BALANCE_GAIN,
    ctrl_sm::CtrlSmParams,
    gait::GaitParams,
    leg::{LegGeometry, NUM_LEGS},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the quadruped controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    // ---- ROBOT ----
    /// Geometry of each leg in joint array order.
    pub legs: [LegGeometry; NUM_LEGS],

    /// Units: kilograms
    pub robot_mass_kg: f64,

    /// Units: meters/second^2
    pub gravity_mps2: f64,

    // ---- POSTURES ----
    /// Foot position when standing.
    ///
    /// Units: meters,
    /// Frame: Leg
    pub stance_foot_lf: [f64; 3],

    /// Foot position with the legs spread flat and the body on the ground.
    ///
    /// Units: meters,
    /// Frame: Leg
    pub spread_foot_lf: [f64; 3],

    /// Largest distance, per leg, between the goal and measured joint angles for a posture to
    /// count as reached.
    ///
    /// Units: radians
    pub posture_tolerance_rad: f64,

    // ---- LIMITS ----
    /// Units: radians/second
    pub max_joint_rate_rads: f64,

    // ---- BEHAVIOURS ----
    pub balance_gain: f64,

    pub gait: GaitParams,

    pub ctrl_sm: CtrlSmParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            legs: LegGeometry::default_all(),
            robot_mass_kg: 21.0,
            gravity_mps2: 9.8,
            stance_foot_lf: [0.36, 0.0, -0.31],
            spread_foot_lf: [0.55, 0.0, 0.05],
            posture_tolerance_rad: 0.5,
            max_joint_rate_rads: 3.0,
            balance_gain: DEFAULT_BALANCE_GAIN,
            gait: GaitParams::default(),
            ctrl_sm: CtrlSmParams::default(),
        }
    }
}

impl Params {
    /// Weight of the robot.
    ///
    /// Units: newtons
    pub fn weight_n(&self) -> f64 {
        self.robot_mass_kg * self.gravity_mps2
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
