//! # Mechanisms Equipment Commands
//!
//! Demands sent to, and sensor data received from, the leg actuator modules.
//! All per-joint arrays are ordered leg-major (front left, front right, rear
//! left, rear right), and within a leg base, shoulder then elbow. This order
//! is the one given by [`JointId::ALL`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of legs on the robot.
pub const NUM_LEGS: usize = 4;

/// Number of actuated joints in each leg.
pub const JOINTS_PER_LEG: usize = 3;

/// Total number of actuated joints.
pub const NUM_JOINTS: usize = NUM_LEGS * JOINTS_PER_LEG;

/// Identity attitude in `[w, x, y, z]` order.
pub const IDENTITY_Q: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands that are sent from the MechClient to the MechServer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MechDems {
    /// The demanded position of each joint in radians.
    pub pos_rad: [f64; NUM_JOINTS],
    
    /// The demanded speed of each joint in radians/second.
    pub speed_rads: [f64; NUM_JOINTS],

    /// The feed forward effort of each joint in Newton metres.
    pub effort_nm: [f64; NUM_JOINTS]
}

/// Sensor data returned by the MechServer to the MechClient
///
/// Joints which did not report are NaN, and are carried as `null` in JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MechSensData {
    /// Measured position of each joint in radians.
    #[serde(with = "nan_as_null")]
    pub pos_rad: [f64; NUM_JOINTS],

    /// Measured speed of each joint in radians/second.
    #[serde(with = "nan_as_null")]
    pub speed_rads: [f64; NUM_JOINTS],

    /// Measured effort of each joint in Newton metres.
    #[serde(with = "nan_as_null")]
    pub effort_nm: [f64; NUM_JOINTS],

    /// Attitude reported by the IMU of each leg's base module, `[w, x, y, z]`.
    pub imu_attitude_q: [Option<[f64; 4]>; NUM_LEGS]
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// IDs of all actuated joints on the quadruped
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum JointId {
    FlBase,
    FlShoulder,
    FlElbow,
    FrBase,
    FrShoulder,
    FrElbow,
    RlBase,
    RlShoulder,
    RlElbow,
    RrBase,
    RrShoulder,
    RrElbow,
}

/// Response from the mechanisms server based on the demands sent by the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum MechDemsResponse {
    /// Demands were valid and will be executed
    DemsOk,

    /// Demands were invalid and have been rejected
    DemsInvalid,

    /// Equipment is invalid so demands cannot be actuated
    EqptInvalid
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl JointId {
    /// Every joint in wire order.
    pub const ALL: [JointId; NUM_JOINTS] = [
        JointId::FlBase, JointId::FlShoulder, JointId::FlElbow,
        JointId::FrBase, JointId::FrShoulder, JointId::FrElbow,
        JointId::RlBase, JointId::RlShoulder, JointId::RlElbow,
        JointId::RrBase, JointId::RrShoulder, JointId::RrElbow,
    ];

    /// Index of this joint in the wire arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Index of the leg this joint belongs to.
    pub fn leg_index(self) -> usize {
        self.index() / JOINTS_PER_LEG
    }

    /// Position of this joint within its leg (0 = base, 1 = shoulder, 2 = elbow).
    pub fn joint_in_leg(self) -> usize {
        self.index() % JOINTS_PER_LEG
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short snake case name, used for archive column headers.
    pub fn name(self) -> &'static str {
        match self {
            JointId::FlBase => "fl_base",
            JointId::FlShoulder => "fl_shoulder",
            JointId::FlElbow => "fl_elbow",
            JointId::FrBase => "fr_base",
            JointId::FrShoulder => "fr_shoulder",
            JointId::FrElbow => "fr_elbow",
            JointId::RlBase => "rl_base",
            JointId::RlShoulder => "rl_shoulder",
            JointId::RlElbow => "rl_elbow",
            JointId::RrBase => "rr_base",
            JointId::RrShoulder => "rr_shoulder",
            JointId::RrElbow => "rr_elbow",
        }
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl MechDems {
    /// Demands holding every joint at the given positions with zero speed 
    /// and the given effort.
    pub fn hold(pos_rad: [f64; NUM_JOINTS], effort_nm: [f64; NUM_JOINTS]) -> Self {
        Self {
            pos_rad,
            speed_rads: [0.0; NUM_JOINTS],
            effort_nm
        }
    }

    /// True if every demand is a finite number.
    pub fn is_finite(&self) -> bool {
        self.pos_rad.iter()
            .chain(self.speed_rads.iter())
            .chain(self.effort_nm.iter())
            .all(|v| v.is_finite())
    }
}

impl Default for MechDems {
    fn default() -> Self {
        Self::hold([0.0; NUM_JOINTS], [0.0; NUM_JOINTS])
    }
}

impl MechSensData {
    /// True if every joint reported a position.
    pub fn positions_valid(&self) -> bool {
        self.pos_rad.iter().all(|p| p.is_finite())
    }
}

impl Default for MechSensData {
    fn default() -> Self {
        Self {
            pos_rad: [0.0; NUM_JOINTS],
            speed_rads: [0.0; NUM_JOINTS],
            effort_nm: [0.0; NUM_JOINTS],
            imu_attitude_q: [Some(IDENTITY_Q); NUM_LEGS]
        }
    }
}

// -----------------------------------------------------------------------------------------------
// SERDE HELPERS
// -----------------------------------------------------------------------------------------------

/// Joint arrays where missing values (NaN) are written as `null`.
mod nan_as_null {
    use super::NUM_JOINTS;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64; NUM_JOINTS], s: S) -> Result<S::Ok, S::Error> {
        let opts: Vec<Option<f64>> = values.iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect();
        opts.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[f64; NUM_JOINTS], D::Error> {
        let opts: Vec<Option<f64>> = Vec::deserialize(d)?;
        if opts.len() != NUM_JOINTS {
            return Err(D::Error::invalid_length(opts.len(), &"one value per joint"));
        }

        let mut values = [std::f64::NAN; NUM_JOINTS];
        for (v, o) in values.iter_mut().zip(opts) {
            if let Some(o) = o {
                *v = o;
            }
        }
        Ok(values)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
