//! # Leg module
//!
//! Each of the quadruped's legs is a three joint chain (base yaw, shoulder pitch, elbow pitch)
//! mounted on the body at a fixed angle and radial offset. This module provides the geometry of a
//! leg, the kinematic model of its chain, and the `LegModel` wrapping both with the leg's mutable
//! state.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod geometry;
mod kinematics;
mod model;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
pub use comms_if::eqpt::mech::{JOINTS_PER_LEG, NUM_JOINTS, NUM_LEGS};
pub use geometry::*;
pub use kinematics::*;
pub use model::*;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Angles (or rates, or torques) of a single leg's joints, base first.
pub type LegJoints = [f64; JOINTS_PER_LEG];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Identifies a leg. The order of the variants is the order of the legs in the joint arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegId {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

/// The two pairs of diagonally opposite legs which swing together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegGroup {
    /// Front left and rear right
    A,
    /// Front right and rear left
    B,
}

/// Reasons a foot target can't be reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum UnreachableReason {
    /// Further from the shoulder than both links stretched out.
    TooFar,
    /// Closer to the shoulder than the links can fold.
    TooClose,
    /// Every solution breaks a joint limit.
    JointLimits,
    /// The target contains NaN or infinite values.
    NonFinite,
}

/// Possible errors raised by the leg model.
#[derive(Debug, thiserror::Error)]
pub enum LegError {
    #[error("Foot target {target:?} is unreachable for the {leg:?} leg ({reason:?})")]
    UnreachableTarget {
        leg: LegId,
        target: [f64; 3],
        reason: UnreachableReason,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LegId {
    /// All legs in joint array order.
    pub const ALL: [LegId; NUM_LEGS] = [
        LegId::FrontLeft,
        LegId::FrontRight,
        LegId::RearLeft,
        LegId::RearRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Group this leg swings with.
    pub fn group(self) -> LegGroup {
        match self {
            LegId::FrontLeft | LegId::RearRight => LegGroup::A,
            LegId::FrontRight | LegId::RearLeft => LegGroup::B,
        }
    }

    /// Range of this leg's joints in the whole-robot joint arrays.
    pub fn joint_range(self) -> std::ops::Range<usize> {
        let start = self.index() * JOINTS_PER_LEG;
        start..start + JOINTS_PER_LEG
    }
}

impl LegGroup {
    /// The other group.
    pub fn other(self) -> Self {
        match self {
            LegGroup::A => LegGroup::B,
            LegGroup::B => LegGroup::A,
        }
    }

    /// Legs belonging to this group.
    pub fn legs(self) -> [LegId; 2] {
        match self {
            LegGroup::A => [LegId::FrontLeft, LegId::RearRight],
            LegGroup::B => [LegId::FrontRight, LegId::RearLeft],
        }
    }

    pub fn contains(self, leg: LegId) -> bool {
        leg.group() == self
    }
}

/// Copy one leg's values out of a whole-robot joint array.
pub fn leg_slice(values: &[f64; NUM_JOINTS], leg: LegId) -> LegJoints {
    let mut out = [0.0; JOINTS_PER_LEG];
    out.copy_from_slice(&values[leg.joint_range()]);
    out
}

/// Write one leg's values into a whole-robot joint array.
pub fn set_leg_slice(values: &mut [f64; NUM_JOINTS], leg: LegId, leg_values: &LegJoints) {
    values[leg.joint_range()].copy_from_slice(leg_values);
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
