//! # Body pose
//!
//! Estimate of the body's attitude from the measured direction of gravity, the balance target the
//! body should return to, and the accumulated correction commanded through the legs.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default correction gain per update.
pub const DEFAULT_BALANCE_GAIN: f64 = 0.031;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Orientation state of the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPose {
    /// Estimated attitude of the body in the world.
    estimate: UnitQuaternion<f64>,

    /// Attitude the balance controller drives the estimate towards.
    target: UnitQuaternion<f64>,

    /// Accumulated correction applied to the feet.
    control: UnitQuaternion<f64>,

    gain: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for BodyPose {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE_GAIN)
    }
}

impl BodyPose {
    pub fn new(gain: f64) -> Self {
        Self {
            estimate: UnitQuaternion::identity(),
            target: UnitQuaternion::identity(),
            control: UnitQuaternion::identity(),
            gain,
        }
    }

    /// Update the attitude estimate from gravity measured in the body frame.
    ///
    /// Only roll and pitch are observable, the estimate never carries any yaw. Zero or non-finite
    /// measurements leave the estimate unchanged.
    pub fn update_estimate(&mut self, gravity_b: &Vector3<f64>) {
        let norm = gravity_b.norm();
        if !norm.is_finite() || norm < 1e-9 {
            return;
        }

        let down = -Vector3::z();
        let g = gravity_b / norm;

        self.estimate = UnitQuaternion::rotation_between(&g, &down)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));
    }

    /// Refresh the estimate and take one correction step towards the target.
    ///
    /// Returns the new control rotation.
    pub fn update(&mut self, gravity_b: &Vector3<f64>) -> UnitQuaternion<f64> {
        self.update_estimate(gravity_b);

        let step = (self.target * self.estimate.inverse()).powf(self.gain);
        self.control = UnitQuaternion::new_normalize((self.control * step).into_inner());

        self.control
    }

    pub fn set_balance_target(&mut self, target: UnitQuaternion<f64>) {
        self.target = target;
    }

    /// Make the current estimate the balance target.
    pub fn capture_target(&mut self) {
        self.target = self.estimate;
    }

    /// Forget the accumulated correction.
    pub fn reset_control(&mut self) {
        self.control = UnitQuaternion::identity();
    }

    pub fn balance_target(&self) -> &UnitQuaternion<f64> {
        &self.target
    }

    pub fn estimate(&self) -> &UnitQuaternion<f64> {
        &self.estimate
    }

    pub fn control(&self) -> &UnitQuaternion<f64> {
        &self.control
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
