//! Leg geometry description

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// Internal
use super::{LegId, LegJoints};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Side of the body a leg is mounted on.
///
/// Right legs are mirror images of left legs, their pitch joints turn the opposite way for the
/// same physical motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegSide {
    Left,
    Right,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fixed geometry and mass properties of one leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegGeometry {
    /// Angle of the leg mount about the body Z axis, measured from the body's forward axis.
    ///
    /// Units: radians
    pub mount_angle_rad: f64,

    /// Distance from the body origin to the base joint along the mount direction.
    ///
    /// Units: meters
    pub mount_offset_m: f64,

    pub side: LegSide,

    /// Horizontal distance from the base (yaw) joint to the shoulder joint.
    ///
    /// Units: meters
    pub hip_length_m: f64,

    /// Shoulder to elbow.
    ///
    /// Units: meters
    pub upper_length_m: f64,

    /// Elbow to foot.
    ///
    /// Units: meters
    pub lower_length_m: f64,

    /// Masses of the base module, the upper link (including the elbow module) and the lower link.
    ///
    /// Units: kilograms
    pub masses_kg: [f64; 3],

    /// Position of each link's centre of mass as a fraction of the link length.
    pub com_fraction: f64,

    /// Units: radians
    pub joint_min_rad: LegJoints,

    /// Units: radians
    pub joint_max_rad: LegJoints,

    /// Nominal configuration used to seed the inverse kinematics.
    ///
    /// Units: radians
    pub nominal_seed_rad: LegJoints,

    /// Magnitude of the constant torque the shoulder applies to counter the gas spring.
    ///
    /// Units: newton meters
    pub spring_torque_nm: f64,

    /// Shoulder drag coefficient.
    ///
    /// Units: newton meter seconds
    pub drag_nms: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LegGeometry {
    /// Nominal geometry of the given leg on the quadruped.
    pub fn default_for(leg: LegId) -> Self {
        let (mount_deg, side): (f64, LegSide) = match leg {
            LegId::FrontLeft => (30.0, LegSide::Left),
            LegId::FrontRight => (-30.0, LegSide::Right),
            LegId::RearLeft => (150.0, LegSide::Left),
            LegId::RearRight => (-150.0, LegSide::Right),
        };

        let s = side.mirror();

        Self {
            mount_angle_rad: mount_deg.to_radians(),
            mount_offset_m: 0.2375,
            side,
            hip_length_m: 0.1,
            upper_length_m: 0.28,
            lower_length_m: 0.33,
            masses_kg: [0.34, 0.86, 0.25],
            com_fraction: 0.5,
            joint_min_rad: if s > 0.0 {
                [-1.5, -1.8, -2.9]
            } else {
                [-1.5, -1.8, -0.05]
            },
            joint_max_rad: if s > 0.0 {
                [1.5, 1.8, 0.05]
            } else {
                [1.5, 1.8, 2.9]
            },
            nominal_seed_rad: [0.2, -0.3 * s, -1.9 * s],
            spring_torque_nm: 3.75,
            drag_nms: 1.5,
        }
    }

    /// Nominal geometry of all legs, in joint array order.
    pub fn default_all() -> [Self; 4] {
        [
            Self::default_for(LegId::FrontLeft),
            Self::default_for(LegId::FrontRight),
            Self::default_for(LegId::RearLeft),
            Self::default_for(LegId::RearRight),
        ]
    }

    /// Rotation of the leg frame in the body frame.
    pub fn mount_rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.mount_angle_rad)
    }

    /// Transform from the leg frame to the body frame.
    pub fn base_frame(&self) -> Isometry3<f64> {
        let rot = self.mount_rotation();
        let trans = rot * Vector3::new(self.mount_offset_m, 0.0, 0.0);

        Isometry3::from_parts(Translation3::from(trans), rot)
    }

    /// Whether the angles are within the joint limits.
    pub fn within_limits(&self, angles: &LegJoints) -> bool {
        angles
            .iter()
            .zip(self.joint_min_rad.iter().zip(self.joint_max_rad.iter()))
            .all(|(a, (min, max))| *a >= *min && *a <= *max)
    }
}

impl LegSide {
    /// Sign applied to the pitch joints, `+1` on the left and `-1` on the right.
    pub fn mirror(self) -> f64 {
        match self {
            LegSide::Left => 1.0,
            LegSide::Right => -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_base_frames() {
        let fl = LegGeometry::default_for(LegId::FrontLeft);
        let rr = LegGeometry::default_for(LegId::RearRight);

        // Base joints sit on the mount circle, front left ahead and to the left
        let fl_base = fl.base_frame() * Point3::origin();
        assert!((fl_base.coords.norm() - 0.2375).abs() < 1e-12);
        assert!(fl_base.x > 0.0 && fl_base.y > 0.0);

        // Opposite legs are diametrically opposed
        let rr_base = rr.base_frame() * Point3::origin();
        assert!((fl_base.coords + rr_base.coords).norm() < 1e-12);

        // The leg frame's X axis points outwards
        let out = fl.base_frame() * Vector3::x();
        assert!((out - fl_base.coords.normalize()).norm() < 1e-12);
    }

    #[test]
    fn test_mirrored_seeds() {
        let fl = LegGeometry::default_for(LegId::FrontLeft);
        let fr = LegGeometry::default_for(LegId::FrontRight);

        assert_eq!(fl.nominal_seed_rad, [0.2, -0.3, -1.9]);
        assert_eq!(fr.nominal_seed_rad, [0.2, 0.3, 1.9]);
        assert!(fl.within_limits(&fl.nominal_seed_rad));
        assert!(fr.within_limits(&fr.nominal_seed_rad));
        assert!(!fl.within_limits(&fr.nominal_seed_rad));
    }
}
