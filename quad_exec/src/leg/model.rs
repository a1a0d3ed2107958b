//! Model of a single leg

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Isometry3, Point3, Vector3};
use serde::Serialize;

// Internal
use super::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Mutable state of a leg.
#[derive(Debug, Clone, Serialize)]
pub struct LegState {
    /// Measured joint angles.
    ///
    /// Units: radians
    pub angles_rad: LegJoints,

    /// Measured joint velocities.
    ///
    /// Units: radians/second
    pub vels_rads: LegJoints,

    /// Seed used for the next inverse kinematics solve.
    pub seed_rad: LegJoints,

    /// Last foot target given to the leg.
    ///
    /// Frame: body
    pub foot_target_b: Point3<f64>,

    pub swinging: bool,
}

/// A leg: its geometry, kinematic chain and state.
pub struct LegModel {
    id: LegId,
    geom: LegGeometry,
    base_frame: Isometry3<f64>,
    kin: Box<dyn LegKinematics + Send>,
    state: LegState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LegModel {
    /// Create a leg using the yaw-pitch-pitch chain for its kinematics.
    pub fn new(id: LegId, geom: LegGeometry) -> Self {
        let kin = Box::new(YawPitchPitchChain::new(&geom));
        Self::with_kinematics(id, geom, kin)
    }

    pub fn with_kinematics(
        id: LegId,
        geom: LegGeometry,
        kin: Box<dyn LegKinematics + Send>,
    ) -> Self {
        let base_frame = geom.base_frame();
        let seed = geom.nominal_seed_rad;
        let foot_target_b = base_frame * kin.forward(&seed);

        Self {
            id,
            base_frame,
            kin,
            state: LegState {
                angles_rad: seed,
                vels_rads: [0.0; JOINTS_PER_LEG],
                seed_rad: seed,
                foot_target_b,
                swinging: false,
            },
            geom,
        }
    }

    pub fn id(&self) -> LegId {
        self.id
    }

    pub fn geometry(&self) -> &LegGeometry {
        &self.geom
    }

    pub fn state(&self) -> &LegState {
        &self.state
    }

    /// Transform from the leg frame to the body frame.
    pub fn base_frame(&self) -> &Isometry3<f64> {
        &self.base_frame
    }

    /// Store the measured joint angles and velocities.
    ///
    /// Non-finite velocities are stored as zero.
    pub fn set_feedback(&mut self, angles_rad: &LegJoints, vels_rads: &LegJoints) {
        self.state.angles_rad = *angles_rad;
        for (v, fbk) in self.state.vels_rads.iter_mut().zip(vels_rads.iter()) {
            *v = if fbk.is_finite() { *fbk } else { 0.0 };
        }
    }

    pub fn set_swinging(&mut self, swinging: bool) {
        self.state.swinging = swinging;
    }

    /// Foot position in the body frame for the given joint angles.
    pub fn forward(&self, angles: &LegJoints) -> Point3<f64> {
        self.base_frame * self.kin.forward(angles)
    }

    /// Solve for the joint angles placing the foot at `target_lf`, given in the leg frame.
    pub fn compute_ik(
        &self,
        target_lf: &Point3<f64>,
        seed: &LegJoints,
    ) -> Result<LegJoints, LegError> {
        self.kin
            .solve_ik(seed, target_lf)
            .map_err(|reason| LegError::UnreachableTarget {
                leg: self.id,
                target: [target_lf.x, target_lf.y, target_lf.z],
                reason,
            })
    }

    /// Solve for a body frame foot target, seeding from and updating the stored seed.
    pub fn compute_ik_body(&mut self, target_b: &Point3<f64>) -> Result<LegJoints, LegError> {
        self.state.foot_target_b = *target_b;

        let target_lf = self.base_frame.inverse_transform_point(target_b);
        let angles = self.compute_ik(&target_lf, &self.state.seed_rad)?;
        self.state.seed_rad = angles;

        Ok(angles)
    }

    /// Whether a body frame foot target can be reached from the stored seed, leaving the seed
    /// untouched.
    pub fn is_reachable(&self, target_b: &Point3<f64>) -> bool {
        let target_lf = self.base_frame.inverse_transform_point(target_b);
        self.compute_ik(&target_lf, &self.state.seed_rad).is_ok()
    }

    /// Seed the next solve from the nominal configuration.
    pub fn reset_seed(&mut self) {
        self.state.seed_rad = self.geom.nominal_seed_rad;
    }

    /// Joint torques holding the leg against gravity while its foot applies `foot_force_b`.
    ///
    /// `gravity_b` is the gravitational acceleration and `foot_force_b` the ground reaction force
    /// the foot should receive, both in the body frame.
    pub fn compute_compensation_torque(
        &self,
        angles: &LegJoints,
        vels: &LegJoints,
        gravity_b: &Vector3<f64>,
        foot_force_b: &Vector3<f64>,
    ) -> Vector3<f64> {
        let to_leg = self.geom.mount_rotation().inverse();
        let gravity_lf = to_leg * gravity_b;
        let foot_force_lf = to_leg * foot_force_b;

        let mut torque = self.kin.jacobian_ee(angles).transpose() * (-foot_force_lf);

        for (jac, mass) in self
            .kin
            .jacobians_com(angles)
            .iter()
            .zip(self.kin.masses().iter())
        {
            torque -= jac.transpose() * (gravity_lf * *mass);
        }

        torque[1] += -self.geom.side.mirror() * self.geom.spring_torque_nm
            + self.geom.drag_nms * vels[1];

        torque
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn massless(leg: LegId) -> LegGeometry {
        let mut geom = LegGeometry::default_for(leg);
        geom.masses_kg = [0.0; 3];
        geom.spring_torque_nm = 0.0;
        geom.drag_nms = 0.0;
        geom
    }

    #[test]
    fn test_ik_body_round_trip() {
        let mut leg = LegModel::new(LegId::RearLeft, LegGeometry::default_for(LegId::RearLeft));

        let target_b = leg.base_frame() * Point3::new(0.36, 0.02, -0.31);
        let angles = leg.compute_ik_body(&target_b).unwrap();

        assert!((leg.forward(&angles) - target_b).norm() < 1e-9);
        assert_eq!(leg.state().seed_rad, angles);
        assert_eq!(leg.state().foot_target_b, target_b);

        leg.reset_seed();
        assert_eq!(leg.state().seed_rad, leg.geometry().nominal_seed_rad);
    }

    #[test]
    fn test_ik_failure_keeps_seed() {
        let mut leg = LegModel::new(LegId::FrontLeft, LegGeometry::default_for(LegId::FrontLeft));
        let seed = leg.state().seed_rad;

        let far_b = leg.base_frame() * Point3::new(2.0, 0.0, 0.0);
        match leg.compute_ik_body(&far_b) {
            Err(LegError::UnreachableTarget { leg: id, reason, .. }) => {
                assert_eq!(id, LegId::FrontLeft);
                assert_eq!(reason, UnreachableReason::TooFar);
            }
            Ok(a) => panic!("Expected unreachable target, got {:?}", a),
        }

        assert_eq!(leg.state().seed_rad, seed);
    }

    #[test]
    fn test_reachable_leaves_seed() {
        let leg = LegModel::new(LegId::RearRight, LegGeometry::default_for(LegId::RearRight));
        let seed = leg.state().seed_rad;

        assert!(leg.is_reachable(&(leg.base_frame() * Point3::new(0.36, 0.0, -0.31))));
        assert!(!leg.is_reachable(&(leg.base_frame() * Point3::new(2.0, 0.0, 0.0))));
        assert_eq!(leg.state().seed_rad, seed);
    }

    #[test]
    fn test_foot_force_torque_does_virtual_work() {
        let leg = LegModel::new(LegId::FrontRight, massless(LegId::FrontRight));
        let angles = [0.1, -0.2, 1.6];
        let force_b = Vector3::new(3.0, -2.0, 50.0);
        let h = 1e-6;

        let torque =
            leg.compute_compensation_torque(&angles, &[0.0; 3], &Vector3::zeros(), &force_b);

        // The joints push the foot against the ground reaction force
        for j in 0..3 {
            let mut moved = angles;
            moved[j] += h;
            let foot_disp = leg.forward(&moved) - leg.forward(&angles);

            let work = -force_b.dot(&foot_disp) / h;
            assert!((torque[j] - work).abs() < 1e-4, "joint {}", j);
        }
    }

    #[test]
    fn test_mirrored_legs_mirror_torques() {
        let left = LegModel::new(LegId::FrontLeft, LegGeometry::default_for(LegId::FrontLeft));
        let right = LegModel::new(LegId::FrontRight, LegGeometry::default_for(LegId::FrontRight));

        let angles_l = [0.2, 0.1, -1.7];
        let angles_r = [0.2, -0.1, 1.7];
        let gravity_b = Vector3::new(0.0, 0.0, -9.8);
        let force_b = Vector3::new(0.0, 0.0, 51.45);

        let tl = left.compute_compensation_torque(&angles_l, &[0.0; 3], &gravity_b, &force_b);
        let tr = right.compute_compensation_torque(&angles_r, &[0.0; 3], &gravity_b, &force_b);

        assert!((tl[0] - tr[0]).abs() < 1e-9);
        assert!((tl[1] + tr[1]).abs() < 1e-9);
        assert!((tl[2] + tr[2]).abs() < 1e-9);
    }

    #[test]
    fn test_spring_and_drag() {
        let mut geom = massless(LegId::FrontLeft);
        geom.spring_torque_nm = 3.75;
        geom.drag_nms = 1.5;
        let leg = LegModel::new(LegId::FrontLeft, geom);

        let torque = leg.compute_compensation_torque(
            &[0.0, 0.0, -1.5],
            &[0.0, 2.0, 0.0],
            &Vector3::zeros(),
            &Vector3::zeros(),
        );

        assert!(torque[0].abs() < 1e-12);
        assert!((torque[1] - (-3.75 + 3.0)).abs() < 1e-12);
        assert!(torque[2].abs() < 1e-12);
    }
}
