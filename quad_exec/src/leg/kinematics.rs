//! Kinematic model of a leg's joint chain
//!
//! All positions here are in the leg frame: origin at the base (yaw) joint, X pointing out of the
//! body along the mount direction, Z up.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Matrix3, Point3, Vector3};
use std::f64::consts::PI;

// Internal
use super::{LegGeometry, LegJoints, UnreachableReason};
use util::maths::{clamp, wrap_to_pi};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Horizontal distances below this are treated as directly above or below the base joint.
const MIN_HORIZ_DIST_M: f64 = 1e-9;

/// Slack on the workspace boundaries to absorb round-off.
const REACH_TOL_M: f64 = 1e-12;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Kinematics and mass model of a three joint leg.
pub trait LegKinematics {
    /// Foot position for the given joint angles.
    fn forward(&self, angles: &LegJoints) -> Point3<f64>;

    /// Joint angles placing the foot at `target`, choosing the solution closest to `seed`.
    fn solve_ik(&self, seed: &LegJoints, target: &Point3<f64>)
        -> Result<LegJoints, UnreachableReason>;

    /// Jacobian of the foot position with respect to the joint angles.
    fn jacobian_ee(&self, angles: &LegJoints) -> Matrix3<f64>;

    /// Jacobians of each link's centre of mass, base module first.
    fn jacobians_com(&self, angles: &LegJoints) -> [Matrix3<f64>; 3];

    /// Link masses matching `jacobians_com`.
    fn masses(&self) -> [f64; 3];
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Yaw joint followed by two parallel pitch joints.
#[derive(Debug, Clone)]
pub struct YawPitchPitchChain {
    geom: LegGeometry,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl YawPitchPitchChain {
    pub fn new(geom: &LegGeometry) -> Self {
        Self { geom: geom.clone() }
    }

    /// Position of a point `c1` along the upper link and `c2` along the lower link.
    fn point(&self, angles: &LegJoints, c1: f64, c2: f64) -> Point3<f64> {
        let (a1, a2) = self.pitch_angles(angles);
        let r = self.geom.hip_length_m + c1 * a1.cos() + c2 * (a1 + a2).cos();
        let z = c1 * a1.sin() + c2 * (a1 + a2).sin();

        Point3::new(r * angles[0].cos(), r * angles[0].sin(), z)
    }

    fn point_jacobian(&self, angles: &LegJoints, c1: f64, c2: f64) -> Matrix3<f64> {
        let s = self.geom.side.mirror();
        let (a1, a2) = self.pitch_angles(angles);
        let (sin_q0, cos_q0) = angles[0].sin_cos();

        let r = self.geom.hip_length_m + c1 * a1.cos() + c2 * (a1 + a2).cos();

        let dr_da1 = -c1 * a1.sin() - c2 * (a1 + a2).sin();
        let dz_da1 = c1 * a1.cos() + c2 * (a1 + a2).cos();
        let dr_da2 = -c2 * (a1 + a2).sin();
        let dz_da2 = c2 * (a1 + a2).cos();

        Matrix3::from_columns(&[
            Vector3::new(-r * sin_q0, r * cos_q0, 0.0),
            s * Vector3::new(dr_da1 * cos_q0, dr_da1 * sin_q0, dz_da1),
            s * Vector3::new(dr_da2 * cos_q0, dr_da2 * sin_q0, dz_da2),
        ])
    }

    /// Physical pitch angles, with the side mirroring removed.
    fn pitch_angles(&self, angles: &LegJoints) -> (f64, f64) {
        let s = self.geom.side.mirror();
        (s * angles[1], s * angles[2])
    }
}

impl LegKinematics for YawPitchPitchChain {
    fn forward(&self, angles: &LegJoints) -> Point3<f64> {
        self.point(angles, self.geom.upper_length_m, self.geom.lower_length_m)
    }

    fn solve_ik(
        &self,
        seed: &LegJoints,
        target: &Point3<f64>,
    ) -> Result<LegJoints, UnreachableReason> {
        if !target.coords.iter().all(|v| v.is_finite()) {
            return Err(UnreachableReason::NonFinite);
        }

        let s = self.geom.side.mirror();
        let l1 = self.geom.upper_length_m;
        let l2 = self.geom.lower_length_m;
        let hip = self.geom.hip_length_m;

        let rho = target.x.hypot(target.y);
        let yaw = if rho < MIN_HORIZ_DIST_M {
            seed[0]
        } else {
            target.y.atan2(target.x)
        };

        // The foot can be reached facing the target or, past the base joint, facing away from it
        let yaw_options = [(yaw, rho - hip), (wrap_to_pi(yaw + PI), -rho - hip)];

        let mut reach_error = None;
        let mut best: Option<(f64, LegJoints)> = None;

        for &(q0, r) in yaw_options.iter() {
            let d = r.hypot(target.z);

            if d > l1 + l2 + REACH_TOL_M {
                reach_error.get_or_insert(UnreachableReason::TooFar);
                continue;
            }
            if d < (l1 - l2).abs() - REACH_TOL_M {
                reach_error.get_or_insert(UnreachableReason::TooClose);
                continue;
            }

            let cos_a2 = clamp((d * d - l1 * l1 - l2 * l2) / (2.0 * l1 * l2), -1.0, 1.0);
            let a2_mag = cos_a2.acos();

            for &a2 in [a2_mag, -a2_mag].iter() {
                let a1 = wrap_to_pi(
                    target.z.atan2(r) - (l2 * a2.sin()).atan2(l1 + l2 * a2.cos()),
                );
                let candidate = [q0, s * a1, s * a2];

                if !candidate.iter().all(|a| a.is_finite())
                    || !self.geom.within_limits(&candidate)
                {
                    continue;
                }

                let dist: f64 = candidate
                    .iter()
                    .zip(seed.iter())
                    .map(|(c, q)| (c - q).powi(2))
                    .sum();

                match best {
                    Some((best_dist, _)) if best_dist <= dist => (),
                    _ => best = Some((dist, candidate)),
                }
            }
        }

        match best {
            Some((_, angles)) => Ok(angles),
            None => Err(reach_error.unwrap_or(UnreachableReason::JointLimits)),
        }
    }

    fn jacobian_ee(&self, angles: &LegJoints) -> Matrix3<f64> {
        self.point_jacobian(angles, self.geom.upper_length_m, self.geom.lower_length_m)
    }

    fn jacobians_com(&self, angles: &LegJoints) -> [Matrix3<f64>; 3] {
        let f = self.geom.com_fraction;
        let l1 = self.geom.upper_length_m;
        let l2 = self.geom.lower_length_m;

        [
            self.point_jacobian(angles, 0.0, 0.0),
            self.point_jacobian(angles, l1 * f, 0.0),
            self.point_jacobian(angles, l1, l2 * f),
        ]
    }

    fn masses(&self) -> [f64; 3] {
        self.geom.masses_kg
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::leg::LegId;

    fn chain(leg: LegId) -> YawPitchPitchChain {
        YawPitchPitchChain::new(&LegGeometry::default_for(leg))
    }

    #[test]
    fn test_round_trip() {
        for leg in LegId::ALL.iter() {
            let chain = chain(*leg);
            let s = chain.geom.side.mirror();

            for &q0 in [-1.0, -0.3, 0.0, 0.4, 1.2].iter() {
                for &a1 in [-1.2, -0.6, 0.0, 0.5, 1.1].iter() {
                    for &a2 in [-2.6, -1.9, -1.2, -0.5].iter() {
                        let angles = [q0, s * a1, s * a2];
                        let target = chain.forward(&angles);

                        let solved = chain
                            .solve_ik(&chain.geom.nominal_seed_rad, &target)
                            .unwrap();
                        let reached = chain.forward(&solved);

                        assert!(
                            (reached - target).norm() < 1e-9,
                            "{:?} {:?}: {} vs {}",
                            leg,
                            angles,
                            reached,
                            target
                        );
                        assert!(chain.geom.within_limits(&solved));
                    }
                }
            }
        }
    }

    #[test]
    fn test_outside_workspace() {
        let chain = chain(LegId::FrontLeft);
        let seed = chain.geom.nominal_seed_rad;

        // Beyond full extension
        assert_eq!(
            chain.solve_ik(&seed, &Point3::new(0.1 + 0.62, 0.0, 0.0)),
            Err(UnreachableReason::TooFar)
        );

        // Inside the fold-back radius around the shoulder
        assert_eq!(
            chain.solve_ik(&seed, &Point3::new(0.11, 0.0, 0.0)),
            Err(UnreachableReason::TooClose)
        );

        assert_eq!(
            chain.solve_ik(&seed, &Point3::new(f64::NAN, 0.0, -0.3)),
            Err(UnreachableReason::NonFinite)
        );
    }

    #[test]
    fn test_joint_limits() {
        let chain = chain(LegId::FrontLeft);

        // Reachable, but only by yawing well past the base joint's limits
        assert_eq!(
            chain.solve_ik(&chain.geom.nominal_seed_rad, &Point3::new(0.0, 0.4, -0.3)),
            Err(UnreachableReason::JointLimits)
        );
    }

    #[test]
    fn test_idempotent() {
        for leg in LegId::ALL.iter() {
            let chain = chain(*leg);
            let target = Point3::new(0.36, 0.05, -0.31);

            let first = chain.solve_ik(&chain.geom.nominal_seed_rad, &target).unwrap();
            let second = chain.solve_ik(&first, &target).unwrap();
            let third = chain.solve_ik(&second, &target).unwrap();

            assert_eq!(first, second);
            assert_eq!(second, third);
        }
    }

    #[test]
    fn test_branch_follows_seed() {
        let chain = chain(LegId::FrontLeft);
        let target = Point3::new(0.36, 0.0, -0.31);

        // Knee up, the nominal configuration
        let nominal = chain.solve_ik(&chain.geom.nominal_seed_rad, &target).unwrap();
        assert!(nominal[2] < 0.0);

        // Mirrored legs find the mirrored solution
        let right = self::chain(LegId::FrontRight);
        let mirrored = right.solve_ik(&right.geom.nominal_seed_rad, &target).unwrap();
        for i in 0..3 {
            let s = if i == 0 { 1.0 } else { -1.0 };
            assert!((mirrored[i] - s * nominal[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let chain = chain(LegId::RearRight);
        let angles = [0.3, 0.4, 1.3];
        let h = 1e-6;

        let jac = chain.jacobian_ee(&angles);

        for j in 0..3 {
            let mut plus = angles;
            let mut minus = angles;
            plus[j] += h;
            minus[j] -= h;

            let numeric = (chain.forward(&plus) - chain.forward(&minus)) / (2.0 * h);
            assert!((jac.column(j) - numeric).norm() < 1e-6);
        }

        // The lower link's centre of mass is half way along it
        let f = chain.geom.com_fraction;
        let jac_lower = chain.jacobians_com(&angles)[2];
        let jac_elbow = chain.point_jacobian(&angles, chain.geom.upper_length_m, 0.0);
        let expected = jac_elbow * (1.0 - f) + jac * f;
        assert!((jac_lower - expected).norm() < 1e-12);
    }
}
