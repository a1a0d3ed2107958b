//! Foot placement and load sharing for the standing postures

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Point3, UnitQuaternion, Vector3};

use crate::leg::NUM_LEGS;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest lever arm considered when sharing the load, a foot directly under the centre of mass
/// takes nearly all of it.
const MIN_LEVER_M: f64 = 1e-6;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Share the robot's weight between the feet.
///
/// Each foot's share is inversely proportional to its horizontal distance from the body origin,
/// horizontal meaning perpendicular to `up_b`. The shares sum to the weight and every force
/// points along `up_b`.
pub fn distribute_foot_forces(
    feet_b: &[Point3<f64>; NUM_LEGS],
    up_b: &Vector3<f64>,
    weight_n: f64,
) -> [Vector3<f64>; NUM_LEGS] {
    let mut levers = [0.0; NUM_LEGS];
    for (lever, foot) in levers.iter_mut().zip(feet_b.iter()) {
        let p = foot.coords;
        *lever = (up_b * up_b.dot(&p) - p).norm().max(MIN_LEVER_M);
    }

    let lever_sum: f64 = levers.iter().sum();
    let mut shares = [0.0; NUM_LEGS];
    for (share, lever) in shares.iter_mut().zip(levers.iter()) {
        *share = lever_sum / lever;
    }

    let share_sum: f64 = shares.iter().sum();
    let mut forces = [Vector3::zeros(); NUM_LEGS];
    for (force, share) in forces.iter_mut().zip(shares.iter()) {
        *force = up_b * (share / share_sum * weight_n);
    }

    forces
}

/// Foot positions which rotate the body by `rotation` relative to the feet at `stance_feet_b`.
pub fn re_orient(
    rotation: &UnitQuaternion<f64>,
    stance_feet_b: &[Point3<f64>; NUM_LEGS],
) -> [Point3<f64>; NUM_LEGS] {
    let mut feet = *stance_feet_b;
    for foot in feet.iter_mut() {
        *foot = rotation.inverse_transform_point(foot);
    }
    feet
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn square_feet(half: f64) -> [Point3<f64>; NUM_LEGS] {
        [
            Point3::new(half, half, -0.3),
            Point3::new(half, -half, -0.3),
            Point3::new(-half, half, -0.3),
            Point3::new(-half, -half, -0.3),
        ]
    }

    #[test]
    fn test_symmetric_feet_share_equally() {
        let up = Vector3::z();
        let forces = distribute_foot_forces(&square_feet(0.4), &up, 200.0);

        for f in forces.iter() {
            assert!((f - up * 50.0).norm() < 1e-9);
        }
    }

    #[test]
    fn test_nearer_foot_carries_more() {
        let up = Vector3::z();
        let mut feet = square_feet(0.4);
        feet[0] = Point3::new(0.2, 0.2, -0.3);

        let forces = distribute_foot_forces(&feet, &up, 200.0);
        let total: Vector3<f64> = forces.iter().sum();

        assert!((total - up * 200.0).norm() < 1e-9);
        assert!(forces[0].z > forces[1].z);
        assert!((forces[1].z - forces[2].z).abs() < 1e-9);

        // Twice as close, twice the load
        assert!((forces[0].z - 2.0 * forces[3].z).abs() < 1e-9);
    }

    #[test]
    fn test_foot_under_body() {
        let up = Vector3::z();
        let mut feet = square_feet(0.4);
        feet[2] = Point3::new(0.0, 0.0, -0.3);

        let forces = distribute_foot_forces(&feet, &up, 100.0);
        assert!(forces.iter().all(|f| f.iter().all(|v| v.is_finite())));
        assert!(forces[2].z > 99.99);
    }

    #[test]
    fn test_re_orient() {
        let feet = square_feet(0.4);
        let tilt = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.1);

        let moved = re_orient(&tilt, &feet);

        // Rotating the body by the tilt puts the feet back where they were
        for (m, f) in moved.iter().zip(feet.iter()) {
            assert!((tilt * m - f).norm() < 1e-12);
        }

        assert_eq!(re_orient(&UnitQuaternion::identity(), &feet), feet);
    }
}
