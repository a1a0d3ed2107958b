//! Implements `Convert` functions between wire representations and nalgebra
//! types.
//!
//! Quaternions travel over the network as `[w, x, y, z]` arrays.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Convert<O> {
    fn convert(&self) -> O;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Convert<Vector3<f64>> for Point3<f64> {
    fn convert(&self) -> Vector3<f64> {
        self.coords
    }
}

impl Convert<Point3<f64>> for Vector3<f64> {
    fn convert(&self) -> Point3<f64> {
        Point3::from(*self)
    }
}

impl Convert<Vector3<f64>> for [f64; 3] {
    fn convert(&self) -> Vector3<f64> {
        Vector3::new(self[0], self[1], self[2])
    }
}

impl Convert<[f64; 3]> for Vector3<f64> {
    fn convert(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// `[w, x, y, z]` to a unit quaternion. The input is normalised, a zero
/// quaternion becomes NaN and should be checked by the caller.
impl Convert<UnitQuaternion<f64>> for [f64; 4] {
    fn convert(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(Quaternion::new(self[0], self[1], self[2], self[3]))
    }
}

impl Convert<[f64; 4]> for UnitQuaternion<f64> {
    fn convert(&self) -> [f64; 4] {
        [self.w, self.i, self.j, self.k]
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_quat_order() {
        // 90 degrees about z
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let arr: [f64; 4] = q.convert();

        assert!((arr[0] - (FRAC_PI_2 / 2.0).cos()).abs() < 1e-12);
        assert!(arr[1].abs() < 1e-12);
        assert!(arr[2].abs() < 1e-12);
        assert!((arr[3] - (FRAC_PI_2 / 2.0).sin()).abs() < 1e-12);

        let back: UnitQuaternion<f64> = arr.convert();
        assert!(back.angle_to(&q) < 1e-12);
    }

    #[test]
    fn test_quat_normalised() {
        let q: UnitQuaternion<f64> = [2.0, 0.0, 0.0, 0.0].convert();
        assert!((q.w - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_vector_point() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let p: Point3<f64> = v.convert();
        assert_eq!(p, Point3::new(1.0, 2.0, 3.0));

        let arr: [f64; 3] = v.convert();
        assert_eq!(arr, [1.0, 2.0, 3.0]);
    }
}
