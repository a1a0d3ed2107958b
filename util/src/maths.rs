//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Clamp `value` into `[min, max]`.
///
/// NaN values are passed through unchanged.
pub fn clamp<T>(value: T, min: T, max: T) -> T 
where
    T: Float
{
    if value > max {
        max
    }
    else if value < min {
        min
    }
    else {
        value
    }
}

/// Move `current` towards `target` by at most `max_step`.
pub fn rate_limit<T>(current: T, target: T, max_step: T) -> T
where
    T: Float
{
    current + clamp(target - current, -max_step.abs(), max_step.abs())
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// Due to floating point round-off the result can equal `rhs.abs()` when 
/// `lhs` is a tiny negative number.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle into `[-pi, pi)`.
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float
{
    let pi_t = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    rem_euclid(angle + pi_t, pi_t + pi_t) - pi_t
}

/// Minimum jerk blend factor for a normalised time `tau`.
///
/// `tau` is clamped to `[0, 1]`, the result goes smoothly from 0 to 1 with
/// zero velocity and acceleration at both ends.
pub fn min_jerk<T>(tau: T) -> T
where
    T: Float
{
    let tau = clamp(tau, T::zero(), T::one());
    let c = |v: f64| T::from(v).unwrap_or_else(T::zero);

    tau.powi(3) * (c(10.0) - c(15.0) * tau + c(6.0) * tau.powi(2))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0.0, 1.0), (0.0, 10.0), 0.5), 5.0);
        assert_eq!(lin_map((-1.0, 1.0), (1.0, 3.0), -1.0), 1.0);
    }

    #[test]
    fn test_clamp_and_rate_limit() {
        assert_eq!(clamp(2.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-2.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.25, -1.0, 1.0), 0.25);
        assert!(clamp(std::f64::NAN, -1.0, 1.0).is_nan());

        assert_eq!(rate_limit(0.0, 1.0, 0.1), 0.1);
        assert_eq!(rate_limit(0.0, -1.0, 0.1), -0.1);
        assert_eq!(rate_limit(0.95, 1.0, 0.1), 1.0);
    }

    #[test]
    fn test_wrap_to_pi() {
        assert!((wrap_to_pi(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_to_pi(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert!((wrap_to_pi(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_min_jerk() {
        assert_eq!(min_jerk(0.0), 0.0);
        assert_eq!(min_jerk(1.0), 1.0);
        assert_eq!(min_jerk(0.5), 0.5);
        assert_eq!(min_jerk(-1.0), 0.0);
        assert_eq!(min_jerk(2.0), 1.0);

        // Monotonic
        let mut prev = 0.0;
        for i in 1..=100 {
            let v = min_jerk(i as f64 / 100.0);
            assert!(v >= prev);
            prev = v;
        }
    }
}
