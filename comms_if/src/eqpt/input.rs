//! # Operator Input Samples
//!
//! The operator input device (a joystick or a teleoperation station) 
//! publishes [`InputSample`]s as JSON. Only the latest sample matters, older
//! samples are superseded rather than replayed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A snapshot of the operator's commands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct InputSample {
    /// Normalised translation velocity command (x forward, y left, z up), each axis in [-1, 1].
    pub translation_vel_cmd: [f64; 3],

    /// Normalised rotation velocity command (roll, pitch, yaw), each axis in [-1, 1].
    pub rotation_vel_cmd: [f64; 3],

    /// Set when the operator asks for the control session to end.
    pub quit_requested: bool,

    /// False if the device itself reports it has lost its operator (e.g. 
    /// joystick unplugged).
    pub connected: bool
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InputSample {
    /// Sample with every axis clamped into `[-1, 1]`, non-finite axes zeroed.
    pub fn sanitised(&self) -> Self {
        let clean = |v: [f64; 3]| {
            let mut out = [0.0; 3];
            for (o, i) in out.iter_mut().zip(v.iter()) {
                if i.is_finite() {
                    *o = i.max(-1.0).min(1.0);
                }
            }
            out
        };

        Self {
            translation_vel_cmd: clean(self.translation_vel_cmd),
            rotation_vel_cmd: clean(self.rotation_vel_cmd),
            ..*self
        }
    }
}

impl Default for InputSample {
    fn default() -> Self {
        Self {
            translation_vel_cmd: [0.0; 3],
            rotation_vel_cmd: [0.0; 3],
            quit_requested: false,
            connected: true
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_json() {
        let s: InputSample = serde_json::from_str(r#"{"quit_requested": true}"#).unwrap();
        assert!(s.quit_requested);
        assert!(s.connected);
        assert_eq!(s.translation_vel_cmd, [0.0; 3]);
    }

    #[test]
    fn test_sanitised() {
        let s = InputSample {
            translation_vel_cmd: [2.0, -0.5, std::f64::NAN],
            rotation_vel_cmd: [-3.0, 0.25, std::f64::INFINITY],
            ..Default::default()
        }.sanitised();

        assert_eq!(s.translation_vel_cmd, [1.0, -0.5, 0.0]);
        assert_eq!(s.rotation_vel_cmd, [-1.0, 0.25, 0.0]);
    }
}
