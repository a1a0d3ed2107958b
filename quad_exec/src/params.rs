//! # Quadruped Executable Parameters
//!
//! This module provide parameters for the quadruped executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadExecParams {
    /// Target period of the control cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Longest wait for actuator feedback in a cycle.
    ///
    /// Units: seconds
    pub fbk_timeout_s: f64,

    /// Network endpoint for the mechanisms demands socket
    pub mech_dems_endpoint: String,

    /// Network endpoint for the mechanisms sensor data socket
    pub mech_sens_endpoint: String,

    /// Network endpoint the operator input device publishes on
    pub input_endpoint: String,

    /// Time allowed for the actuators (and input device if required) to connect at start up.
    ///
    /// Units: seconds
    pub connect_timeout_s: f64,

    /// If true the executable refuses to start without a connected input device.
    pub require_input_device: bool,

    /// What to do when the operator input device disconnects.
    pub disconnect_policy: DisconnectPolicy,

    /// Consecutive cycles with an unreachable foot target before holding position.
    pub max_consec_unreachable: u64,

    /// Consecutive cycles with an unreachable foot target before stopping the control loop.
    pub abort_consec_unreachable: u64,

    /// Write the actuator feedback to the session archive.
    pub archive_feedback: bool,

    /// Drive simulated actuators instead of the networked ones.
    pub use_sim: bool,

    /// Period at which the input device is polled.
    ///
    /// Units: seconds
    pub input_poll_period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Behaviour when the operator input device disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectPolicy {
    /// Keep executing the last command received while the device was connected.
    ContinueLastCommand,

    /// Hold position until the device reconnects.
    SafeStop,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for QuadExecParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.005,
            fbk_timeout_s: 0.002,
            mech_dems_endpoint: String::from("tcp://localhost:5020"),
            mech_sens_endpoint: String::from("tcp://localhost:5021"),
            input_endpoint: String::from("tcp://localhost:5030"),
            connect_timeout_s: 5.0,
            require_input_device: false,
            disconnect_policy: DisconnectPolicy::ContinueLastCommand,
            max_consec_unreachable: 20,
            abort_consec_unreachable: 400,
            archive_feedback: false,
            use_sim: false,
            input_poll_period_s: 0.01,
        }
    }
}

impl QuadExecParams {
    pub fn cycle_period(&self) -> Duration {
        duration_from_s(self.cycle_period_s)
    }

    pub fn fbk_timeout(&self) -> Duration {
        duration_from_s(self.fbk_timeout_s)
    }

    pub fn connect_timeout(&self) -> Duration {
        duration_from_s(self.connect_timeout_s)
    }

    pub fn input_poll_period(&self) -> Duration {
        duration_from_s(self.input_poll_period_s)
    }
}

/// Duration from a number of seconds, zero for negative or non-finite values.
pub fn duration_from_s(s: f64) -> Duration {
    if s.is_finite() && s > 0.0 {
        Duration::from_secs_f64(s)
    } else {
        Duration::default()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_params() {
        let params: QuadExecParams = util::params::parse(
            r#"
            cycle_period_s = 0.01
            disconnect_policy = "SafeStop"
            "#,
        )
        .unwrap();

        assert_eq!(params.cycle_period(), Duration::from_millis(10));
        assert_eq!(params.disconnect_policy, DisconnectPolicy::SafeStop);
        assert_eq!(params.max_consec_unreachable, 20);
    }

    #[test]
    fn test_shipped_params() {
        let params: QuadExecParams =
            util::params::parse(include_str!("../../params/quad_exec.toml")).unwrap();
        assert_eq!(params.cycle_period(), Duration::from_millis(5));
    }

    #[test]
    fn test_bad_durations() {
        assert_eq!(duration_from_s(-1.0), Duration::default());
        assert_eq!(duration_from_s(f64::NAN), Duration::default());
    }
}
