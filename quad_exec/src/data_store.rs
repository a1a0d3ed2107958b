//! # Data Store
//!
//! Everything the control thread owns across cycles: the state machine, the controller and their
//! inputs and outputs, the safe mode bookkeeping and the monitoring counters.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use std::time::Duration;

use comms_if::eqpt::{input::InputSample, mech::MechDems};

use crate::{
    ctrl_sm::{CtrlSm, StepOutput},
    quad_ctrl::{self, QuadCtrl},
};

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Gives the reason the robot has been put into safe mode
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SafeModeCause {
    /// The actuator group stopped answering.
    ActuatorsNotConnected,

    /// The operator input device disconnected under the safe stop policy.
    OperatorDisconnected,

    /// A foot target stayed unreachable for too many cycles.
    PersistentUnreachable,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Data store for the control thread.
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// Measured time since the start of the previous cycle
    pub dt: Duration,

    // Safe mode variables
    /// Determines if the robot is in safe mode.
    pub safe: bool,

    /// Gives the reason for the robot being in safe mode.
    pub safe_cause: Option<SafeModeCause>,

    // Operator input
    /// Latest operator command
    pub input: InputSample,

    /// True while the operator input device is connected
    pub input_connected: bool,

    // Control
    pub ctrl_sm: CtrlSm,
    pub ctrl_sm_output: Option<StepOutput>,

    pub quad_ctrl: QuadCtrl,
    pub quad_ctrl_input: quad_ctrl::InputData,
    pub quad_ctrl_output: Option<MechDems>,
    pub quad_ctrl_status_rpt: Option<quad_ctrl::StatusReport>,

    // Monitoring Counters
    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,

    /// Number of consecutive cycles with an unreachable foot target
    pub num_consec_unreachable: u64,

    /// Number of consecutive cycles without actuator feedback
    pub num_consec_fbk_errors: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl Default for DataStore {
    fn default() -> Self {
        Self::new(QuadCtrl::default())
    }
}

impl DataStore {
    /// Build the data store around an initialised controller.
    pub fn new(quad_ctrl: QuadCtrl) -> Self {
        Self {
            num_cycles: 0,
            dt: Duration::default(),
            safe: false,
            safe_cause: None,
            input: InputSample::default(),
            input_connected: true,
            ctrl_sm: CtrlSm::new(quad_ctrl.params().ctrl_sm.clone()),
            ctrl_sm_output: None,
            quad_ctrl,
            quad_ctrl_input: quad_ctrl::InputData::default(),
            quad_ctrl_output: None,
            quad_ctrl_status_rpt: None,
            num_consec_cycle_overruns: 0,
            num_consec_unreachable: 0,
            num_consec_fbk_errors: 0,
        }
    }

    /// Puts the robot into safe mode with the given cause.
    pub fn make_safe(&mut self, cause: SafeModeCause) {
        if !self.safe {
            warn!("Make safe requested, cause: {:?}", cause);
            self.safe = true;
            self.safe_cause = Some(cause);

            self.quad_ctrl.make_safe();
        }
    }

    /// Attempts to disable the safe mode by clearing the given cause.
    ///
    /// Returns `Ok(())` if this cause was cleared and safe mode was disabled, or `Err(())`
    /// otherwise. To remove safe mode the provided cause must match the initial reason for safe
    /// mode being enabled.
    ///
    /// If safe mode was not enabled `Ok(())` is returned
    pub fn make_unsafe(&mut self, cause: SafeModeCause) -> Result<(), ()> {
        if !self.safe {
            return Ok(());
        }

        match self.safe_cause {
            Some(root_cause) if root_cause == cause => {
                self.safe = false;
                self.safe_cause = None;
                self.num_consec_unreachable = 0;
                self.quad_ctrl.clear_safe();
                info!("Make unsafe requested, root cause match, safe mode disabled");
                Ok(())
            }
            Some(_) => Err(()),
            None => Ok(()),
        }
    }

    /// Perform actions required at the start of a cycle.
    ///
    /// Clears the outputs of the previous cycle and records the measured cycle time.
    pub fn cycle_start(&mut self, dt: Duration) {
        self.dt = dt;
        self.ctrl_sm_output = None;
        self.quad_ctrl_output = None;
    }

    /// Perform actions required at the end of a cycle.
    pub fn cycle_end(&mut self) {
        self.num_cycles += 1;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_safe_mode_causes() {
        let mut ds = DataStore::default();

        assert_eq!(ds.make_unsafe(SafeModeCause::OperatorDisconnected), Ok(()));

        ds.make_safe(SafeModeCause::OperatorDisconnected);
        assert!(ds.safe);
        assert!(ds.quad_ctrl.is_safe());

        // The first cause sticks
        ds.make_safe(SafeModeCause::ActuatorsNotConnected);
        assert_eq!(ds.safe_cause, Some(SafeModeCause::OperatorDisconnected));

        assert_eq!(ds.make_unsafe(SafeModeCause::ActuatorsNotConnected), Err(()));
        assert!(ds.quad_ctrl.is_safe());

        assert_eq!(ds.make_unsafe(SafeModeCause::OperatorDisconnected), Ok(()));
        assert!(!ds.safe);
        assert!(!ds.quad_ctrl.is_safe());
        assert_eq!(ds.safe_cause, None);
    }
}
