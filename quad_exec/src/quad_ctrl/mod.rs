//! # Quadruped control module
//!
//! Turns the behaviour chosen by the control state machine into joint demands: foot targets for
//! every leg, inverse kinematics, joint limiting and gravity compensating efforts.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod postures;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use params::*;
pub use postures::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during QuadCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum QuadCtrlError {
    #[error("No valid joint positions have been received or commanded yet")]
    NoFeedback,

    #[error("The computed demands contain non-finite values: {0:?}")]
    NonFiniteOutput(comms_if::eqpt::mech::MechDems),
}
