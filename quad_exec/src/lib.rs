//! # Quadruped library.
//!
//! This library allows other crates in the workspace, and the integration tests, to access items
//! defined inside the quadruped crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Body pose - orientation estimate, balance target and balance correction
pub mod body_pose;

/// Control loop - the fixed rate cycle run on the control thread
pub mod control_loop;

/// Control state machine - stand-up sequence and steady states
pub mod ctrl_sm;

/// Data store - state shared between the stages of a control cycle
pub mod data_store;

/// Gait scheduler - alternating swing and stance of the two leg groups
pub mod gait;

/// Input client - operator input devices and their background sampler
pub mod input_client;

/// Leg model - per leg kinematics and compensation torques
pub mod leg;

/// Mechanisms client - sends actuator demands to the mechanisms server
pub mod mech_client;

/// Executable parameters
pub mod params;

/// Quadruped control module - converts behaviours into joint demands
pub mod quad_ctrl;

/// Simulated mechanisms - in-process actuators for running without hardware
pub mod sim_mech;
