//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the quadruped software: 
//! the types exchanged with the actuator network and the operator input 
//! device, and the zmq networking layer used to carry them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command and response definitions for equipment (like the leg actuators)
pub mod eqpt;

/// Network module
pub mod net;
