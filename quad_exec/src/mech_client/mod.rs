//! # Mechanisms Client
//!
//! This module provides the interface to the actuator modules: the [`ActuatorGroup`] trait, and
//! its networked implementation connecting to the mechanisms server.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

#[cfg(feature = "mech")]
mod client;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::{
    eqpt::mech::{MechDems, MechDemsResponse, MechSensData},
    net::{zmq, MonitoredSocketError, NetError},
};

#[cfg(feature = "mech")]
pub use client::MechClient;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A group of actuators which can be commanded and report their state.
pub trait ActuatorGroup {
    /// Get the latest feedback, waiting at most `timeout` for it to arrive.
    fn get_feedback(&mut self, timeout: Duration) -> Result<MechSensData, MechClientError>;

    /// Send demands to the actuators.
    fn send_command(&mut self, demands: &MechDems) -> Result<(), MechClientError>;

    /// Whether the actuators can currently be reached.
    fn is_connected(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MechClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not set a socket option: {0}")]
    SocketOptionError(zmq::Error),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not exchange messages with the server: {0}")]
    NetError(NetError),

    #[error("The server did not respond to the demands")]
    NoResponse,

    #[error("The server rejected the demands: {0:?}")]
    DemsRejected(MechDemsResponse),

    #[error("No feedback received within {0:?}")]
    FeedbackTimeout(Duration),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<A: ActuatorGroup + ?Sized> ActuatorGroup for Box<A> {
    fn get_feedback(&mut self, timeout: Duration) -> Result<MechSensData, MechClientError> {
        (**self).get_feedback(timeout)
    }

    fn send_command(&mut self, demands: &MechDems) -> Result<(), MechClientError> {
        (**self).send_command(demands)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
