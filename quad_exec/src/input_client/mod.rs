//! # Input Client
//!
//! Operator input devices. Every device is polled through the [`InputDevice`] trait, and the
//! [`InputSampler`] polls one in the background publishing the latest [`InputSample`] to the
//! control loop.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod client;
mod sampler;
mod scripted;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::{MonitoredSocketError, NetError};
use util::script_interpreter::ScriptError;

pub use client::InputClient;
pub use comms_if::eqpt::input::InputSample;
pub use sampler::{latest_sample, Drained, InputSampler};
pub use scripted::ScriptedInput;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// An operator input device.
pub trait InputDevice {
    /// Poll the device for new commands.
    fn update(&mut self) -> Result<(), InputClientError>;

    /// Normalised translation velocity command (x forward, y left, z up).
    fn translation_velocity_cmd(&self) -> [f64; 3];

    /// Normalised rotation velocity command (roll, pitch, yaw).
    fn rotation_velocity_cmd(&self) -> [f64; 3];

    fn quit_requested(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Snapshot of the device's current state.
    fn sample(&self) -> InputSample {
        InputSample {
            translation_vel_cmd: self.translation_velocity_cmd(),
            rotation_vel_cmd: self.rotation_velocity_cmd(),
            quit_requested: self.quit_requested(),
            connected: self.is_connected(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A device which is always connected and never commands anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInput;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum InputClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not set a socket option: {0}")]
    SocketOptionError(comms_if::net::zmq::Error),

    #[error("Could not receive input: {0}")]
    NetError(NetError),

    #[error("Could not load the input script: {0}")]
    ScriptError(ScriptError),

    #[error("Could not spawn the input sampler thread: {0}")]
    ThreadError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InputDevice for NullInput {
    fn update(&mut self) -> Result<(), InputClientError> {
        Ok(())
    }

    fn translation_velocity_cmd(&self) -> [f64; 3] {
        [0.0; 3]
    }

    fn rotation_velocity_cmd(&self) -> [f64; 3] {
        [0.0; 3]
    }

    fn quit_requested(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        true
    }
}

impl<D: InputDevice + ?Sized> InputDevice for Box<D> {
    fn update(&mut self) -> Result<(), InputClientError> {
        (**self).update()
    }

    fn translation_velocity_cmd(&self) -> [f64; 3] {
        (**self).translation_velocity_cmd()
    }

    fn rotation_velocity_cmd(&self) -> [f64; 3] {
        (**self).rotation_velocity_cmd()
    }

    fn quit_requested(&self) -> bool {
        (**self).quit_requested()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
