//! Networked operator input device

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;

use comms_if::{
    eqpt::input::InputSample,
    net::{zmq, MonitoredSocket, SocketOptions},
};

use super::{InputClientError, InputDevice};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Receives the [`InputSample`]s published by the operator station.
pub struct InputClient {
    socket: MonitoredSocket,

    latest: InputSample,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InputClient {
    /// Connect to the input device publishing on `endpoint`.
    ///
    /// No motion is commanded until the first sample arrives.
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self, InputClientError> {
        let socket = MonitoredSocket::new(ctx, zmq::SUB, SocketOptions::subscriber(0), endpoint)
            .map_err(InputClientError::SocketError)?;
        socket
            .set_subscribe(b"")
            .map_err(InputClientError::SocketOptionError)?;

        Ok(Self {
            socket,
            latest: InputSample::default(),
        })
    }
}

impl InputDevice for InputClient {
    /// Take the newest sample waiting on the socket, if there is one.
    fn update(&mut self) -> Result<(), InputClientError> {
        while let Some(sample) = self
            .socket
            .recv_json::<InputSample>(zmq::DONTWAIT)
            .map_err(InputClientError::NetError)?
        {
            trace!("Input sample: {:?}", sample);
            self.latest = sample;
        }

        Ok(())
    }

    fn translation_velocity_cmd(&self) -> [f64; 3] {
        self.latest.translation_vel_cmd
    }

    fn rotation_velocity_cmd(&self) -> [f64; 3] {
        self.latest.rotation_vel_cmd
    }

    fn quit_requested(&self) -> bool {
        self.latest.quit_requested
    }

    /// Connected if the socket is and the device itself reports an operator.
    fn is_connected(&self) -> bool {
        self.socket.connected() && self.latest.connected
    }
}
