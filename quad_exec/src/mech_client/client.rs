//! Networked actuator client

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use std::time::Duration;

use comms_if::{
    eqpt::mech::{MechDems, MechDemsResponse, MechSensData},
    net::{zmq, MonitoredSocket, SocketOptions},
};

use super::{ActuatorGroup, MechClientError};
use crate::params::QuadExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client for the mechanisms server.
///
/// Demands go out over a request socket and are acknowledged by the server, sensor data is
/// published by the server and received on a subscriber socket.
pub struct MechClient {
    dems_socket: MonitoredSocket,

    sens_socket: MonitoredSocket,

    /// Receive timeout currently set on the sensor socket.
    sens_timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MechClient {
    /// Create a new instance of the mechanisms client.
    ///
    /// The sockets connect in the background, use `is_connected` to find out when the server has
    /// been reached.
    pub fn new(ctx: &zmq::Context, params: &QuadExecParams) -> Result<Self, MechClientError> {
        // Demands must be acknowledged within the cycle
        let dems_timeout_ms = duration_ms(params.cycle_period()).max(1);
        let sens_timeout_ms = duration_ms(params.fbk_timeout());

        let dems_socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions::request(dems_timeout_ms),
            &params.mech_dems_endpoint,
        )
        .map_err(MechClientError::SocketError)?;

        let sens_socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::subscriber(sens_timeout_ms),
            &params.mech_sens_endpoint,
        )
        .map_err(MechClientError::SocketError)?;
        sens_socket
            .set_subscribe(b"")
            .map_err(MechClientError::SocketOptionError)?;

        Ok(Self {
            dems_socket,
            sens_socket,
            sens_timeout_ms,
        })
    }
}

impl ActuatorGroup for MechClient {
    /// Get the latest sensor data message from the server.
    ///
    /// Blocks for at most `timeout` waiting for a message, then discards all but the newest
    /// queued message.
    fn get_feedback(&mut self, timeout: Duration) -> Result<MechSensData, MechClientError> {
        let timeout_ms = duration_ms(timeout);
        if timeout_ms != self.sens_timeout_ms {
            self.sens_socket
                .set_rcvtimeo(timeout_ms)
                .map_err(MechClientError::SocketOptionError)?;
            self.sens_timeout_ms = timeout_ms;
        }

        let mut latest = match self
            .sens_socket
            .recv_json::<MechSensData>(0)
            .map_err(MechClientError::NetError)?
        {
            Some(s) => s,
            None => return Err(MechClientError::FeedbackTimeout(timeout)),
        };

        let mut num_dropped = 0;
        while let Some(s) = self
            .sens_socket
            .recv_json::<MechSensData>(zmq::DONTWAIT)
            .map_err(MechClientError::NetError)?
        {
            latest = s;
            num_dropped += 1;
        }

        if num_dropped > 0 {
            trace!("Dropped {} old sensor data messages", num_dropped);
        }

        Ok(latest)
    }

    /// Send demands to the server.
    ///
    /// Succeeds only if the server acknowledges the demands as valid within the cycle period.
    fn send_command(&mut self, demands: &MechDems) -> Result<(), MechClientError> {
        // If not connected return now
        if !self.dems_socket.connected() {
            return Err(MechClientError::NotConnected);
        }

        self.dems_socket
            .send_json(demands)
            .map_err(MechClientError::NetError)?;

        match self
            .dems_socket
            .recv_json::<MechDemsResponse>(0)
            .map_err(MechClientError::NetError)?
        {
            Some(MechDemsResponse::DemsOk) => Ok(()),
            Some(r) => Err(MechClientError::DemsRejected(r)),
            None => Err(MechClientError::NoResponse),
        }
    }

    fn is_connected(&self) -> bool {
        self.dems_socket.connected() && self.sens_socket.connected()
    }
}

/// Milliseconds in a duration, rounded up so short timeouts don't become non-blocking.
fn duration_ms(d: Duration) -> i32 {
    let ms = (d.as_micros() + 999) / 1000;
    if ms > i32::MAX as u128 {
        i32::MAX
    } else {
        ms as i32
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Instant,
    };

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(Duration::from_micros(2500)), 3);
        assert_eq!(duration_ms(Duration::from_millis(5)), 5);
        assert_eq!(duration_ms(Duration::default()), 0);
    }

    #[test]
    fn test_exchange_with_server() {
        let ctx = zmq::Context::new();
        let params = QuadExecParams {
            mech_dems_endpoint: "tcp://127.0.0.1:45620".into(),
            mech_sens_endpoint: "tcp://127.0.0.1:45621".into(),
            cycle_period_s: 0.5,
            ..Default::default()
        };

        // Minimal mechanisms server
        let rep = MonitoredSocket::new(
            &ctx,
            zmq::REP,
            SocketOptions::server(),
            "tcp://127.0.0.1:45620",
        )
        .unwrap();
        let publisher = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            SocketOptions::server(),
            "tcp://127.0.0.1:45621",
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_server = stop.clone();
        let server = thread::spawn(move || {
            let mut sens = MechSensData::default();
            sens.pos_rad[0] = 0.25;

            while !stop_server.load(Ordering::Relaxed) {
                publisher.send_json(&sens).unwrap();

                if let Ok(Some(dems)) = rep.recv_json::<MechDems>(zmq::DONTWAIT) {
                    let resp = if dems.pos_rad.iter().all(|p| p.abs() < 10.0) {
                        MechDemsResponse::DemsOk
                    } else {
                        MechDemsResponse::DemsInvalid
                    };
                    rep.send_json(&resp).unwrap();
                }

                thread::sleep(Duration::from_millis(2));
            }
        });

        let mut client = MechClient::new(&ctx, &params).unwrap();

        let start = Instant::now();
        while !client.is_connected() {
            assert!(start.elapsed() < Duration::from_secs(5), "client never connected");
            thread::sleep(Duration::from_millis(10));
        }

        // Subscriptions take a moment to reach the publisher
        let mut fbk = None;
        for _ in 0..100 {
            if let Ok(f) = client.get_feedback(Duration::from_millis(50)) {
                fbk = Some(f);
                break;
            }
        }
        assert_eq!(fbk.map(|f| f.pos_rad[0]), Some(0.25));

        let mut dems = MechDems::default();
        client.send_command(&dems).unwrap();

        dems.pos_rad[3] = 20.0;
        match client.send_command(&dems) {
            Err(MechClientError::DemsRejected(MechDemsResponse::DemsInvalid)) => (),
            r => panic!("Expected rejected demands, got {:?}", r),
        }

        stop.store(true, Ordering::Relaxed);
        server.join().unwrap();
    }
}
