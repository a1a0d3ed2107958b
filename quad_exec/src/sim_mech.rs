//! # Simulated Mechanisms
//!
//! In-process stand in for the actuator modules, used when running without hardware and in tests.
//! Each joint follows its position demand with a first order lag, and each leg's base module IMU
//! reports the body attitude rotated onto the leg's mount.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::UnitQuaternion;
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    leg::{LegGeometry, NUM_JOINTS, NUM_LEGS},
    mech_client::{ActuatorGroup, MechClientError},
};
use comms_if::eqpt::mech::{MechDems, MechSensData};
use util::convert::Convert;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default joint response time constant.
const DEFAULT_TIME_CONSTANT_S: f64 = 0.02;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated actuator group.
pub struct SimMech {
    pos_rad: [f64; NUM_JOINTS],
    speed_rads: [f64; NUM_JOINTS],

    body_attitude: UnitQuaternion<f64>,
    mounts: [UnitQuaternion<f64>; NUM_LEGS],

    time_constant_s: f64,

    /// Simulated time step per feedback request, wall clock time if `None`.
    fixed_step: Option<Duration>,
    last_update: Option<Instant>,

    /// Delay applied to the next feedback request.
    stall: Option<Duration>,

    demands: Option<MechDems>,
    connected: bool,
    num_commands: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimMech {
    /// Create a simulation of the legs with the given geometry, joints starting at `initial_pos`.
    pub fn new(legs: &[LegGeometry; NUM_LEGS], initial_pos: [f64; NUM_JOINTS]) -> Self {
        let mut mounts = [UnitQuaternion::identity(); NUM_LEGS];
        for (m, geom) in mounts.iter_mut().zip(legs.iter()) {
            *m = geom.mount_rotation();
        }

        Self {
            pos_rad: initial_pos,
            speed_rads: [0.0; NUM_JOINTS],
            body_attitude: UnitQuaternion::identity(),
            mounts,
            time_constant_s: DEFAULT_TIME_CONSTANT_S,
            fixed_step: None,
            last_update: None,
            stall: None,
            demands: None,
            connected: true,
            num_commands: 0,
        }
    }

    /// Advance the simulation by `step` on every feedback request instead of by wall clock time.
    pub fn with_fixed_step(mut self, step: Duration) -> Self {
        self.fixed_step = Some(step);
        self
    }

    pub fn with_time_constant(mut self, time_constant_s: f64) -> Self {
        self.time_constant_s = time_constant_s;
        self
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Set the attitude of the body in the world, seen by the module IMUs.
    pub fn set_body_attitude(&mut self, attitude: UnitQuaternion<f64>) {
        self.body_attitude = attitude;
    }

    /// Block the next feedback request for `delay`.
    pub fn stall_next(&mut self, delay: Duration) {
        self.stall = Some(delay);
    }

    /// Number of demands received.
    pub fn command_count(&self) -> u64 {
        self.num_commands
    }

    pub fn last_demands(&self) -> Option<&MechDems> {
        self.demands.as_ref()
    }

    pub fn positions(&self) -> &[f64; NUM_JOINTS] {
        &self.pos_rad
    }

    fn step(&mut self) {
        let now = Instant::now();
        let dt_s = match (self.fixed_step, self.last_update) {
            (Some(step), _) => step.as_secs_f64(),
            (None, Some(last)) => now.duration_since(last).as_secs_f64(),
            (None, None) => 0.0,
        };
        self.last_update = Some(now);

        let demands = match self.demands {
            Some(ref d) => d,
            None => return,
        };

        let alpha = if self.time_constant_s > 0.0 {
            1.0 - (-dt_s / self.time_constant_s).exp()
        } else {
            1.0
        };

        for i in 0..NUM_JOINTS {
            let delta = (demands.pos_rad[i] - self.pos_rad[i]) * alpha;
            self.pos_rad[i] += delta;
            self.speed_rads[i] = if dt_s > 0.0 { delta / dt_s } else { 0.0 };
        }
    }
}

impl ActuatorGroup for SimMech {
    fn get_feedback(&mut self, _timeout: Duration) -> Result<MechSensData, MechClientError> {
        if let Some(delay) = self.stall.take() {
            debug!("SimMech stalling for {:?}", delay);
            thread::sleep(delay);
        }

        if !self.connected {
            return Err(MechClientError::NotConnected);
        }

        self.step();

        let mut imu_attitude_q = [None; NUM_LEGS];
        for (q, mount) in imu_attitude_q.iter_mut().zip(self.mounts.iter()) {
            *q = Some((self.body_attitude * mount).convert());
        }

        Ok(MechSensData {
            pos_rad: self.pos_rad,
            speed_rads: self.speed_rads,
            effort_nm: self
                .demands
                .as_ref()
                .map(|d| d.effort_nm)
                .unwrap_or([0.0; NUM_JOINTS]),
            imu_attitude_q,
        })
    }

    fn send_command(&mut self, demands: &MechDems) -> Result<(), MechClientError> {
        if !self.connected {
            return Err(MechClientError::NotConnected);
        }

        self.demands = Some(demands.clone());
        self.num_commands += 1;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    fn sim() -> SimMech {
        SimMech::new(&LegGeometry::default_all(), [0.0; NUM_JOINTS])
            .with_fixed_step(Duration::from_millis(5))
    }

    #[test]
    fn test_tracks_demands() {
        let mut sim = sim();
        let dems = MechDems::hold([1.0; NUM_JOINTS], [0.5; NUM_JOINTS]);
        sim.send_command(&dems).unwrap();

        // One time constant
        for _ in 0..4 {
            sim.get_feedback(Duration::default()).unwrap();
        }
        let expected = 1.0 - (-1.0f64).exp();
        assert!((sim.positions()[0] - expected).abs() < 1e-9);

        for _ in 0..200 {
            sim.get_feedback(Duration::default()).unwrap();
        }
        let fbk = sim.get_feedback(Duration::default()).unwrap();
        assert!(fbk.pos_rad.iter().all(|p| (p - 1.0).abs() < 1e-6));
        assert_eq!(fbk.effort_nm, [0.5; NUM_JOINTS]);
        assert_eq!(sim.command_count(), 1);
    }

    #[test]
    fn test_imu_attitudes() {
        let mut sim = sim();
        let tilt = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1);
        sim.set_body_attitude(tilt);

        let fbk = sim.get_feedback(Duration::default()).unwrap();
        let geoms = LegGeometry::default_all();

        for (q, geom) in fbk.imu_attitude_q.iter().zip(geoms.iter()) {
            let q: UnitQuaternion<f64> = q.unwrap().convert();
            assert!(q.angle_to(&(tilt * geom.mount_rotation())) < 1e-9);
        }
    }

    #[test]
    fn test_disconnected() {
        let mut sim = sim();
        sim.set_connected(false);

        assert!(!sim.is_connected());
        assert!(sim.get_feedback(Duration::default()).is_err());
        assert!(sim.send_command(&MechDems::default()).is_err());
        assert_eq!(sim.command_count(), 0);
    }
}
