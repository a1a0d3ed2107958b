//! Operator input replayed from a script

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::{path::Path, time::Instant};

use comms_if::eqpt::input::InputSample;
use util::script_interpreter::{Pending, ScriptInterpreter};

use super::{InputClientError, InputDevice};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Replays a timed script of [`InputSample`]s.
///
/// The script's clock starts at the first update. Once every entry has been applied the next
/// update requests a quit.
pub struct ScriptedInput {
    interp: ScriptInterpreter<InputSample>,

    start: Option<Instant>,

    latest: InputSample,

    finished: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScriptedInput {
    /// Load the script at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, InputClientError> {
        let interp = ScriptInterpreter::new(path).map_err(InputClientError::ScriptError)?;

        info!(
            "Loaded input script with {} entries over {:.2} s",
            interp.get_num_pending(),
            interp.get_duration()
        );

        Ok(Self::from_interpreter(interp))
    }

    pub fn from_interpreter(interp: ScriptInterpreter<InputSample>) -> Self {
        Self {
            interp,
            start: None,
            latest: InputSample::default(),
            finished: false,
        }
    }

    /// Apply the entries due `now_s` seconds after the script started.
    pub fn update_at(&mut self, now_s: f64) {
        match self.interp.get_pending(now_s) {
            Pending::None => (),
            Pending::Some(samples) => {
                if let Some(last) = samples.last() {
                    self.latest = *last;
                }
            }
            Pending::EndOfScript => {
                if !self.finished {
                    info!("End of input script");
                    self.finished = true;
                }
            }
        }
    }
}

impl InputDevice for ScriptedInput {
    fn update(&mut self) -> Result<(), InputClientError> {
        let start = *self.start.get_or_insert_with(Instant::now);
        self.update_at(start.elapsed().as_secs_f64());
        Ok(())
    }

    fn translation_velocity_cmd(&self) -> [f64; 3] {
        self.latest.translation_vel_cmd
    }

    fn rotation_velocity_cmd(&self) -> [f64; 3] {
        self.latest.rotation_vel_cmd
    }

    fn quit_requested(&self) -> bool {
        self.finished || self.latest.quit_requested
    }

    fn is_connected(&self) -> bool {
        self.latest.connected
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
        0.0: {"translation_vel_cmd": [0.5, 0.0, 0.0]};
        1.0: {"rotation_vel_cmd": [0.0, 0.2, 0.0]};
        1.0: {"rotation_vel_cmd": [0.0, 0.4, 0.0]};
        2.0: {"connected": false};
    "#;

    #[test]
    fn test_replay() {
        let interp = ScriptInterpreter::from_str(SCRIPT).unwrap();
        let mut input = ScriptedInput::from_interpreter(interp);

        input.update_at(0.0);
        assert_eq!(input.translation_velocity_cmd(), [0.5, 0.0, 0.0]);
        assert!(input.is_connected());

        // Entries due together are all applied, the last one wins
        input.update_at(1.5);
        assert_eq!(input.translation_velocity_cmd(), [0.0; 3]);
        assert_eq!(input.rotation_velocity_cmd(), [0.0, 0.4, 0.0]);
        assert!(!input.quit_requested());

        input.update_at(2.0);
        assert!(!input.is_connected());
        assert!(!input.quit_requested());

        input.update_at(2.1);
        assert!(input.quit_requested());
        assert!(input.sample().quit_requested);
    }

    #[test]
    fn test_demo_script() {
        let interp: ScriptInterpreter<InputSample> =
            ScriptInterpreter::from_str(include_str!("../../../scripts/tilt_demo.qs")).unwrap();
        assert_eq!(interp.get_duration(), 14.0);

        let mut input = ScriptedInput::from_interpreter(interp);
        input.update_at(9.0);
        assert_eq!(input.rotation_velocity_cmd(), [0.0, 0.5, 0.0]);
        assert!(!input.quit_requested());

        input.update_at(14.0);
        assert!(input.quit_requested());
    }
}
