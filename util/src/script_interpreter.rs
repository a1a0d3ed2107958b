//! # Timed script interpreter
//!
//! Scripts are plain text files made of timestamped JSON payloads:
//!
//! ```text
//! 0.0: {"translation_vel_cmd": [0.0, 0.0, 0.0], ...};
//! 2.5: {"quit_requested": true, ...};
//! ```
//!
//! Each entry is `<time_s>: <json>;` and must start on its own line. The 
//! interpreter releases the payloads whose time has passed, in script order.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::fs;
use regex::RegexBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A payload which is scripted to occur at a specific time.
struct Command<T> {
    /// The time the payload becomes due, relative to the script start
    exec_time_s: f64,

    payload: T
}

/// A script interpreter.
///
/// After initialising with the path to the script use `.get_pending` to
/// acquire the payloads which have become due.
pub struct ScriptInterpreter<T> {
    script_path: Option<PathBuf>,
    cmds: VecDeque<Command<T>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script timestamps must not decrease, found {1} s after {0} s")]
    NonMonotonic(f64, f64),

    #[error("Script contains an invalid payload at {0} s: {1}")]
    InvalidPayload(f64, serde_json::Error)
}

/// Result of polling the interpreter.
#[derive(Debug, PartialEq)]
pub enum Pending<T> {
    None,
    Some(Vec<T>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T: DeserializeOwned> ScriptInterpreter<T> {

    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = PathBuf::from(script_path.as_ref());
        
        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        let script = fs::read_to_string(&path)
            .map_err(ScriptError::ScriptLoadError)?;

        let mut interp = Self::from_str(&script)?;
        interp.script_path = Some(path);

        Ok(interp)
    }

    /// Create a new interpreter from the text of a script.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        let mut queue: VecDeque<Command<T>> = VecDeque::new();

        // Go through the script executing __the magic regex__.
        let re = match RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
        {
            Ok(r) => r,
            Err(e) => return Err(ScriptError::InvalidTimestamp(format!("{}", e)))
        };

        for cap in re.captures_iter(script) {
            let (time_str, payload_str) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(p)) => (t.as_str(), p.as_str()),
                _ => continue
            };

            let exec_time_s: f64 = time_str.parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            if let Some(prev) = queue.back() {
                if exec_time_s < prev.exec_time_s {
                    return Err(ScriptError::NonMonotonic(prev.exec_time_s, exec_time_s));
                }
            }

            let payload = serde_json::from_str(payload_str)
                .map_err(|e| ScriptError::InvalidPayload(exec_time_s, e))?;

            queue.push_back(Command {
                exec_time_s,
                payload
            });
        }

        if queue.is_empty() {
            return Err(ScriptError::ScriptEmpty)
        }

        Ok(ScriptInterpreter {
            script_path: None,
            cmds: queue
        })
    }
}

impl<T> ScriptInterpreter<T> {
    /// Return the payloads due at `now_s` (seconds since the script started).
    pub fn get_pending(&mut self, now_s: f64) -> Pending<T> {
        if self.cmds.is_empty() {
            return Pending::EndOfScript
        }

        let mut due = vec![];

        while let Some(cmd) = self.cmds.front() {
            if cmd.exec_time_s > now_s {
                break;
            }
            if let Some(cmd) = self.cmds.pop_front() {
                due.push(cmd.payload);
            }
        }

        if due.is_empty() {
            Pending::None
        }
        else {
            Pending::Some(due)
        }
    }

    /// Get the number of payloads still waiting in the script
    pub fn get_num_pending(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64
        }
    }

    /// The path the script was loaded from, if any.
    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
