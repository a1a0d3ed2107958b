//! Background polling of an input device

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use super::{InputClientError, InputDevice, InputSample};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// What was waiting on the sampler's channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drained {
    /// Newest sample, if any arrived since the last drain.
    pub latest: Option<InputSample>,

    /// False once the sampler has stopped and its channel is empty.
    pub sampler_alive: bool,
}

/// Handle to the thread polling the operator input device.
pub struct InputSampler {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InputSampler {
    /// Start polling `device` every `period`.
    ///
    /// Each poll publishes the device's sample on the returned channel. The thread runs until
    /// `stop` is set or the receiver is dropped.
    pub fn spawn<D>(
        mut device: D,
        period: Duration,
        stop: Arc<AtomicBool>,
    ) -> Result<(Self, Receiver<InputSample>), InputClientError>
    where
        D: InputDevice + Send + 'static,
    {
        let (tx, rx) = channel();
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("input_sampler".into())
            .spawn(move || {
                let mut failing = false;

                while !thread_stop.load(Ordering::Relaxed) {
                    let poll_start = Instant::now();

                    let sample = match device.update() {
                        Ok(()) => {
                            if failing {
                                info!("Input device polling recovered");
                                failing = false;
                            }
                            device.sample()
                        }
                        Err(e) => {
                            if !failing {
                                warn!("Could not poll the input device: {}", e);
                                failing = true;
                            }
                            InputSample {
                                connected: false,
                                ..device.sample()
                            }
                        }
                    };

                    if tx.send(sample).is_err() {
                        debug!("Input receiver dropped");
                        break;
                    }

                    if let Some(d) = period.checked_sub(poll_start.elapsed()) {
                        thread::sleep(d);
                    }
                }

                debug!("Input sampler stopped");
            })
            .map_err(InputClientError::ThreadError)?;

        Ok((
            Self {
                handle: Some(handle),
                stop,
            },
            rx,
        ))
    }

    /// Stop the thread and wait for it to exit.
    pub fn join(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("Input sampler thread panicked");
            }
        }
    }
}

impl Drop for InputSampler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Take everything waiting on `rx` without blocking, keeping the newest sample.
pub fn latest_sample(rx: &Receiver<InputSample>) -> Drained {
    let mut drained = Drained {
        latest: None,
        sampler_alive: true,
    };

    loop {
        match rx.try_recv() {
            Ok(s) => drained.latest = Some(s),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                drained.sampler_alive = false;
                break;
            }
        }
    }

    drained
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
