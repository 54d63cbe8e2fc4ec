//!
//! src/throttle.rs
//!
//! Blocking waits used for cooldowns, backoff and write pacing
//!

use std::time::Duration;

/// Every sleep in the pipeline goes through this so tests can observe it
pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Fixed delay after each remote write, successful or not
pub struct RateGate<'p> {
    interval: Duration,
    pause: &'p dyn Pause
}

impl<'p> RateGate<'p> {
    pub fn new(interval: Duration, pause: &'p dyn Pause) -> Self {
        Self { interval, pause }
    }

    pub fn wait(&self) {
        self.pause.pause(self.interval);
    }
}
