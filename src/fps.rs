//! Frame-rate limiting and measurement
//!
//! [`FpsLimiter`] caps the main loop to a target iteration rate by sleeping
//! the remainder of each frame budget; the sleep is sliced so a tripped
//! [`CancelToken`] interrupts it promptly. [`FpsCounter`] is the rolling
//! achieved-iterations/second measurement used for both the processing rate
//! and the poster rate in the status line.

use std::time::{Duration, Instant};

use crate::types::CancelToken;

/// Granularity of the sliced limiter sleep
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Returned by [`FpsLimiter::sync`] when the cancel token tripped mid-sleep.
///
/// Cancellation is intentional, not a failure; callers propagate the stop
/// instead of swallowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Caps loop iteration rate to a configurable target
#[derive(Debug)]
pub struct FpsLimiter {
    target_fps: u32,
    last_sync: Instant,
}

impl FpsLimiter {
    /// Create a limiter for the given target rate (0 disables throttling)
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps,
            last_sync: Instant::now(),
        }
    }

    /// Current target rate
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    /// Change the target rate; takes effect on the next `sync`
    pub fn set_target_fps(&mut self, target_fps: u32) {
        self.target_fps = target_fps;
    }

    /// Block for the remainder of the current frame budget.
    ///
    /// Sleeps in small slices, checking the token between slices, so a
    /// `destroy()` from another thread interrupts the wait within one slice.
    pub fn sync(&mut self, cancel: &CancelToken) -> Result<(), Interrupted> {
        if self.target_fps == 0 {
            std::thread::yield_now();
            self.last_sync = Instant::now();
            return if cancel.is_cancelled() {
                Err(Interrupted)
            } else {
                Ok(())
            };
        }

        let budget = Duration::from_secs(1) / self.target_fps;
        loop {
            if cancel.is_cancelled() {
                return Err(Interrupted);
            }
            let elapsed = self.last_sync.elapsed();
            if elapsed >= budget {
                break;
            }
            std::thread::sleep((budget - elapsed).min(SLEEP_SLICE));
        }

        self.last_sync = Instant::now();
        Ok(())
    }
}

/// Rolling measurement of achieved iterations per second
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    fps: u32,
    window_start: Instant,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    /// Create a counter reading 0 until the first window completes
    pub fn new() -> Self {
        Self {
            frames: 0,
            fps: 0,
            window_start: Instant::now(),
        }
    }

    /// Record one iteration; rolls the measurement window every second
    pub fn update(&mut self) {
        self.frames += 1;
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.fps = self.frames;
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }

    /// Most recently completed window's iterations/second
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Reset the counter to its initial state
    pub fn reset(&mut self) {
        self.frames = 0;
        self.fps = 0;
        self.window_start = Instant::now();
    }
}
