// SPDX-License-Identifier: GPL-3.0-only

//! Sensor refresh timing
//!
//! The image sensor reads frames out of an onboard buffer with a bounded
//! refresh rate. After the LED changes state, or after a snapshot, the next
//! snapshot must wait long enough that every row of the rolling shutter has
//! been exposed under the new illumination. [`RefreshGate`] enforces that
//! wait; [`Clock`] lets tests and the synthetic rig run on simulated time.

use crate::constants::timing::{FPS_SMOOTHING, ROLLING_SHUTTER_FACTOR};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Source of time for the capture sequence
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: time only moves when someone sleeps or advances it
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Waits out the sensor refresh interval between LED changes and snapshots
pub struct RefreshGate {
    clock: Arc<dyn Clock>,
}

impl RefreshGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current time on the gate's clock
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Sleep until `wait` has passed since `last`.
    ///
    /// Returns immediately when the interval already elapsed. The returned
    /// duration is the time actually slept.
    pub fn hold_up(&self, last: Instant, wait: Duration) -> Duration {
        let elapsed = self.clock.now().saturating_duration_since(last);
        let remaining = wait.saturating_sub(elapsed);
        if !remaining.is_zero() {
            trace!(remaining_us = remaining.as_micros() as u64, "Holding up for sensor refresh");
            self.clock.sleep(remaining);
        }
        remaining
    }

    /// Run `work`, then sleep whatever is left of `wait` since `last`.
    ///
    /// This turns the mandatory refresh wait into a slot for computation.
    /// If `work` overruns the interval no extra sleep happens.
    pub fn hold_up_while<T>(&self, last: Instant, wait: Duration, work: impl FnOnce() -> T) -> T {
        let result = work();
        let elapsed = self.clock.now().saturating_duration_since(last);
        if elapsed > wait {
            trace!(
                overrun_us = (elapsed - wait).as_micros() as u64,
                "Work overran the refresh interval"
            );
        }
        self.hold_up(last, wait);
        result
    }
}

/// Two exposures: a wait that keeps a rolling-shutter frame uniformly lit
/// must be strictly longer than this
pub fn rolling_shutter_wait(exposure: Duration) -> Duration {
    exposure * ROLLING_SHUTTER_FACTOR
}

/// Check a configured wait against the exposure time.
///
/// Returns `false` (and logs a warning) when the wait is not more than twice
/// the exposure, in which case frames may be captured half-lit.
pub fn check_rolling_shutter(label: &str, wait: Duration, exposure: Duration) -> bool {
    let minimum = rolling_shutter_wait(exposure);
    if wait <= minimum {
        warn!(
            wait = label,
            wait_us = wait.as_micros() as u64,
            exposure_us = exposure.as_micros() as u64,
            minimum_us = minimum.as_micros() as u64,
            "Wait is not more than twice the exposure time; expect partially lit frames"
        );
        return false;
    }
    true
}

/// Frame rate tracker
///
/// `tick()` marks the start of an iteration; `fps()` is the rate implied by
/// the last full interval between ticks.
pub struct FpsClock {
    clock: Arc<dyn Clock>,
    last_tick: Option<Instant>,
    last_interval: Option<Duration>,
    average: Option<f64>,
}

impl FpsClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_tick: None,
            last_interval: None,
            average: None,
        }
    }

    pub fn tick(&mut self) {
        let now = self.clock.now();
        if let Some(previous) = self.last_tick {
            let interval = now.saturating_duration_since(previous);
            self.last_interval = Some(interval);
            if let Some(fps) = rate(interval) {
                self.average = Some(match self.average {
                    Some(avg) => avg + FPS_SMOOTHING * (fps - avg),
                    None => fps,
                });
            }
        }
        self.last_tick = Some(now);
    }

    /// Instantaneous rate of the last interval, 0 before two ticks
    pub fn fps(&self) -> f64 {
        self.last_interval.and_then(rate).unwrap_or(0.0)
    }

    /// Exponential moving average of the rate
    pub fn average_fps(&self) -> f64 {
        self.average.unwrap_or(0.0)
    }
}

fn rate(interval: Duration) -> Option<f64> {
    let secs = interval.as_secs_f64();
    (secs > 0.0).then(|| 1.0 / secs)
}
