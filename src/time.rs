//! Frame clocks for the scene loop.
//!
//! - [`Time`] measures the variable frame delta that drives `update`/`late_update`.
//! - [`FixedTime`] accumulates it into fixed steps for `fixed_update`.
//!
//! ```
//! use archetype_pipeline::time::{FixedTime, Time};
//! use std::time::Duration;
//!
//! let mut time = Time::new();
//! let mut fixed = FixedTime::new(50);
//!
//! time.advance(Duration::from_millis(45));
//! assert_eq!(fixed.tick(time.delta()), 2);
//! ```

use std::time::{Duration, Instant};

/// Variable frame clock
#[derive(Clone, Debug)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
    time_scale: f32,
    /// Frame deltas are clamped to this (a debugger pause is not a 30 s frame)
    max_delta: Duration,
    last_update: Instant,
}

impl Time {
    pub fn new() -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            time_scale: 1.0,
            max_delta: Duration::from_millis(250),
            last_update: Instant::now(),
        }
    }

    pub fn with_max_delta(mut self, max_delta: Duration) -> Self {
        self.max_delta = max_delta;
        self
    }

    /// Sample the wall clock (call once per frame)
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_update);
        self.last_update = now;
        self.advance(delta);
    }

    /// Advance by an explicit delta, for replays and tests
    pub fn advance(&mut self, delta: Duration) {
        let delta = delta.min(self.max_delta).mul_f32(self.time_scale);
        self.delta = delta;
        self.elapsed += delta;
        self.frame_count += 1;
    }

    /// Scaled delta of the last frame
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Scaled time since creation
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 1.0 = normal, 0.5 = half speed; negative values clamp to 0
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn pause(&mut self) {
        self.time_scale = 0.0;
    }

    pub fn resume(&mut self) {
        self.time_scale = 1.0;
    }

    pub fn is_paused(&self) -> bool {
        self.time_scale == 0.0
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-step accumulator
#[derive(Clone, Debug)]
pub struct FixedTime {
    timestep: Duration,
    accumulator: Duration,
    /// Steps a single tick may produce; the remainder is dropped
    max_steps: usize,
}

impl FixedTime {
    /// Steps per second
    pub fn new(hz: u32) -> Self {
        Self::from_duration(Duration::from_secs_f64(1.0 / hz.max(1) as f64))
    }

    pub fn from_duration(timestep: Duration) -> Self {
        Self {
            timestep: timestep.max(Duration::from_micros(1)),
            accumulator: Duration::ZERO,
            max_steps: 8,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Accumulate `delta`; returns how many fixed steps to run now
    pub fn tick(&mut self, delta: Duration) -> usize {
        self.accumulator += delta;

        let mut steps = 0;
        while self.accumulator >= self.timestep && steps < self.max_steps {
            self.accumulator -= self.timestep;
            steps += 1;
        }
        if steps == self.max_steps && self.accumulator >= self.timestep {
            tracing::debug!(
                dropped_ms = self.accumulator.as_secs_f64() * 1000.0,
                "fixed-step backlog dropped"
            );
            self.accumulator = Duration::ZERO;
        }
        steps
    }

    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    pub fn timestep_seconds(&self) -> f32 {
        self.timestep.as_secs_f32()
    }

    /// Leftover time as a fraction of one step, for interpolation
    pub fn overstep_fraction(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.timestep.as_secs_f32()
    }
}

impl Default for FixedTime {
    fn default() -> Self {
        Self::new(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_counts_frames() {
        let mut time = Time::new();
        time.advance(Duration::from_millis(10));
        time.advance(Duration::from_millis(20));
        assert_eq!(time.frame_count(), 2);
        assert_eq!(time.elapsed(), Duration::from_millis(30));
        assert_eq!(time.delta(), Duration::from_millis(20));
    }

    #[test]
    fn test_delta_clamped_and_scaled() {
        let mut time = Time::new().with_max_delta(Duration::from_millis(100));
        time.advance(Duration::from_secs(5));
        assert_eq!(time.delta(), Duration::from_millis(100));

        time.pause();
        time.advance(Duration::from_millis(16));
        assert!(time.is_paused());
        assert_eq!(time.delta(), Duration::ZERO);
    }

    #[test]
    fn test_fixed_steps() {
        let mut fixed = FixedTime::from_duration(Duration::from_millis(20));
        assert_eq!(fixed.tick(Duration::from_millis(15)), 0);
        assert_eq!(fixed.tick(Duration::from_millis(15)), 1);
        let fraction = fixed.overstep_fraction();
        assert!(fraction > 0.4 && fraction < 0.6);
    }

    #[test]
    fn test_backlog_is_capped() {
        let mut fixed = FixedTime::from_duration(Duration::from_millis(10)).with_max_steps(3);
        assert_eq!(fixed.tick(Duration::from_millis(100)), 3);
        assert_eq!(fixed.tick(Duration::ZERO), 0);
    }
}
