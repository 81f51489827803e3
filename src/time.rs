//! Fixed-step simulation clock.
//!
//! Kernels only ever see whole fixed steps. Wall-clock time is accumulated
//! and converted into a number of steps to run, so the simulation advances
//! at the same rate regardless of frame rate.
//!
//! # Example
//!
//! ```ignore
//! use dust::time::FixedClock;
//!
//! let mut clock = FixedClock::new(0.02, 8);
//!
//! // In your frame loop:
//! for _ in 0..clock.accumulate(frame_dt) {
//!     let step = clock.step();
//!     println!("frame {} at {:.2}s", step.frame, step.time);
//! }
//! ```

use std::time::Instant;

/// Time values for one tick, taken before the tick advances the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTime {
    pub dt: f32,
    /// Simulated seconds before this tick.
    pub time: f32,
    /// Ticks completed before this one.
    pub frame: u32,
}

/// Fixed-timestep clock with a wall-time accumulator.
#[derive(Debug)]
pub struct FixedClock {
    fixed_dt: f32,
    max_steps: u32,
    /// Total simulated seconds.
    time: f32,
    frame: u32,
    /// Wall time not yet consumed by a step.
    accumulator: f32,
    /// Steps dropped because an advance exceeded `max_steps`.
    dropped_steps: u64,
    time_scale: f32,
    paused: bool,
    last_wall: Option<Instant>,
}

impl FixedClock {
    /// `max_steps` bounds the steps one [`accumulate`](Self::accumulate)
    /// may return; zero is treated as one.
    pub fn new(fixed_dt: f32, max_steps: u32) -> Self {
        Self {
            fixed_dt,
            max_steps: max_steps.max(1),
            time: 0.0,
            frame: 0,
            accumulator: 0.0,
            dropped_steps: 0,
            time_scale: 1.0,
            paused: false,
            last_wall: None,
        }
    }

    /// Time values for a tick of `dt`, then advance past it.
    pub fn tick(&mut self, dt: f32) -> StepTime {
        let step = StepTime {
            dt,
            time: self.time,
            frame: self.frame,
        };
        self.time += dt;
        self.frame = self.frame.wrapping_add(1);
        step
    }

    /// A tick of the fixed timestep.
    pub fn step(&mut self) -> StepTime {
        self.tick(self.fixed_dt)
    }

    /// Add `wall_dt` seconds of wall time and return how many fixed steps to run.
    ///
    /// At most `max_steps` are returned. Whole steps beyond that are dropped
    /// so a long stall does not turn into a burst of catch-up work.
    pub fn accumulate(&mut self, wall_dt: f32) -> u32 {
        if self.paused || !wall_dt.is_finite() || wall_dt <= 0.0 {
            return 0;
        }
        self.accumulator += wall_dt * self.time_scale;

        let whole = (self.accumulator / self.fixed_dt).floor();
        let steps = whole.min(self.max_steps as f32) as u32;
        if whole > self.max_steps as f32 {
            self.dropped_steps += (whole - self.max_steps as f32) as u64;
            self.accumulator -= whole * self.fixed_dt;
        } else {
            self.accumulator -= steps as f32 * self.fixed_dt;
        }
        self.accumulator = self.accumulator.max(0.0);
        steps
    }

    /// Accumulate the wall time elapsed since the previous call.
    /// The first call only starts the clock.
    pub fn accumulate_since_last(&mut self) -> u32 {
        let now = Instant::now();
        let wall_dt = match self.last_wall.replace(now) {
            Some(last) => now.duration_since(last).as_secs_f32(),
            None => 0.0,
        };
        self.accumulate(wall_dt)
    }

    #[inline]
    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    #[inline]
    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Total simulated seconds.
    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Ticks completed.
    #[inline]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Wall time carried over to the next advance, in seconds.
    #[inline]
    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    pub fn dropped_steps(&self) -> u64 {
        self.dropped_steps
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// While paused, [`accumulate`](Self::accumulate) returns 0 and keeps nothing.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.last_wall = None;
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Scale applied to accumulated wall time. Negative values clamp to 0.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_reports_time_before_advancing() {
        let mut clock = FixedClock::new(0.1, 8);
        let first = clock.step();
        let second = clock.step();

        assert_eq!(first.frame, 0);
        assert_eq!(first.time, 0.0);
        assert_eq!(second.frame, 1);
        assert!((second.time - 0.1).abs() < 1e-6);
        assert_eq!(clock.frame(), 2);
    }

    #[test]
    fn test_accumulate_whole_steps() {
        let mut clock = FixedClock::new(0.02, 8);
        assert_eq!(clock.accumulate(0.01), 0);
        assert_eq!(clock.accumulate(0.015), 1);
        assert!((clock.accumulator() - 0.005).abs() < 1e-5);
        assert_eq!(clock.accumulate(0.045), 2);
    }

    #[test]
    fn test_accumulate_is_bounded() {
        let mut clock = FixedClock::new(0.25, 8);
        assert_eq!(clock.accumulate(10.0), 8);
        assert_eq!(clock.dropped_steps(), 32);
        assert_eq!(clock.accumulator(), 0.0);
    }

    #[test]
    fn test_pause_and_scale() {
        let mut clock = FixedClock::new(0.02, 8);
        clock.pause();
        assert_eq!(clock.accumulate(0.5), 0);
        clock.resume();

        clock.set_time_scale(0.5);
        assert_eq!(clock.accumulate(0.04), 1);

        clock.set_time_scale(-1.0);
        assert_eq!(clock.time_scale(), 0.0);
        assert_eq!(clock.accumulate(1.0), 0);
    }

    #[test]
    fn test_bad_wall_time_ignored() {
        let mut clock = FixedClock::new(0.02, 8);
        assert_eq!(clock.accumulate(f32::NAN), 0);
        assert_eq!(clock.accumulate(-1.0), 0);
        assert_eq!(clock.accumulator(), 0.0);
    }
}
