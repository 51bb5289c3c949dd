//! Time management utilities
//!
//! Frame timing is split into three pieces:
//! - [`Clock`]: a monotonic time source (real or manually driven)
//! - [`TimeState`]: smoothed delta, FPS moving average and fixed-step accumulator
//! - [`FrameLimiter`]: sleeps most of the remaining frame budget and spins the rest

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Raw deltas above this are clamped (debugger pauses, suspend/resume)
pub const DELTA_CEILING: f64 = 0.1;

/// Exponential smoothing factor applied to the reported delta
pub const DELTA_SMOOTHING: f64 = 0.95;

/// Number of raw deltas averaged for the FPS estimate
pub const FPS_WINDOW: usize = 60;

/// Default time the limiter spins instead of sleeping
pub const DEFAULT_SPIN_RESERVE: Duration = Duration::from_millis(2);

/// Monotonic time source
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for headless runs and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for std::rc::Rc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Blocking primitive used by the frame limiter
pub trait Sleeper {
    /// Cooperatively yield for roughly `duration`
    fn sleep(&self, duration: Duration);

    /// Busy-wait until `clock` reaches `deadline`
    fn spin_until(&self, clock: &dyn Clock, deadline: Duration) {
        while clock.now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Sleeper backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that advances a [`ManualClock`] instead of blocking
pub struct ManualSleeper {
    clock: std::rc::Rc<ManualClock>,
}

impl ManualSleeper {
    /// Create a sleeper driving `clock`
    pub fn new(clock: std::rc::Rc<ManualClock>) -> Self {
        Self { clock }
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    fn spin_until(&self, clock: &dyn Clock, deadline: Duration) {
        let now = clock.now();
        if deadline > now {
            self.clock.advance(deadline - now);
        }
    }
}

/// Per-frame timing state
#[derive(Debug, Clone)]
pub struct TimeState {
    start: Duration,
    now: Duration,
    last: Duration,
    raw_delta: f64,
    delta: f64,
    ring: [f64; FPS_WINDOW],
    ring_index: usize,
    frame: u64,
    fps: f64,
    accumulator: f64,
    alpha: f64,
}

impl Default for TimeState {
    fn default() -> Self {
        Self {
            start: Duration::ZERO,
            now: Duration::ZERO,
            last: Duration::ZERO,
            raw_delta: 0.0,
            delta: 0.0,
            ring: [0.0; FPS_WINDOW],
            ring_index: 0,
            frame: 0,
            fps: 0.0,
            accumulator: 0.0,
            alpha: 0.0,
        }
    }
}

impl TimeState {
    /// Record the start instant and zero every derived field
    pub fn init(&mut self, clock: &dyn Clock) {
        let now = clock.now();
        *self = Self {
            start: now,
            now,
            last: now,
            ..Self::default()
        };
    }

    /// Sample the clock and update the frame deltas
    pub fn update(&mut self, clock: &dyn Clock) {
        self.update_at(clock.now());
    }

    /// Update the frame deltas as if the clock read `now`
    pub fn update_at(&mut self, now: Duration) {
        self.last = self.now;
        self.now = now;

        let raw = now.saturating_sub(self.last).as_secs_f64();
        self.raw_delta = raw.min(DELTA_CEILING);

        if self.frame == 0 {
            self.delta = self.raw_delta;
        } else {
            self.delta = self
                .delta
                .mul_add(DELTA_SMOOTHING, self.raw_delta * (1.0 - DELTA_SMOOTHING));
        }

        self.ring[self.ring_index] = self.raw_delta;
        self.ring_index = (self.ring_index + 1) % FPS_WINDOW;

        let mean = self.ring.iter().sum::<f64>() / FPS_WINDOW as f64;
        self.fps = if mean > 0.0 { 1.0 / mean } else { 0.0 };

        self.frame += 1;
    }

    /// Advance the fixed-step accumulator by the current delta
    ///
    /// Returns how many whole `dt` steps to simulate (at most `max_steps`) and
    /// leaves the leftover fraction in [`alpha`](Self::alpha).
    pub fn fixed_step(&mut self, dt: f64, max_steps: u32) -> u32 {
        if dt <= 0.0 {
            return 0;
        }

        self.accumulator += self.delta;

        let mut steps = 0;
        while self.accumulator >= dt && steps < max_steps {
            self.accumulator -= dt;
            steps += 1;
        }

        self.alpha = self.accumulator / dt;
        steps
    }

    /// Smoothed frame delta in seconds
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Clamped, unsmoothed frame delta in seconds
    pub fn raw_delta(&self) -> f64 {
        self.raw_delta
    }

    /// Moving-average frame rate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Frames sampled since `init`
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Seconds since `init`
    pub fn elapsed(&self) -> f64 {
        self.now.saturating_sub(self.start).as_secs_f64()
    }

    /// Most recent clock sample
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Interpolation factor left by the last `fixed_step`
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Leftover simulation time in seconds
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }
}

/// Frame-rate limiter
///
/// Sleeps all but `spin_reserve` of the remaining frame budget, then spins for
/// sub-millisecond accuracy. A zero reserve drops the spin entirely.
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    spin_reserve: Duration,
    frame_start: Option<Duration>,
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_SPIN_RESERVE)
    }
}

impl FrameLimiter {
    /// Create a limiter with the given spin reserve
    pub fn new(spin_reserve: Duration) -> Self {
        Self {
            spin_reserve,
            frame_start: None,
        }
    }

    /// Block until the current frame has used its budget for `target_fps`
    ///
    /// A non-positive target disables limiting.
    pub fn limit(&mut self, target_fps: f64, clock: &dyn Clock, sleeper: &dyn Sleeper) {
        if target_fps <= 0.0 || !target_fps.is_finite() {
            self.frame_start = Some(clock.now());
            return;
        }

        let now = clock.now();
        let Some(frame_start) = self.frame_start else {
            self.frame_start = Some(now);
            return;
        };

        let budget = Duration::from_secs_f64(1.0 / target_fps);
        let deadline = frame_start + budget;

        if deadline > now {
            let remaining = deadline - now;
            if remaining > self.spin_reserve {
                sleeper.sleep(remaining - self.spin_reserve);
            }
            sleeper.spin_until(clock, deadline);
        }

        self.frame_start = Some(clock.now());
    }

    /// Forget the current frame start
    pub fn reset(&mut self) {
        self.frame_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::rc::Rc;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_frame_uses_raw_delta() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(ms(20));
        time.update(&clock);

        assert_relative_eq!(time.delta(), 0.020, epsilon = 1e-12);
        assert_relative_eq!(time.raw_delta(), 0.020, epsilon = 1e-12);
    }

    #[test]
    fn test_delta_is_smoothed_after_first_frame() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(ms(20));
        time.update(&clock);
        clock.advance(ms(40));
        time.update(&clock);

        let expected = 0.020 * DELTA_SMOOTHING + 0.040 * (1.0 - DELTA_SMOOTHING);
        assert_relative_eq!(time.delta(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_raw_delta_is_clamped() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(Duration::from_secs(5));
        time.update(&clock);

        assert_relative_eq!(time.raw_delta(), DELTA_CEILING);
        assert_relative_eq!(time.delta(), DELTA_CEILING);
    }

    #[test]
    fn test_fps_moving_average() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        for _ in 0..FPS_WINDOW {
            clock.advance(ms(10));
            time.update(&clock);
        }
        assert_relative_eq!(time.fps(), 100.0, epsilon = 1e-6);
        assert_eq!(time.frame(), FPS_WINDOW as u64);
    }

    #[test]
    fn test_fps_zero_without_samples() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);
        time.update(&clock);
        assert_eq!(time.fps(), 0.0);
    }

    #[test]
    fn test_fixed_step_drains_whole_steps() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(ms(50));
        time.update(&clock);

        let steps = time.fixed_step(0.016, 10);
        assert_eq!(steps, 3);
        assert_relative_eq!(time.alpha(), (0.050 - 0.048) / 0.016, epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_step_respects_max_steps() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(ms(100));
        time.update(&clock);

        assert_eq!(time.fixed_step(0.010, 4), 4);
        assert!(time.accumulator() > 0.05);
    }

    #[test]
    fn test_fixed_step_zero_delta_is_idempotent() {
        let clock = ManualClock::new();
        let mut time = TimeState::default();
        time.init(&clock);

        clock.advance(ms(25));
        time.update(&clock);
        time.fixed_step(0.010, 8);
        let alpha = time.alpha();

        // Same clock reading: delta becomes a smoothed mix, so force a true zero frame
        let mut frozen = TimeState::default();
        frozen.init(&clock);
        frozen.update(&clock);
        assert_eq!(frozen.delta(), 0.0);
        frozen.accumulator = time.accumulator;
        frozen.alpha = alpha;

        assert_eq!(frozen.fixed_step(0.010, 8), 0);
        assert_relative_eq!(frozen.alpha(), alpha, epsilon = 1e-12);
    }

    #[test]
    fn test_limiter_sleeps_then_spins_to_deadline() {
        let clock = Rc::new(ManualClock::new());
        let sleeper = ManualSleeper::new(Rc::clone(&clock));
        let mut limiter = FrameLimiter::default();

        limiter.limit(50.0, &clock, &sleeper);
        clock.advance(ms(5));
        limiter.limit(50.0, &clock, &sleeper);

        assert_eq!(clock.now(), ms(20));
    }

    #[test]
    fn test_limiter_disabled_for_non_positive_target() {
        let clock = Rc::new(ManualClock::new());
        let sleeper = ManualSleeper::new(Rc::clone(&clock));
        let mut limiter = FrameLimiter::default();

        limiter.limit(0.0, &clock, &sleeper);
        clock.advance(ms(1));
        limiter.limit(-30.0, &clock, &sleeper);

        assert_eq!(clock.now(), ms(1));
    }

    #[test]
    fn test_limiter_does_not_wait_when_over_budget() {
        let clock = Rc::new(ManualClock::new());
        let sleeper = ManualSleeper::new(Rc::clone(&clock));
        let mut limiter = FrameLimiter::default();

        limiter.limit(100.0, &clock, &sleeper);
        clock.advance(ms(30));
        limiter.limit(100.0, &clock, &sleeper);

        assert_eq!(clock.now(), ms(30));
    }
}
