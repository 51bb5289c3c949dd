//! Pointer state and motion history

use crate::foundation::arena::Slot;
use crate::platform::{CursorKind, MouseButton, PointerDevice};
use bitflags::bitflags;
use nalgebra::Vector2;

/// Default number of motion samples kept per pointer
pub const DEFAULT_SAMPLE_CAPACITY: usize = 8;

/// Sample spacing below which velocity is reported as zero
pub const MIN_SAMPLE_SPAN: f64 = 0.001;

bitflags! {
    /// 32-bit pointer button mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ButtonMask: u32 {
        /// Primary button
        const LEFT = 1 << 0;
        /// Secondary button
        const RIGHT = 1 << 1;
        /// Wheel button
        const MIDDLE = 1 << 2;
        /// Thumb back
        const BACK = 1 << 3;
        /// Thumb forward
        const FORWARD = 1 << 4;
    }
}

impl From<MouseButton> for ButtonMask {
    fn from(button: MouseButton) -> Self {
        Self::from_bits_retain(1 << button.bit())
    }
}

/// One timestamped position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerSample {
    /// Screen-space position
    pub position: Vector2<f64>,
    /// Seconds since the runtime started
    pub time: f64,
}

/// Circular sample history
///
/// Writes overwrite the slot under the cursor and advance it, so once the ring
/// has wrapped the oldest resident sample is always the one at the cursor.
#[derive(Debug, Clone, Default)]
pub struct SampleRing {
    samples: Vec<PointerSample>,
    cursor: usize,
}

impl SampleRing {
    /// Create a ring with `capacity` zeroed slots
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![PointerSample::default(); capacity.max(2)],
            cursor: 0,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Write position of the next sample
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Overwrite the slot under the cursor and advance it
    pub fn push(&mut self, sample: PointerSample) {
        if self.samples.is_empty() {
            return;
        }
        self.samples[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    /// Fill every slot with `sample`, e.g. when a pointer first appears
    pub fn fill(&mut self, sample: PointerSample) {
        self.samples.iter_mut().for_each(|slot| *slot = sample);
    }

    /// Sample about to be overwritten
    pub fn oldest(&self) -> PointerSample {
        self.samples.get(self.cursor).copied().unwrap_or_default()
    }

    /// Most recently written sample
    pub fn newest(&self) -> PointerSample {
        let len = self.samples.len();
        if len == 0 {
            return PointerSample::default();
        }
        self.samples[(self.cursor + len - 1) % len]
    }

    /// Speed in units per second between oldest and newest
    pub fn velocity(&self) -> f64 {
        let (oldest, newest) = (self.oldest(), self.newest());
        let span = newest.time - oldest.time;
        if span < MIN_SAMPLE_SPAN {
            return 0.0;
        }
        (newest.position - oldest.position).norm() / span
    }

    /// Heading from oldest to newest, in radians
    pub fn direction(&self) -> f64 {
        let delta = self.newest().position - self.oldest().position;
        delta.y.atan2(delta.x)
    }
}

/// Tracked pointer (mouse, touch contact or pen)
#[derive(Debug, Clone, Default)]
pub struct Pointer {
    pub(crate) valid: bool,
    sampled: bool,
    /// Native pointer id (0 = primary mouse)
    pub id: u32,
    /// Device type
    pub device: PointerDevice,
    /// Canvas under the pointer
    pub canvas: Option<usize>,
    /// Position relative to the owning canvas
    pub window_pos: Vector2<f64>,
    /// Position in virtual screen space
    pub screen_pos: Vector2<f64>,
    /// Position relative to the display it is on
    pub display_pos: Vector2<f64>,
    /// Display under the pointer
    pub display: Option<usize>,
    /// Buttons held
    pub down: ButtonMask,
    /// Buttons that went down this tick
    pub pressed: ButtonMask,
    /// Buttons that went up this tick
    pub released: ButtonMask,
    /// Scroll accumulated this tick
    pub scroll: Vector2<f64>,
    /// Contact pressure in `[0, 1]`
    pub pressure: f32,
    /// Pointer is captured by its canvas
    pub captured: bool,
    /// Pointer reports relative motion only
    pub relative: bool,
    /// Cursor shape requested while over a canvas
    pub cursor: CursorKind,
    /// Motion history
    pub samples: SampleRing,
}

impl Slot for Pointer {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl Pointer {
    /// Reset a freshly allocated slot into a live pointer
    pub(crate) fn activate(&mut self, id: u32, device: PointerDevice, sample_capacity: usize) {
        self.id = id;
        self.device = device;
        self.pressure = 1.0;
        self.samples = SampleRing::new(sample_capacity);
        self.sampled = false;
    }

    /// Feed a native button-down
    pub fn button_down(&mut self, button: MouseButton) {
        let bit = ButtonMask::from(button);
        if !self.down.contains(bit) {
            self.pressed |= bit;
        }
        self.down |= bit;
    }

    /// Feed a native button-up
    pub fn button_up(&mut self, button: MouseButton) {
        let bit = ButtonMask::from(button);
        if self.down.contains(bit) {
            self.released |= bit;
        }
        self.down.remove(bit);
    }

    /// Accumulate a scroll delta
    pub fn scroll_by(&mut self, dx: f64, dy: f64) {
        self.scroll += Vector2::new(dx, dy);
    }

    /// Append this tick's motion sample
    ///
    /// The first sample after activation fills the whole ring, so a new
    /// pointer reports no motion until it actually moves.
    pub fn record_sample(&mut self, time: f64) {
        let sample = PointerSample {
            position: self.screen_pos,
            time,
        };
        if self.sampled {
            self.samples.push(sample);
        } else {
            self.samples.fill(sample);
            self.sampled = true;
        }
    }

    /// Clear per-tick edges and scroll
    pub fn end_tick(&mut self) {
        self.pressed = ButtonMask::empty();
        self.released = ButtonMask::empty();
        self.scroll = Vector2::zeros();
    }

    /// Whether `button` is held
    pub fn is_down(&self, button: MouseButton) -> bool {
        self.down.contains(button.into())
    }

    /// Whether `button` went down this tick
    pub fn was_pressed(&self, button: MouseButton) -> bool {
        self.pressed.contains(button.into())
    }

    /// Whether `button` went up this tick
    pub fn was_released(&self, button: MouseButton) -> bool {
        self.released.contains(button.into())
    }

    /// Speed over the resident sample history
    pub fn velocity(&self) -> f64 {
        self.samples.velocity()
    }

    /// Heading over the resident sample history
    pub fn direction(&self) -> f64 {
        self.samples.direction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(x: f64, y: f64, time: f64) -> PointerSample {
        PointerSample {
            position: Vector2::new(x, y),
            time,
        }
    }

    #[test]
    fn test_button_held_for_several_ticks() {
        let mut pointer = Pointer::default();
        let mut pressed_ticks = Vec::new();
        let mut released_ticks = Vec::new();

        for tick in 0..8 {
            if (1..5).contains(&tick) {
                pointer.button_down(MouseButton::Left);
            } else {
                pointer.button_up(MouseButton::Left);
            }

            if pointer.was_pressed(MouseButton::Left) {
                pressed_ticks.push(tick);
            }
            if pointer.was_released(MouseButton::Left) {
                released_ticks.push(tick);
            }
            pointer.end_tick();
        }

        assert_eq!(pressed_ticks, vec![1]);
        assert_eq!(released_ticks, vec![5]);
    }

    #[test]
    fn test_buttons_are_independent() {
        let mut pointer = Pointer::default();
        pointer.button_down(MouseButton::Left);
        pointer.end_tick();
        pointer.button_down(MouseButton::Right);

        assert_eq!(pointer.pressed, ButtonMask::RIGHT);
        assert_eq!(pointer.down, ButtonMask::LEFT | ButtonMask::RIGHT);
    }

    #[test]
    fn test_extra_buttons_use_high_bits() {
        let mut pointer = Pointer::default();
        pointer.button_down(MouseButton::Other(7));
        assert_eq!(pointer.down.bits(), 1 << 7);
    }

    #[test]
    fn test_low_numbered_extra_button_leaves_left_alone() {
        let mut pointer = Pointer::default();
        pointer.button_down(MouseButton::Left);
        pointer.end_tick();
        pointer.button_down(MouseButton::Other(0));

        assert!(!pointer.was_pressed(MouseButton::Left));
        assert!(pointer.was_pressed(MouseButton::Other(0)));
        assert_eq!(pointer.down.bits(), 1 | 1 << 5);

        pointer.button_up(MouseButton::Other(0));
        assert!(pointer.is_down(MouseButton::Left));
    }

    #[test]
    fn test_first_sample_seeds_history() {
        let mut pointer = Pointer::default();
        pointer.activate(7, PointerDevice::Touch, DEFAULT_SAMPLE_CAPACITY);
        pointer.screen_pos = Vector2::new(800.0, 600.0);
        pointer.record_sample(5.0);

        assert_relative_eq!(pointer.velocity(), 0.0);
        assert_relative_eq!(pointer.direction(), 0.0);
        assert_eq!(pointer.samples.oldest(), pointer.samples.newest());

        pointer.screen_pos = Vector2::new(900.0, 600.0);
        pointer.record_sample(5.5);
        assert_relative_eq!(pointer.velocity(), 200.0, epsilon = 1e-9);
        assert_relative_eq!(pointer.direction(), 0.0);
    }

    #[test]
    fn test_scroll_resets_at_tick_end() {
        let mut pointer = Pointer::default();
        pointer.scroll_by(0.0, 1.0);
        pointer.scroll_by(0.5, 2.0);
        assert_relative_eq!(pointer.scroll.y, 3.0);
        assert_relative_eq!(pointer.scroll.x, 0.5);

        pointer.end_tick();
        assert_eq!(pointer.scroll, Vector2::zeros());
    }

    #[test]
    fn test_ring_overwrite_uses_latest_capacity_samples() {
        let capacity = 4;
        let mut ring = SampleRing::new(capacity);

        // Fast early motion that must fall out of the window
        ring.push(sample(0.0, 0.0, 0.0));
        ring.push(sample(1000.0, 0.0, 0.01));

        // capacity + 2 samples total: the last four are a steady 10 units / 0.1 s
        for i in 0..capacity {
            let t = 1.0 + i as f64 * 0.1;
            ring.push(sample(i as f64 * 10.0, 0.0, t));
        }

        assert_relative_eq!(ring.oldest().time, 1.0);
        assert_relative_eq!(ring.newest().time, 1.3, epsilon = 1e-12);
        assert_relative_eq!(ring.velocity(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(ring.direction(), 0.0);
    }

    #[test]
    fn test_velocity_zero_for_tiny_span() {
        let mut ring = SampleRing::new(2);
        ring.push(sample(0.0, 0.0, 1.0));
        ring.push(sample(50.0, 50.0, 1.0005));
        assert_eq!(ring.velocity(), 0.0);
    }

    #[test]
    fn test_direction_points_along_motion() {
        let mut ring = SampleRing::new(2);
        ring.push(sample(0.0, 0.0, 0.0));
        ring.push(sample(0.0, 5.0, 0.5));

        assert_relative_eq!(ring.direction(), std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(ring.velocity(), 10.0);
    }

    #[test]
    fn test_cursor_wraps_modulo_capacity() {
        let mut ring = SampleRing::new(3);
        for i in 0..7 {
            ring.push(sample(f64::from(i), 0.0, f64::from(i)));
        }
        assert_eq!(ring.cursor(), 7 % 3);
        assert_relative_eq!(ring.newest().time, 6.0);
        assert_relative_eq!(ring.oldest().time, 4.0);
    }
}
