//! Input normalizer
//!
//! Native button, key, motion and scroll events from every canvas are folded
//! into one model: a pool of [`Pointer`]s plus a single [`KeyboardState`].
//! Per-tick edges are cleared by [`InputState::end_tick`] only, so everything
//! observed during a tick stays visible until the tick finishes.

pub mod keyboard;
pub mod pointer;

pub use keyboard::{KeyCode, KeySet, KeyboardState, Modifiers, KEY_COUNT};
pub use pointer::{ButtonMask, Pointer, PointerSample, SampleRing, DEFAULT_SAMPLE_CAPACITY};

use crate::foundation::arena::{ArenaError, SlotArena};
use crate::platform::{Display, PointerDevice, WindowGeometry};
use nalgebra::Vector2;

/// Id of the primary mouse pointer
pub const PRIMARY_POINTER: u32 = 0;

/// Hit-test candidate: a canvas rectangle plus its creation order
#[derive(Debug, Clone, Copy)]
pub struct HitCandidate {
    /// Canvas index
    pub canvas: usize,
    /// Monotonic creation sequence number
    pub created: u64,
    /// Screen rectangle
    pub geometry: WindowGeometry,
}

/// Pick the most recently created canvas containing `(x, y)`
pub fn hit_test(candidates: &[HitCandidate], x: f64, y: f64) -> Option<usize> {
    candidates
        .iter()
        .filter(|candidate| candidate.geometry.contains(x, y))
        .max_by_key(|candidate| candidate.created)
        .map(|candidate| candidate.canvas)
}

/// Fused pointer and keyboard state
pub struct InputState {
    pointers: SlotArena<Pointer>,
    keyboard: KeyboardState,
    sample_capacity: usize,
}

impl InputState {
    /// Create an input state with room for `pointer_capacity` pointers
    pub fn new(pointer_capacity: usize, sample_capacity: usize) -> Self {
        Self {
            pointers: SlotArena::with_capacity(pointer_capacity),
            keyboard: KeyboardState::default(),
            sample_capacity,
        }
    }

    /// Slot index of the pointer with native id `id`
    pub fn find(&self, id: u32) -> Option<usize> {
        self.pointers.find(|pointer| pointer.id == id)
    }

    /// Slot index of pointer `id`, creating it on first sight
    pub fn ensure(&mut self, id: u32, device: PointerDevice) -> Result<usize, ArenaError> {
        if let Some(index) = self.find(id) {
            return Ok(index);
        }
        let index = self.pointers.allocate()?;
        self.pointers.get_mut(index)?.activate(id, device, self.sample_capacity);
        log::debug!("Tracking pointer {id} ({device:?}) in slot {index}");
        Ok(index)
    }

    /// Make sure the primary mouse pointer exists
    pub fn ensure_primary(&mut self) -> Result<usize, ArenaError> {
        self.ensure(PRIMARY_POINTER, PointerDevice::Mouse)
    }

    /// Drop pointer `id` (touch lifted, pen out of range); the primary pointer stays
    pub fn remove(&mut self, id: u32) {
        if id == PRIMARY_POINTER {
            return;
        }
        if let Some(index) = self.find(id) {
            let _ = self.pointers.release(index);
            log::debug!("Dropped pointer {id}");
        }
    }

    /// Pointer in slot `index`
    pub fn pointer(&self, index: usize) -> Option<&Pointer> {
        self.pointers.get(index).ok()
    }

    /// Pointer in slot `index`, mutably
    pub fn pointer_mut(&mut self, index: usize) -> Option<&mut Pointer> {
        self.pointers.get_mut(index).ok()
    }

    /// Pointer with native id `id`
    pub fn pointer_by_id(&self, id: u32) -> Option<&Pointer> {
        self.find(id).and_then(|index| self.pointer(index))
    }

    /// Iterate over live pointers
    pub fn pointers(&self) -> impl Iterator<Item = &Pointer> {
        self.pointers.iter().map(|(_, pointer)| pointer)
    }

    /// Iterate over live pointers, mutably
    pub fn pointers_mut(&mut self) -> impl Iterator<Item = &mut Pointer> {
        self.pointers.iter_mut().map(|(_, pointer)| pointer)
    }

    /// Pointer pool
    pub fn pointer_arena(&self) -> &SlotArena<Pointer> {
        &self.pointers
    }

    /// Keyboard state
    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    /// Keyboard state, mutably
    pub fn keyboard_mut(&mut self) -> &mut KeyboardState {
        &mut self.keyboard
    }

    /// Move a pointer given its window-space position over `canvas`
    ///
    /// Resolves screen and display coordinates from the canvas geometry and
    /// the current display list.
    pub fn move_pointer(
        &mut self,
        index: usize,
        canvas: Option<(usize, WindowGeometry)>,
        window_pos: Vector2<f64>,
        displays: &SlotArena<Display>,
    ) {
        let Ok(pointer) = self.pointers.get_mut(index) else {
            return;
        };

        let origin = canvas.map_or_else(Vector2::zeros, |(_, geometry)| {
            Vector2::new(f64::from(geometry.x), f64::from(geometry.y))
        });
        pointer.canvas = canvas.map(|(canvas, _)| canvas);
        pointer.window_pos = window_pos;
        pointer.screen_pos = origin + window_pos;

        let screen = pointer.screen_pos;
        pointer.display = displays
            .find(|display| display.geometry().contains(screen.x, screen.y))
            .or_else(|| displays.find(|display| display.primary));
        pointer.display_pos = pointer
            .display
            .and_then(|display| displays.get(display).ok())
            .map_or(screen, |display| {
                screen - Vector2::new(f64::from(display.x), f64::from(display.y))
            });
    }

    /// Re-own a pointer to whichever canvas contains it
    pub fn retarget(&mut self, index: usize, candidates: &[HitCandidate]) {
        let Ok(pointer) = self.pointers.get_mut(index) else {
            return;
        };
        if pointer.captured {
            return;
        }
        let screen = pointer.screen_pos;
        if let Some(canvas) = hit_test(candidates, screen.x, screen.y) {
            if let Some(candidate) = candidates.iter().find(|c| c.canvas == canvas) {
                pointer.canvas = Some(canvas);
                pointer.window_pos = screen
                    - Vector2::new(f64::from(candidate.geometry.x), f64::from(candidate.geometry.y));
            }
        }
    }

    /// Forget a closed canvas in every pointer that referenced it
    pub fn detach_canvas(&mut self, canvas: usize) {
        for (_, pointer) in self.pointers.iter_mut() {
            if pointer.canvas == Some(canvas) {
                pointer.canvas = None;
                pointer.captured = false;
            }
        }
    }

    /// Append one motion sample to every live pointer
    pub fn sample(&mut self, time: f64) {
        for (_, pointer) in self.pointers.iter_mut() {
            pointer.record_sample(time);
        }
    }

    /// Clear every per-tick edge and scroll delta
    pub fn end_tick(&mut self) {
        for (_, pointer) in self.pointers.iter_mut() {
            pointer.end_tick();
        }
        self.keyboard.end_tick();
    }

    /// Drop all pointers and keyboard state
    pub fn reset(&mut self) {
        self.pointers.clear();
        self.keyboard = KeyboardState::default();
    }
}
