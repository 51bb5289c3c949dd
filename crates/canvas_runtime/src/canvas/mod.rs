//! Canvas orchestrator
//!
//! A canvas is one slot in the runtime's canvas arena bound to one native
//! window and, optionally, one [`PresentationEngine`]. The slot index is the
//! public handle for the canvas's whole lifetime.

pub mod runtime;

pub use runtime::Runtime;

use crate::foundation::arena::Slot;
use crate::foundation::time::TimeState;
use crate::platform::{CursorKind, NativeWindow, WindowGeometry};
use crate::render::presentation::{PresentState, PresentationEngine};
use bitflags::bitflags;

/// Maximum title length in bytes
pub const MAX_TITLE_LEN: usize = 256;

/// Default clear color (opaque black)
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Stable canvas handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanvasHandle(pub usize);

impl CanvasHandle {
    /// Slot index
    pub fn index(self) -> usize {
        self.0
    }
}

bitflags! {
    /// Per-canvas state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CanvasFlags: u32 {
        /// Swapchain must be rebuilt this tick
        const RESIZE = 1 << 0;
        /// Canvas closes at the end of this tick
        const CLOSE = 1 << 1;
        /// Window is iconified
        const MINIMIZED = 1 << 2;
        /// Window is maximized
        const MAXIMIZED = 1 << 3;
        /// Window is fullscreen
        const FULLSCREEN = 1 << 4;
        /// Prefer a non-tearing present mode
        const VSYNC = 1 << 5;
        /// OS decorations shown
        const TITLEBAR = 1 << 6;
        /// Window was moved by the OS or user this tick
        const OS_MOVE = 1 << 7;
        /// Window was resized by the OS or user this tick
        const OS_RESIZE = 1 << 8;
    }
}

/// Per-canvas callback, invoked once per tick
pub type CanvasCallback = Box<dyn FnMut(&mut Runtime, CanvasHandle)>;

/// Truncate `title` to [`MAX_TITLE_LEN`] bytes on a char boundary
pub fn bounded_title(title: &str) -> String {
    if title.len() <= MAX_TITLE_LEN {
        return title.to_string();
    }
    let mut end = MAX_TITLE_LEN;
    while !title.is_char_boundary(end) {
        end -= 1;
    }
    title[..end].to_string()
}

/// Canvas record
#[derive(Default)]
pub struct Canvas {
    pub(crate) valid: bool,
    pub(crate) created: u64,
    pub(crate) display: Option<usize>,
    pub(crate) geometry: WindowGeometry,
    pub(crate) saved_geometry: Option<WindowGeometry>,
    pub(crate) flags: CanvasFlags,
    pub(crate) clear_color: [f32; 4],
    pub(crate) title: String,
    pub(crate) time: TimeState,
    pub(crate) cursor: CursorKind,
    pub(crate) cursor_applied: Option<CursorKind>,
    pub(crate) window: Option<NativeWindow>,
    pub(crate) presentation: Option<PresentationEngine>,
    pub(crate) callback: Option<CanvasCallback>,
}

impl Slot for Canvas {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("valid", &self.valid)
            .field("display", &self.display)
            .field("geometry", &self.geometry)
            .field("flags", &self.flags)
            .field("title", &self.title)
            .field("present_state", &self.present_state())
            .finish_non_exhaustive()
    }
}

impl Canvas {
    /// Creation sequence number (larger is newer)
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Display the canvas center lies on
    pub fn display(&self) -> Option<usize> {
        self.display
    }

    /// Screen rectangle
    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    /// State flags
    pub fn flags(&self) -> CanvasFlags {
        self.flags
    }

    /// Clear color
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Title text
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Per-canvas timing
    pub fn time(&self) -> &TimeState {
        &self.time
    }

    /// Requested cursor
    pub fn cursor(&self) -> CursorKind {
        self.cursor
    }

    /// Cursor last applied to the native window
    pub fn applied_cursor(&self) -> Option<CursorKind> {
        self.cursor_applied
    }

    /// Native window
    pub fn window(&self) -> Option<NativeWindow> {
        self.window
    }

    /// Presentation engine, for GPU canvases
    pub fn presentation(&self) -> Option<&PresentationEngine> {
        self.presentation.as_ref()
    }

    /// Presentation state, `None` for window-only canvases
    pub fn present_state(&self) -> Option<PresentState> {
        self.presentation.as_ref().map(PresentationEngine::state)
    }

    /// Whether the canvas has a per-canvas callback
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}
