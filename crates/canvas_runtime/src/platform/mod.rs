//! Native windowing collaborators
//!
//! The runtime never calls an OS windowing API directly. Everything it needs
//! from the platform goes through [`NativeWindowing`]:
//!
//! ```text
//! ┌──────────────────────┐
//! │       Runtime        │  canvas slots, input, presentation
//! └──────────┬───────────┘
//!            │ NativeWindowing
//!   ┌────────┴─────────┐
//!   │                  │
//! GlfwWindowing   HeadlessWindowing
//! ```
//!
//! Window handles cross this boundary as plain integers, and native input is
//! reduced to the fixed [`NativeEvent`] vocabulary before the runtime sees it.

pub mod glfw;
pub mod headless;

use crate::input::KeyCode;
use thiserror::Error;

pub use self::glfw::GlfwWindowing;
pub use headless::HeadlessWindowing;

/// Platform errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The windowing library could not be initialized
    #[error("windowing initialization failed: {0}")]
    InitializationFailed(String),

    /// The OS refused to create a window
    #[error("window creation failed: {0}")]
    CreationFailed(String),

    /// No window is registered under this handle
    #[error("unknown native window {0:?}")]
    UnknownWindow(NativeWindow),

    /// Display enumeration failed or returned nothing
    #[error("display enumeration failed: {0}")]
    DisplayEnumeration(String),

    /// The backend does not implement this operation
    #[error("operation not supported by {backend}: {operation}")]
    Unsupported {
        /// Backend name
        backend: &'static str,
        /// Operation name
        operation: &'static str,
    },
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Opaque native window reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeWindow(pub u64);

/// Window rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct WindowGeometry {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Client-area width
    pub width: u32,
    /// Client-area height
    pub height: u32,
}

impl WindowGeometry {
    /// Build a geometry from position and size
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the screen point lies inside the rectangle
    pub fn contains(&self, px: f64, py: f64) -> bool {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        px >= x && py >= y && px < x + f64::from(self.width) && py < y + f64::from(self.height)
    }

    /// Center of the rectangle
    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x) + f64::from(self.width) / 2.0,
            f64::from(self.y) + f64::from(self.height) / 2.0,
        )
    }
}

/// Parameters for a new native window
#[derive(Debug, Clone)]
pub struct WindowDesc<'a> {
    /// Requested geometry
    pub geometry: WindowGeometry,
    /// Title bar text
    pub title: &'a str,
    /// Show OS decorations
    pub titlebar: bool,
    /// Allow the user to resize the window
    pub resizable: bool,
}

/// Window state transitions requested by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Iconify
    Minimized,
    /// Fill the work area
    Maximized,
    /// Back to the normal windowed state
    Restored,
    /// Exclusive fullscreen on a display (index into the last enumeration)
    Fullscreen {
        /// Target display
        display: usize,
    },
    /// Leave fullscreen and return to this geometry
    Windowed(WindowGeometry),
}

/// Cursor shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CursorKind {
    /// Platform default arrow
    #[default]
    Arrow,
    /// Text insertion beam
    Text,
    /// Precision crosshair
    Crosshair,
    /// Pointing hand
    Hand,
    /// Horizontal resize
    ResizeHorizontal,
    /// Vertical resize
    ResizeVertical,
    /// No visible cursor
    Hidden,
    /// Hidden and locked to the canvas; pointers over it report relative motion
    Locked,
}

/// Physical device behind a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerDevice {
    /// Mouse or trackpad
    #[default]
    Mouse,
    /// Finger on a touch screen
    Touch,
    /// Stylus
    Pen,
}

/// Pointer buttons as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Primary button
    Left,
    /// Secondary button
    Right,
    /// Wheel button
    Middle,
    /// Thumb back button
    Back,
    /// Thumb forward button
    Forward,
    /// Any further button, numbered from 5 (lower numbers are raised to 5)
    Other(u8),
}

impl MouseButton {
    /// Bit position of this button inside a 32-bit button mask
    pub fn bit(self) -> u32 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Middle => 2,
            Self::Back => 3,
            Self::Forward => 4,
            Self::Other(n) => u32::from(n).clamp(5, 31),
        }
    }
}

/// Display description
///
/// Rebuilt wholesale on every topology change.
#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    /// Slot occupancy
    pub valid: bool,
    /// Primary display flag
    pub primary: bool,
    /// Left edge in virtual screen space
    pub x: i32,
    /// Top edge in virtual screen space
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Content scale factor
    pub scale: f32,
    /// Refresh rate in Hz (0 when unknown)
    pub refresh_rate: u32,
}

impl Default for Display {
    fn default() -> Self {
        Self {
            valid: false,
            primary: false,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            scale: 1.0,
            refresh_rate: 0,
        }
    }
}

impl Display {
    /// Create a display record
    pub fn new(primary: bool, x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            valid: true,
            primary,
            x,
            y,
            width,
            height,
            scale: 1.0,
            refresh_rate: 60,
        }
    }

    /// Screen rectangle of the display
    pub fn geometry(&self) -> WindowGeometry {
        WindowGeometry::new(self.x, self.y, self.width, self.height)
    }
}

impl crate::foundation::arena::Slot for Display {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

/// Fixed vocabulary of native events
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// A pointer button went down
    ButtonDown {
        /// Source window
        window: NativeWindow,
        /// Pointer id (0 = primary mouse)
        pointer: u32,
        /// Button
        button: MouseButton,
    },
    /// A pointer button went up
    ButtonUp {
        /// Source window
        window: NativeWindow,
        /// Pointer id
        pointer: u32,
        /// Button
        button: MouseButton,
    },
    /// A pointer moved, in window coordinates
    PointerMoved {
        /// Source window
        window: NativeWindow,
        /// Pointer id
        pointer: u32,
        /// Device type
        device: PointerDevice,
        /// Window-space x
        x: f64,
        /// Window-space y
        y: f64,
        /// Pressure in `[0, 1]` (1 for devices without pressure)
        pressure: f32,
    },
    /// A touch or pen contact ended and its pointer should be dropped
    PointerLeft {
        /// Source window
        window: NativeWindow,
        /// Pointer id
        pointer: u32,
    },
    /// Scroll wheel or trackpad scroll
    Scroll {
        /// Source window
        window: NativeWindow,
        /// Pointer id
        pointer: u32,
        /// Horizontal delta
        dx: f64,
        /// Vertical delta
        dy: f64,
    },
    /// A key went down (repeats arrive as further downs)
    KeyDown {
        /// Source window
        window: NativeWindow,
        /// Normalized key code
        key: KeyCode,
    },
    /// A key went up
    KeyUp {
        /// Source window
        window: NativeWindow,
        /// Normalized key code
        key: KeyCode,
    },
    /// Client area resized
    Resized {
        /// Source window
        window: NativeWindow,
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// Window moved
    Moved {
        /// Source window
        window: NativeWindow,
        /// New left edge
        x: i32,
        /// New top edge
        y: i32,
    },
    /// User asked to close the window
    CloseRequested {
        /// Source window
        window: NativeWindow,
    },
    /// Window iconified or restored from iconified
    Minimized {
        /// Source window
        window: NativeWindow,
        /// New state
        minimized: bool,
    },
    /// Window maximized or restored from maximized
    Maximized {
        /// Source window
        window: NativeWindow,
        /// New state
        maximized: bool,
    },
    /// Display topology changed (hot-plug, mode change)
    DisplaysChanged,
}

/// Native windowing capability
///
/// Chosen once at startup. Implementations must tolerate being asked about
/// windows they no longer know and report that as an error instead of
/// panicking.
pub trait NativeWindowing {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Create a native window, returning its handle and OS-assigned geometry
    fn create_window(&mut self, desc: &WindowDesc<'_>) -> PlatformResult<(NativeWindow, WindowGeometry)>;

    /// Destroy a native window
    fn destroy_window(&mut self, window: NativeWindow);

    /// Move and resize a window, returning the geometry the OS applied
    fn set_geometry(&mut self, window: NativeWindow, geometry: WindowGeometry) -> PlatformResult<WindowGeometry>;

    /// Change the title bar text
    fn set_title(&mut self, window: NativeWindow, title: &str) -> PlatformResult<()>;

    /// Apply a window state transition
    fn set_state(&mut self, window: NativeWindow, state: WindowState) -> PlatformResult<()>;

    /// Change the cursor shown over a window
    fn set_cursor(&mut self, window: NativeWindow, cursor: CursorKind) -> PlatformResult<()>;

    /// Drawable size in pixels
    fn framebuffer_size(&self, window: NativeWindow) -> PlatformResult<(u32, u32)>;

    /// Drain pending native events into `out`
    fn poll_events(&mut self, out: &mut Vec<NativeEvent>);

    /// Enumerate displays, primary first
    fn displays(&mut self) -> PlatformResult<Vec<Display>>;

    /// Whether the platform is currently pacing frames itself (e.g. a modal resize loop)
    fn is_pacing(&self) -> bool {
        false
    }

    /// Instance extensions a GPU backend must enable to present to these windows
    fn required_gpu_extensions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Access to the concrete type for GPU backends that need native handles
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable access to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_contains_is_half_open() {
        let rect = WindowGeometry::new(10, 20, 100, 50);
        assert!(rect.contains(10.0, 20.0));
        assert!(rect.contains(109.9, 69.9));
        assert!(!rect.contains(110.0, 30.0));
        assert!(!rect.contains(50.0, 70.0));
        assert!(!rect.contains(9.9, 30.0));
    }

    #[test]
    fn test_button_bits() {
        assert_eq!(MouseButton::Left.bit(), 0);
        assert_eq!(MouseButton::Forward.bit(), 4);
        assert_eq!(MouseButton::Other(7).bit(), 7);
        assert_eq!(MouseButton::Other(200).bit(), 31);
        assert_eq!(MouseButton::Other(0).bit(), 5);
        assert_eq!(MouseButton::Other(4).bit(), 5);
    }
}
