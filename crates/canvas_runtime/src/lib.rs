//! # Canvas Runtime
//!
//! Handle-based windowing and GPU presentation.
//!
//! ## Features
//!
//! - **Canvases**: native windows addressed by stable slot handles
//! - **Presentation**: per-canvas Vulkan swapchains with bounded fence waits
//!   and automatic rebuilds on resize
//! - **Input**: mouse, touch and pen folded into one pointer model with
//!   per-tick edge detection, plus a 512-key keyboard state
//! - **Buffers**: device-local and persistently mapped GPU buffers
//! - **Headless backends**: in-memory window and GPU backends for tests and
//!   servers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use canvas_runtime::prelude::*;
//!
//! fn main() -> Result<(), CanvasError> {
//!     let mut runtime = Runtime::new(RuntimeConfig::default())?;
//!     let canvas = runtime.canvas(-1, -1, 1280, 720, "Hello")?;
//!     runtime.canvas_color(canvas, [0.1, 0.2, 0.3, 1.0])?;
//!
//!     runtime.canvas_run(|runtime, canvas| {
//!         if runtime.keyboard().was_pressed(KeyCode::ESCAPE) {
//!             let _ = runtime.canvas_close(canvas);
//!         }
//!     })
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

pub mod canvas;
pub mod config;
pub mod core;
pub mod error;
pub mod foundation;
pub mod input;
pub mod platform;
pub mod render;
pub mod validation;

pub use canvas::{Canvas, CanvasFlags, CanvasHandle, Runtime};
pub use error::{CanvasError, CanvasResult};

/// Common imports for runtime users
pub mod prelude {
    pub use crate::{
        canvas::{runtime::KEEP, Canvas, CanvasFlags, CanvasHandle, Runtime},
        core::config::{Config, RuntimeConfig},
        error::{status_of, CanvasError, CanvasResult},
        input::{KeyCode, KeyboardState, Pointer, PRIMARY_POINTER},
        platform::{CursorKind, Display, MouseButton, PointerDevice, WindowGeometry},
        render::{Buffer, BufferClass, BufferPattern, PresentState},
    };
}
