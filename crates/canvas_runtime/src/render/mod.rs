//! GPU side of the runtime
//!
//! - [`backend`]: the [`GpuBackend`] function table and its handle types
//! - [`presentation`]: per-canvas swapchain state machine
//! - [`buffer`]: user buffers over two memory strategies
//! - [`vulkan`] / [`headless`]: backend implementations

pub mod backend;
pub mod buffer;
pub mod headless;
pub mod presentation;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{Extent2D, GpuBackend, GpuError, GpuResult};
pub use buffer::{Buffer, BufferClass, BufferError, BufferPattern};
pub use headless::{Hazard, HeadlessGpu};
pub use presentation::{FrameOutcome, PresentError, PresentSettings, PresentState, PresentationEngine};
pub use vulkan::VulkanGpu;
