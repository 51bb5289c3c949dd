//! GPU backend abstraction
//!
//! A flat function table over the explicit-API primitives the presentation
//! engine and buffer manager need. Objects cross the trait as opaque integer
//! handles so the engine code is written once and every backend (Vulkan,
//! headless) fills in the same table.

use crate::platform::{NativeWindow, NativeWindowing};
use bitflags::bitflags;
use std::ptr::NonNull;
use std::time::Duration;
use thiserror::Error;

/// GPU errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The graphics library or a required entry point could not be loaded
    #[error("graphics library unavailable: {0}")]
    Unavailable(String),

    /// No usable device, queue or surface support
    #[error("device error: {0}")]
    Device(String),

    /// Host or device memory exhausted
    #[error("out of GPU memory")]
    OutOfMemory,

    /// A bounded wait expired
    #[error("GPU wait timed out")]
    Timeout,

    /// The device was lost
    #[error("GPU device lost")]
    DeviceLost,

    /// Feature not provided by this backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Handle not known to the backend
    #[error("invalid GPU handle")]
    InvalidHandle,

    /// Any other API failure
    #[error("{call} failed with code {code}")]
    Api {
        /// Failing entry point
        call: &'static str,
        /// Raw API result code
        code: i32,
    },
}

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

macro_rules! gpu_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
            pub struct $name(pub u64);

            impl $name {
                /// The empty handle
                pub const NULL: Self = Self(0);

                /// Whether this is the empty handle
                pub fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

gpu_handles! {
    /// Presentation surface
    SurfaceHandle,
    /// Swapchain
    SwapchainHandle,
    /// Swapchain image
    ImageHandle,
    /// Image view
    ImageViewHandle,
    /// Render target description (render pass)
    RenderTargetHandle,
    /// Framebuffer
    FramebufferHandle,
    /// Command pool
    CommandPoolHandle,
    /// Command buffer
    CommandBufferHandle,
    /// GPU-GPU semaphore
    SemaphoreHandle,
    /// CPU-GPU fence
    FenceHandle,
    /// Buffer object
    BufferHandle,
    /// Device memory allocation
    MemoryHandle,
}

/// Pixel formats the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit BGRA, sRGB encoded
    Bgra8Srgb,
    /// 8-bit RGBA, sRGB encoded
    Rgba8Srgb,
    /// 8-bit BGRA, linear
    Bgra8Unorm,
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// Anything else, by raw API value
    Other(i32),
}

/// Color spaces the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// sRGB non-linear
    SrgbNonlinear,
    /// Anything else, by raw API value
    Other(i32),
}

/// Format/color-space pair offered by a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    /// Pixel format
    pub format: PixelFormat,
    /// Color space
    pub color_space: ColorSpace,
}

/// Presentation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// Tear-free, low latency
    Mailbox,
    /// Tearing, lowest latency
    Immediate,
    /// Blocking vsync, always available
    Fifo,
    /// Vsync that tears when late
    FifoRelaxed,
}

/// 2D extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Extent2D {
    /// Build an extent
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either side is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Surface capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Minimum supported image count
    pub min_image_count: u32,
    /// Maximum supported image count (0 = unbounded)
    pub max_image_count: u32,
    /// Extent fixed by the surface, if any
    pub current_extent: Option<Extent2D>,
    /// Smallest allowed extent
    pub min_extent: Extent2D,
    /// Largest allowed extent
    pub max_extent: Extent2D,
}

/// Everything a surface supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSupport {
    /// Capabilities
    pub capabilities: SurfaceCapabilities,
    /// Offered formats
    pub formats: Vec<SurfaceFormat>,
    /// Offered present modes
    pub present_modes: Vec<PresentMode>,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Target surface
    pub surface: SurfaceHandle,
    /// Image format
    pub format: SurfaceFormat,
    /// Present mode
    pub present_mode: PresentMode,
    /// Image extent
    pub extent: Extent2D,
    /// Requested minimum image count
    pub image_count: u32,
}

/// Result of an acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready for recording
    Image {
        /// Swapchain image index
        index: u32,
        /// The swapchain no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain must be rebuilt
    OutOfDate,
}

/// Result of a present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued for display
    Presented,
    /// Queued, but the swapchain should be rebuilt
    Suboptimal,
    /// Not queued, the swapchain must be rebuilt
    OutOfDate,
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex input
        const VERTEX = 1 << 0;
        /// Index input
        const INDEX = 1 << 1;
        /// Uniform data
        const UNIFORM = 1 << 2;
        /// Storage data
        const STORAGE = 1 << 3;
        /// Copy source
        const TRANSFER_SRC = 1 << 4;
        /// Copy destination
        const TRANSFER_DST = 1 << 5;
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// CPU-mappable, coherent
    HostVisible,
    /// GPU-local, not mappable
    DeviceLocal,
}

/// A buffer bound to its memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    /// Buffer object
    pub buffer: BufferHandle,
    /// Bound memory
    pub memory: MemoryHandle,
    /// Size in bytes
    pub size: u64,
    /// Memory location
    pub location: MemoryLocation,
}

/// Queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitDesc {
    /// Recorded command buffer
    pub command_buffer: CommandBufferHandle,
    /// Semaphore to wait on before color output
    pub wait: Option<SemaphoreHandle>,
    /// Semaphore to signal on completion
    pub signal: Option<SemaphoreHandle>,
    /// Fence to signal on completion
    pub fence: Option<FenceHandle>,
}

/// Explicit graphics API function table
pub trait GpuBackend {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Create a presentation surface for a native window
    fn create_surface(
        &mut self,
        windowing: &mut dyn NativeWindowing,
        window: NativeWindow,
    ) -> GpuResult<SurfaceHandle>;

    /// Destroy a surface
    fn destroy_surface(&mut self, surface: SurfaceHandle);

    /// Query what a surface supports
    fn surface_support(&mut self, surface: SurfaceHandle) -> GpuResult<SurfaceSupport>;

    /// Create a swapchain
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<SwapchainHandle>;

    /// Destroy a swapchain
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);

    /// Images owned by a swapchain, by index
    fn swapchain_images(&mut self, swapchain: SwapchainHandle) -> GpuResult<Vec<ImageHandle>>;

    /// Create a color view of a swapchain image
    fn create_image_view(&mut self, image: ImageHandle, format: PixelFormat) -> GpuResult<ImageViewHandle>;

    /// Destroy an image view
    fn destroy_image_view(&mut self, view: ImageViewHandle);

    /// Create a single-color-attachment render target description
    fn create_render_target(&mut self, format: PixelFormat) -> GpuResult<RenderTargetHandle>;

    /// Destroy a render target description
    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    /// Create a framebuffer binding one view to a render target
    fn create_framebuffer(
        &mut self,
        target: RenderTargetHandle,
        view: ImageViewHandle,
        extent: Extent2D,
    ) -> GpuResult<FramebufferHandle>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Create a command pool on the graphics queue family
    fn create_command_pool(&mut self) -> GpuResult<CommandPoolHandle>;

    /// Destroy a command pool and everything allocated from it
    fn destroy_command_pool(&mut self, pool: CommandPoolHandle);

    /// Allocate primary command buffers
    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: usize,
    ) -> GpuResult<Vec<CommandBufferHandle>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);

    /// Reset and begin recording
    fn begin_commands(&mut self, command_buffer: CommandBufferHandle, one_time: bool) -> GpuResult<()>;

    /// Record a render pass that clears `framebuffer` to `color`
    fn cmd_clear(
        &mut self,
        command_buffer: CommandBufferHandle,
        target: RenderTargetHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        color: [f32; 4],
    );

    /// Record a buffer-to-buffer copy
    fn cmd_copy_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    );

    /// Finish recording
    fn end_commands(&mut self, command_buffer: CommandBufferHandle) -> GpuResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Create a fence, optionally already signaled
    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Block until `fence` is signaled or `timeout` expires
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> GpuResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()>;

    /// Acquire the next presentable image, signaling `signal` when it is ready
    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> GpuResult<AcquireOutcome>;

    /// Submit recorded work to the graphics queue
    fn submit(&mut self, desc: &SubmitDesc) -> GpuResult<()>;

    /// Queue an image for presentation after `wait` is signaled
    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GpuResult<PresentOutcome>;

    /// Block until every queue is idle
    fn wait_idle(&mut self) -> GpuResult<()>;

    /// Create a buffer with bound memory
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> GpuResult<BufferAllocation>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, allocation: &BufferAllocation);

    /// Map host-visible memory
    fn map_memory(&mut self, memory: MemoryHandle, size: u64) -> GpuResult<NonNull<u8>>;

    /// Unmap host-visible memory
    fn unmap_memory(&mut self, memory: MemoryHandle);

    /// Access to the concrete backend
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable access to the concrete backend
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
