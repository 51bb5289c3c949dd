//! Swapchain selection policy and per-image resources
//!
//! Everything here is rebuilt on resize: the swapchain itself, one view, one
//! framebuffer and one command buffer per image. The surface, render target
//! and command pool outlive it.

use super::backend::{
    ColorSpace, CommandBufferHandle, CommandPoolHandle, Extent2D, FramebufferHandle, GpuBackend,
    GpuError, GpuResult, ImageHandle, ImageViewHandle, PixelFormat, PresentMode,
    RenderTargetHandle, SurfaceCapabilities, SurfaceFormat, SurfaceHandle, SwapchainDesc,
    SwapchainHandle,
};

/// Capacity of the per-image arrays
pub const MAX_SWAPCHAIN_IMAGES: usize = 3;

/// Pick a surface format: sRGB BGRA8, then sRGB RGBA8, else the first offered
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    let preferred = [PixelFormat::Bgra8Srgb, PixelFormat::Rgba8Srgb];
    preferred
        .iter()
        .find_map(|wanted| {
            formats
                .iter()
                .find(|sf| sf.format == *wanted && sf.color_space == ColorSpace::SrgbNonlinear)
                .copied()
        })
        .or_else(|| formats.first().copied())
}

/// Pick a present mode
///
/// Without vsync: Mailbox, Immediate, else Fifo. With vsync: Mailbox, else
/// Fifo. Fifo is assumed available even when not listed.
pub fn choose_present_mode(modes: &[PresentMode], vsync: bool) -> PresentMode {
    let order: &[PresentMode] = if vsync {
        &[PresentMode::Mailbox]
    } else {
        &[PresentMode::Mailbox, PresentMode::Immediate]
    };
    order
        .iter()
        .copied()
        .find(|mode| modes.contains(mode))
        .unwrap_or(PresentMode::Fifo)
}

/// `min + 1`, clamped to the driver maximum (if any) and to array capacity
pub fn choose_image_count(caps: &SurfaceCapabilities) -> u32 {
    let mut count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count = count.min(caps.max_image_count);
    }
    count.min(MAX_SWAPCHAIN_IMAGES as u32)
}

/// The surface's fixed extent, or the window extent clamped to the allowed range
pub fn choose_extent(caps: &SurfaceCapabilities, window: Extent2D) -> Extent2D {
    caps.current_extent.unwrap_or_else(|| Extent2D {
        width: window
            .width
            .clamp(caps.min_extent.width, caps.max_extent.width.max(caps.min_extent.width)),
        height: window
            .height
            .clamp(caps.min_extent.height, caps.max_extent.height.max(caps.min_extent.height)),
    })
}

/// Swapchain and its per-image dependents
#[derive(Debug, Default)]
pub struct SwapchainResources {
    /// Swapchain handle
    pub swapchain: SwapchainHandle,
    /// Images by swapchain index
    pub images: Vec<ImageHandle>,
    /// One view per image
    pub views: Vec<ImageViewHandle>,
    /// One framebuffer per image
    pub framebuffers: Vec<FramebufferHandle>,
    /// One command buffer per image
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Chosen format
    pub format: Option<SurfaceFormat>,
    /// Image extent
    pub extent: Extent2D,
}

impl SwapchainResources {
    /// Build a swapchain and all per-image objects
    ///
    /// On failure every object created so far is released before returning.
    pub fn build(
        backend: &mut dyn GpuBackend,
        surface: SurfaceHandle,
        format: SurfaceFormat,
        present_mode: PresentMode,
        extent: Extent2D,
        image_count: u32,
        target: RenderTargetHandle,
        pool: CommandPoolHandle,
    ) -> GpuResult<Self> {
        let mut resources = Self {
            format: Some(format),
            extent,
            ..Self::default()
        };

        let desc = SwapchainDesc {
            surface,
            format,
            present_mode,
            extent,
            image_count,
        };

        if let Err(e) = resources.populate(backend, &desc, target, pool) {
            log::warn!("Swapchain build failed, rolling back: {e}");
            resources.release(backend, pool);
            return Err(e);
        }

        log::debug!(
            "Swapchain built: {} images, {}x{}, {:?}",
            resources.images.len(),
            extent.width,
            extent.height,
            present_mode
        );
        Ok(resources)
    }

    fn populate(
        &mut self,
        backend: &mut dyn GpuBackend,
        desc: &SwapchainDesc,
        target: RenderTargetHandle,
        pool: CommandPoolHandle,
    ) -> GpuResult<()> {
        self.swapchain = backend.create_swapchain(desc)?;

        let images = backend.swapchain_images(self.swapchain)?;
        if images.is_empty() || images.len() > MAX_SWAPCHAIN_IMAGES {
            return Err(GpuError::Unsupported(format!(
                "swapchain returned {} images (capacity {MAX_SWAPCHAIN_IMAGES})",
                images.len()
            )));
        }
        self.images = images;

        for &image in &self.images {
            let view = backend.create_image_view(image, desc.format.format)?;
            self.views.push(view);
        }

        for &view in &self.views {
            let framebuffer = backend.create_framebuffer(target, view, desc.extent)?;
            self.framebuffers.push(framebuffer);
        }

        self.command_buffers = backend.allocate_command_buffers(pool, self.images.len())?;
        Ok(())
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Release command buffers, framebuffers, views and the swapchain, in that order
    pub fn release(&mut self, backend: &mut dyn GpuBackend, pool: CommandPoolHandle) {
        if !self.command_buffers.is_empty() {
            backend.free_command_buffers(pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        for framebuffer in self.framebuffers.drain(..).rev() {
            backend.destroy_framebuffer(framebuffer);
        }
        for view in self.views.drain(..).rev() {
            backend.destroy_image_view(view);
        }
        self.images.clear();
        if !self.swapchain.is_null() {
            backend.destroy_swapchain(self.swapchain);
            self.swapchain = SwapchainHandle::NULL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: PixelFormat, color_space: ColorSpace) -> SurfaceFormat {
        SurfaceFormat { format, color_space }
    }

    fn caps(min: u32, max: u32) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: min,
            max_image_count: max,
            current_extent: None,
            min_extent: Extent2D::new(1, 1),
            max_extent: Extent2D::new(4096, 4096),
        }
    }

    #[test]
    fn test_format_prefers_bgra_srgb() {
        let formats = [
            format(PixelFormat::Rgba8Unorm, ColorSpace::SrgbNonlinear),
            format(PixelFormat::Rgba8Srgb, ColorSpace::SrgbNonlinear),
            format(PixelFormat::Bgra8Srgb, ColorSpace::SrgbNonlinear),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[2]));
    }

    #[test]
    fn test_format_falls_back_to_rgba_then_first() {
        let formats = [
            format(PixelFormat::Bgra8Unorm, ColorSpace::SrgbNonlinear),
            format(PixelFormat::Bgra8Srgb, ColorSpace::Other(1_000_104_001)),
            format(PixelFormat::Rgba8Srgb, ColorSpace::SrgbNonlinear),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[2]));
        assert_eq!(choose_surface_format(&formats[..2]), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_order() {
        use PresentMode::*;
        assert_eq!(choose_present_mode(&[Fifo, Immediate, Mailbox], false), Mailbox);
        assert_eq!(choose_present_mode(&[Fifo, Immediate], false), Immediate);
        assert_eq!(choose_present_mode(&[Fifo], false), Fifo);
        assert_eq!(choose_present_mode(&[Fifo, Immediate], true), Fifo);
        assert_eq!(choose_present_mode(&[Immediate, Mailbox], true), Mailbox);
        assert_eq!(choose_present_mode(&[], false), Fifo);
    }

    #[test]
    fn test_image_count_clamping() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(1, 2)), 2);
        assert_eq!(choose_image_count(&caps(3, 8)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
    }

    #[test]
    fn test_extent_uses_surface_value_when_fixed() {
        let mut fixed = caps(2, 3);
        fixed.current_extent = Some(Extent2D::new(800, 600));
        assert_eq!(choose_extent(&fixed, Extent2D::new(10, 10)), Extent2D::new(800, 600));

        let free = caps(2, 3);
        assert_eq!(
            choose_extent(&free, Extent2D::new(9000, 300)),
            Extent2D::new(4096, 300)
        );
    }
}
