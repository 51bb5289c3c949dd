//! Vulkan backend
//!
//! Implements [`GpuBackend`] on `ash`. Engine handles carry raw Vulkan handle
//! values, so no lookup tables are needed beyond what Vulkan itself requires
//! (swapchain surfaces and buffer memory).

mod context;

pub use context::{VulkanDevice, VulkanInstance};

use crate::platform::glfw::GlfwWindowing;
use crate::platform::{NativeWindow, NativeWindowing};
use crate::render::backend::{
    AcquireOutcome, BufferAllocation, BufferHandle, BufferUsage, ColorSpace, CommandBufferHandle,
    CommandPoolHandle, Extent2D, FenceHandle, FramebufferHandle, GpuBackend, GpuError, GpuResult,
    ImageHandle, ImageViewHandle, MemoryHandle, MemoryLocation, PixelFormat, PresentMode,
    PresentOutcome, RenderTargetHandle, SemaphoreHandle, SubmitDesc, SurfaceCapabilities,
    SurfaceFormat, SurfaceHandle, SurfaceSupport, SwapchainDesc, SwapchainHandle,
};
use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::time::Duration;

/// Map a Vulkan result code to a backend error
pub(crate) fn vk_error(call: &'static str, result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GpuError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        vk::Result::TIMEOUT | vk::Result::NOT_READY => GpuError::Timeout,
        other => GpuError::Api {
            call,
            code: other.as_raw(),
        },
    }
}

fn to_vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Other(raw) => vk::Format::from_raw(raw),
    }
}

fn from_vk_format(format: vk::Format) -> PixelFormat {
    match format {
        vk::Format::B8G8R8A8_SRGB => PixelFormat::Bgra8Srgb,
        vk::Format::R8G8B8A8_SRGB => PixelFormat::Rgba8Srgb,
        vk::Format::B8G8R8A8_UNORM => PixelFormat::Bgra8Unorm,
        vk::Format::R8G8B8A8_UNORM => PixelFormat::Rgba8Unorm,
        other => PixelFormat::Other(other.as_raw()),
    }
}

fn to_vk_color_space(color_space: ColorSpace) -> vk::ColorSpaceKHR {
    match color_space {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::Other(raw) => vk::ColorSpaceKHR::from_raw(raw),
    }
}

fn from_vk_color_space(color_space: vk::ColorSpaceKHR) -> ColorSpace {
    if color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR {
        ColorSpace::SrgbNonlinear
    } else {
        ColorSpace::Other(color_space.as_raw())
    }
}

fn to_vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

fn from_vk_present_mode(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    let table = [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
    ];
    for (ours, theirs) in table {
        if usage.contains(ours) {
            flags |= theirs;
        }
    }
    flags
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Vulkan implementation of [`GpuBackend`]
pub struct VulkanGpu {
    // Field order matters: the device must drop before the instance
    device: Option<VulkanDevice>,
    instance: VulkanInstance,
    swapchain_surfaces: HashMap<SwapchainHandle, SurfaceHandle>,
}

impl VulkanGpu {
    /// Load Vulkan and create an instance with the windowing backend's extensions
    pub fn new(windowing: &dyn NativeWindowing, app_name: &str, validation: bool) -> GpuResult<Self> {
        let extensions = windowing.required_gpu_extensions();
        let instance = VulkanInstance::new(app_name, &extensions, validation)?;
        Ok(Self {
            device: None,
            instance,
            swapchain_surfaces: HashMap::new(),
        })
    }

    fn device(&self) -> GpuResult<&VulkanDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| GpuError::Device("no logical device yet (create a surface first)".to_string()))
    }

    fn raw(&self) -> GpuResult<&ash::Device> {
        self.device().map(|d| &d.device)
    }

    fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> GpuResult<vk::SurfaceCapabilitiesKHR> {
        let physical = self.device()?.physical;
        unsafe {
            self.instance
                .surface_loader
                .get_physical_device_surface_capabilities(physical, surface)
        }
        .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))
    }
}

impl GpuBackend for VulkanGpu {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn create_surface(
        &mut self,
        windowing: &mut dyn NativeWindowing,
        window: NativeWindow,
    ) -> GpuResult<SurfaceHandle> {
        let glfw = windowing
            .as_any_mut()
            .downcast_mut::<GlfwWindowing>()
            .ok_or_else(|| GpuError::Unsupported("Vulkan surfaces need the GLFW windowing backend".to_string()))?;

        let surface = glfw
            .create_vulkan_surface(window, self.instance.instance.handle())
            .map_err(|e| GpuError::Device(e.to_string()))?;

        match &self.device {
            Some(device) => {
                if !device.supports_surface(&self.instance, surface) {
                    unsafe { self.instance.surface_loader.destroy_surface(surface, None) };
                    return Err(GpuError::Device("selected GPU cannot present to this window".to_string()));
                }
            }
            None => match VulkanDevice::new(&self.instance, surface) {
                Ok(device) => self.device = Some(device),
                Err(e) => {
                    unsafe { self.instance.surface_loader.destroy_surface(surface, None) };
                    return Err(e);
                }
            },
        }

        Ok(SurfaceHandle(surface.as_raw()))
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        unsafe {
            self.instance
                .surface_loader
                .destroy_surface(vk::SurfaceKHR::from_raw(surface.0), None);
        }
    }

    fn surface_support(&mut self, surface: SurfaceHandle) -> GpuResult<SurfaceSupport> {
        let surface = vk::SurfaceKHR::from_raw(surface.0);
        let physical = self.device()?.physical;
        let loader = &self.instance.surface_loader;

        let caps = self.surface_capabilities(surface)?;
        let formats = unsafe { loader.get_physical_device_surface_formats(physical, surface) }
            .map_err(|e| vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
        let modes = unsafe { loader.get_physical_device_surface_present_modes(physical, surface) }
            .map_err(|e| vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;

        let current_extent = (caps.current_extent.width != u32::MAX).then(|| {
            Extent2D::new(caps.current_extent.width, caps.current_extent.height)
        });

        Ok(SurfaceSupport {
            capabilities: SurfaceCapabilities {
                min_image_count: caps.min_image_count,
                max_image_count: caps.max_image_count,
                current_extent,
                min_extent: Extent2D::new(caps.min_image_extent.width, caps.min_image_extent.height),
                max_extent: Extent2D::new(caps.max_image_extent.width, caps.max_image_extent.height),
            },
            formats: formats
                .iter()
                .map(|f| SurfaceFormat {
                    format: from_vk_format(f.format),
                    color_space: from_vk_color_space(f.color_space),
                })
                .collect(),
            present_modes: modes.into_iter().filter_map(from_vk_present_mode).collect(),
        })
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<SwapchainHandle> {
        let surface = vk::SurfaceKHR::from_raw(desc.surface.0);
        let caps = self.surface_capabilities(surface)?;
        let device = self.device()?;

        let families = [device.graphics_family, device.present_family];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(desc.image_count)
            .image_format(to_vk_format(desc.format.format))
            .image_color_space(to_vk_color_space(desc.format.color_space))
            .image_extent(vk::Extent2D {
                width: desc.extent.width,
                height: desc.extent.height,
            })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(to_vk_present_mode(desc.present_mode))
            .clipped(true);

        let create_info = if device.graphics_family == device.present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| vk_error("vkCreateSwapchainKHR", e))?;
        let handle = SwapchainHandle(swapchain.as_raw());
        self.swapchain_surfaces.insert(handle, desc.surface);
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.swapchain_surfaces.remove(&swapchain);
        if let Ok(device) = self.device() {
            unsafe {
                device
                    .swapchain_loader
                    .destroy_swapchain(vk::SwapchainKHR::from_raw(swapchain.0), None);
            }
        }
    }

    fn swapchain_images(&mut self, swapchain: SwapchainHandle) -> GpuResult<Vec<ImageHandle>> {
        let images = unsafe {
            self.device()?
                .swapchain_loader
                .get_swapchain_images(vk::SwapchainKHR::from_raw(swapchain.0))
        }
        .map_err(|e| vk_error("vkGetSwapchainImagesKHR", e))?;
        Ok(images.into_iter().map(|image| ImageHandle(image.as_raw())).collect())
    }

    fn create_image_view(&mut self, image: ImageHandle, format: PixelFormat) -> GpuResult<ImageViewHandle> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(vk::Image::from_raw(image.0))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(to_vk_format(format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.raw()?.create_image_view(&create_info, None) }
            .map_err(|e| vk_error("vkCreateImageView", e))?;
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_image_view(vk::ImageView::from_raw(view.0), None) };
        }
    }

    fn create_render_target(&mut self, format: PixelFormat) -> GpuResult<RenderTargetHandle> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(to_vk_format(format))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();

        // Image layout transition waits for the acquire semaphore
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { self.raw()?.create_render_pass(&create_info, None) }
            .map_err(|e| vk_error("vkCreateRenderPass", e))?;
        Ok(RenderTargetHandle(render_pass.as_raw()))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_render_pass(vk::RenderPass::from_raw(target.0), None) };
        }
    }

    fn create_framebuffer(
        &mut self,
        target: RenderTargetHandle,
        view: ImageViewHandle,
        extent: Extent2D,
    ) -> GpuResult<FramebufferHandle> {
        let attachments = [vk::ImageView::from_raw(view.0)];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(vk::RenderPass::from_raw(target.0))
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.raw()?.create_framebuffer(&create_info, None) }
            .map_err(|e| vk_error("vkCreateFramebuffer", e))?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_framebuffer(vk::Framebuffer::from_raw(framebuffer.0), None) };
        }
    }

    fn create_command_pool(&mut self) -> GpuResult<CommandPoolHandle> {
        let device = self.device()?;
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&create_info, None) }
            .map_err(|e| vk_error("vkCreateCommandPool", e))?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_command_pool(vk::CommandPool::from_raw(pool.0), None) };
        }
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: usize,
    ) -> GpuResult<Vec<CommandBufferHandle>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(vk::CommandPool::from_raw(pool.0))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let buffers = unsafe { self.raw()?.allocate_command_buffers(&allocate_info) }
            .map_err(|e| vk_error("vkAllocateCommandBuffers", e))?;
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBufferHandle(buffer.as_raw()))
            .collect())
    }

    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        if buffers.is_empty() {
            return;
        }
        if let Ok(device) = self.raw() {
            let raw: Vec<vk::CommandBuffer> = buffers
                .iter()
                .map(|buffer| vk::CommandBuffer::from_raw(buffer.0))
                .collect();
            unsafe { device.free_command_buffers(vk::CommandPool::from_raw(pool.0), &raw) };
        }
    }

    fn begin_commands(&mut self, command_buffer: CommandBufferHandle, one_time: bool) -> GpuResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            self.raw()?
                .begin_command_buffer(vk::CommandBuffer::from_raw(command_buffer.0), &begin_info)
        }
        .map_err(|e| vk_error("vkBeginCommandBuffer", e))
    }

    fn cmd_clear(
        &mut self,
        command_buffer: CommandBufferHandle,
        target: RenderTargetHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        color: [f32; 4],
    ) {
        let Ok(device) = self.raw() else {
            return;
        };
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(vk::RenderPass::from_raw(target.0))
            .framebuffer(vk::Framebuffer::from_raw(framebuffer.0))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: extent.width,
                    height: extent.height,
                },
            })
            .clear_values(&clear_values);

        let cmd = vk::CommandBuffer::from_raw(command_buffer.0);
        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);
        }
    }

    fn cmd_copy_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let Ok(device) = self.raw() else {
            return;
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            device.cmd_copy_buffer(
                vk::CommandBuffer::from_raw(command_buffer.0),
                vk::Buffer::from_raw(src.0),
                vk::Buffer::from_raw(dst.0),
                &[region],
            );
        }
    }

    fn end_commands(&mut self, command_buffer: CommandBufferHandle) -> GpuResult<()> {
        unsafe {
            self.raw()?
                .end_command_buffer(vk::CommandBuffer::from_raw(command_buffer.0))
        }
        .map_err(|e| vk_error("vkEndCommandBuffer", e))
    }

    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.raw()?.create_semaphore(&create_info, None) }
            .map_err(|e| vk_error("vkCreateSemaphore", e))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_semaphore(vk::Semaphore::from_raw(semaphore.0), None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.raw()?.create_fence(&create_info, None) }
            .map_err(|e| vk_error("vkCreateFence", e))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.destroy_fence(vk::Fence::from_raw(fence.0), None) };
        }
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> GpuResult<()> {
        let fences = [vk::Fence::from_raw(fence.0)];
        unsafe { self.raw()?.wait_for_fences(&fences, true, timeout_ns(timeout)) }
            .map_err(|e| vk_error("vkWaitForFences", e))
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()> {
        let fences = [vk::Fence::from_raw(fence.0)];
        unsafe { self.raw()?.reset_fences(&fences) }.map_err(|e| vk_error("vkResetFences", e))
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> GpuResult<AcquireOutcome> {
        let result = unsafe {
            self.device()?.swapchain_loader.acquire_next_image(
                vk::SwapchainKHR::from_raw(swapchain.0),
                timeout_ns(timeout),
                vk::Semaphore::from_raw(signal.0),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR", e)),
        }
    }

    fn submit(&mut self, desc: &SubmitDesc) -> GpuResult<()> {
        let device = self.device()?;
        let wait_semaphores: Vec<vk::Semaphore> = desc
            .wait
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.0))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = desc
            .signal
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.0))
            .collect();
        let command_buffers = [vk::CommandBuffer::from_raw(desc.command_buffer.0)];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let fence = desc
            .fence
            .map_or_else(vk::Fence::null, |f| vk::Fence::from_raw(f.0));

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], fence)
        }
        .map_err(|e| vk_error("vkQueueSubmit", e))
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GpuResult<PresentOutcome> {
        let device = self.device()?;
        let wait_semaphores = [vk::Semaphore::from_raw(wait.0)];
        let swapchains = [vk::SwapchainKHR::from_raw(swapchain.0)];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe {
            device
                .swapchain_loader
                .queue_present(device.present_queue, &present_info)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR", e)),
        }
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        match &self.device {
            Some(device) => unsafe { device.device.device_wait_idle() }
                .map_err(|e| vk_error("vkDeviceWaitIdle", e)),
            None => Ok(()),
        }
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> GpuResult<BufferAllocation> {
        let device = self.device()?;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(buffer_usage_flags(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&create_info, None) }
            .map_err(|e| vk_error("vkCreateBuffer", e))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let properties = match location {
            MemoryLocation::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };

        let memory = device
            .find_memory_type(requirements.memory_type_bits, properties)
            .and_then(|memory_type| {
                let allocate_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type);
                unsafe { device.device.allocate_memory(&allocate_info, None) }
                    .map_err(|e| vk_error("vkAllocateMemory", e))
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.device.destroy_buffer(buffer, None);
                device.device.free_memory(memory, None);
            }
            return Err(vk_error("vkBindBufferMemory", e));
        }

        Ok(BufferAllocation {
            buffer: BufferHandle(buffer.as_raw()),
            memory: MemoryHandle(memory.as_raw()),
            size,
            location,
        })
    }

    fn destroy_buffer(&mut self, allocation: &BufferAllocation) {
        if let Ok(device) = self.raw() {
            unsafe {
                device.destroy_buffer(vk::Buffer::from_raw(allocation.buffer.0), None);
                device.free_memory(vk::DeviceMemory::from_raw(allocation.memory.0), None);
            }
        }
    }

    fn map_memory(&mut self, memory: MemoryHandle, size: u64) -> GpuResult<NonNull<u8>> {
        let ptr = unsafe {
            self.raw()?.map_memory(
                vk::DeviceMemory::from_raw(memory.0),
                0,
                size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .map_err(|e| vk_error("vkMapMemory", e))?;
        NonNull::new(ptr.cast::<u8>()).ok_or(GpuError::Api {
            call: "vkMapMemory",
            code: vk::Result::ERROR_MEMORY_MAP_FAILED.as_raw(),
        })
    }

    fn unmap_memory(&mut self, memory: MemoryHandle) {
        if let Ok(device) = self.raw() {
            unsafe { device.unmap_memory(vk::DeviceMemory::from_raw(memory.0)) };
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping_round_trips_known_formats() {
        for format in [
            PixelFormat::Bgra8Srgb,
            PixelFormat::Rgba8Srgb,
            PixelFormat::Bgra8Unorm,
            PixelFormat::Rgba8Unorm,
        ] {
            assert_eq!(from_vk_format(to_vk_format(format)), format);
        }
        assert_eq!(
            from_vk_format(vk::Format::R16G16B16A16_SFLOAT),
            PixelFormat::Other(vk::Format::R16G16B16A16_SFLOAT.as_raw())
        );
    }

    #[test]
    fn test_result_codes_map_to_error_kinds() {
        assert_eq!(vk_error("x", vk::Result::TIMEOUT), GpuError::Timeout);
        assert_eq!(vk_error("x", vk::Result::ERROR_DEVICE_LOST), GpuError::DeviceLost);
        assert_eq!(
            vk_error("x", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::OutOfMemory
        );
        assert!(matches!(
            vk_error("vkCreateFence", vk::Result::ERROR_INITIALIZATION_FAILED),
            GpuError::Api { call: "vkCreateFence", .. }
        ));
    }

    #[test]
    fn test_usage_flags_combine() {
        let flags = buffer_usage_flags(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(
            flags,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(from_vk_present_mode(vk::PresentModeKHR::SHARED_DEMAND_REFRESH), None);
    }
}
