//! Simulated GPU backend
//!
//! Models an in-order graphics queue in memory. Submissions stay pending until
//! a fence wait, an idle wait or [`HeadlessGpu::retire_oldest`] completes them,
//! which gives tests precise control over what the "GPU" is still doing.
//!
//! Every API misuse the engine could commit against a real driver is recorded
//! as a [`Hazard`] instead of being silently accepted: recording into an image
//! that pending work still uses, resetting a pending fence, re-signaling a
//! semaphore a pending submit still waits on, and so on.
//!
//! Acquire hands out free images round-robin unless a test queues a specific
//! index with [`HeadlessGpu::queue_acquire_image`].

use super::backend::{
    AcquireOutcome, BufferAllocation, BufferHandle, BufferUsage, ColorSpace, CommandBufferHandle,
    CommandPoolHandle, Extent2D, FenceHandle, FramebufferHandle, GpuBackend, GpuError, GpuResult,
    ImageHandle, ImageViewHandle, MemoryHandle, MemoryLocation, PixelFormat, PresentMode,
    PresentOutcome, RenderTargetHandle, SemaphoreHandle, SubmitDesc, SurfaceCapabilities,
    SurfaceFormat, SurfaceHandle, SurfaceSupport, SwapchainDesc, SwapchainHandle,
};
use crate::platform::{NativeWindow, NativeWindowing};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::time::Duration;

/// A recorded API misuse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    /// Recording targeted an image still used by pending work
    ImageInFlight {
        /// Image index within its swapchain
        image: usize,
    },
    /// A command buffer was reset or freed while pending
    CommandBufferInFlight,
    /// A fence was reset, destroyed or re-submitted while pending or signaled
    FenceMisuse(&'static str),
    /// A semaphore was waited unsignaled or signaled twice
    SemaphoreMisuse(&'static str),
    /// Present of an image that was not acquired
    PresentUnacquired {
        /// Image index
        image: u32,
    },
    /// A swapchain was destroyed while its images were in use
    SwapchainInFlight,
    /// A command buffer was submitted before recording ended
    UnfinishedRecording,
}

#[derive(Debug, Clone)]
struct SwapchainState {
    images: Vec<ImageHandle>,
    acquired: Vec<bool>,
    next: usize,
}

#[derive(Debug, Default)]
struct CommandState {
    pool: CommandPoolHandle,
    recording: bool,
    targets: Vec<ImageHandle>,
    copies: Vec<(BufferHandle, BufferHandle, u64)>,
}

#[derive(Debug)]
struct Submission {
    command_buffer: CommandBufferHandle,
    wait: Option<SemaphoreHandle>,
    fence: Option<FenceHandle>,
    images: Vec<ImageHandle>,
    copies: Vec<(BufferHandle, BufferHandle, u64)>,
}

#[derive(Debug)]
struct MemoryState {
    bytes: Box<[u8]>,
    location: MemoryLocation,
    mapped: bool,
}

/// In-memory GPU
pub struct HeadlessGpu {
    next_handle: u64,
    live: HashMap<u64, &'static str>,
    support: SurfaceSupport,
    surfaces: HashMap<u64, NativeWindow>,
    swapchains: HashMap<SwapchainHandle, SwapchainState>,
    image_index: HashMap<ImageHandle, (SwapchainHandle, usize)>,
    view_image: HashMap<ImageViewHandle, ImageHandle>,
    framebuffer_view: HashMap<FramebufferHandle, ImageViewHandle>,
    commands: HashMap<CommandBufferHandle, CommandState>,
    fences: HashMap<FenceHandle, bool>,
    semaphores: HashMap<SemaphoreHandle, bool>,
    buffers: HashMap<BufferHandle, MemoryHandle>,
    memory: HashMap<MemoryHandle, MemoryState>,
    queue: VecDeque<Submission>,
    hazards: Vec<Hazard>,
    acquire_faults: VecDeque<AcquireOutcome>,
    acquire_order: VecDeque<usize>,
    present_faults: VecDeque<PresentOutcome>,
    record_faults: usize,
    fail_countdown: Option<usize>,
    presents: u64,
    last_clear: Option<[f32; 4]>,
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGpu {
    /// Create a GPU whose surfaces offer 2..=3 images, sRGB BGRA8 and Mailbox/Fifo
    pub fn new() -> Self {
        Self::with_support(SurfaceSupport {
            capabilities: SurfaceCapabilities {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: None,
                min_extent: Extent2D::new(1, 1),
                max_extent: Extent2D::new(16384, 16384),
            },
            formats: vec![
                SurfaceFormat {
                    format: PixelFormat::Bgra8Unorm,
                    color_space: ColorSpace::SrgbNonlinear,
                },
                SurfaceFormat {
                    format: PixelFormat::Bgra8Srgb,
                    color_space: ColorSpace::SrgbNonlinear,
                },
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
        })
    }

    /// Create a GPU whose surfaces report `support`
    pub fn with_support(support: SurfaceSupport) -> Self {
        Self {
            next_handle: 1,
            live: HashMap::new(),
            support,
            surfaces: HashMap::new(),
            swapchains: HashMap::new(),
            image_index: HashMap::new(),
            view_image: HashMap::new(),
            framebuffer_view: HashMap::new(),
            commands: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            buffers: HashMap::new(),
            memory: HashMap::new(),
            queue: VecDeque::new(),
            hazards: Vec::new(),
            acquire_faults: VecDeque::new(),
            acquire_order: VecDeque::new(),
            present_faults: VecDeque::new(),
            record_faults: 0,
            fail_countdown: None,
            presents: 0,
            last_clear: None,
        }
    }

    /// Make the next acquire return `outcome` instead of an image
    pub fn queue_acquire_outcome(&mut self, outcome: AcquireOutcome) {
        self.acquire_faults.push_back(outcome);
    }

    /// Make the next acquire hand out image `index` if it is free
    ///
    /// An index that is out of range or already acquired falls back to the
    /// round-robin choice.
    pub fn queue_acquire_image(&mut self, index: usize) {
        self.acquire_order.push_back(index);
    }

    /// Make the next `begin_commands` fail
    pub fn fail_next_record(&mut self) {
        self.record_faults += 1;
    }

    /// Make the next present return `outcome`
    pub fn queue_present_outcome(&mut self, outcome: PresentOutcome) {
        self.present_faults.push_back(outcome);
    }

    /// Let `successes` more create calls succeed, then fail the next one
    pub fn fail_after(&mut self, successes: usize) {
        self.fail_countdown = Some(successes);
    }

    /// Complete the oldest pending submission
    pub fn retire_oldest(&mut self) -> bool {
        let Some(submission) = self.queue.pop_front() else {
            return false;
        };
        for (src, dst, size) in &submission.copies {
            self.execute_copy(*src, *dst, *size);
        }
        if let Some(fence) = submission.fence {
            self.fences.insert(fence, true);
        }
        true
    }

    /// Complete every pending submission
    pub fn retire_all(&mut self) {
        while self.retire_oldest() {}
    }

    /// Pending submissions
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Recorded misuse
    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    /// Objects created and not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    /// Successful presents so far
    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// Color of the most recent clear
    pub fn last_clear(&self) -> Option<[f32; 4]> {
        self.last_clear
    }

    /// Whether a memory allocation is currently mapped
    pub fn is_mapped(&self, memory: MemoryHandle) -> bool {
        self.memory.get(&memory).is_some_and(|state| state.mapped)
    }

    /// Contents of a buffer's memory
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<&[u8]> {
        let memory = self.buffers.get(&buffer)?;
        self.memory.get(memory).map(|state| &*state.bytes)
    }

    fn create(&mut self, kind: &'static str) -> GpuResult<u64> {
        if let Some(remaining) = self.fail_countdown.as_mut() {
            if *remaining == 0 {
                self.fail_countdown = None;
                log::debug!("Headless GPU: injected failure creating {kind}");
                return Err(GpuError::OutOfMemory);
            }
            *remaining -= 1;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle, kind);
        Ok(handle)
    }

    fn forget(&mut self, handle: u64) {
        self.live.remove(&handle);
    }

    fn image_pending(&self, image: ImageHandle) -> bool {
        self.queue.iter().any(|s| s.images.contains(&image))
    }

    fn fence_pending(&self, fence: FenceHandle) -> bool {
        self.queue.iter().any(|s| s.fence == Some(fence))
    }

    fn semaphore_awaited(&self, semaphore: SemaphoreHandle) -> bool {
        self.queue.iter().any(|s| s.wait == Some(semaphore))
    }

    fn command_pending(&self, command_buffer: CommandBufferHandle) -> bool {
        self.queue.iter().any(|s| s.command_buffer == command_buffer)
    }

    fn execute_copy(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let (Some(src_mem), Some(dst_mem)) = (self.buffers.get(&src), self.buffers.get(&dst)) else {
            return;
        };
        let (src_mem, dst_mem) = (*src_mem, *dst_mem);
        let Some(bytes) = self.memory.get(&src_mem).map(|m| m.bytes.clone()) else {
            return;
        };
        if let Some(dst) = self.memory.get_mut(&dst_mem) {
            let len = (size as usize).min(bytes.len()).min(dst.bytes.len());
            dst.bytes[..len].copy_from_slice(&bytes[..len]);
        }
    }

    fn signal_semaphore(&mut self, semaphore: SemaphoreHandle, misuse: &'static str) -> GpuResult<()> {
        let signaled = *self.semaphores.get(&semaphore).ok_or(GpuError::InvalidHandle)?;
        if signaled {
            self.hazard(Hazard::SemaphoreMisuse(misuse));
        }
        self.semaphores.insert(semaphore, true);
        Ok(())
    }

    fn consume_semaphore(&mut self, semaphore: SemaphoreHandle, misuse: &'static str) -> GpuResult<()> {
        let signaled = *self.semaphores.get(&semaphore).ok_or(GpuError::InvalidHandle)?;
        if !signaled {
            self.hazard(Hazard::SemaphoreMisuse(misuse));
        }
        self.semaphores.insert(semaphore, false);
        Ok(())
    }

    fn hazard(&mut self, hazard: Hazard) {
        log::warn!("Headless GPU hazard: {hazard:?}");
        self.hazards.push(hazard);
    }
}

impl GpuBackend for HeadlessGpu {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_surface(
        &mut self,
        _windowing: &mut dyn NativeWindowing,
        window: NativeWindow,
    ) -> GpuResult<SurfaceHandle> {
        let handle = self.create("surface")?;
        self.surfaces.insert(handle, window);
        Ok(SurfaceHandle(handle))
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        self.surfaces.remove(&surface.0);
        self.forget(surface.0);
    }

    fn surface_support(&mut self, surface: SurfaceHandle) -> GpuResult<SurfaceSupport> {
        if !self.surfaces.contains_key(&surface.0) {
            return Err(GpuError::InvalidHandle);
        }
        Ok(self.support.clone())
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<SwapchainHandle> {
        if !self.surfaces.contains_key(&desc.surface.0) {
            return Err(GpuError::InvalidHandle);
        }
        let handle = SwapchainHandle(self.create("swapchain")?);
        let count = desc.image_count.max(self.support.capabilities.min_image_count) as usize;
        let images: Vec<ImageHandle> = (0..count)
            .map(|i| {
                let image = ImageHandle(self.next_handle);
                self.next_handle += 1;
                self.image_index.insert(image, (handle, i));
                image
            })
            .collect();
        self.swapchains.insert(
            handle,
            SwapchainState {
                acquired: vec![false; images.len()],
                images,
                next: 0,
            },
        );
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        if let Some(state) = self.swapchains.remove(&swapchain) {
            if state.images.iter().any(|image| self.image_pending(*image)) {
                self.hazard(Hazard::SwapchainInFlight);
            }
            for image in &state.images {
                self.image_index.remove(image);
            }
        }
        self.forget(swapchain.0);
    }

    fn swapchain_images(&mut self, swapchain: SwapchainHandle) -> GpuResult<Vec<ImageHandle>> {
        self.swapchains
            .get(&swapchain)
            .map(|state| state.images.clone())
            .ok_or(GpuError::InvalidHandle)
    }

    fn create_image_view(&mut self, image: ImageHandle, _format: PixelFormat) -> GpuResult<ImageViewHandle> {
        let view = ImageViewHandle(self.create("image view")?);
        self.view_image.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.view_image.remove(&view);
        self.forget(view.0);
    }

    fn create_render_target(&mut self, _format: PixelFormat) -> GpuResult<RenderTargetHandle> {
        Ok(RenderTargetHandle(self.create("render target")?))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.forget(target.0);
    }

    fn create_framebuffer(
        &mut self,
        _target: RenderTargetHandle,
        view: ImageViewHandle,
        _extent: Extent2D,
    ) -> GpuResult<FramebufferHandle> {
        let framebuffer = FramebufferHandle(self.create("framebuffer")?);
        self.framebuffer_view.insert(framebuffer, view);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffer_view.remove(&framebuffer);
        self.forget(framebuffer.0);
    }

    fn create_command_pool(&mut self) -> GpuResult<CommandPoolHandle> {
        Ok(CommandPoolHandle(self.create("command pool")?))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        let owned: Vec<CommandBufferHandle> = self
            .commands
            .iter()
            .filter(|(_, state)| state.pool == pool)
            .map(|(handle, _)| *handle)
            .collect();
        self.free_command_buffers(pool, &owned);
        self.forget(pool.0);
    }

    fn allocate_command_buffers(
        &mut self,
        pool: CommandPoolHandle,
        count: usize,
    ) -> GpuResult<Vec<CommandBufferHandle>> {
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match self.create("command buffer") {
                Ok(handle) => {
                    let handle = CommandBufferHandle(handle);
                    self.commands.insert(
                        handle,
                        CommandState {
                            pool,
                            ..CommandState::default()
                        },
                    );
                    buffers.push(handle);
                }
                Err(e) => {
                    self.free_command_buffers(pool, &buffers);
                    return Err(e);
                }
            }
        }
        Ok(buffers)
    }

    fn free_command_buffers(&mut self, _pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        for &buffer in buffers {
            if self.command_pending(buffer) {
                self.hazard(Hazard::CommandBufferInFlight);
            }
            self.commands.remove(&buffer);
            self.forget(buffer.0);
        }
    }

    fn begin_commands(&mut self, command_buffer: CommandBufferHandle, _one_time: bool) -> GpuResult<()> {
        if self.record_faults > 0 {
            self.record_faults -= 1;
            log::debug!("Headless GPU: injected failure beginning {command_buffer:?}");
            return Err(GpuError::OutOfMemory);
        }
        if self.command_pending(command_buffer) {
            self.hazard(Hazard::CommandBufferInFlight);
        }
        let state = self
            .commands
            .get_mut(&command_buffer)
            .ok_or(GpuError::InvalidHandle)?;
        state.recording = true;
        state.targets.clear();
        state.copies.clear();
        Ok(())
    }

    fn cmd_clear(
        &mut self,
        command_buffer: CommandBufferHandle,
        _target: RenderTargetHandle,
        framebuffer: FramebufferHandle,
        _extent: Extent2D,
        color: [f32; 4],
    ) {
        let image = self
            .framebuffer_view
            .get(&framebuffer)
            .and_then(|view| self.view_image.get(view))
            .copied();
        let Some(image) = image else {
            return;
        };

        if self.image_pending(image) {
            let index = self.image_index.get(&image).map_or(usize::MAX, |(_, i)| *i);
            self.hazard(Hazard::ImageInFlight { image: index });
        }
        if let Some(state) = self.commands.get_mut(&command_buffer) {
            state.targets.push(image);
        }
        self.last_clear = Some(color);
    }

    fn cmd_copy_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        if let Some(state) = self.commands.get_mut(&command_buffer) {
            state.copies.push((src, dst, size));
        }
    }

    fn end_commands(&mut self, command_buffer: CommandBufferHandle) -> GpuResult<()> {
        let state = self
            .commands
            .get_mut(&command_buffer)
            .ok_or(GpuError::InvalidHandle)?;
        state.recording = false;
        Ok(())
    }

    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle> {
        let semaphore = SemaphoreHandle(self.create("semaphore")?);
        self.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if self.semaphore_awaited(semaphore) {
            self.hazard(Hazard::SemaphoreMisuse("destroyed while a pending submit waits on it"));
        }
        self.semaphores.remove(&semaphore);
        self.forget(semaphore.0);
    }

    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle> {
        let fence = FenceHandle(self.create("fence")?);
        self.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if self.fence_pending(fence) {
            self.hazard(Hazard::FenceMisuse("destroyed while pending"));
        }
        self.fences.remove(&fence);
        self.forget(fence.0);
    }

    fn wait_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> GpuResult<()> {
        match self.fences.get(&fence) {
            None => return Err(GpuError::InvalidHandle),
            Some(true) => return Ok(()),
            Some(false) => {}
        }
        if !self.fence_pending(fence) {
            // Nothing will ever signal it
            return Err(GpuError::Timeout);
        }
        while self.fences.get(&fence) == Some(&false) && self.retire_oldest() {}
        Ok(())
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()> {
        if self.fence_pending(fence) {
            self.hazard(Hazard::FenceMisuse("reset while pending"));
        }
        let state = self.fences.get_mut(&fence).ok_or(GpuError::InvalidHandle)?;
        *state = false;
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        _timeout: Duration,
    ) -> GpuResult<AcquireOutcome> {
        if let Some(outcome) = self.acquire_faults.pop_front() {
            if !matches!(outcome, AcquireOutcome::Image { .. }) {
                return Ok(outcome);
            }
        }

        if !self.semaphores.contains_key(&signal) {
            return Err(GpuError::InvalidHandle);
        }
        if self.semaphore_awaited(signal) {
            self.hazard(Hazard::SemaphoreMisuse("acquire reused a semaphore a pending submit waits on"));
        }

        let requested = self.acquire_order.pop_front();
        let state = self.swapchains.get_mut(&swapchain).ok_or(GpuError::InvalidHandle)?;
        let count = state.images.len();
        let chosen = requested
            .filter(|&i| i < count && !state.acquired[i])
            .or_else(|| {
                (0..count)
                    .map(|offset| (state.next + offset) % count)
                    .find(|&i| !state.acquired[i])
            });
        let Some(index) = chosen else {
            return Err(GpuError::Timeout);
        };
        state.acquired[index] = true;
        state.next = (index + 1) % count;

        self.signal_semaphore(signal, "acquire signaled a signaled semaphore")?;

        Ok(AcquireOutcome::Image {
            index: index as u32,
            suboptimal: false,
        })
    }

    fn submit(&mut self, desc: &SubmitDesc) -> GpuResult<()> {
        if let Some(wait) = desc.wait {
            self.consume_semaphore(wait, "submit waited an unsignaled semaphore")?;
        }
        if let Some(signal) = desc.signal {
            self.signal_semaphore(signal, "submit signaled a signaled semaphore")?;
        }
        if let Some(fence) = desc.fence {
            if self.fences.get(&fence) != Some(&false) || self.fence_pending(fence) {
                self.hazard(Hazard::FenceMisuse("submitted while signaled or pending"));
            }
        }

        let state = self
            .commands
            .get(&desc.command_buffer)
            .ok_or(GpuError::InvalidHandle)?;
        let unfinished = state.recording;
        let submission = Submission {
            command_buffer: desc.command_buffer,
            wait: desc.wait,
            fence: desc.fence,
            images: state.targets.clone(),
            copies: state.copies.clone(),
        };
        if unfinished {
            self.hazard(Hazard::UnfinishedRecording);
        }
        log::trace!("Headless GPU: submit {:?}", desc.command_buffer);
        self.queue.push_back(submission);
        Ok(())
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> GpuResult<PresentOutcome> {
        self.consume_semaphore(wait, "present waited an unsignaled semaphore")?;

        let was_acquired = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(GpuError::InvalidHandle)?
            .acquired
            .get_mut(image_index as usize)
            .map(|acquired| std::mem::replace(acquired, false));
        if was_acquired != Some(true) {
            self.hazard(Hazard::PresentUnacquired { image: image_index });
        }

        let outcome = self.present_faults.pop_front().unwrap_or(PresentOutcome::Presented);
        if outcome != PresentOutcome::OutOfDate {
            self.presents += 1;
        }
        Ok(outcome)
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        self.retire_all();
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: BufferUsage,
        location: MemoryLocation,
    ) -> GpuResult<BufferAllocation> {
        let buffer = BufferHandle(self.create("buffer")?);
        let memory = match self.create("memory") {
            Ok(handle) => MemoryHandle(handle),
            Err(e) => {
                self.forget(buffer.0);
                return Err(e);
            }
        };
        self.memory.insert(
            memory,
            MemoryState {
                bytes: vec![0; size as usize].into_boxed_slice(),
                location,
                mapped: false,
            },
        );
        self.buffers.insert(buffer, memory);
        Ok(BufferAllocation {
            buffer,
            memory,
            size,
            location,
        })
    }

    fn destroy_buffer(&mut self, allocation: &BufferAllocation) {
        self.buffers.remove(&allocation.buffer);
        self.memory.remove(&allocation.memory);
        self.forget(allocation.buffer.0);
        self.forget(allocation.memory.0);
    }

    fn map_memory(&mut self, memory: MemoryHandle, _size: u64) -> GpuResult<NonNull<u8>> {
        let state = self.memory.get_mut(&memory).ok_or(GpuError::InvalidHandle)?;
        if state.location != MemoryLocation::HostVisible {
            return Err(GpuError::Unsupported("device-local memory is not mappable".to_string()));
        }
        state.mapped = true;
        NonNull::new(state.bytes.as_mut_ptr()).ok_or(GpuError::OutOfMemory)
    }

    fn unmap_memory(&mut self, memory: MemoryHandle) {
        if let Some(state) = self.memory.get_mut(&memory) {
            state.mapped = false;
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
    use crate::platform::HeadlessWindowing;

    #[test]
    fn test_fence_wait_retires_in_order() {
        let mut gpu = HeadlessGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let cmds = gpu.allocate_command_buffers(pool, 2).unwrap();
        let first = gpu.create_fence(false).unwrap();
        let second = gpu.create_fence(false).unwrap();

        for (cmd, fence) in cmds.iter().zip([first, second]) {
            gpu.begin_commands(*cmd, true).unwrap();
            gpu.end_commands(*cmd).unwrap();
            gpu.submit(&SubmitDesc {
                command_buffer: *cmd,
                wait: None,
                signal: None,
                fence: Some(fence),
            })
            .unwrap();
        }
        assert_eq!(gpu.pending(), 2);

        gpu.wait_fence(second, Duration::from_secs(1)).unwrap();
        assert_eq!(gpu.pending(), 0);
        assert!(gpu.hazards().is_empty());
    }

    #[test]
    fn test_unsignaled_idle_fence_times_out() {
        let mut gpu = HeadlessGpu::new();
        let fence = gpu.create_fence(false).unwrap();
        assert_eq!(
            gpu.wait_fence(fence, Duration::from_millis(10)),
            Err(GpuError::Timeout)
        );
    }

    #[test]
    fn test_reset_pending_fence_is_a_hazard() {
        let mut gpu = HeadlessGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let fence = gpu.create_fence(false).unwrap();
        gpu.submit(&SubmitDesc {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence: Some(fence),
        })
        .unwrap();

        gpu.reset_fence(fence).unwrap();
        assert_eq!(gpu.hazards(), &[Hazard::FenceMisuse("reset while pending")]);
    }

    #[test]
    fn test_injected_failure_hits_requested_call() {
        let mut gpu = HeadlessGpu::new();
        gpu.fail_after(2);
        assert!(gpu.create_semaphore().is_ok());
        assert!(gpu.create_semaphore().is_ok());
        assert_eq!(gpu.create_semaphore(), Err(GpuError::OutOfMemory));
        assert!(gpu.create_semaphore().is_ok());
        assert_eq!(gpu.live_objects(), 3);
    }

    #[test]
    fn test_acquire_cycles_through_free_images() {
        let mut windowing = HeadlessWindowing::new();
        let mut gpu = HeadlessGpu::new();
        let surface = gpu.create_surface(&mut windowing, NativeWindow(1)).unwrap();
        let swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface,
                format: gpu.support.formats[0],
                present_mode: PresentMode::Fifo,
                extent: Extent2D::new(64, 64),
                image_count: 2,
            })
            .unwrap();
        let a = gpu.create_semaphore().unwrap();
        let b = gpu.create_semaphore().unwrap();
        let c = gpu.create_semaphore().unwrap();

        let first = gpu.acquire_next_image(swapchain, a, Duration::ZERO).unwrap();
        let second = gpu.acquire_next_image(swapchain, b, Duration::ZERO).unwrap();
        assert_eq!(first, AcquireOutcome::Image { index: 0, suboptimal: false });
        assert_eq!(second, AcquireOutcome::Image { index: 1, suboptimal: false });
        assert_eq!(
            gpu.acquire_next_image(swapchain, c, Duration::ZERO),
            Err(GpuError::Timeout)
        );
    }

    #[test]
    fn test_queued_acquire_index_skips_round_robin() {
        let mut windowing = HeadlessWindowing::new();
        let mut gpu = HeadlessGpu::new();
        let surface = gpu.create_surface(&mut windowing, NativeWindow(1)).unwrap();
        let swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface,
                format: gpu.support.formats[0],
                present_mode: PresentMode::Fifo,
                extent: Extent2D::new(64, 64),
                image_count: 3,
            })
            .unwrap();
        let semaphores: Vec<SemaphoreHandle> = (0..3).map(|_| gpu.create_semaphore().unwrap()).collect();

        gpu.queue_acquire_image(2);
        gpu.queue_acquire_image(2);
        let first = gpu.acquire_next_image(swapchain, semaphores[0], Duration::ZERO).unwrap();
        let second = gpu.acquire_next_image(swapchain, semaphores[1], Duration::ZERO).unwrap();
        assert_eq!(first, AcquireOutcome::Image { index: 2, suboptimal: false });
        // Image 2 is taken, so the second request falls back to round-robin
        assert_eq!(second, AcquireOutcome::Image { index: 0, suboptimal: false });
    }

    #[test]
    fn test_acquire_with_awaited_semaphore_is_a_hazard() {
        let mut windowing = HeadlessWindowing::new();
        let mut gpu = HeadlessGpu::new();
        let surface = gpu.create_surface(&mut windowing, NativeWindow(1)).unwrap();
        let swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface,
                format: gpu.support.formats[0],
                present_mode: PresentMode::Fifo,
                extent: Extent2D::new(64, 64),
                image_count: 2,
            })
            .unwrap();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.acquire_next_image(swapchain, semaphore, Duration::ZERO).unwrap();
        gpu.begin_commands(cmd, false).unwrap();
        gpu.end_commands(cmd).unwrap();
        gpu.submit(&SubmitDesc {
            command_buffer: cmd,
            wait: Some(semaphore),
            signal: None,
            fence: None,
        })
        .unwrap();
        assert!(gpu.hazards().is_empty());

        gpu.acquire_next_image(swapchain, semaphore, Duration::ZERO).unwrap();
        assert_eq!(
            gpu.hazards(),
            &[Hazard::SemaphoreMisuse("acquire reused a semaphore a pending submit waits on")]
        );
    }

    #[test]
    fn test_injected_record_failure_fails_once() {
        let mut gpu = HeadlessGpu::new();
        let pool = gpu.create_command_pool().unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];

        gpu.fail_next_record();
        assert_eq!(gpu.begin_commands(cmd, false), Err(GpuError::OutOfMemory));
        assert!(gpu.begin_commands(cmd, false).is_ok());
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let mut gpu = HeadlessGpu::new();
        let allocation = gpu
            .create_buffer(16, BufferUsage::VERTEX, MemoryLocation::DeviceLocal)
            .unwrap();
        assert!(matches!(
            gpu.map_memory(allocation.memory, 16),
            Err(GpuError::Unsupported(_))
        ));
        gpu.destroy_buffer(&allocation);
        assert_eq!(gpu.live_objects(), 0);
    }
}
