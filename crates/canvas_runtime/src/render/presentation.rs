//! Presentation engine
//!
//! Owns one canvas's surface, swapchain and frame synchronization, and runs
//! the acquire → record → submit → present cycle:
//!
//! ```text
//! Uninitialized → Configuring → Ready ⇄ Resizing
//!                                 ↓
//!                             Destroyed
//! ```
//!
//! Out-of-date and suboptimal results never surface as errors; they move the
//! engine to `Resizing`, and the next frame (or an explicit [`resize`]) rebuilds
//! the swapchain once the window has a non-zero drawable area.
//!
//! [`resize`]: PresentationEngine::resize

use super::backend::{
    AcquireOutcome, CommandBufferHandle, CommandPoolHandle, Extent2D, GpuBackend, GpuError,
    PresentMode, PresentOutcome, RenderTargetHandle, SubmitDesc, SurfaceFormat, SurfaceHandle,
};
use super::swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    SwapchainResources,
};
use super::sync::FrameSync;
use crate::core::config::{PresentConfig, MAX_FRAMES_IN_FLIGHT};
use crate::platform::{NativeWindow, NativeWindowing};
use std::time::Duration;
use thiserror::Error;

/// Presentation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentError {
    /// The surface offers no formats at all
    #[error("surface reports no usable formats")]
    NoSurfaceFormat,

    /// Operation not valid in the current state
    #[error("presentation engine is {0:?}")]
    InvalidState(PresentState),

    /// Backend failure
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Result type for presentation operations
pub type PresentResult<T> = Result<T, PresentError>;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentState {
    /// Nothing created yet
    Uninitialized,
    /// Creating surface, swapchain and sync objects
    Configuring,
    /// Presenting frames
    Ready,
    /// Waiting to rebuild the swapchain
    Resizing,
    /// Everything released
    Destroyed,
}

/// What a frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// An image was presented
    Presented {
        /// Swapchain image index
        image_index: u32,
    },
    /// The swapchain went stale; nothing was presented
    Resizing,
    /// The rebuild is deferred (zero-area window); nothing was presented
    Skipped,
}

/// Engine tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentSettings {
    /// In-flight fence count
    pub frames_in_flight: usize,
    /// Bound on every fence wait
    pub fence_timeout: Duration,
    /// Prefer a non-tearing present mode
    pub vsync: bool,
}

impl Default for PresentSettings {
    fn default() -> Self {
        Self::from(&PresentConfig::default())
    }
}

impl From<&PresentConfig> for PresentSettings {
    fn from(config: &PresentConfig) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT),
            fence_timeout: config.fence_timeout(),
            vsync: config.vsync,
        }
    }
}

/// Per-canvas presentation state
#[derive(Debug)]
pub struct PresentationEngine {
    state: PresentState,
    settings: PresentSettings,
    surface: SurfaceHandle,
    render_target: RenderTargetHandle,
    command_pool: CommandPoolHandle,
    format: Option<SurfaceFormat>,
    present_mode: PresentMode,
    resources: SwapchainResources,
    sync: FrameSync,
    frame: u64,
    needs_resize: bool,
    initialized: bool,
}

impl PresentationEngine {
    /// Create an engine in the `Uninitialized` state
    pub fn new(settings: PresentSettings) -> Self {
        Self {
            state: PresentState::Uninitialized,
            settings,
            surface: SurfaceHandle::NULL,
            render_target: RenderTargetHandle::NULL,
            command_pool: CommandPoolHandle::NULL,
            format: None,
            present_mode: PresentMode::Fifo,
            resources: SwapchainResources::default(),
            sync: FrameSync::default(),
            frame: 0,
            needs_resize: false,
            initialized: false,
        }
    }

    /// Create and configure an engine for a native window
    ///
    /// On failure everything created is released and the error returned.
    pub fn create(
        backend: &mut dyn GpuBackend,
        windowing: &mut dyn NativeWindowing,
        window: NativeWindow,
        window_extent: Extent2D,
        settings: PresentSettings,
    ) -> PresentResult<Self> {
        let mut engine = Self::new(settings);
        if let Err(e) = engine.configure(backend, windowing, window, window_extent) {
            log::warn!("Presentation setup failed, releasing partial state: {e}");
            engine.destroy(backend);
            return Err(e);
        }
        Ok(engine)
    }

    /// Run the `Configuring` state
    pub fn configure(
        &mut self,
        backend: &mut dyn GpuBackend,
        windowing: &mut dyn NativeWindowing,
        window: NativeWindow,
        window_extent: Extent2D,
    ) -> PresentResult<()> {
        if self.state != PresentState::Uninitialized {
            return Err(PresentError::InvalidState(self.state));
        }
        self.state = PresentState::Configuring;

        self.surface = backend.create_surface(windowing, window)?;
        let support = backend.surface_support(self.surface)?;

        let format = choose_surface_format(&support.formats).ok_or(PresentError::NoSurfaceFormat)?;
        self.format = Some(format);
        self.present_mode = choose_present_mode(&support.present_modes, self.settings.vsync);

        self.render_target = backend.create_render_target(format.format)?;
        self.command_pool = backend.create_command_pool()?;

        let image_count = choose_image_count(&support.capabilities);
        self.sync = FrameSync::create(backend, image_count as usize, self.settings.frames_in_flight)?;

        let extent = choose_extent(&support.capabilities, window_extent);
        self.initialized = true;

        if window_extent.is_empty() || extent.is_empty() {
            log::debug!("Window has no drawable area yet, deferring swapchain creation");
            self.needs_resize = true;
            self.state = PresentState::Resizing;
            return Ok(());
        }

        self.resources = SwapchainResources::build(
            backend,
            self.surface,
            format,
            self.present_mode,
            extent,
            image_count,
            self.render_target,
            self.command_pool,
        )?;
        self.sync.resize_images(backend, self.resources.image_count())?;

        self.frame = 0;
        self.state = PresentState::Ready;
        log::info!(
            "Presentation ready: {}x{}, {} images, {} frames in flight, {:?}",
            extent.width,
            extent.height,
            self.resources.image_count(),
            self.settings.frames_in_flight,
            self.present_mode
        );
        Ok(())
    }

    /// Flag the swapchain for rebuild on the next frame
    pub fn request_resize(&mut self) {
        self.needs_resize = true;
    }

    /// Run the `Resizing` state against the current window extent
    ///
    /// A zero-area extent defers the rebuild: the engine stays in `Resizing`
    /// and frames are skipped until a later call succeeds.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend, window_extent: Extent2D) -> PresentResult<()> {
        match self.state {
            PresentState::Ready | PresentState::Resizing => {}
            other => return Err(PresentError::InvalidState(other)),
        }
        self.state = PresentState::Resizing;
        self.needs_resize = true;

        let support = backend.surface_support(self.surface)?;
        let extent = choose_extent(&support.capabilities, window_extent);
        if window_extent.is_empty() || extent.is_empty() {
            log::trace!("Resize deferred: zero-area target");
            return Ok(());
        }

        let format = self.format.ok_or(PresentError::NoSurfaceFormat)?;

        self.sync.wait_all(backend, self.settings.fence_timeout)?;
        backend.wait_idle()?;

        self.resources.release(backend, self.command_pool);
        self.resources = SwapchainResources::build(
            backend,
            self.surface,
            format,
            self.present_mode,
            extent,
            choose_image_count(&support.capabilities),
            self.render_target,
            self.command_pool,
        )?;
        self.sync.resize_images(backend, self.resources.image_count())?;

        self.frame = 0;
        self.needs_resize = false;
        self.state = PresentState::Ready;
        log::debug!("Swapchain rebuilt at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Render and present one frame cleared to `clear_color`
    pub fn render_frame(
        &mut self,
        backend: &mut dyn GpuBackend,
        clear_color: [f32; 4],
        window_extent: Extent2D,
    ) -> PresentResult<FrameOutcome> {
        if self.state == PresentState::Resizing || (self.state == PresentState::Ready && self.needs_resize) {
            self.resize(backend, window_extent)?;
            if self.state != PresentState::Ready {
                return Ok(FrameOutcome::Skipped);
            }
        }
        if self.state != PresentState::Ready {
            return Err(PresentError::InvalidState(self.state));
        }

        let timeout = self.settings.fence_timeout;
        let in_flight = self.sync.frames_in_flight() as u64;
        let slot = (self.frame % in_flight) as usize;
        let fence = self.sync.fence(slot);

        // 1. CPU may run at most `in_flight` frames ahead
        backend.wait_fence(fence, timeout)?;

        // 2. Acquire with this slot's semaphore; its last waiter retired in step 1
        let acquire_semaphore = self.sync.acquire_semaphore(slot);
        let image_index = match backend.acquire_next_image(self.resources.swapchain, acquire_semaphore, timeout)? {
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.state = PresentState::Resizing;
                self.needs_resize = true;
                return Ok(FrameOutcome::Resizing);
            }
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
        };
        let image = image_index as usize;

        let command_buffer = self.resources.command_buffers[image];
        if let Err(e) = self.record(backend, slot, image, command_buffer, clear_color) {
            return Err(self.abandon_frame(backend, slot, e));
        }

        // 6. Submit
        let present_semaphore = self.sync.present_semaphore(image);
        if let Err(e) = backend.reset_fence(fence) {
            return Err(self.abandon_frame(backend, slot, e));
        }
        let submitted = backend.submit(&SubmitDesc {
            command_buffer,
            wait: Some(acquire_semaphore),
            signal: Some(present_semaphore),
            fence: Some(fence),
        });
        if let Err(e) = submitted {
            if let Err(replace) = self.sync.replace_fence(backend, slot) {
                log::warn!("Could not replace unsignaled fence of slot {slot}: {replace}");
            }
            return Err(self.abandon_frame(backend, slot, e));
        }

        // 7. Present
        let outcome = match backend.present(self.resources.swapchain, image_index, present_semaphore) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.frame += 1;
                self.needs_resize = true;
                self.state = PresentState::Resizing;
                return Err(e.into());
            }
        };

        // 8. Advance
        self.frame += 1;

        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => self.needs_resize = true,
        }
        if self.needs_resize {
            self.state = PresentState::Resizing;
        }

        log::trace!("Frame {} presented image {image_index} ({outcome:?})", self.frame);
        if outcome == PresentOutcome::OutOfDate {
            Ok(FrameOutcome::Resizing)
        } else {
            Ok(FrameOutcome::Presented { image_index })
        }
    }

    /// Steps 3 to 5: wait out the image's previous owner, claim it, record the clear
    fn record(
        &mut self,
        backend: &mut dyn GpuBackend,
        slot: usize,
        image: usize,
        command_buffer: CommandBufferHandle,
        clear_color: [f32; 4],
    ) -> Result<(), GpuError> {
        // 3. Another slot may still own this image
        if let Some(owner) = self.sync.image_owner(image) {
            if owner != slot {
                backend.wait_fence(self.sync.fence(owner), self.settings.fence_timeout)?;
            }
        }

        // 4. This slot owns the image now
        self.sync.set_image_owner(image, slot);

        // 5. Record
        backend.begin_commands(command_buffer, false)?;
        backend.cmd_clear(
            command_buffer,
            self.render_target,
            self.resources.framebuffers[image],
            self.resources.extent,
            clear_color,
        );
        backend.end_commands(command_buffer)
    }

    /// Give up on a frame whose image was acquired but never submitted
    ///
    /// The image stays acquired and the slot's acquire semaphore stays
    /// signaled, so the swapchain is rebuilt and the semaphore replaced
    /// before the slot is used again.
    fn abandon_frame(&mut self, backend: &mut dyn GpuBackend, slot: usize, error: GpuError) -> PresentError {
        log::warn!("Frame {} abandoned after acquire: {error}", self.frame);
        self.needs_resize = true;
        self.state = PresentState::Resizing;
        if let Err(e) = backend.wait_idle() {
            log::warn!("Device idle wait failed while abandoning frame: {e}");
        }
        if let Err(e) = self.sync.replace_acquire_semaphore(backend, slot) {
            log::warn!("Could not replace acquire semaphore of slot {slot}: {e}");
        }
        error.into()
    }

    /// Release everything in reverse acquisition order
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        if self.state == PresentState::Destroyed {
            return;
        }
        if let Err(e) = backend.wait_idle() {
            log::warn!("Device idle wait failed during teardown: {e}");
        }

        self.sync.destroy(backend);

        if !self.command_pool.is_null() {
            // Frees every command buffer allocated from it
            backend.destroy_command_pool(self.command_pool);
            self.resources.command_buffers.clear();
            self.command_pool = CommandPoolHandle::NULL;
        }
        if !self.render_target.is_null() {
            backend.destroy_render_target(self.render_target);
            self.render_target = RenderTargetHandle::NULL;
        }
        self.resources.release(backend, CommandPoolHandle::NULL);
        if !self.surface.is_null() {
            backend.destroy_surface(self.surface);
            self.surface = SurfaceHandle::NULL;
        }

        self.state = PresentState::Destroyed;
        log::debug!("Presentation engine destroyed after {} frames", self.frame);
    }

    /// Current state
    pub fn state(&self) -> PresentState {
        self.state
    }

    /// Whether configuration completed at least once
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether a rebuild is pending
    pub fn needs_resize(&self) -> bool {
        self.needs_resize
    }

    /// Frames presented since the last (re)build
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Swapchain extent
    pub fn extent(&self) -> Extent2D {
        self.resources.extent
    }

    /// Swapchain image count
    pub fn image_count(&self) -> usize {
        self.resources.image_count()
    }

    /// Chosen surface format
    pub fn format(&self) -> Option<SurfaceFormat> {
        self.format
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Synchronization state
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Surface handle
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HeadlessWindowing, WindowDesc, WindowGeometry};
    use crate::render::backend::{ColorSpace, PixelFormat, SurfaceCapabilities, SurfaceSupport};
    use crate::render::headless::{Hazard, HeadlessGpu};
    use crate::render::swapchain::MAX_SWAPCHAIN_IMAGES;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    const COLOR: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

    fn fixture() -> (HeadlessGpu, HeadlessWindowing, NativeWindow) {
        let mut windowing = HeadlessWindowing::new();
        let (window, _) = windowing
            .create_window(&WindowDesc {
                geometry: WindowGeometry::new(0, 0, 640, 480),
                title: "test",
                titlebar: true,
                resizable: true,
            })
            .unwrap();
        (HeadlessGpu::new(), windowing, window)
    }

    fn engine(gpu: &mut HeadlessGpu, windowing: &mut HeadlessWindowing, window: NativeWindow) -> PresentationEngine {
        PresentationEngine::create(
            gpu,
            windowing,
            window,
            Extent2D::new(640, 480),
            PresentSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_configure_reaches_ready() {
        let (mut gpu, mut windowing, window) = fixture();
        let engine = engine(&mut gpu, &mut windowing, window);

        assert_eq!(engine.state(), PresentState::Ready);
        assert!(engine.is_initialized());
        assert_eq!(engine.image_count(), 3);
        assert_eq!(engine.sync().frames_in_flight(), 2);
        assert_eq!(engine.present_mode(), PresentMode::Mailbox);
        assert_eq!(engine.extent(), Extent2D::new(640, 480));
        assert!(engine.sync().images_in_flight().iter().all(Option::is_none));
    }

    #[test]
    fn test_frames_present_and_clear_color_reaches_gpu() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);

        for expected in [0, 1, 2, 0] {
            let outcome = engine
                .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
                .unwrap();
            assert_eq!(outcome, FrameOutcome::Presented { image_index: expected });
        }
        assert_eq!(gpu.presents(), 4);
        assert_eq!(gpu.last_clear(), Some(COLOR));
        assert!(gpu.pending() <= 2);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());
    }

    #[test]
    fn test_acquire_semaphores_follow_in_flight_slots() {
        // Two images but three frames in flight
        let mut gpu = HeadlessGpu::with_support(SurfaceSupport {
            capabilities: SurfaceCapabilities {
                min_image_count: 1,
                max_image_count: 2,
                current_extent: None,
                min_extent: Extent2D::new(1, 1),
                max_extent: Extent2D::new(4096, 4096),
            },
            formats: vec![SurfaceFormat {
                format: PixelFormat::Bgra8Srgb,
                color_space: ColorSpace::SrgbNonlinear,
            }],
            present_modes: vec![PresentMode::Fifo],
        });
        let (_, mut windowing, window) = fixture();
        let settings = PresentSettings {
            frames_in_flight: 3,
            ..PresentSettings::default()
        };
        let mut engine =
            PresentationEngine::create(&mut gpu, &mut windowing, window, Extent2D::new(640, 480), settings)
                .unwrap();
        assert_eq!(engine.image_count(), 2);

        let semaphores: HashSet<_> = (0..3).map(|slot| engine.sync().acquire_semaphore(slot)).collect();
        assert_eq!(semaphores.len(), 3);

        for _ in 0..2 {
            engine
                .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
                .unwrap();
        }
        assert_eq!(gpu.pending(), 2);

        for _ in 0..7 {
            engine
                .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
                .unwrap();
        }
        assert_eq!(gpu.presents(), 9);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());

        engine.destroy(&mut gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_image_owned_by_other_slot_is_waited_before_recording() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);

        engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();
        assert_eq!(gpu.pending(), 1);
        assert_eq!(engine.sync().image_owner(0), Some(0));

        // Slot 1 gets image 0 back while slot 0's clear of it is still queued
        gpu.queue_acquire_image(0);
        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(engine.sync().image_owner(0), Some(1));
        assert_eq!(gpu.pending(), 1);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());
    }

    #[test]
    fn test_failed_record_after_acquire_recovers() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);
        engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();

        gpu.fail_next_record();
        assert_eq!(
            engine.render_frame(&mut gpu, COLOR, Extent2D::new(640, 480)),
            Err(PresentError::Gpu(GpuError::OutOfMemory))
        );
        assert_eq!(engine.state(), PresentState::Resizing);

        for _ in 0..6 {
            let outcome = engine
                .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
                .unwrap();
            assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        }
        assert_eq!(engine.state(), PresentState::Ready);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());

        engine.destroy(&mut gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_out_of_date_acquire_moves_to_resizing() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);

        gpu.queue_acquire_outcome(AcquireOutcome::OutOfDate);
        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Resizing);
        assert_eq!(engine.state(), PresentState::Resizing);

        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(800, 600))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(engine.extent(), Extent2D::new(800, 600));
        assert_eq!(engine.frame(), 1);
    }

    #[test]
    fn test_suboptimal_present_rebuilds_next_frame() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);

        gpu.queue_present_outcome(PresentOutcome::Suboptimal);
        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        assert_eq!(engine.state(), PresentState::Resizing);

        engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
            .unwrap();
        assert_eq!(engine.state(), PresentState::Ready);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());
    }

    #[test]
    fn test_zero_area_defers_rebuild() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);

        engine.request_resize();
        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(0, 0))
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(engine.state(), PresentState::Resizing);
        assert!(engine.needs_resize());

        let outcome = engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(320, 200))
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        assert!(!engine.needs_resize());
    }

    #[test]
    fn test_create_while_minimized_starts_resizing() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = PresentationEngine::create(
            &mut gpu,
            &mut windowing,
            window,
            Extent2D::new(0, 0),
            PresentSettings::default(),
        )
        .unwrap();
        assert_eq!(engine.state(), PresentState::Resizing);
        assert_eq!(engine.image_count(), 0);

        engine
            .render_frame(&mut gpu, COLOR, Extent2D::new(100, 100))
            .unwrap();
        assert_eq!(engine.state(), PresentState::Ready);
    }

    #[test]
    fn test_every_partial_configure_rolls_back() {
        for successes in 0..40 {
            let (mut gpu, mut windowing, window) = fixture();
            gpu.fail_after(successes);

            match PresentationEngine::create(
                &mut gpu,
                &mut windowing,
                window,
                Extent2D::new(640, 480),
                PresentSettings::default(),
            ) {
                Ok(mut engine) => {
                    engine.destroy(&mut gpu);
                    assert_eq!(gpu.live_objects(), 0);
                    return;
                }
                Err(e) => {
                    assert_eq!(e, PresentError::Gpu(GpuError::OutOfMemory));
                    assert_eq!(gpu.live_objects(), 0, "leak after {successes} successful creations");
                }
            }
        }
        panic!("configure never succeeded");
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (mut gpu, mut windowing, window) = fixture();
        let mut engine = engine(&mut gpu, &mut windowing, window);
        for _ in 0..5 {
            engine
                .render_frame(&mut gpu, COLOR, Extent2D::new(640, 480))
                .unwrap();
        }

        engine.destroy(&mut gpu);
        assert_eq!(engine.state(), PresentState::Destroyed);
        assert_eq!(gpu.live_objects(), 0);
        assert_eq!(gpu.pending(), 0);
        assert!(gpu.hazards().is_empty(), "{:?}", gpu.hazards());

        // Idempotent
        engine.destroy(&mut gpu);
        assert!(matches!(
            engine.render_frame(&mut gpu, COLOR, Extent2D::new(640, 480)),
            Err(PresentError::InvalidState(PresentState::Destroyed))
        ));
    }

    #[test]
    fn test_random_interleavings_never_touch_busy_images() {
        for seed in 0..8u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (mut gpu, mut windowing, window) = fixture();
            let settings = PresentSettings {
                frames_in_flight: rng.gen_range(1..=MAX_FRAMES_IN_FLIGHT),
                ..PresentSettings::default()
            };
            let mut engine = PresentationEngine::create(
                &mut gpu,
                &mut windowing,
                window,
                Extent2D::new(640, 480),
                settings,
            )
            .unwrap();
            let mut extent = Extent2D::new(640, 480);

            for _ in 0..400 {
                match rng.gen_range(0..10) {
                    0 => engine.request_resize(),
                    1 => {
                        extent = if rng.gen_bool(0.2) {
                            Extent2D::new(0, 0)
                        } else {
                            Extent2D::new(rng.gen_range(1..2000), rng.gen_range(1..2000))
                        };
                        engine.request_resize();
                    }
                    2 => gpu.queue_acquire_outcome(AcquireOutcome::OutOfDate),
                    3 => gpu.queue_present_outcome(if rng.gen_bool(0.5) {
                        PresentOutcome::Suboptimal
                    } else {
                        PresentOutcome::OutOfDate
                    }),
                    4 => {
                        gpu.retire_oldest();
                    }
                    _ => {}
                }
                if rng.gen_bool(0.6) {
                    gpu.queue_acquire_image(rng.gen_range(0..MAX_SWAPCHAIN_IMAGES));
                }

                engine.render_frame(&mut gpu, COLOR, extent).unwrap();

                let in_flight = engine.sync().frames_in_flight();
                assert!(engine.image_count() <= MAX_SWAPCHAIN_IMAGES);
                assert!(engine
                    .sync()
                    .images_in_flight()
                    .iter()
                    .flatten()
                    .all(|slot| *slot < in_flight));
                assert!(gpu.pending() <= in_flight);
            }

            assert!(
                !gpu.hazards().iter().any(|h| matches!(h, Hazard::ImageInFlight { .. })),
                "seed {seed}: {:?}",
                gpu.hazards()
            );
            assert!(gpu.hazards().is_empty(), "seed {seed}: {:?}", gpu.hazards());
            engine.destroy(&mut gpu);
            assert_eq!(gpu.live_objects(), 0);
        }
    }
}
