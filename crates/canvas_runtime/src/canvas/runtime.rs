//! # Runtime
//!
//! The [`Runtime`] owns every pool and backend and drives the per-tick loop:
//!
//! 1. refresh the display list when the topology changed
//! 2. advance time and pump native events into the input model
//! 3. apply cursors and rebuild swapchains of resized canvases
//! 4. invoke canvas callbacks, then present every visible GPU canvas
//! 5. close flagged canvases, pace the frame and clear per-tick edges

use super::{bounded_title, Canvas, CanvasCallback, CanvasFlags, CanvasHandle, DEFAULT_CLEAR_COLOR};
use crate::core::config::RuntimeConfig;
use crate::error::{CanvasError, CanvasResult};
use crate::foundation::arena::SlotArena;
use crate::foundation::logging;
use crate::foundation::time::{Clock, FrameLimiter, MonotonicClock, Sleeper, ThreadSleeper, TimeState};
use crate::input::{HitCandidate, InputState, KeyboardState, Pointer};
use crate::platform::headless::HeadlessWindowing;
use crate::platform::{
    CursorKind, Display, GlfwWindowing, NativeEvent, NativeWindow, NativeWindowing, PointerDevice,
    WindowDesc, WindowGeometry, WindowState,
};
use crate::render::{
    Buffer, BufferClass, BufferPattern, Extent2D, GpuBackend, HeadlessGpu, PresentSettings,
    PresentationEngine, VulkanGpu,
};
use crate::validation::{ValidationLayer, ValidationReport};
use nalgebra::Vector2;

/// Sentinel for "use the current value" / "center on the display"
pub const KEEP: i32 = -1;

/// Window and GPU runtime
pub struct Runtime {
    config: RuntimeConfig,
    windowing: Box<dyn NativeWindowing>,
    gpu: Option<Box<dyn GpuBackend>>,
    gpu_unavailable: Option<String>,
    canvases: SlotArena<Canvas>,
    displays: SlotArena<Display>,
    displays_dirty: bool,
    input: InputState,
    clock: Box<dyn Clock>,
    sleeper: Box<dyn Sleeper>,
    time: TimeState,
    limiter: FrameLimiter,
    next_created: u64,
    live_buffers: usize,
    quit: bool,
    running: bool,
    default_callback: Option<CanvasCallback>,
    events: Vec<NativeEvent>,
    validation: Option<ValidationLayer>,
}

impl Runtime {
    /// Create a runtime on GLFW and Vulkan
    ///
    /// A missing windowing library is fatal. A missing GPU is not: the
    /// runtime still opens window-only canvases and [`Runtime::canvas`]
    /// reports the load failure.
    pub fn new(config: RuntimeConfig) -> CanvasResult<Self> {
        config.validate()?;
        logging::init_with_level(&config.log_level);

        let windowing = GlfwWindowing::new().map_err(|e| CanvasError::LibraryLoad(e.to_string()))?;
        let (gpu, unavailable) = match VulkanGpu::new(
            &windowing,
            &config.application_name,
            config.gpu_validation_enabled(),
        ) {
            Ok(gpu) => (Some(Box::new(gpu) as Box<dyn GpuBackend>), None),
            Err(e) => {
                log::warn!("GPU backend unavailable, canvases will be window-only: {e}");
                (None, Some(e.to_string()))
            }
        };

        let mut runtime = Self::with_backends(
            config,
            Box::new(windowing),
            gpu,
            Box::new(MonotonicClock::new()),
            Box::new(ThreadSleeper),
        )?;
        runtime.gpu_unavailable = unavailable;
        Ok(runtime)
    }

    /// Create a runtime on the in-memory window and GPU backends
    pub fn headless(config: RuntimeConfig) -> CanvasResult<Self> {
        Self::with_backends(
            config,
            Box::new(HeadlessWindowing::new()),
            Some(Box::new(HeadlessGpu::new())),
            Box::new(MonotonicClock::new()),
            Box::new(ThreadSleeper),
        )
    }

    /// Create a runtime from explicit backends
    pub fn with_backends(
        config: RuntimeConfig,
        windowing: Box<dyn NativeWindowing>,
        gpu: Option<Box<dyn GpuBackend>>,
        clock: Box<dyn Clock>,
        sleeper: Box<dyn Sleeper>,
    ) -> CanvasResult<Self> {
        config.validate()?;

        let mut time = TimeState::default();
        time.init(clock.as_ref());
        let validation = config.validation_interval.map(ValidationLayer::new);

        let mut runtime = Self {
            canvases: SlotArena::with_capacity(config.arena.canvases),
            displays: SlotArena::with_capacity(config.arena.displays),
            displays_dirty: true,
            input: InputState::new(config.arena.pointers, config.input.sample_capacity),
            limiter: FrameLimiter::new(config.time.spin_reserve()),
            windowing,
            gpu,
            gpu_unavailable: None,
            clock,
            sleeper,
            time,
            next_created: 0,
            live_buffers: 0,
            quit: false,
            running: false,
            default_callback: None,
            events: Vec::new(),
            validation,
            config,
        };

        if let Err(e) = runtime.refresh_displays() {
            log::warn!("Display enumeration failed, retrying on the next tick: {e}");
        }

        log::info!(
            "Runtime ready on {} ({})",
            runtime.windowing.name(),
            runtime.gpu.as_ref().map_or("no GPU", |gpu| gpu.name())
        );
        Ok(runtime)
    }

    // ------------------------------------------------------------------
    // Displays
    // ------------------------------------------------------------------

    fn refresh_displays(&mut self) -> CanvasResult<()> {
        let list = self.windowing.displays()?;

        self.displays.clear();
        for display in list.into_iter().take(self.displays.capacity()) {
            let index = self
                .displays
                .allocate()
                .map_err(|e| CanvasError::from_arena("display", e))?;
            *self
                .displays
                .get_mut(index)
                .map_err(|e| CanvasError::from_arena("display", e))? = Display {
                valid: true,
                ..display
            };
        }
        if self.displays.find(|display| display.primary).is_none() {
            if let Some(&first) = self.displays.indices().first() {
                if let Ok(display) = self.displays.get_mut(first) {
                    display.primary = true;
                }
            }
        }
        self.displays_dirty = false;

        for (_, canvas) in self.canvases.iter_mut() {
            canvas.display = display_at(&self.displays, canvas.geometry);
        }

        log::debug!("Display list rebuilt: {} display(s)", self.displays.len());
        Ok(())
    }

    fn primary_display(&self) -> Option<usize> {
        self.displays.find(|display| display.primary)
    }

    /// Resolve a public display argument; `-1` picks `fallback`, then the primary
    fn resolve_display(&self, display: isize, fallback: Option<usize>) -> CanvasResult<usize> {
        if display == -1 {
            return fallback
                .filter(|&index| self.displays.is_valid(index))
                .or_else(|| self.primary_display())
                .ok_or(CanvasError::DisplayLookup(display));
        }
        usize::try_from(display)
            .ok()
            .filter(|&index| self.displays.is_valid(index))
            .ok_or(CanvasError::DisplayLookup(display))
    }

    // ------------------------------------------------------------------
    // Canvas lifecycle
    // ------------------------------------------------------------------

    /// Open a GPU canvas
    ///
    /// Passing [`KEEP`] for `x` or `y` centers the window on the primary
    /// display along that axis.
    pub fn canvas(&mut self, x: i32, y: i32, width: i32, height: i32, title: &str) -> CanvasResult<CanvasHandle> {
        if self.gpu.is_none() {
            return Err(self.gpu_missing());
        }

        let index = self.create_window_canvas(x, y, width, height, title)?;
        let (window, vsync) = match self.canvases.get(index) {
            Ok(canvas) => (canvas.window, canvas.flags.contains(CanvasFlags::VSYNC)),
            Err(e) => return Err(CanvasError::from_arena("canvas", e)),
        };
        let Some(window) = window else {
            self.destroy_canvas(index);
            return Err(CanvasError::InvalidHandle(index));
        };

        let settings = PresentSettings {
            vsync,
            ..PresentSettings::from(&self.config.present)
        };
        let extent = window_extent(self.windowing.as_ref(), window);
        let result = match self.gpu.as_deref_mut() {
            Some(gpu) => PresentationEngine::create(gpu, self.windowing.as_mut(), window, extent, settings)
                .map_err(CanvasError::from),
            None => Err(self.gpu_missing()),
        };

        match result {
            Ok(engine) => {
                if let Ok(canvas) = self.canvases.get_mut(index) {
                    canvas.presentation = Some(engine);
                }
                Ok(CanvasHandle(index))
            }
            Err(e) => {
                log::error!("Canvas {index} presentation setup failed: {e}");
                self.destroy_canvas(index);
                Err(e)
            }
        }
    }

    /// Open a window-only canvas (no swapchain)
    pub fn canvas_window(&mut self, x: i32, y: i32, width: i32, height: i32, title: &str) -> CanvasResult<CanvasHandle> {
        self.create_window_canvas(x, y, width, height, title).map(CanvasHandle)
    }

    fn create_window_canvas(&mut self, x: i32, y: i32, width: i32, height: i32, title: &str) -> CanvasResult<usize> {
        if width <= 0 || height <= 0 {
            return Err(CanvasError::InvalidSize { width, height });
        }
        if self.displays_dirty || self.displays.is_empty() {
            if let Err(e) = self.refresh_displays() {
                log::warn!("Display enumeration failed: {e}");
            }
        }

        let (w, h) = (width.unsigned_abs(), height.unsigned_abs());
        let area = self
            .primary_display()
            .and_then(|index| self.displays.get(index).ok())
            .map_or_else(|| WindowGeometry::new(0, 0, w, h), Display::geometry);
        let geometry = WindowGeometry::new(
            if x == KEEP { center_on(area.x, area.width, w) } else { x },
            if y == KEEP { center_on(area.y, area.height, h) } else { y },
            w,
            h,
        );

        let index = self
            .canvases
            .allocate()
            .map_err(|e| CanvasError::from_arena("canvas", e))?;
        if let Err(e) = self.input.ensure_primary() {
            let _ = self.canvases.release(index);
            return Err(CanvasError::from_arena("pointer", e));
        }

        let title = bounded_title(title);
        let desc = WindowDesc {
            geometry,
            title: &title,
            titlebar: true,
            resizable: true,
        };
        let (window, applied) = match self.windowing.create_window(&desc) {
            Ok(created) => created,
            Err(e) => {
                let _ = self.canvases.release(index);
                return Err(e.into());
            }
        };

        let created = self.next_created;
        self.next_created += 1;
        let display = display_at(&self.displays, applied);
        let mut flags = CanvasFlags::TITLEBAR;
        if self.config.present.vsync {
            flags |= CanvasFlags::VSYNC;
        }

        let canvas = self
            .canvases
            .get_mut(index)
            .map_err(|e| CanvasError::from_arena("canvas", e))?;
        canvas.created = created;
        canvas.display = display;
        canvas.geometry = applied;
        canvas.flags = flags;
        canvas.clear_color = DEFAULT_CLEAR_COLOR;
        canvas.title = title;
        canvas.window = Some(window);
        canvas.time.init(self.clock.as_ref());

        log::info!(
            "Canvas {index} opened at {}x{}+{}+{}",
            applied.width,
            applied.height,
            applied.x,
            applied.y
        );
        Ok(index)
    }

    fn destroy_canvas(&mut self, index: usize) {
        let Ok(canvas) = self.canvases.get_mut(index) else {
            return;
        };
        if let Some(mut engine) = canvas.presentation.take() {
            match self.gpu.as_deref_mut() {
                Some(gpu) => engine.destroy(gpu),
                None => log::warn!("Canvas {index} outlived its GPU backend"),
            }
        }
        if let Some(window) = canvas.window.take() {
            self.windowing.destroy_window(window);
        }
        let _ = self.canvases.release(index);
        self.input.detach_canvas(index);
        log::info!("Canvas {index} closed");
    }

    fn gpu_missing(&self) -> CanvasError {
        CanvasError::LibraryLoad(
            self.gpu_unavailable
                .clone()
                .unwrap_or_else(|| "no GPU backend".to_string()),
        )
    }

    fn canvas_ref(&self, handle: CanvasHandle) -> CanvasResult<&Canvas> {
        self.canvases
            .get(handle.0)
            .map_err(|e| CanvasError::from_arena("canvas", e))
    }

    fn canvas_mut(&mut self, handle: CanvasHandle) -> CanvasResult<&mut Canvas> {
        self.canvases
            .get_mut(handle.0)
            .map_err(|e| CanvasError::from_arena("canvas", e))
    }

    fn window_of(&self, handle: CanvasHandle) -> CanvasResult<NativeWindow> {
        self.canvas_ref(handle)?
            .window
            .ok_or(CanvasError::InvalidHandle(handle.0))
    }

    // ------------------------------------------------------------------
    // Canvas control
    // ------------------------------------------------------------------

    /// Move, resize and retitle a canvas
    ///
    /// `display` of `-1` keeps the canvas's current display. `x`/`y` are
    /// relative to the target display's origin; [`KEEP`] centers on that
    /// axis. `width`/`height` of [`KEEP`] keep the current size. A
    /// fullscreen canvas ignores the call.
    #[allow(clippy::too_many_arguments)]
    pub fn canvas_set(
        &mut self,
        handle: CanvasHandle,
        display: isize,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        title: Option<&str>,
    ) -> CanvasResult<()> {
        let canvas = self.canvas_ref(handle)?;
        if canvas.flags.contains(CanvasFlags::FULLSCREEN) {
            log::debug!("Canvas {} is fullscreen, ignoring placement", handle.0);
            return Ok(());
        }
        let invalid = |v: i32| v == 0 || v < KEEP;
        if invalid(width) || invalid(height) {
            return Err(CanvasError::InvalidSize { width, height });
        }

        let current = canvas.geometry;
        let target = self.resolve_display(display, canvas.display)?;
        let area = self
            .displays
            .get(target)
            .map_err(|_| CanvasError::DisplayLookup(display))?
            .geometry();
        let window = self.window_of(handle)?;

        let w = if width == KEEP { current.width } else { width.unsigned_abs() };
        let h = if height == KEEP { current.height } else { height.unsigned_abs() };
        let geometry = WindowGeometry::new(
            if x == KEEP { center_on(area.x, area.width, w) } else { area.x + x },
            if y == KEEP { center_on(area.y, area.height, h) } else { area.y + y },
            w,
            h,
        );

        let applied = self.windowing.set_geometry(window, geometry)?;
        let title = match title {
            Some(title) => {
                let title = bounded_title(title);
                self.windowing.set_title(window, &title)?;
                Some(title)
            }
            None => None,
        };

        let display = display_at(&self.displays, applied);
        let canvas = self.canvas_mut(handle)?;
        if (applied.width, applied.height) != (current.width, current.height) {
            canvas.flags.insert(CanvasFlags::RESIZE);
        }
        canvas.geometry = applied;
        canvas.display = display;
        if let Some(title) = title {
            canvas.title = title;
        }
        Ok(())
    }

    /// Set the clear color
    pub fn canvas_color(&mut self, handle: CanvasHandle, color: [f32; 4]) -> CanvasResult<()> {
        if !color.iter().all(|c| c.is_finite()) {
            return Err(CanvasError::InvalidArgument(format!("clear color {color:?} is not finite")));
        }
        self.canvas_mut(handle)?.clear_color = color;
        Ok(())
    }

    /// Request a cursor shape, applied on the next tick
    pub fn canvas_cursor(&mut self, handle: CanvasHandle, cursor: CursorKind) -> CanvasResult<()> {
        self.canvas_mut(handle)?.cursor = cursor;
        Ok(())
    }

    /// Iconify a canvas
    pub fn canvas_minimize(&mut self, handle: CanvasHandle) -> CanvasResult<()> {
        let window = self.window_of(handle)?;
        self.windowing.set_state(window, WindowState::Minimized)?;
        let canvas = self.canvas_mut(handle)?;
        canvas.flags.insert(CanvasFlags::MINIMIZED);
        Ok(())
    }

    /// Maximize a canvas
    pub fn canvas_maximize(&mut self, handle: CanvasHandle) -> CanvasResult<()> {
        let window = self.window_of(handle)?;
        self.windowing.set_state(window, WindowState::Maximized)?;
        let canvas = self.canvas_mut(handle)?;
        canvas.flags.remove(CanvasFlags::MINIMIZED);
        canvas.flags.insert(CanvasFlags::MAXIMIZED | CanvasFlags::RESIZE);
        Ok(())
    }

    /// Restore a minimized, maximized or fullscreen canvas
    pub fn canvas_restore(&mut self, handle: CanvasHandle) -> CanvasResult<()> {
        let window = self.window_of(handle)?;
        let canvas = self.canvas_ref(handle)?;

        if canvas.flags.contains(CanvasFlags::FULLSCREEN) {
            let saved = canvas.saved_geometry.unwrap_or(canvas.geometry);
            self.windowing.set_state(window, WindowState::Windowed(saved))?;
            let display = display_at(&self.displays, saved);
            let canvas = self.canvas_mut(handle)?;
            canvas.geometry = saved;
            canvas.display = display;
            canvas.saved_geometry = None;
            canvas.flags.remove(CanvasFlags::FULLSCREEN);
        } else {
            self.windowing.set_state(window, WindowState::Restored)?;
        }

        let canvas = self.canvas_mut(handle)?;
        canvas.flags.remove(CanvasFlags::MINIMIZED | CanvasFlags::MAXIMIZED);
        canvas.flags.insert(CanvasFlags::RESIZE);
        Ok(())
    }

    /// Make a canvas fullscreen on `display` (`-1`: its current display)
    pub fn canvas_fullscreen(&mut self, handle: CanvasHandle, display: isize) -> CanvasResult<()> {
        let window = self.window_of(handle)?;
        let canvas = self.canvas_ref(handle)?;
        let target = self.resolve_display(display, canvas.display)?;
        let area = self
            .displays
            .get(target)
            .map_err(|_| CanvasError::DisplayLookup(display))?
            .geometry();

        self.windowing.set_state(window, WindowState::Fullscreen { display: target })?;

        let canvas = self.canvas_mut(handle)?;
        if !canvas.flags.contains(CanvasFlags::FULLSCREEN) {
            canvas.saved_geometry = Some(canvas.geometry);
        }
        canvas.geometry = area;
        canvas.display = Some(target);
        canvas.flags.remove(CanvasFlags::MINIMIZED | CanvasFlags::MAXIMIZED);
        canvas.flags.insert(CanvasFlags::FULLSCREEN | CanvasFlags::RESIZE);
        Ok(())
    }

    /// Ask a canvas to close at the end of the current tick
    pub fn canvas_close(&mut self, handle: CanvasHandle) -> CanvasResult<()> {
        self.canvas_mut(handle)?.flags.insert(CanvasFlags::CLOSE);
        Ok(())
    }

    /// Install a per-canvas callback, replacing the run loop's default for it
    pub fn canvas_callback(
        &mut self,
        handle: CanvasHandle,
        callback: impl FnMut(&mut Runtime, CanvasHandle) + 'static,
    ) -> CanvasResult<()> {
        self.canvas_mut(handle)?.callback = Some(Box::new(callback));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------

    /// Create a GPU buffer owned by a canvas
    pub fn canvas_buffer_create(
        &mut self,
        handle: CanvasHandle,
        class: BufferClass,
        pattern: BufferPattern,
        size: u64,
        initial: Option<&[u8]>,
    ) -> CanvasResult<Buffer> {
        self.canvas_ref(handle)?;
        let capacity = self.config.arena.buffers;
        if self.live_buffers >= capacity {
            return Err(CanvasError::PoolExhausted {
                pool: "buffer",
                capacity,
            });
        }

        let timeout = self.config.present.fence_timeout();
        let buffer = match self.gpu.as_deref_mut() {
            Some(gpu) => Buffer::create(gpu, handle.0, class, pattern, size, initial, timeout)?,
            None => return Err(self.gpu_missing()),
        };
        self.live_buffers += 1;
        log::debug!("Buffer of {size} bytes created for canvas {} ({pattern:?})", handle.0);
        Ok(buffer)
    }

    /// Write `data` at `offset` into a buffer
    pub fn canvas_buffer_update(&mut self, buffer: &mut Buffer, data: &[u8], offset: u64) -> CanvasResult<()> {
        buffer.update(data, offset).map_err(CanvasError::from)
    }

    /// Borrow a dynamic buffer's mapped bytes
    pub fn canvas_buffer_map<'b>(&mut self, buffer: &'b mut Buffer) -> CanvasResult<&'b mut [u8]> {
        buffer.map().map_err(CanvasError::from)
    }

    /// End a mapping started with [`Runtime::canvas_buffer_map`]
    pub fn canvas_buffer_unmap(&mut self, buffer: &mut Buffer) {
        buffer.unmap();
    }

    /// Destroy a buffer
    pub fn canvas_buffer_destroy(&mut self, buffer: Buffer) {
        match self.gpu.as_deref_mut() {
            Some(gpu) => buffer.destroy(gpu),
            None => log::warn!("Dropping buffer without a GPU backend"),
        }
        self.live_buffers = self.live_buffers.saturating_sub(1);
    }

    // ------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------

    /// Run until [`Runtime::canvas_exit`] or the last canvas closes
    ///
    /// `callback` is invoked once per tick for every canvas without its
    /// own callback. The runtime is torn down before this returns.
    pub fn canvas_run(&mut self, callback: impl FnMut(&mut Runtime, CanvasHandle) + 'static) -> CanvasResult<()> {
        if self.displays.is_empty() {
            self.refresh_displays()?;
        }

        self.default_callback = Some(Box::new(callback));
        self.limiter.reset();
        self.running = true;
        log::info!("Entering run loop with {} canvas(es)", self.canvases.len());

        while !self.quit {
            self.tick();
        }

        self.running = false;
        self.shutdown();
        Ok(())
    }

    /// Request the run loop to stop; outside the loop this tears down at once
    pub fn canvas_exit(&mut self) {
        self.quit = true;
        if !self.running {
            self.shutdown();
        }
    }

    /// Whether quit has been requested
    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    /// Run one iteration of the loop
    pub fn tick(&mut self) {
        self.validate_before_tick();

        if self.displays_dirty {
            if let Err(e) = self.refresh_displays() {
                log::warn!("Display refresh failed: {e}");
            }
        }

        self.time.update(self.clock.as_ref());
        for (_, canvas) in self.canvases.iter_mut() {
            canvas.time.update(self.clock.as_ref());
        }

        self.pump_events();
        self.input.sample(self.time.elapsed());
        self.apply_cursors();
        self.resize_flagged();
        self.invoke_callbacks();
        self.present_all();
        self.close_flagged();

        if self.config.auto_exit && self.canvases.is_empty() && !self.quit {
            log::info!("Last canvas closed, leaving run loop");
            self.quit = true;
        }

        if !self.windowing.is_pacing() {
            self.limiter
                .limit(self.config.time.target_fps, self.clock.as_ref(), self.sleeper.as_ref());
        }

        self.input.end_tick();
        for (_, canvas) in self.canvases.iter_mut() {
            canvas.flags.remove(CanvasFlags::OS_MOVE | CanvasFlags::OS_RESIZE);
        }

        self.validate_after_tick();
    }

    fn pump_events(&mut self) {
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        self.windowing.poll_events(&mut events);
        for event in events.drain(..) {
            self.handle_event(event);
        }
        self.events = events;
    }

    fn canvas_by_window(&self, window: NativeWindow) -> Option<usize> {
        self.canvases.find(|canvas| canvas.window == Some(window))
    }

    fn hit_candidates(&self) -> Vec<HitCandidate> {
        self.canvases
            .iter()
            .filter(|(_, canvas)| !canvas.flags.contains(CanvasFlags::MINIMIZED))
            .map(|(index, canvas)| HitCandidate {
                canvas: index,
                created: canvas.created,
                geometry: canvas.geometry,
            })
            .collect()
    }

    fn tracked_pointer(&mut self, id: u32, device: PointerDevice) -> Option<usize> {
        match self.input.ensure(id, device) {
            Ok(index) => Some(index),
            Err(e) => {
                log::trace!("Ignoring pointer {id}: {e}");
                None
            }
        }
    }

    fn handle_event(&mut self, event: NativeEvent) {
        match event {
            NativeEvent::DisplaysChanged => self.displays_dirty = true,
            NativeEvent::ButtonDown { window, pointer, button } => {
                let canvas = self.canvas_by_window(window);
                let Some(index) = self.tracked_pointer(pointer, PointerDevice::Mouse) else {
                    return;
                };
                if let Some(pointer) = self.input.pointer_mut(index) {
                    pointer.button_down(button);
                    if canvas.is_some() {
                        pointer.canvas = canvas;
                        pointer.captured = true;
                    }
                }
            }
            NativeEvent::ButtonUp { pointer, button, .. } => {
                let Some(index) = self.tracked_pointer(pointer, PointerDevice::Mouse) else {
                    return;
                };
                if let Some(pointer) = self.input.pointer_mut(index) {
                    pointer.button_up(button);
                    pointer.captured = !pointer.down.is_empty();
                }
            }
            NativeEvent::PointerMoved {
                window,
                pointer,
                device,
                x,
                y,
                pressure,
            } => {
                let Some(index) = self.tracked_pointer(pointer, device) else {
                    return;
                };
                let captured_by = self
                    .input
                    .pointer(index)
                    .filter(|pointer| pointer.captured)
                    .and_then(|pointer| pointer.canvas);
                let source = self
                    .canvas_by_window(window)
                    .and_then(|canvas| self.canvases.get(canvas).ok().map(|c| (canvas, c.geometry)));

                self.input
                    .move_pointer(index, source, Vector2::new(x, y), &self.displays);
                if let Some(pointer) = self.input.pointer_mut(index) {
                    pointer.pressure = pressure.clamp(0.0, 1.0);
                    if let Some(owner) = captured_by {
                        pointer.canvas = Some(owner);
                    }
                }
                let candidates = self.hit_candidates();
                self.input.retarget(index, &candidates);
            }
            NativeEvent::PointerLeft { pointer, .. } => self.input.remove(pointer),
            NativeEvent::Scroll { pointer, dx, dy, .. } => {
                if let Some(index) = self.tracked_pointer(pointer, PointerDevice::Mouse) {
                    if let Some(pointer) = self.input.pointer_mut(index) {
                        pointer.scroll_by(dx, dy);
                    }
                }
            }
            NativeEvent::KeyDown { key, .. } => self.input.keyboard_mut().key_down(key),
            NativeEvent::KeyUp { key, .. } => self.input.keyboard_mut().key_up(key),
            NativeEvent::Resized { window, width, height } => {
                self.with_window_canvas(window, |canvas| {
                    canvas.geometry.width = width;
                    canvas.geometry.height = height;
                    canvas.flags.insert(CanvasFlags::RESIZE | CanvasFlags::OS_RESIZE);
                });
            }
            NativeEvent::Moved { window, x, y } => {
                let Some(index) = self.canvas_by_window(window) else {
                    return;
                };
                if let Ok(canvas) = self.canvases.get_mut(index) {
                    canvas.geometry.x = x;
                    canvas.geometry.y = y;
                    canvas.display = display_at(&self.displays, canvas.geometry);
                    canvas.flags.insert(CanvasFlags::OS_MOVE);
                }
            }
            NativeEvent::CloseRequested { window } => {
                self.with_window_canvas(window, |canvas| canvas.flags.insert(CanvasFlags::CLOSE));
            }
            NativeEvent::Minimized { window, minimized } => {
                self.with_window_canvas(window, |canvas| {
                    canvas.flags.set(CanvasFlags::MINIMIZED, minimized);
                    if !minimized {
                        canvas.flags.insert(CanvasFlags::RESIZE);
                    }
                });
            }
            NativeEvent::Maximized { window, maximized } => {
                self.with_window_canvas(window, |canvas| {
                    canvas.flags.set(CanvasFlags::MAXIMIZED, maximized);
                    canvas.flags.insert(CanvasFlags::RESIZE);
                });
            }
        }
    }

    fn with_window_canvas(&mut self, window: NativeWindow, apply: impl FnOnce(&mut Canvas)) {
        if let Some(index) = self.canvas_by_window(window) {
            if let Ok(canvas) = self.canvases.get_mut(index) {
                apply(canvas);
            }
        }
    }

    fn apply_cursors(&mut self) {
        for (index, canvas) in self.canvases.iter_mut() {
            let Some(window) = canvas.window else {
                continue;
            };
            if canvas.cursor_applied == Some(canvas.cursor) {
                continue;
            }
            match self.windowing.set_cursor(window, canvas.cursor) {
                Ok(()) => canvas.cursor_applied = Some(canvas.cursor),
                Err(e) => log::warn!("Canvas {index} cursor update failed: {e}"),
            }
        }
        for pointer in self.input.pointers_mut() {
            let canvas = pointer.canvas.and_then(|index| self.canvases.get(index).ok());
            if let Some(canvas) = canvas {
                pointer.cursor = canvas.cursor;
            }
            pointer.relative =
                canvas.is_some_and(|canvas| canvas.cursor_applied == Some(CursorKind::Locked));
        }
    }

    fn resize_flagged(&mut self) {
        for (index, canvas) in self.canvases.iter_mut() {
            if !canvas.flags.contains(CanvasFlags::RESIZE) {
                continue;
            }
            canvas.flags.remove(CanvasFlags::RESIZE);

            let (Some(engine), Some(window)) = (canvas.presentation.as_mut(), canvas.window) else {
                continue;
            };
            let Some(gpu) = self.gpu.as_deref_mut() else {
                continue;
            };
            let extent = window_extent(self.windowing.as_ref(), window);
            engine.request_resize();
            if let Err(e) = engine.resize(gpu, extent) {
                log::warn!("Canvas {index} swapchain rebuild failed: {e}");
            }
        }
    }

    fn invoke_callbacks(&mut self) {
        let indices = self.canvases.indices();
        for index in indices {
            let Ok(canvas) = self.canvases.get_mut(index) else {
                continue;
            };
            let created = canvas.created;
            let handle = CanvasHandle(index);

            if let Some(mut callback) = canvas.callback.take() {
                callback(self, handle);
                if let Ok(canvas) = self.canvases.get_mut(index) {
                    if canvas.created == created && canvas.callback.is_none() {
                        canvas.callback = Some(callback);
                    }
                }
            } else if let Some(mut callback) = self.default_callback.take() {
                callback(self, handle);
                if self.default_callback.is_none() {
                    self.default_callback = Some(callback);
                }
            }
        }
    }

    fn present_all(&mut self) {
        for (index, canvas) in self.canvases.iter_mut() {
            if canvas.flags.intersects(CanvasFlags::MINIMIZED | CanvasFlags::CLOSE) {
                continue;
            }
            let (Some(engine), Some(window)) = (canvas.presentation.as_mut(), canvas.window) else {
                continue;
            };
            let Some(gpu) = self.gpu.as_deref_mut() else {
                return;
            };
            let extent = window_extent(self.windowing.as_ref(), window);
            match engine.render_frame(gpu, canvas.clear_color, extent) {
                Ok(outcome) => log::trace!("Canvas {index}: {outcome:?}"),
                Err(e) => log::warn!("Canvas {index} frame failed: {e}"),
            }
        }
    }

    fn close_flagged(&mut self) {
        let closing: Vec<usize> = self
            .canvases
            .iter()
            .filter(|(_, canvas)| canvas.flags.contains(CanvasFlags::CLOSE))
            .map(|(index, _)| index)
            .collect();
        for index in closing {
            self.destroy_canvas(index);
        }
    }

    fn shutdown(&mut self) {
        let open = self.canvases.indices();
        if open.is_empty() && self.default_callback.is_none() {
            return;
        }
        for index in open {
            self.destroy_canvas(index);
        }
        self.default_callback = None;
        self.input.reset();
        if let Some(gpu) = self.gpu.as_deref_mut() {
            if let Err(e) = gpu.wait_idle() {
                log::warn!("GPU idle wait failed during shutdown: {e}");
            }
        }
        log::info!("Runtime shut down");
    }

    fn validate_before_tick(&mut self) {
        if let Some(mut layer) = self.validation.take() {
            layer.before_tick(self);
            self.validation = Some(layer);
        }
    }

    fn validate_after_tick(&mut self) {
        if let Some(mut layer) = self.validation.take() {
            layer.after_tick(self);
            self.validation = Some(layer);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Canvas record
    pub fn canvas_info(&self, handle: CanvasHandle) -> CanvasResult<&Canvas> {
        self.canvas_ref(handle)
    }

    /// Iterate over open canvases
    pub fn canvases(&self) -> impl Iterator<Item = (CanvasHandle, &Canvas)> {
        self.canvases
            .iter()
            .map(|(index, canvas)| (CanvasHandle(index), canvas))
    }

    /// Number of open canvases
    pub fn canvas_count(&self) -> usize {
        self.canvases.len()
    }

    /// Display record
    pub fn display(&self, index: usize) -> CanvasResult<&Display> {
        self.displays
            .get(index)
            .map_err(|_| CanvasError::DisplayLookup(index as isize))
    }

    /// Iterate over attached displays as `(index, display)`
    pub fn displays(&self) -> impl Iterator<Item = (usize, &Display)> {
        self.displays.iter()
    }

    /// Pointer with native id `id`
    pub fn pointer(&self, id: u32) -> Option<&Pointer> {
        self.input.pointer_by_id(id)
    }

    /// Iterate over tracked pointers
    pub fn pointers(&self) -> impl Iterator<Item = &Pointer> {
        self.input.pointers()
    }

    /// Keyboard state
    pub fn keyboard(&self) -> &KeyboardState {
        self.input.keyboard()
    }

    /// Runtime-wide timing
    pub fn time(&self) -> &TimeState {
        &self.time
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Most recent validation report, when validation is enabled
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.validation.as_ref().and_then(ValidationLayer::last_report)
    }

    /// Live user buffers
    pub fn buffer_count(&self) -> usize {
        self.live_buffers
    }

    /// Windowing backend
    pub fn windowing(&self) -> &dyn NativeWindowing {
        self.windowing.as_ref()
    }

    /// Windowing backend, mutably
    pub fn windowing_mut(&mut self) -> &mut dyn NativeWindowing {
        self.windowing.as_mut()
    }

    /// GPU backend, if one loaded
    pub fn gpu(&self) -> Option<&dyn GpuBackend> {
        self.gpu.as_deref()
    }

    /// GPU backend, mutably
    pub fn gpu_mut(&mut self) -> Option<&mut dyn GpuBackend> {
        match self.gpu.as_mut() {
            Some(gpu) => Some(gpu.as_mut()),
            None => None,
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
        if self.live_buffers > 0 {
            log::warn!("{} buffer(s) leaked at runtime teardown", self.live_buffers);
        }
    }
}

/// Framebuffer extent of a window, zero when unknown
fn window_extent(windowing: &dyn NativeWindowing, window: NativeWindow) -> Extent2D {
    windowing
        .framebuffer_size(window)
        .map_or_else(|_| Extent2D::default(), |(width, height)| Extent2D::new(width, height))
}

/// Display containing the center of `geometry`, else the primary
fn display_at(displays: &SlotArena<Display>, geometry: WindowGeometry) -> Option<usize> {
    let (cx, cy) = geometry.center();
    displays
        .find(|display| display.geometry().contains(cx, cy))
        .or_else(|| displays.find(|display| display.primary))
}

fn center_on(origin: i32, span: u32, size: u32) -> i32 {
    origin + (i64::from(span) - i64::from(size)).div_euclid(2) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{STATUS_DISPLAY, STATUS_EXHAUSTED, STATUS_GPU, STATUS_LIBRARY, STATUS_SIZE, STATUS_WINDOW};
    use crate::foundation::time::{ManualClock, ManualSleeper};
    use crate::input::KeyCode;
    use crate::platform::MouseButton;
    use crate::render::PresentState;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn runtime_with(config: RuntimeConfig, gpu: Option<HeadlessGpu>) -> Runtime {
        let clock = Rc::new(ManualClock::new());
        Runtime::with_backends(
            config,
            Box::new(HeadlessWindowing::new()),
            gpu.map(|gpu| Box::new(gpu) as Box<dyn GpuBackend>),
            Box::new(Rc::clone(&clock)),
            Box::new(ManualSleeper::new(clock)),
        )
        .unwrap()
    }

    fn runtime() -> Runtime {
        runtime_with(RuntimeConfig::default(), Some(HeadlessGpu::new()))
    }

    fn windows(runtime: &mut Runtime) -> &mut HeadlessWindowing {
        runtime
            .windowing_mut()
            .as_any_mut()
            .downcast_mut::<HeadlessWindowing>()
            .unwrap()
    }

    fn gpu(runtime: &Runtime) -> &HeadlessGpu {
        runtime.gpu().unwrap().as_any().downcast_ref::<HeadlessGpu>().unwrap()
    }

    fn gpu_mut(runtime: &mut Runtime) -> &mut HeadlessGpu {
        runtime
            .gpu_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<HeadlessGpu>()
            .unwrap()
    }

    #[test]
    fn test_canvas_opens_ready_and_centered() {
        let mut rt = runtime();
        let canvas = rt.canvas(KEEP, KEEP, 640, 480, "main").unwrap();
        let info = rt.canvas_info(canvas).unwrap();
        assert_eq!(info.geometry(), WindowGeometry::new(640, 300, 640, 480));
        assert_eq!(info.present_state(), Some(PresentState::Ready));
        assert_eq!(info.display(), Some(0));
        assert_eq!(info.clear_color(), DEFAULT_CLEAR_COLOR);
        assert!(rt.pointer(crate::input::PRIMARY_POINTER).is_some());
    }

    #[test]
    fn test_canvas_set_recenters_on_current_display() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(100, 100, 640, 480, "placed").unwrap();
        rt.canvas_set(canvas, -1, KEEP, KEEP, KEEP, KEEP, Some("moved")).unwrap();

        let info = rt.canvas_info(canvas).unwrap();
        assert_eq!(info.geometry(), WindowGeometry::new(640, 300, 640, 480));
        assert_eq!(info.title(), "moved");
        assert!(!info.flags().contains(CanvasFlags::RESIZE));

        let window = info.window().unwrap();
        let record = windows(&mut rt).window(window).unwrap();
        assert_eq!(record.geometry, WindowGeometry::new(640, 300, 640, 480));
        assert_eq!(record.title, "moved");
    }

    #[test]
    fn test_canvas_set_without_title_keeps_size_and_title() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(100, 100, 640, 480, "keep").unwrap();
        rt.canvas_set(canvas, -1, -1, -1, -1, -1, None).unwrap();

        let info = rt.canvas_info(canvas).unwrap();
        assert_eq!(info.geometry(), WindowGeometry::new(640, 300, 640, 480));
        assert_eq!(info.display(), Some(0));
        assert_eq!(info.title(), "keep");

        let window = info.window().unwrap();
        let record = windows(&mut rt).window(window).unwrap();
        assert_eq!(record.geometry, WindowGeometry::new(640, 300, 640, 480));
        assert_eq!(record.title, "keep");
    }

    #[test]
    fn test_canvas_set_rejections() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(0, 0, 320, 240, "x").unwrap();

        let err = rt.canvas_set(canvas, -1, 0, 0, 0, 100, None).unwrap_err();
        assert_eq!(err.status(), STATUS_SIZE);
        let err = rt.canvas_set(canvas, -1, 0, 0, -5, 100, None).unwrap_err();
        assert_eq!(err.status(), STATUS_SIZE);
        let err = rt.canvas_set(canvas, 7, 0, 0, 100, 100, None).unwrap_err();
        assert_eq!(err.status(), STATUS_DISPLAY);

        rt.canvas_set(canvas, 0, 10, 20, 800, 600, None).unwrap();
        let info = rt.canvas_info(canvas).unwrap();
        assert_eq!(info.geometry(), WindowGeometry::new(10, 20, 800, 600));
        assert!(info.flags().contains(CanvasFlags::RESIZE));
    }

    #[test]
    fn test_fullscreen_ignores_placement_and_restores() {
        let mut rt = runtime();
        let canvas = rt.canvas(50, 60, 320, 240, "fs").unwrap();
        rt.canvas_fullscreen(canvas, -1).unwrap();
        assert_eq!(
            rt.canvas_info(canvas).unwrap().geometry(),
            WindowGeometry::new(0, 0, 1920, 1080)
        );

        rt.canvas_set(canvas, -1, 0, 0, 100, 100, None).unwrap();
        assert_eq!(rt.canvas_info(canvas).unwrap().geometry().width, 1920);

        rt.tick();
        assert_eq!(
            rt.canvas_info(canvas).unwrap().presentation().unwrap().extent(),
            Extent2D::new(1920, 1080)
        );

        rt.canvas_restore(canvas).unwrap();
        let info = rt.canvas_info(canvas).unwrap();
        assert!(!info.flags().contains(CanvasFlags::FULLSCREEN));
        assert_eq!(info.geometry(), WindowGeometry::new(50, 60, 320, 240));
    }

    #[test]
    fn test_invalid_arguments_map_to_status_codes() {
        let mut rt = runtime();
        assert_eq!(rt.canvas(0, 0, 0, 10, "x").unwrap_err().status(), STATUS_SIZE);
        assert_eq!(rt.canvas_window(0, 0, 10, -3, "x").unwrap_err().status(), STATUS_SIZE);
        assert_eq!(rt.canvas_color(CanvasHandle(9), [0.0; 4]).unwrap_err().status(), -2);

        let canvas = rt.canvas_window(0, 0, 10, 10, "x").unwrap();
        assert!(rt.canvas_color(canvas, [f32::NAN, 0.0, 0.0, 1.0]).is_err());
        rt.canvas_color(canvas, [0.25, 0.5, 0.75, 1.0]).unwrap();
        assert_eq!(rt.canvas_info(canvas).unwrap().clear_color(), [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_clear_color_reaches_the_gpu() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 200, 100, "color").unwrap();
        rt.canvas_color(canvas, [1.0, 0.0, 0.5, 1.0]).unwrap();
        rt.tick();
        rt.tick();
        assert_eq!(gpu(&rt).presents(), 2);
        assert_eq!(gpu(&rt).last_clear(), Some([1.0, 0.0, 0.5, 1.0]));
    }

    #[test]
    fn test_canvas_pool_exhaustion_and_reuse() {
        let mut config = RuntimeConfig::default();
        config.arena.canvases = 2;
        let mut rt = runtime_with(config, Some(HeadlessGpu::new()));

        let first = rt.canvas(0, 0, 100, 100, "a").unwrap();
        let _second = rt.canvas(0, 0, 100, 100, "b").unwrap();
        let err = rt.canvas(0, 0, 100, 100, "c").unwrap_err();
        assert_eq!(err.status(), STATUS_EXHAUSTED);

        rt.canvas_close(first).unwrap();
        rt.tick();
        assert_eq!(rt.canvas_count(), 1);
        let reused = rt.canvas(0, 0, 100, 100, "d").unwrap();
        assert_eq!(reused, first);
    }

    #[test]
    fn test_window_failure_releases_slot() {
        let mut rt = runtime();
        windows(&mut rt).fail_next_create();
        let err = rt.canvas(0, 0, 100, 100, "x").unwrap_err();
        assert_eq!(err.status(), STATUS_WINDOW);
        assert_eq!(rt.canvas_count(), 0);
    }

    #[test]
    fn test_gpu_failure_tears_window_down() {
        let mut rt = runtime();
        gpu_mut(&mut rt).fail_after(2);
        let err = rt.canvas(0, 0, 100, 100, "x").unwrap_err();
        assert_eq!(err.status(), STATUS_GPU);
        assert_eq!(rt.canvas_count(), 0);
        assert_eq!(windows(&mut rt).window_count(), 0);
        assert_eq!(gpu(&rt).live_objects(), 0);
    }

    #[test]
    fn test_missing_gpu_still_opens_windows() {
        let mut rt = runtime_with(RuntimeConfig::default(), None);
        let err = rt.canvas(0, 0, 100, 100, "x").unwrap_err();
        assert_eq!(err.status(), STATUS_LIBRARY);

        let canvas = rt.canvas_window(0, 0, 100, 100, "plain").unwrap();
        assert_eq!(rt.canvas_info(canvas).unwrap().present_state(), None);
        let err = rt
            .canvas_buffer_create(canvas, BufferClass::Vertex, BufferPattern::Dynamic, 64, None)
            .unwrap_err();
        assert_eq!(err.status(), STATUS_LIBRARY);
    }

    #[test]
    fn test_dynamic_buffer_through_runtime() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 100, 100, "buffers").unwrap();

        let mut buffer = rt
            .canvas_buffer_create(canvas, BufferClass::Vertex, BufferPattern::Dynamic, 64, Some(&[0u8; 64]))
            .unwrap();
        rt.canvas_buffer_update(&mut buffer, &[1u8; 32], 0).unwrap();
        assert!(rt.canvas_buffer_update(&mut buffer, &[1u8; 8], 60).is_err());

        let bytes = rt.canvas_buffer_map(&mut buffer).unwrap();
        assert!(bytes[..32].iter().all(|&b| b == 1));
        assert!(bytes[32..].iter().all(|&b| b == 0));
        rt.canvas_buffer_unmap(&mut buffer);

        assert_eq!(rt.buffer_count(), 1);
        rt.canvas_buffer_destroy(buffer);
        assert_eq!(rt.buffer_count(), 0);
    }

    #[test]
    fn test_buffer_pool_is_bounded() {
        let mut config = RuntimeConfig::default();
        config.arena.buffers = 1;
        let mut rt = runtime_with(config, Some(HeadlessGpu::new()));
        let canvas = rt.canvas(0, 0, 100, 100, "x").unwrap();

        let first = rt
            .canvas_buffer_create(canvas, BufferClass::Uniform, BufferPattern::Dynamic, 16, None)
            .unwrap();
        let err = rt
            .canvas_buffer_create(canvas, BufferClass::Uniform, BufferPattern::Dynamic, 16, None)
            .unwrap_err();
        assert_eq!(err.status(), STATUS_EXHAUSTED);
        rt.canvas_buffer_destroy(first);
    }

    #[test]
    fn test_button_edges_visible_for_one_tick() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(100, 100, 400, 300, "input").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();

        let seen = Rc::new(Cell::new((false, false)));
        let observed = Rc::clone(&seen);
        rt.canvas_callback(canvas, move |rt, _| {
            let pointer = rt.pointer(0).unwrap();
            observed.set((pointer.was_pressed(MouseButton::Left), pointer.is_down(MouseButton::Left)));
        })
        .unwrap();

        windows(&mut rt).push_event(NativeEvent::PointerMoved {
            window,
            pointer: 0,
            device: PointerDevice::Mouse,
            x: 10.0,
            y: 20.0,
            pressure: 1.0,
        });
        windows(&mut rt).push_event(NativeEvent::ButtonDown {
            window,
            pointer: 0,
            button: MouseButton::Left,
        });
        rt.tick();
        assert_eq!(seen.get(), (true, true));

        let pointer = rt.pointer(0).unwrap();
        assert_eq!(pointer.canvas, Some(canvas.index()));
        assert_eq!(pointer.screen_pos, Vector2::new(110.0, 120.0));
        assert!(pointer.captured);
        assert!(!pointer.was_pressed(MouseButton::Left));

        rt.tick();
        assert_eq!(seen.get(), (false, true));

        windows(&mut rt).push_event(NativeEvent::ButtonUp {
            window,
            pointer: 0,
            button: MouseButton::Left,
        });
        rt.tick();
        assert!(!rt.pointer(0).unwrap().captured);
    }

    #[test]
    fn test_pointer_retargets_to_newest_canvas() {
        let mut rt = runtime();
        let older = rt.canvas_window(0, 0, 400, 400, "older").unwrap();
        let newer = rt.canvas_window(100, 100, 200, 200, "newer").unwrap();
        let window = rt.canvas_info(older).unwrap().window().unwrap();

        windows(&mut rt).push_event(NativeEvent::PointerMoved {
            window,
            pointer: 0,
            device: PointerDevice::Mouse,
            x: 150.0,
            y: 150.0,
            pressure: 1.0,
        });
        rt.tick();

        let pointer = rt.pointer(0).unwrap();
        assert_eq!(pointer.canvas, Some(newer.index()));
        assert_eq!(pointer.window_pos, Vector2::new(50.0, 50.0));
    }

    #[test]
    fn test_keyboard_events_fold_into_keyboard_state() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(0, 0, 100, 100, "keys").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();

        windows(&mut rt).push_event(NativeEvent::KeyDown { window, key: KeyCode::A });
        rt.tick();
        assert!(rt.keyboard().is_down(KeyCode::A));
        assert!(!rt.keyboard().was_pressed(KeyCode::A));

        windows(&mut rt).push_event(NativeEvent::KeyUp { window, key: KeyCode::A });
        rt.tick();
        assert!(!rt.keyboard().is_down(KeyCode::A));
    }

    #[test]
    fn test_user_resize_rebuilds_swapchain() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 640, 480, "resize").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();

        windows(&mut rt).user_resize(window, 800, 600);
        rt.tick();

        let info = rt.canvas_info(canvas).unwrap();
        assert_eq!(info.geometry().width, 800);
        assert_eq!(info.present_state(), Some(PresentState::Ready));
        assert_eq!(info.presentation().unwrap().extent(), Extent2D::new(800, 600));
        assert!(!info.flags().contains(CanvasFlags::OS_RESIZE));
    }

    #[test]
    fn test_minimized_canvas_skips_presentation() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 320, 240, "min").unwrap();
        rt.tick();
        let presented = gpu(&rt).presents();

        rt.canvas_minimize(canvas).unwrap();
        rt.tick();
        rt.tick();
        assert_eq!(gpu(&rt).presents(), presented);

        rt.canvas_restore(canvas).unwrap();
        rt.tick();
        assert_eq!(gpu(&rt).presents(), presented + 1);
    }

    #[test]
    fn test_locked_cursor_makes_pointer_relative() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(100, 100, 400, 300, "locked").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();
        windows(&mut rt).push_event(NativeEvent::PointerMoved {
            window,
            pointer: 0,
            device: PointerDevice::Mouse,
            x: 50.0,
            y: 50.0,
            pressure: 1.0,
        });
        rt.tick();
        assert!(!rt.pointer(0).unwrap().relative);

        rt.canvas_cursor(canvas, CursorKind::Locked).unwrap();
        rt.tick();
        assert!(rt.pointer(0).unwrap().relative);
        assert_eq!(rt.pointer(0).unwrap().cursor, CursorKind::Locked);

        rt.canvas_cursor(canvas, CursorKind::Arrow).unwrap();
        rt.tick();
        assert!(!rt.pointer(0).unwrap().relative);
    }

    #[test]
    fn test_cursor_applied_on_next_tick() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(0, 0, 100, 100, "cursor").unwrap();
        rt.canvas_cursor(canvas, CursorKind::Hand).unwrap();
        assert_ne!(rt.canvas_info(canvas).unwrap().applied_cursor(), Some(CursorKind::Hand));

        rt.tick();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();
        assert_eq!(rt.canvas_info(canvas).unwrap().applied_cursor(), Some(CursorKind::Hand));
        assert_eq!(windows(&mut rt).window(window).unwrap().cursor, CursorKind::Hand);
    }

    #[test]
    fn test_close_request_closes_and_auto_exits() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 100, 100, "bye").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();

        windows(&mut rt).push_event(NativeEvent::CloseRequested { window });
        rt.tick();

        assert_eq!(rt.canvas_count(), 0);
        assert!(rt.is_quitting());
        assert_eq!(windows(&mut rt).window_count(), 0);
        assert_eq!(gpu(&rt).live_objects(), 0);
    }

    #[test]
    fn test_run_loop_invokes_default_callback_until_close() {
        let mut rt = runtime();
        let canvas = rt.canvas(0, 0, 100, 100, "loop").unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&calls);

        rt.canvas_run(move |rt, handle| {
            log.borrow_mut().push(handle);
            if log.borrow().len() == 3 {
                rt.canvas_close(handle).unwrap();
            }
        })
        .unwrap();

        assert_eq!(*calls.borrow(), vec![canvas; 3]);
        assert_eq!(rt.canvas_count(), 0);
        assert_eq!(gpu(&rt).live_objects(), 0);
    }

    #[test]
    fn test_exit_outside_loop_tears_down() {
        let mut rt = runtime();
        rt.canvas(0, 0, 100, 100, "a").unwrap();
        rt.canvas_window(0, 0, 100, 100, "b").unwrap();
        rt.canvas_exit();
        assert!(rt.is_quitting());
        assert_eq!(rt.canvas_count(), 0);
        assert_eq!(windows(&mut rt).window_count(), 0);
    }

    #[test]
    fn test_display_change_reassigns_canvases() {
        let mut rt = runtime();
        let canvas = rt.canvas_window(2000, 100, 200, 200, "right").unwrap();
        assert_eq!(rt.canvas_info(canvas).unwrap().display(), Some(0));

        windows(&mut rt).set_displays(vec![
            Display::new(true, 0, 0, 1920, 1080),
            Display::new(false, 1920, 0, 1280, 1024),
        ]);
        rt.tick();
        rt.tick();

        assert_eq!(rt.displays().count(), 2);
        assert_eq!(rt.canvas_info(canvas).unwrap().display(), Some(1));
        assert_eq!(rt.display(1).unwrap().width, 1280);
        assert_eq!(rt.display(5).unwrap_err().status(), STATUS_DISPLAY);
    }

    #[test]
    fn test_validation_runs_without_findings() {
        let config = RuntimeConfig::default().with_validation_interval(1);
        let mut rt = runtime_with(config, Some(HeadlessGpu::new()));
        let canvas = rt.canvas(0, 0, 100, 100, "checked").unwrap();
        let window = rt.canvas_info(canvas).unwrap().window().unwrap();

        for step in 0..6 {
            windows(&mut rt).push_event(NativeEvent::PointerMoved {
                window,
                pointer: 0,
                device: PointerDevice::Mouse,
                x: f64::from(step),
                y: 5.0,
                pressure: 1.0,
            });
            rt.tick();
            let report = rt.validation_report().unwrap();
            assert!(report.issues.is_empty(), "{:?}", report.issues);
        }
    }
}
