//! GLFW windowing backend
//!
//! Creates client-API-less windows for Vulkan presentation and translates GLFW
//! window events into [`NativeEvent`]s. GLFW delivers events per window, so
//! every window keeps its own receiver and `poll_events` drains them all.

use super::{
    CursorKind, Display, MouseButton, NativeEvent, NativeWindow, NativeWindowing, PlatformError,
    PlatformResult, PointerDevice, WindowDesc, WindowGeometry, WindowState,
};
use crate::input::KeyCode;
use ash::vk;
use std::collections::HashMap;

struct GlfwWindowSlot {
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

/// Windowing backend built on GLFW
pub struct GlfwWindowing {
    glfw: glfw::Glfw,
    windows: HashMap<u64, GlfwWindowSlot>,
    next_id: u64,
    display_signature: Vec<(i32, i32, u32, u32)>,
}

impl GlfwWindowing {
    /// Initialize GLFW
    pub fn new() -> PlatformResult<Self> {
        let glfw = glfw::init(glfw::log_errors)
            .map_err(|e| PlatformError::InitializationFailed(format!("{e:?}")))?;

        if !glfw.vulkan_supported() {
            log::warn!("GLFW reports no Vulkan loader; canvases will be window-only");
        }

        let mut backend = Self {
            glfw,
            windows: HashMap::new(),
            next_id: 1,
            display_signature: Vec::new(),
        };
        backend.display_signature = backend.current_signature();
        Ok(backend)
    }

    /// Create a Vulkan surface for one of our windows
    pub fn create_vulkan_surface(
        &mut self,
        window: NativeWindow,
        instance: vk::Instance,
    ) -> PlatformResult<vk::SurfaceKHR> {
        let slot = self
            .windows
            .get_mut(&window.0)
            .ok_or(PlatformError::UnknownWindow(window))?;

        let mut surface = vk::SurfaceKHR::null();
        let result = slot
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(PlatformError::CreationFailed(format!(
                "failed to create Vulkan surface: {result:?}"
            )))
        }
    }

    fn slot_mut(&mut self, window: NativeWindow) -> PlatformResult<&mut GlfwWindowSlot> {
        self.windows
            .get_mut(&window.0)
            .ok_or(PlatformError::UnknownWindow(window))
    }

    fn current_signature(&mut self) -> Vec<(i32, i32, u32, u32)> {
        self.glfw.with_connected_monitors(|_, monitors| {
            monitors
                .iter()
                .map(|monitor| {
                    let (x, y) = monitor.get_pos();
                    let (w, h) = monitor
                        .get_video_mode()
                        .map_or((0, 0), |mode| (mode.width, mode.height));
                    (x, y, w, h)
                })
                .collect()
        })
    }

    fn geometry_of(window: &glfw::PWindow) -> WindowGeometry {
        let (x, y) = window.get_pos();
        let (width, height) = window.get_size();
        WindowGeometry::new(x, y, width.max(0) as u32, height.max(0) as u32)
    }
}

impl NativeWindowing for GlfwWindowing {
    fn name(&self) -> &'static str {
        "glfw"
    }

    fn create_window(&mut self, desc: &WindowDesc<'_>) -> PlatformResult<(NativeWindow, WindowGeometry)> {
        // Vulkan presentation, no OpenGL context
        self.glfw
            .window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        self.glfw
            .window_hint(glfw::WindowHint::Resizable(desc.resizable));
        self.glfw
            .window_hint(glfw::WindowHint::Decorated(desc.titlebar));

        let (mut window, events) = self
            .glfw
            .create_window(
                desc.geometry.width.max(1),
                desc.geometry.height.max(1),
                desc.title,
                glfw::WindowMode::Windowed,
            )
            .ok_or_else(|| PlatformError::CreationFailed(desc.title.to_string()))?;

        window.set_pos(desc.geometry.x, desc.geometry.y);
        window.set_key_polling(true);
        window.set_mouse_button_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_scroll_polling(true);
        window.set_size_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_pos_polling(true);
        window.set_close_polling(true);
        window.set_iconify_polling(true);
        window.set_maximize_polling(true);

        let geometry = Self::geometry_of(&window);
        let handle = NativeWindow(self.next_id);
        self.next_id += 1;
        self.windows.insert(handle.0, GlfwWindowSlot { window, events });

        log::debug!("GLFW window {} created at {:?}", handle.0, geometry);
        Ok((handle, geometry))
    }

    fn destroy_window(&mut self, window: NativeWindow) {
        // PWindow closes the native window on drop
        if self.windows.remove(&window.0).is_some() {
            log::debug!("GLFW window {} destroyed", window.0);
        }
    }

    fn set_geometry(&mut self, window: NativeWindow, geometry: WindowGeometry) -> PlatformResult<WindowGeometry> {
        let slot = self.slot_mut(window)?;
        slot.window.set_pos(geometry.x, geometry.y);
        slot.window
            .set_size(geometry.width as i32, geometry.height as i32);
        Ok(Self::geometry_of(&slot.window))
    }

    fn set_title(&mut self, window: NativeWindow, title: &str) -> PlatformResult<()> {
        self.slot_mut(window)?.window.set_title(title);
        Ok(())
    }

    fn set_state(&mut self, window: NativeWindow, state: WindowState) -> PlatformResult<()> {
        let Self { glfw, windows, .. } = self;
        let slot = windows
            .get_mut(&window.0)
            .ok_or(PlatformError::UnknownWindow(window))?;

        match state {
            WindowState::Minimized => slot.window.iconify(),
            WindowState::Maximized => slot.window.maximize(),
            WindowState::Restored => slot.window.restore(),
            WindowState::Fullscreen { display } => {
                glfw.with_connected_monitors(|_, monitors| {
                    let monitor = monitors.get(display).ok_or_else(|| {
                        PlatformError::DisplayEnumeration(format!("no display {display}"))
                    })?;
                    let mode = monitor.get_video_mode().ok_or_else(|| {
                        PlatformError::DisplayEnumeration(format!("display {display} has no video mode"))
                    })?;
                    slot.window.set_monitor(
                        glfw::WindowMode::FullScreen(monitor),
                        0,
                        0,
                        mode.width,
                        mode.height,
                        Some(mode.refresh_rate),
                    );
                    Ok::<(), PlatformError>(())
                })?;
            }
            WindowState::Windowed(geometry) => slot.window.set_monitor(
                glfw::WindowMode::Windowed,
                geometry.x,
                geometry.y,
                geometry.width,
                geometry.height,
                None,
            ),
        }
        Ok(())
    }

    fn set_cursor(&mut self, window: NativeWindow, cursor: CursorKind) -> PlatformResult<()> {
        let slot = self.slot_mut(window)?;
        let standard = match cursor {
            CursorKind::Hidden => {
                slot.window.set_cursor_mode(glfw::CursorMode::Hidden);
                return Ok(());
            }
            CursorKind::Locked => {
                slot.window.set_cursor_mode(glfw::CursorMode::Disabled);
                return Ok(());
            }
            CursorKind::Arrow => glfw::StandardCursor::Arrow,
            CursorKind::Text => glfw::StandardCursor::IBeam,
            CursorKind::Crosshair => glfw::StandardCursor::Crosshair,
            CursorKind::Hand => glfw::StandardCursor::Hand,
            CursorKind::ResizeHorizontal => glfw::StandardCursor::HResize,
            CursorKind::ResizeVertical => glfw::StandardCursor::VResize,
        };
        slot.window.set_cursor_mode(glfw::CursorMode::Normal);
        // Dropping the previous cursor destroys it
        let _previous = slot.window.set_cursor(Some(glfw::Cursor::standard(standard)));
        Ok(())
    }

    fn framebuffer_size(&self, window: NativeWindow) -> PlatformResult<(u32, u32)> {
        let slot = self
            .windows
            .get(&window.0)
            .ok_or(PlatformError::UnknownWindow(window))?;
        let (width, height) = slot.window.get_framebuffer_size();
        Ok((width.max(0) as u32, height.max(0) as u32))
    }

    fn poll_events(&mut self, out: &mut Vec<NativeEvent>) {
        self.glfw.poll_events();

        for (&id, slot) in &self.windows {
            let window = NativeWindow(id);
            for (_, event) in glfw::flush_messages(&slot.events) {
                if let Some(event) = translate(window, event) {
                    out.push(event);
                }
            }
        }

        let signature = self.current_signature();
        if signature != self.display_signature {
            log::info!("Display topology changed ({} displays)", signature.len());
            self.display_signature = signature;
            out.push(NativeEvent::DisplaysChanged);
        }
    }

    fn displays(&mut self) -> PlatformResult<Vec<Display>> {
        let displays: Vec<Display> = self.glfw.with_connected_monitors(|_, monitors| {
            monitors
                .iter()
                .enumerate()
                .filter_map(|(index, monitor)| {
                    let mode = monitor.get_video_mode()?;
                    let (x, y) = monitor.get_pos();
                    let (scale, _) = monitor.get_content_scale();
                    Some(Display {
                        valid: true,
                        primary: index == 0,
                        x,
                        y,
                        width: mode.width,
                        height: mode.height,
                        scale,
                        refresh_rate: mode.refresh_rate,
                    })
                })
                .collect()
        });

        if displays.is_empty() {
            return Err(PlatformError::DisplayEnumeration(
                "GLFW reported no monitors".to_string(),
            ));
        }
        Ok(displays)
    }

    fn required_gpu_extensions(&self) -> Vec<String> {
        self.glfw
            .get_required_instance_extensions()
            .unwrap_or_default()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn translate(window: NativeWindow, event: glfw::WindowEvent) -> Option<NativeEvent> {
    let event = match event {
        glfw::WindowEvent::Key(key, _, action, _) => {
            let code = key as i32;
            if code < 0 {
                return None;
            }
            let key = KeyCode(code as u16);
            match action {
                glfw::Action::Press | glfw::Action::Repeat => NativeEvent::KeyDown { window, key },
                glfw::Action::Release => NativeEvent::KeyUp { window, key },
            }
        }
        glfw::WindowEvent::MouseButton(button, action, _) => {
            let button = mouse_button(button);
            match action {
                glfw::Action::Press | glfw::Action::Repeat => NativeEvent::ButtonDown {
                    window,
                    pointer: 0,
                    button,
                },
                glfw::Action::Release => NativeEvent::ButtonUp {
                    window,
                    pointer: 0,
                    button,
                },
            }
        }
        glfw::WindowEvent::CursorPos(x, y) => NativeEvent::PointerMoved {
            window,
            pointer: 0,
            device: PointerDevice::Mouse,
            x,
            y,
            pressure: 1.0,
        },
        glfw::WindowEvent::Scroll(dx, dy) => NativeEvent::Scroll {
            window,
            pointer: 0,
            dx,
            dy,
        },
        glfw::WindowEvent::FramebufferSize(width, height) => NativeEvent::Resized {
            window,
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        },
        glfw::WindowEvent::Pos(x, y) => NativeEvent::Moved { window, x, y },
        glfw::WindowEvent::Close => NativeEvent::CloseRequested { window },
        glfw::WindowEvent::Iconify(minimized) => NativeEvent::Minimized { window, minimized },
        glfw::WindowEvent::Maximize(maximized) => NativeEvent::Maximized { window, maximized },
        _ => return None,
    };
    Some(event)
}

fn mouse_button(button: glfw::MouseButton) -> MouseButton {
    match button as i32 {
        0 => MouseButton::Left,
        1 => MouseButton::Right,
        2 => MouseButton::Middle,
        3 => MouseButton::Back,
        4 => MouseButton::Forward,
        other => MouseButton::Other(other.clamp(5, 31) as u8),
    }
}
