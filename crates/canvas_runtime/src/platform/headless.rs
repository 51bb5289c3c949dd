//! In-process windowing backend
//!
//! Keeps window records in memory and replays events queued by the caller.
//! Used for CI runs without a display server and as the test fixture for the
//! orchestrator.

use super::{
    CursorKind, Display, NativeEvent, NativeWindow, NativeWindowing, PlatformError, PlatformResult,
    WindowDesc, WindowGeometry, WindowState,
};
use std::collections::{HashMap, VecDeque};

/// Recorded state of a headless window
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessWindow {
    /// Current geometry
    pub geometry: WindowGeometry,
    /// Title text
    pub title: String,
    /// Last applied state transition
    pub state: WindowState,
    /// Applied cursor
    pub cursor: CursorKind,
    /// OS decorations
    pub titlebar: bool,
}

impl HeadlessWindow {
    fn framebuffer(&self) -> (u32, u32) {
        match self.state {
            WindowState::Minimized => (0, 0),
            _ => (self.geometry.width, self.geometry.height),
        }
    }
}

/// Windowing backend with no OS behind it
pub struct HeadlessWindowing {
    windows: HashMap<u64, HeadlessWindow>,
    next_id: u64,
    events: VecDeque<NativeEvent>,
    displays: Vec<Display>,
    pacing: bool,
    fail_next_create: bool,
}

impl Default for HeadlessWindowing {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessWindowing {
    /// Create a backend with a single 1920x1080 primary display
    pub fn new() -> Self {
        Self::with_displays(vec![Display::new(true, 0, 0, 1920, 1080)])
    }

    /// Create a backend with an explicit display list (primary first)
    pub fn with_displays(displays: Vec<Display>) -> Self {
        Self {
            windows: HashMap::new(),
            next_id: 1,
            events: VecDeque::new(),
            displays,
            pacing: false,
            fail_next_create: false,
        }
    }

    /// Queue an event for the next poll
    pub fn push_event(&mut self, event: NativeEvent) {
        self.events.push_back(event);
    }

    /// Replace the display topology and announce the change
    pub fn set_displays(&mut self, displays: Vec<Display>) {
        self.displays = displays;
        self.events.push_back(NativeEvent::DisplaysChanged);
    }

    /// Pretend the platform is pacing frames
    pub fn set_pacing(&mut self, pacing: bool) {
        self.pacing = pacing;
    }

    /// Make the next `create_window` fail
    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    /// Simulate the user resizing a window
    pub fn user_resize(&mut self, window: NativeWindow, width: u32, height: u32) {
        if let Some(record) = self.windows.get_mut(&window.0) {
            record.geometry.width = width;
            record.geometry.height = height;
            self.events.push_back(NativeEvent::Resized { window, width, height });
        }
    }

    /// Inspect a window record
    pub fn window(&self, window: NativeWindow) -> Option<&HeadlessWindow> {
        self.windows.get(&window.0)
    }

    /// Number of open windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn record_mut(&mut self, window: NativeWindow) -> PlatformResult<&mut HeadlessWindow> {
        self.windows
            .get_mut(&window.0)
            .ok_or(PlatformError::UnknownWindow(window))
    }
}

impl NativeWindowing for HeadlessWindowing {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_window(&mut self, desc: &WindowDesc<'_>) -> PlatformResult<(NativeWindow, WindowGeometry)> {
        if std::mem::take(&mut self.fail_next_create) {
            return Err(PlatformError::CreationFailed("injected failure".to_string()));
        }

        let handle = NativeWindow(self.next_id);
        self.next_id += 1;
        self.windows.insert(
            handle.0,
            HeadlessWindow {
                geometry: desc.geometry,
                title: desc.title.to_string(),
                state: WindowState::Restored,
                cursor: CursorKind::Arrow,
                titlebar: desc.titlebar,
            },
        );
        Ok((handle, desc.geometry))
    }

    fn destroy_window(&mut self, window: NativeWindow) {
        self.windows.remove(&window.0);
        self.events.retain(|event| event_window(event) != Some(window));
    }

    fn set_geometry(&mut self, window: NativeWindow, geometry: WindowGeometry) -> PlatformResult<WindowGeometry> {
        let record = self.record_mut(window)?;
        record.geometry = geometry;
        Ok(geometry)
    }

    fn set_title(&mut self, window: NativeWindow, title: &str) -> PlatformResult<()> {
        self.record_mut(window)?.title = title.to_string();
        Ok(())
    }

    fn set_state(&mut self, window: NativeWindow, state: WindowState) -> PlatformResult<()> {
        let target = match state {
            WindowState::Fullscreen { display } => Some(
                self.displays
                    .get(display)
                    .ok_or_else(|| PlatformError::DisplayEnumeration(format!("no display {display}")))?
                    .geometry(),
            ),
            WindowState::Windowed(geometry) => Some(geometry),
            _ => None,
        };

        let record = self.record_mut(window)?;
        record.state = state;
        if let Some(geometry) = target {
            record.geometry = geometry;
        }
        Ok(())
    }

    fn set_cursor(&mut self, window: NativeWindow, cursor: CursorKind) -> PlatformResult<()> {
        self.record_mut(window)?.cursor = cursor;
        Ok(())
    }

    fn framebuffer_size(&self, window: NativeWindow) -> PlatformResult<(u32, u32)> {
        self.windows
            .get(&window.0)
            .map(HeadlessWindow::framebuffer)
            .ok_or(PlatformError::UnknownWindow(window))
    }

    fn poll_events(&mut self, out: &mut Vec<NativeEvent>) {
        out.extend(self.events.drain(..));
    }

    fn displays(&mut self) -> PlatformResult<Vec<Display>> {
        if self.displays.is_empty() {
            return Err(PlatformError::DisplayEnumeration("no displays attached".to_string()));
        }
        Ok(self.displays.clone())
    }

    fn is_pacing(&self) -> bool {
        self.pacing
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn event_window(event: &NativeEvent) -> Option<NativeWindow> {
    match event {
        NativeEvent::ButtonDown { window, .. }
        | NativeEvent::ButtonUp { window, .. }
        | NativeEvent::PointerMoved { window, .. }
        | NativeEvent::PointerLeft { window, .. }
        | NativeEvent::Scroll { window, .. }
        | NativeEvent::KeyDown { window, .. }
        | NativeEvent::KeyUp { window, .. }
        | NativeEvent::Resized { window, .. }
        | NativeEvent::Moved { window, .. }
        | NativeEvent::CloseRequested { window }
        | NativeEvent::Minimized { window, .. }
        | NativeEvent::Maximized { window, .. } => Some(*window),
        NativeEvent::DisplaysChanged => None,
    }
}
