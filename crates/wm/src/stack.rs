//! Window stacks
//!
//! A `WindowStack` is the window list of one display output. All of its
//! mutable layout lives in `StackState` behind a single lock; every window
//! operation takes the locked state, so holding the lock is enforced by
//! the signatures rather than by convention.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use fusion::ShmBlock;
use serde::Serialize;
use surface::FlipFlags;

use crate::core::WmCore;
use crate::core_surface::CoreSurface;
use crate::error::WmResult;
use crate::events::EventHub;
use crate::types::{
    CursorUpdateFlags, InputEvent, Rect, Region, StackId, WindowCaps, WindowConfig, WindowEvent, WindowId,
};

/// Stack cursor
#[derive(Debug, Clone, Default)]
pub struct CursorState {
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    pub hot_x: i32,
    pub hot_y: i32,
    pub opacity: u8,
    pub shape: Option<Arc<CoreSurface>>,
}

/// A window bound into another one at a fixed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub window: WindowId,
    pub x: i32,
    pub y: i32,
}

/// Per-window state kept in the stack
#[derive(Debug)]
pub struct WindowState {
    pub(crate) id: WindowId,
    pub(crate) caps: WindowCaps,
    pub(crate) config: WindowConfig,
    pub(crate) window_data: Option<ShmBlock>,
    pub(crate) surface: Option<Arc<CoreSurface>>,
    pub(crate) events: Arc<EventHub>,
    /// Windows bound to this one
    pub(crate) bound: Vec<Binding>,
    /// The window this one is bound to
    pub(crate) bound_to: Option<WindowId>,
}

impl WindowState {
    pub(crate) fn new(id: WindowId, caps: WindowCaps, config: WindowConfig, events: Arc<EventHub>) -> Self {
        Self {
            id,
            caps,
            config,
            window_data: None,
            surface: None,
            events,
            bound: Vec::new(),
            bound_to: None,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn caps(&self) -> WindowCaps {
        self.caps
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Backends apply configuration changes here
    pub fn config_mut(&mut self) -> &mut WindowConfig {
        &mut self.config
    }

    pub fn window_data(&self) -> Option<ShmBlock> {
        self.window_data
    }

    pub fn surface(&self) -> Option<&Arc<CoreSurface>> {
        self.surface.as_ref()
    }

    pub fn bound(&self) -> &[Binding] {
        &self.bound
    }

    pub fn bound_to(&self) -> Option<WindowId> {
        self.bound_to
    }
}

/// Everything the stack lock protects
#[derive(Debug)]
pub struct StackState {
    id: StackId,
    valid: bool,
    width: i32,
    height: i32,
    stack_data: Option<ShmBlock>,
    windows: BTreeMap<WindowId, WindowState>,
    cursor: CursorState,
}

impl StackState {
    fn new(id: StackId, width: i32, height: i32) -> Self {
        Self {
            id,
            valid: false,
            width,
            height,
            stack_data: None,
            windows: BTreeMap::new(),
            cursor: CursorState::default(),
        }
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    /// Initialized and not yet closed
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub(crate) fn set_size(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
    }

    pub fn stack_data(&self) -> Option<ShmBlock> {
        self.stack_data
    }

    pub(crate) fn set_stack_data(&mut self, block: Option<ShmBlock>) {
        self.stack_data = block;
    }

    pub fn window(&self, id: WindowId) -> Option<&WindowState> {
        self.windows.get(&id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut WindowState> {
        self.windows.get_mut(&id)
    }

    /// Windows in id order
    pub fn windows(&self) -> impl Iterator<Item = &WindowState> {
        self.windows.values()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub(crate) fn insert_window(&mut self, state: WindowState) {
        self.windows.insert(state.id, state);
    }

    pub(crate) fn remove_window_state(&mut self, id: WindowId) -> Option<WindowState> {
        self.windows.remove(&id)
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut CursorState {
        &mut self.cursor
    }

    /// Deliver an event to the listeners of its window
    pub fn post_event(&self, event: WindowEvent) {
        match self.windows.get(&event.window) {
            Some(window) => window.events.post(&event, window.config.events),
            None => tracing::trace!(window = %event.window, kind = ?event.kind, "event for unknown window dropped"),
        }
    }
}

/// The window list of one display output
pub struct WindowStack {
    id: StackId,
    core: Arc<WmCore>,
    state: Mutex<StackState>,
    context: Mutex<Weak<LayerContext>>,
}

impl std::fmt::Debug for WindowStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowStack").field("id", &self.id).finish_non_exhaustive()
    }
}

impl WindowStack {
    /// Create a stack and register it with the window manager
    pub fn create(core: &Arc<WmCore>, width: i32, height: i32) -> WmResult<Arc<Self>> {
        let id = core.session().next_stack_id();
        let stack = Arc::new(Self {
            id,
            core: core.clone(),
            state: Mutex::new(StackState::new(id, width, height)),
            context: Mutex::new(Weak::new()),
        });
        core.init_stack(&stack)?;
        tracing::info!(stack = id.0, width, height, "window stack created");
        Ok(stack)
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    pub fn core(&self) -> &Arc<WmCore> {
        &self.core
    }

    /// Acquire the stack lock
    pub fn lock(&self) -> MutexGuard<'_, StackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> Option<Arc<LayerContext>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner).upgrade()
    }

    fn set_context(&self, context: &Arc<LayerContext>) {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(context);
    }

    /// Sever the link to the owning context, in both directions
    pub(crate) fn detach_context(&self) {
        let context = std::mem::take(&mut *self.context.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(context) = context.upgrade() {
            context.clear_stack(self.id);
        }
    }

    /// Close the stack; `final_close` frees its shared block
    pub fn close(self: &Arc<Self>, final_close: bool) -> WmResult<()> {
        self.detach_context();
        self.core.close_stack(self, final_close)
    }

    pub fn resize(&self, width: i32, height: i32) -> WmResult<()> {
        let mut state = self.lock();
        state.set_size(width, height);
        self.core.resize_stack(&mut state, width, height)
    }

    pub fn set_active(&self, active: bool) -> WmResult<()> {
        let mut state = self.lock();
        self.core.set_active(&mut state, active)
    }

    pub fn process_input(&self, event: &InputEvent) -> WmResult<()> {
        let mut state = self.lock();
        self.core.process_input(&mut state, event)
    }

    pub fn flush_keys(&self) -> WmResult<()> {
        let mut state = self.lock();
        self.core.flush_keys(&mut state)
    }

    pub fn window_at(&self, x: i32, y: i32) -> WmResult<Option<WindowId>> {
        let mut state = self.lock();
        self.core.window_at(&mut state, x, y)
    }

    /// Window ids from top to bottom
    pub fn windows(&self) -> WmResult<Vec<WindowId>> {
        let mut state = self.lock();
        let mut ids = Vec::new();
        self.core.enum_windows(&mut state, &mut |id| {
            ids.push(id);
            true
        })?;
        Ok(ids)
    }

    /// Mark a region of the stack for redraw
    pub fn update(&self, region: Option<Region>, flags: FlipFlags) -> WmResult<()> {
        let mut state = self.lock();
        self.core.update_stack(&mut state, region, flags)
    }

    pub fn cursor_enable(&self, enable: bool) -> WmResult<()> {
        let mut state = self.lock();
        if state.cursor.enabled == enable {
            return Ok(());
        }
        state.cursor.enabled = enable;
        let flags = if enable {
            CursorUpdateFlags::ENABLE
        } else {
            CursorUpdateFlags::DISABLE
        };
        self.core.update_cursor(&mut state, flags)
    }

    pub fn cursor_set_shape(&self, shape: Option<Arc<CoreSurface>>, hot_x: i32, hot_y: i32) -> WmResult<()> {
        let mut state = self.lock();
        Self::set_shape_locked(&self.core, &mut state, shape, hot_x, hot_y)
    }

    pub(crate) fn set_shape_locked(
        core: &WmCore,
        state: &mut StackState,
        shape: Option<Arc<CoreSurface>>,
        hot_x: i32,
        hot_y: i32,
    ) -> WmResult<()> {
        let mut flags = CursorUpdateFlags::SHAPE;
        if let Some(shape) = &shape {
            let (w, h) = shape.size();
            let old = state.cursor.shape.as_ref().map(|s| s.size());
            if old != Some((w, h)) {
                flags |= CursorUpdateFlags::SIZE;
            }
        }
        state.cursor.shape = shape;
        state.cursor.hot_x = hot_x;
        state.cursor.hot_y = hot_y;
        core.update_cursor(state, flags)
    }

    pub fn cursor_set_opacity(&self, opacity: u8) -> WmResult<()> {
        let mut state = self.lock();
        Self::set_opacity_locked(&self.core, &mut state, opacity)
    }

    pub(crate) fn set_opacity_locked(core: &WmCore, state: &mut StackState, opacity: u8) -> WmResult<()> {
        if state.cursor.opacity == opacity {
            return Ok(());
        }
        state.cursor.opacity = opacity;
        core.update_cursor(state, CursorUpdateFlags::OPACITY)
    }

    /// Move the cursor, clamped to the stack area
    pub fn cursor_warp(&self, x: i32, y: i32) -> WmResult<()> {
        let mut state = self.lock();
        let (width, height) = state.size();
        let x = x.clamp(0, (width - 1).max(0));
        let y = y.clamp(0, (height - 1).max(0));
        if (state.cursor.x, state.cursor.y) == (x, y) {
            return Ok(());
        }
        state.cursor.x = x;
        state.cursor.y = y;
        self.core.update_cursor(&mut state, CursorUpdateFlags::POSITION)
    }

    /// Internal bounds of a window, for diagnostics
    pub fn bounds_of(&self, window: WindowId) -> Option<Rect> {
        self.lock().window(window).map(|w| w.config.bounds)
    }
}

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// A display layer context, owning at most one stack
pub struct LayerContext {
    id: u32,
    stack: Mutex<Option<Arc<WindowStack>>>,
}

impl std::fmt::Debug for LayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerContext")
            .field("id", &self.id)
            .field("stack", &self.stack().map(|s| s.id()))
            .finish()
    }
}

impl LayerContext {
    /// A context with a fresh stack of the given size
    pub fn create(core: &Arc<WmCore>, width: i32, height: i32) -> WmResult<Arc<Self>> {
        let stack = WindowStack::create(core, width, height)?;
        let context = Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            stack: Mutex::new(Some(stack.clone())),
        });
        stack.set_context(&context);
        Ok(context)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The stack, unless it was closed
    pub fn stack(&self) -> Option<Arc<WindowStack>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn clear_stack(&self, id: StackId) {
        let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
        if stack.as_ref().is_some_and(|s| s.id() == id) {
            *stack = None;
        }
    }
}
