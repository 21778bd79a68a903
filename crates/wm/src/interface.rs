//! Client-facing interfaces
//!
//! Applications talk to windows and surfaces through reference counted
//! handles. An `IWindow` holds one reference on its window and listens to
//! every event the window posts: enter and leave decide whether its cursor
//! shape is pushed to the stack, focus changes update the session's
//! application focus flag, and `DESTROYED` turns the handle permanently
//! into one that answers `Destroyed`.
//!
//! Client geometry excludes the insets the window manager adds.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use surface::{BufferLock, PixelFormat, PoolRegistry, ResourceId, SurfaceConfig, SurfaceTypes};

use crate::core::WmCore;
use crate::core_surface::CoreSurface;
use crate::error::{WmError, WmResult};
use crate::events::{EventBuffer, SubscriptionId};
use crate::session::Session;
use crate::stack::{LayerContext, WindowStack};
use crate::types::{
    Grab, Insets, KeySelection, PropertyValue, Rect, Region, StackingClass, WindowCaps, WindowDescription,
    WindowEvent, WindowEventType, WindowGeometry, WindowId, WindowOptions,
};
use crate::window::Window;

/// Largest window or surface edge a client may request
pub const MAX_WINDOW_SIZE: i32 = 4096;

fn check_size(width: i32, height: i32) -> WmResult<()> {
    let range = 1..=MAX_WINDOW_SIZE;
    if !range.contains(&width) || !range.contains(&height) {
        return Err(WmError::invalid(format!("size {width}x{height} out of range")));
    }
    Ok(())
}

fn out_of_range() -> WmError {
    WmError::invalid("window geometry out of range")
}

/// One application's view of a layer context
pub struct ClientSession {
    core: Arc<WmCore>,
    context: Arc<LayerContext>,
    pools: Arc<PoolRegistry>,
    app_focus: Arc<AtomicBool>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("context", &self.context)
            .field("app_focus", &self.has_app_focus())
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    pub fn new(session: &Session, context: Arc<LayerContext>) -> Self {
        Self {
            core: session.core().clone(),
            context,
            pools: session.shared().pools().clone(),
            app_focus: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &Arc<LayerContext> {
        &self.context
    }

    pub fn core(&self) -> &Arc<WmCore> {
        &self.core
    }

    /// Whether one of this application's windows has the focus
    pub fn has_app_focus(&self) -> bool {
        self.app_focus.load(Ordering::Acquire)
    }

    pub fn create_window(&self, desc: &WindowDescription) -> WmResult<Arc<IWindow>> {
        if desc.width > MAX_WINDOW_SIZE || desc.height > MAX_WINDOW_SIZE {
            return Err(WmError::LimitExceeded(format!(
                "window size {}x{} above {MAX_WINDOW_SIZE}",
                desc.width, desc.height
            )));
        }
        let stack = self.context.stack().ok_or(WmError::Destroyed)?;
        let window = Window::create(&stack, desc)?;
        match IWindow::new(window.clone(), self.app_focus.clone()) {
            Ok(iface) => Ok(iface),
            Err(e) => {
                window.unref();
                Err(e)
            }
        }
    }

    /// A standalone surface, from the named pool or a negotiated one
    pub fn create_surface(&self, pool: Option<&str>, config: SurfaceConfig) -> WmResult<Arc<ISurface>> {
        let surface = match pool {
            Some(name) => {
                let (id, _) = self
                    .pools
                    .pool_by_name(name)
                    .ok_or_else(|| WmError::ItemNotFound(format!("surface pool {name:?}")))?;
                CoreSurface::new_in_pool(&self.pools, id, config, SurfaceTypes::INTERNAL)?
            }
            None => CoreSurface::new(&self.pools, config, SurfaceTypes::INTERNAL, ResourceId::NONE)?,
        };
        Ok(ISurface::new(surface))
    }

    pub fn create_event_buffer(&self) -> Arc<EventBuffer> {
        EventBuffer::new()
    }
}

/// Client handle of a surface
pub struct ISurface {
    refs: AtomicU32,
    surface: Mutex<Option<Arc<CoreSurface>>>,
}

impl std::fmt::Debug for ISurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ISurface")
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ISurface {
    pub fn new(surface: Arc<CoreSurface>) -> Arc<Self> {
        Arc::new(Self {
            refs: AtomicU32::new(1),
            surface: Mutex::new(Some(surface)),
        })
    }

    /// The surface, unless the handle was released
    pub fn core(&self) -> WmResult<Arc<CoreSurface>> {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WmError::Destroyed)
    }

    pub fn add_ref(&self) -> WmResult<()> {
        let surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if surface.is_none() {
            return Err(WmError::Destroyed);
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn release(&self) -> WmResult<()> {
        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if surface.is_none() {
            return Err(WmError::Destroyed);
        }
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            *surface = None;
        }
        Ok(())
    }

    pub fn size(&self) -> WmResult<(u32, u32)> {
        Ok(self.core()?.size())
    }

    pub fn format(&self) -> WmResult<PixelFormat> {
        Ok(self.core()?.format())
    }

    /// Lock the first buffer for CPU access
    pub fn lock(&self) -> WmResult<BufferLock> {
        self.lock_buffer(0)
    }

    pub fn lock_buffer(&self, index: usize) -> WmResult<BufferLock> {
        self.core()?.lock(index)
    }

    pub fn unlock(&self, lock: &BufferLock) -> WmResult<()> {
        self.unlock_buffer(0, lock)
    }

    pub fn unlock_buffer(&self, index: usize, lock: &BufferLock) -> WmResult<()> {
        self.core()?.unlock(index, lock)
    }
}

struct CursorShape {
    surface: Arc<ISurface>,
    hot_x: i32,
    hot_y: i32,
}

struct IWindowInner {
    released: bool,
    destroyed: bool,
    /// The event subscription is gone
    detached: bool,
    /// The pointer is inside the window
    entered: bool,
    reaction: SubscriptionId,
    events: Receiver<WindowEvent>,
    surface: Option<Arc<ISurface>>,
    cursor: Option<CursorShape>,
}

/// Client handle of a window
pub struct IWindow {
    window: Arc<Window>,
    refs: AtomicU32,
    app_focus: Arc<AtomicBool>,
    inner: Mutex<IWindowInner>,
}

impl std::fmt::Debug for IWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IWindow")
            .field("window", &self.window)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl IWindow {
    /// Wrap `window`, taking over the caller's reference
    pub fn new(window: Arc<Window>, app_focus: Arc<AtomicBool>) -> WmResult<Arc<Self>> {
        let (sink, events) = mpsc::channel();
        let reaction = window.attach_events(sink, false)?;
        Ok(Arc::new(Self {
            window,
            refs: AtomicU32::new(1),
            app_focus,
            inner: Mutex::new(IWindowInner {
                released: false,
                destroyed: false,
                detached: false,
                entered: false,
                reaction,
                events,
                surface: None,
                cursor: None,
            }),
        }))
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn stack(&self) -> &Arc<WindowStack> {
        self.window.stack()
    }

    /// Process pending window events, then fail unless the handle is usable
    fn enter(&self) -> WmResult<MutexGuard<'_, IWindowInner>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.released {
            return Err(WmError::Destroyed);
        }
        let pending: Vec<WindowEvent> = inner.events.try_iter().collect();
        for event in pending {
            self.react(&mut inner, &event);
        }
        if inner.destroyed {
            return Err(WmError::Destroyed);
        }
        Ok(inner)
    }

    fn react(&self, inner: &mut IWindowInner, event: &WindowEvent) {
        let kind = event.kind;
        if kind.contains(WindowEventType::DESTROYED) {
            inner.destroyed = true;
            if !inner.detached {
                self.window.detach_events(inner.reaction);
                inner.detached = true;
            }
            return;
        }
        if kind.contains(WindowEventType::ENTER) {
            inner.entered = true;
            if let Some(cursor) = &inner.cursor {
                self.push_cursor(cursor);
            }
        }
        if kind.contains(WindowEventType::LEAVE) {
            inner.entered = false;
        }
        if kind.contains(WindowEventType::GOTFOCUS) {
            self.app_focus.store(true, Ordering::Release);
        }
        if kind.contains(WindowEventType::LOSTFOCUS) {
            self.app_focus.store(false, Ordering::Release);
        }
    }

    fn push_cursor(&self, cursor: &CursorShape) {
        let Ok(shape) = cursor.surface.core() else {
            return;
        };
        let core = self.stack().core().clone();
        let mut state = self.stack().lock();
        if !state.is_valid() {
            return;
        }
        let result = WindowStack::set_shape_locked(&core, &mut state, Some(shape), cursor.hot_x, cursor.hot_y)
            .and_then(|()| WindowStack::set_opacity_locked(&core, &mut state, 0xff));
        if let Err(e) = result {
            tracing::warn!(window = %self.window.id(), error = %e, "failed to update cursor shape");
        }
    }

    /// Run `f` on the window with the stack locked
    fn with_window<R>(
        &self,
        f: impl FnOnce(&Window, &mut crate::stack::StackState) -> WmResult<R>,
    ) -> WmResult<R> {
        let _inner = self.enter()?;
        let mut state = self.stack().lock();
        f(&self.window, &mut *state)
    }

    fn insets(&self, state: &mut crate::stack::StackState) -> WmResult<Insets> {
        self.window.insets(state)
    }

    // ========== Lifetime ==========

    pub fn add_ref(&self) -> WmResult<()> {
        let _inner = self.enter()?;
        self.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one reference; the last one releases the window
    pub fn release(&self) -> WmResult<()> {
        let (surface, cursor) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.released {
                return Err(WmError::Destroyed);
            }
            if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
                return Ok(());
            }
            inner.released = true;
            if !inner.detached {
                self.window.detach_events(inner.reaction);
                inner.detached = true;
            }
            (inner.surface.take(), inner.cursor.take())
        };

        self.window.unref();
        let surface = surface.map_or(Ok(()), |surface| surface.release());
        let cursor = cursor.map_or(Ok(()), |cursor| cursor.surface.release());
        surface.and(cursor)
    }

    pub fn destroy(&self) -> WmResult<()> {
        self.with_window(|window, state| {
            let options = window.config(state)?.options;
            if options.contains(WindowOptions::INDESTRUCTIBLE) {
                return Err(WmError::Unsupported("window is indestructible".into()));
            }
            window.destroy(state);
            Ok(())
        })
    }

    /// Ask the application to close the window
    pub fn close(&self) -> WmResult<()> {
        self.with_window(|window, state| window.post_event(state, WindowEvent::new(WindowEventType::CLOSE, window.id())))
    }

    // ========== Events ==========

    pub fn create_event_buffer(&self) -> WmResult<Arc<EventBuffer>> {
        let _inner = self.enter()?;
        let buffer = EventBuffer::new();
        buffer.attach(&self.window)?;
        Ok(buffer)
    }

    pub fn attach_event_buffer(&self, buffer: &EventBuffer) -> WmResult<()> {
        let _inner = self.enter()?;
        buffer.attach(&self.window)
    }

    pub fn detach_event_buffer(&self, buffer: &EventBuffer) -> WmResult<()> {
        let _inner = self.enter()?;
        buffer.detach(&self.window)
    }

    pub fn enable_events(&self, mask: WindowEventType) -> WmResult<()> {
        if !WindowEventType::ALL.contains(mask) {
            return Err(WmError::invalid(format!("unknown event types {:#x}", mask.bits())));
        }
        self.with_window(|window, state| {
            let events = window.config(state)?.events | mask;
            window.set_events(state, events)
        })
    }

    pub fn disable_events(&self, mask: WindowEventType) -> WmResult<()> {
        if !WindowEventType::ALL.contains(mask) {
            return Err(WmError::invalid(format!("unknown event types {:#x}", mask.bits())));
        }
        self.with_window(|window, state| {
            let events = window.config(state)?.events - mask;
            window.set_events(state, events)
        })
    }

    /// Post a synthetic event to the window
    pub fn post_event(&self, event: WindowEvent) -> WmResult<()> {
        self.with_window(|window, state| window.post_event(state, event))
    }

    // ========== Queries ==========

    pub fn id(&self) -> WmResult<WindowId> {
        let _inner = self.enter()?;
        Ok(self.window.id())
    }

    pub fn position(&self) -> WmResult<(i32, i32)> {
        self.with_window(|window, state| {
            let bounds = window.config(state)?.bounds;
            let insets = self.insets(state)?;
            Ok((bounds.x - insets.l, bounds.y - insets.t))
        })
    }

    pub fn size(&self) -> WmResult<(i32, i32)> {
        self.with_window(|window, state| {
            let bounds = window.config(state)?.bounds;
            let insets = self.insets(state)?;
            Ok((bounds.w - insets.l - insets.r, bounds.h - insets.t - insets.b))
        })
    }

    pub fn options(&self) -> WmResult<WindowOptions> {
        self.with_window(|window, state| Ok(window.config(state)?.options))
    }

    pub fn opacity(&self) -> WmResult<u8> {
        self.with_window(|window, state| Ok(window.config(state)?.opacity))
    }

    /// The window surface; input-only windows have none
    pub fn surface(&self) -> WmResult<Arc<ISurface>> {
        let mut inner = self.enter()?;
        if self.window.caps().contains(WindowCaps::INPUTONLY) {
            return Err(WmError::Unsupported("input-only window has no surface".into()));
        }
        if inner.surface.is_none() {
            let state = self.stack().lock();
            let surface = self
                .window
                .surface(&state)?
                .ok_or_else(|| WmError::Unsupported("window has no surface".into()))?;
            inner.surface = Some(ISurface::new(surface));
        }
        let Some(surface) = inner.surface.clone() else {
            return Err(WmError::Destroyed);
        };
        surface.add_ref()?;
        Ok(surface)
    }

    // ========== Properties ==========

    pub fn set_property(&self, key: &str, value: impl Into<PropertyValue>) -> WmResult<Option<PropertyValue>> {
        let value = value.into();
        self.with_window(|window, state| window.set_property(state, key, value))
    }

    pub fn property(&self, key: &str) -> WmResult<PropertyValue> {
        self.with_window(|window, state| window.property(state, key))
    }

    pub fn remove_property(&self, key: &str) -> WmResult<PropertyValue> {
        self.with_window(|window, state| window.remove_property(state, key))
    }

    // ========== Appearance ==========

    /// Alpha-channel blending needs the alpha-channel capability and is
    /// dropped otherwise
    pub fn set_options(&self, options: WindowOptions) -> WmResult<()> {
        let mut options = options;
        if !self.window.caps().contains(WindowCaps::ALPHACHANNEL) {
            options.remove(WindowOptions::ALPHACHANNEL);
        }
        self.with_window(|window, state| window.set_options(state, options))
    }

    fn keyed_format(&self, window: &Window, state: &crate::stack::StackState) -> WmResult<PixelFormat> {
        if window.caps().contains(WindowCaps::INPUTONLY) {
            return Err(WmError::Unsupported("input-only window has no color key".into()));
        }
        let surface = window
            .surface(state)?
            .ok_or_else(|| WmError::Unsupported("window has no surface".into()))?;
        Ok(surface.format())
    }

    pub fn set_color_key(&self, r: u8, g: u8, b: u8) -> WmResult<()> {
        self.with_window(|window, state| {
            let format = self.keyed_format(window, state)?;
            if format.is_indexed() {
                return Err(WmError::Unsupported(format!("color key on {}", format.name())));
            }
            window.set_color_key(state, format.pack_rgb(r, g, b))
        })
    }

    pub fn set_color_key_index(&self, index: u32) -> WmResult<()> {
        self.with_window(|window, state| {
            self.keyed_format(window, state)?;
            window.set_color_key(state, index)
        })
    }

    pub fn set_opaque_region(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> WmResult<()> {
        let region = Region::new(x1, y1, x2, y2);
        if !region.is_valid() {
            return Err(WmError::invalid(format!("inverted opaque region {region:?}")));
        }
        self.with_window(|window, state| window.set_opaque_region(state, region))
    }

    pub fn set_opacity(&self, opacity: u8) -> WmResult<()> {
        self.with_window(|window, state| window.set_opacity(state, opacity))
    }

    /// Shape shown while the pointer is inside the window
    pub fn set_cursor_shape(&self, shape: Option<&Arc<ISurface>>, hot_x: i32, hot_y: i32) -> WmResult<()> {
        let mut inner = self.enter()?;
        let previous = inner.cursor.take();

        if let Some(shape) = shape {
            shape.add_ref()?;
            let cursor = CursorShape {
                surface: shape.clone(),
                hot_x,
                hot_y,
            };
            if inner.entered {
                self.push_cursor(&cursor);
            }
            inner.cursor = Some(cursor);
        }
        drop(inner);

        if let Some(previous) = previous {
            previous.surface.release()?;
        }
        Ok(())
    }

    pub fn set_src_geometry(&self, geometry: WindowGeometry) -> WmResult<()> {
        geometry.validate()?;
        self.with_window(|window, state| window.set_src_geometry(state, geometry))
    }

    pub fn set_dst_geometry(&self, geometry: WindowGeometry) -> WmResult<()> {
        geometry.validate()?;
        self.with_window(|window, state| window.set_dst_geometry(state, geometry))
    }

    /// Degrees, normalized into `[0, 360)`
    pub fn set_rotation(&self, degrees: i32) -> WmResult<()> {
        self.with_window(|window, state| window.set_rotation(state, degrees.rem_euclid(360)))
    }

    // ========== Input ==========

    /// Ghost windows and invisible windows that draw something never get
    /// the focus
    pub fn request_focus(&self) -> WmResult<()> {
        self.with_window(|window, state| {
            let config = window.config(state)?;
            if config.options.contains(WindowOptions::GHOST) {
                return Err(WmError::Unsupported("ghost window cannot take focus".into()));
            }
            if config.opacity == 0 && !window.caps().contains(WindowCaps::INPUTONLY) {
                return Err(WmError::Unsupported("invisible window cannot take focus".into()));
            }
            window.request_focus(state)
        })
    }

    pub fn grab_keyboard(&self) -> WmResult<()> {
        self.with_window(|window, state| window.grab(state, Grab::Keyboard))
    }

    pub fn ungrab_keyboard(&self) -> WmResult<()> {
        self.with_window(|window, state| window.ungrab(state, Grab::Keyboard))
    }

    pub fn grab_pointer(&self) -> WmResult<()> {
        self.with_window(|window, state| window.grab(state, Grab::Pointer))
    }

    pub fn ungrab_pointer(&self) -> WmResult<()> {
        self.with_window(|window, state| window.ungrab(state, Grab::Pointer))
    }

    pub fn grab_key(&self, symbol: u32, modifiers: u32) -> WmResult<()> {
        self.with_window(|window, state| window.grab(state, Grab::Key { symbol, modifiers }))
    }

    pub fn ungrab_key(&self, symbol: u32, modifiers: u32) -> WmResult<()> {
        self.with_window(|window, state| window.ungrab(state, Grab::Key { symbol, modifiers }))
    }

    pub fn grab_unselected_keys(&self) -> WmResult<()> {
        self.with_window(|window, state| window.grab(state, Grab::UnselectedKeys))
    }

    pub fn ungrab_unselected_keys(&self) -> WmResult<()> {
        self.with_window(|window, state| window.ungrab(state, Grab::UnselectedKeys))
    }

    pub fn set_key_selection(&self, selection: KeySelection) -> WmResult<()> {
        if matches!(&selection, KeySelection::List(keys) if keys.is_empty()) {
            return Err(WmError::invalid("empty key selection list"));
        }
        self.with_window(|window, state| window.set_key_selection(state, selection))
    }

    // ========== Geometry ==========

    pub fn move_by(&self, dx: i32, dy: i32) -> WmResult<()> {
        if (dx, dy) == (0, 0) {
            let _inner = self.enter()?;
            return Ok(());
        }
        self.with_window(|window, state| window.move_by(state, dx, dy))
    }

    pub fn move_to(&self, x: i32, y: i32) -> WmResult<()> {
        self.with_window(|window, state| {
            let (x, y) = self.insets(state)?.outer_origin(x, y).ok_or_else(out_of_range)?;
            window.move_to(state, x, y)
        })
    }

    pub fn resize(&self, width: i32, height: i32) -> WmResult<()> {
        check_size(width, height)?;
        self.with_window(|window, state| {
            let outer = self
                .insets(state)?
                .outer(Rect::new(0, 0, width, height))
                .ok_or_else(out_of_range)?;
            window.resize(state, outer.w, outer.h)
        })
    }

    pub fn set_bounds(&self, x: i32, y: i32, width: i32, height: i32) -> WmResult<()> {
        check_size(width, height)?;
        self.with_window(|window, state| {
            let bounds = self
                .insets(state)?
                .outer(Rect::new(x, y, width, height))
                .ok_or_else(out_of_range)?;
            window.set_bounds(state, bounds)
        })
    }

    /// Reallocate the surface without changing the window bounds
    pub fn resize_surface(&self, width: i32, height: i32) -> WmResult<()> {
        check_size(width, height)?;
        if self.window.caps().contains(WindowCaps::INPUTONLY) {
            return Err(WmError::Unsupported("input-only window has no surface".into()));
        }
        self.with_window(|window, state| window.resize_surface(state, width, height))
    }

    // ========== Stacking ==========

    pub fn set_stacking_class(&self, stacking: StackingClass) -> WmResult<()> {
        self.with_window(|window, state| window.set_stacking_class(state, stacking))
    }

    pub fn raise(&self) -> WmResult<()> {
        self.with_window(|window, state| window.raise(state))
    }

    pub fn lower(&self) -> WmResult<()> {
        self.with_window(|window, state| window.lower(state))
    }

    pub fn raise_to_top(&self) -> WmResult<()> {
        self.with_window(|window, state| window.raise_to_top(state))
    }

    pub fn lower_to_bottom(&self) -> WmResult<()> {
        self.with_window(|window, state| window.lower_to_bottom(state))
    }

    pub fn put_atop(&self, lower: &IWindow) -> WmResult<()> {
        lower.check_alive()?;
        self.with_window(|window, state| window.put_atop(state, &lower.window))
    }

    pub fn put_below(&self, upper: &IWindow) -> WmResult<()> {
        upper.check_alive()?;
        self.with_window(|window, state| window.put_below(state, &upper.window))
    }

    // ========== Binding ==========

    /// Keep `source` at `(x, y)` relative to this window
    pub fn bind(&self, source: &IWindow, x: i32, y: i32) -> WmResult<()> {
        source.check_alive()?;
        self.with_window(|window, state| window.bind(state, &source.window, x, y))
    }

    pub fn unbind(&self, source: &IWindow) -> WmResult<()> {
        source.check_alive()?;
        self.with_window(|window, state| window.unbind(state, &source.window))
    }

    fn check_alive(&self) -> WmResult<()> {
        self.enter().map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::module::ModuleRegistry;

    fn client() -> (Session, ClientSession) {
        let session =
            Session::create(0, Config::default(), Arc::new(PoolRegistry::new()), ModuleRegistry::builtin()).unwrap();
        let context = session.create_context(640, 480).unwrap();
        let client = ClientSession::new(&session, context);
        (session, client)
    }

    fn input_only(client: &ClientSession) -> Arc<IWindow> {
        client
            .create_window(&WindowDescription::new(10, 20, 100, 50).with_caps(WindowCaps::INPUTONLY))
            .unwrap()
    }

    #[test]
    fn oversized_window_is_refused() {
        let (_session, client) = client();
        let result = client.create_window(&WindowDescription::new(0, 0, 5000, 10));
        assert!(matches!(result, Err(WmError::LimitExceeded(_))));
    }

    #[test]
    fn resize_bounds_are_checked() {
        let (_session, client) = client();
        let window = input_only(&client);
        assert!(matches!(window.resize(0, 10), Err(WmError::InvalidArgument(_))));
        assert!(matches!(window.resize(10, 4097), Err(WmError::InvalidArgument(_))));
        window.resize(4096, 1).unwrap();
        assert_eq!(window.size().unwrap(), (4096, 1));
    }

    #[test]
    fn input_only_window_has_no_surface() {
        let (_session, client) = client();
        let window = input_only(&client);
        assert!(matches!(window.surface(), Err(WmError::Unsupported(_))));
        assert!(matches!(window.set_color_key(1, 2, 3), Err(WmError::Unsupported(_))));
    }

    #[test]
    fn ghost_window_cannot_take_focus() {
        let (_session, client) = client();
        let window = input_only(&client);
        window.set_options(WindowOptions::GHOST).unwrap();
        assert!(matches!(window.request_focus(), Err(WmError::Unsupported(_))));
    }

    #[test]
    fn alpha_option_needs_alpha_cap() {
        let (_session, client) = client();
        let window = input_only(&client);
        window
            .set_options(WindowOptions::ALPHACHANNEL | WindowOptions::KEEP_SIZE)
            .unwrap();
        assert_eq!(window.options().unwrap(), WindowOptions::KEEP_SIZE);
    }

    #[test]
    fn unknown_event_bits_are_refused() {
        let (_session, client) = client();
        let window = input_only(&client);
        let bogus = WindowEventType::from_bits_retain(0x8000_0000);
        assert!(matches!(window.enable_events(bogus), Err(WmError::InvalidArgument(_))));
        window.disable_events(WindowEventType::MOTION).unwrap();
    }

    #[test]
    fn destroyed_handle_stays_destroyed() {
        let (_session, client) = client();
        let window = input_only(&client);
        window.destroy().unwrap();
        assert_eq!(window.position(), Err(WmError::Destroyed));
        assert_eq!(window.set_opacity(3), Err(WmError::Destroyed));
        window.release().unwrap();
    }

    #[test]
    fn release_after_last_ref_fails() {
        let (_session, client) = client();
        let window = input_only(&client);
        window.add_ref().unwrap();
        window.release().unwrap();
        assert!(!window.window().is_destroyed());
        window.release().unwrap();
        assert!(window.window().is_destroyed());
        assert_eq!(window.release(), Err(WmError::Destroyed));
    }

    #[test]
    fn focus_flag_follows_window_focus() {
        let (_session, client) = client();
        let window = input_only(&client);
        window.request_focus().unwrap();
        // Already focused on creation, so no event; move focus away and back
        let other = input_only(&client);
        other.request_focus().unwrap();
        window.request_focus().unwrap();
        window.id().unwrap();
        assert!(client.has_app_focus());
    }
}
