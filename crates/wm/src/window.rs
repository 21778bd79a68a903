//! Shared window objects
//!
//! A `Window` is a handle to one window of a stack. Its layout lives in the
//! stack (`WindowState`); every operation takes the locked `StackState`
//! and forwards changes through the window manager core. The reference
//! count here is the session-wide one: client interfaces and event buffers
//! each hold one, and the window is destroyed when the last goes away.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use surface::{FlipFlags, ResourceId, SurfaceCaps, SurfaceConfig, SurfaceTypes};

use crate::core::WmCore;
use crate::core_surface::CoreSurface;
use crate::error::{WmError, WmResult};
use crate::events::{EventHub, SubscriptionId};
use crate::stack::{Binding, StackState, WindowStack, WindowState};
use crate::types::{
    ConfigFlags, Grab, Insets, KeySelection, PropertyValue, Rect, Region, Restack, StackingClass, WindowCaps,
    WindowConfig, WindowDescription, WindowEvent, WindowEventType, WindowGeometry, WindowId, WindowOptions,
};

pub struct Window {
    id: WindowId,
    caps: WindowCaps,
    stack: Arc<WindowStack>,
    events: Arc<EventHub>,
    refs: AtomicU32,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("stack", &self.stack.id())
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn client_size(bounds: &Rect, insets: &Insets) -> (i32, i32) {
    (bounds.w - insets.l - insets.r, bounds.h - insets.t - insets.b)
}

impl Window {
    /// Create a window in `stack`
    ///
    /// The description is in client coordinates; the stored bounds add the
    /// insets the backend reports for the new window. The caller owns the
    /// initial reference.
    pub fn create(stack: &Arc<WindowStack>, desc: &WindowDescription) -> WmResult<Arc<Window>> {
        if desc.width < 1 || desc.height < 1 {
            return Err(WmError::invalid(format!("window size {}x{}", desc.width, desc.height)));
        }

        let core = stack.core().clone();
        let mut state = stack.lock();
        if !state.is_valid() {
            return Err(WmError::Destroyed);
        }

        let id = core.session().next_window_id();
        let events = Arc::new(EventHub::new());
        let config = WindowConfig {
            bounds: Rect::new(desc.x, desc.y, desc.width, desc.height),
            options: desc.options,
            stacking: desc.stacking,
            ..WindowConfig::default()
        };
        state.insert_window(WindowState::new(id, desc.caps, config, events.clone()));

        if let Err(e) = Self::install(&core, &mut state, id, desc) {
            tracing::debug!(window = %id, error = %e, "window creation failed");
            core.discard_window_data(&mut state, id);
            state.remove_window_state(id);
            return Err(e);
        }

        let bounds = state.window(id).map(|w| w.config.bounds).unwrap_or_default();
        state.post_event(WindowEvent {
            kind: WindowEventType::POSITION | WindowEventType::SIZE,
            x: bounds.x,
            y: bounds.y,
            w: bounds.w,
            h: bounds.h,
            ..WindowEvent::new(WindowEventType::POSITION, id)
        });

        tracing::debug!(window = %id, stack = stack.id().0, ?bounds, "window created");
        Ok(Arc::new(Window {
            id,
            caps: desc.caps,
            stack: stack.clone(),
            events,
            refs: AtomicU32::new(1),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// The backend sees the window only once its bounds and surface exist
    fn install(core: &WmCore, state: &mut StackState, id: WindowId, desc: &WindowDescription) -> WmResult<()> {
        let insets = core.get_insets(state, id)?;
        let bounds = insets
            .outer(Rect::new(desc.x, desc.y, desc.width, desc.height))
            .ok_or_else(|| WmError::invalid("window geometry out of range"))?;

        let surface = if desc.caps.contains(WindowCaps::INPUTONLY) {
            None
        } else {
            let mut caps = desc.surface_caps;
            if desc.caps.contains(WindowCaps::DOUBLEBUFFER) {
                caps |= SurfaceCaps::DOUBLE;
            }
            let format = desc.pixel_format.unwrap_or(core.session().pixel_format());
            let config = SurfaceConfig::new(desc.width as u32, desc.height as u32, format).with_caps(caps);
            Some(CoreSurface::new(core.session().pools(), config, SurfaceTypes::WINDOW, ResourceId::NONE)?)
        };

        if let Some(window) = state.window_mut(id) {
            window.config.bounds = bounds;
            window.surface = surface;
        }

        core.preconfigure_window(state, id)?;
        core.add_window(state, id)
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn caps(&self) -> WindowCaps {
        self.caps
    }

    pub fn stack(&self) -> &Arc<WindowStack> {
        &self.stack
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    fn core(&self) -> &WmCore {
        self.stack.core()
    }

    /// The window's state, if it is still alive in a usable stack
    fn state<'a>(&self, stack: &'a StackState) -> WmResult<&'a WindowState> {
        assert_eq!(stack.id(), self.stack.id(), "window {} used with a foreign stack", self.id);
        if self.is_destroyed() || !stack.is_valid() {
            return Err(WmError::Destroyed);
        }
        stack.window(self.id).ok_or(WmError::Destroyed)
    }

    fn configure(
        &self,
        stack: &mut StackState,
        flags: ConfigFlags,
        edit: impl FnOnce(&mut WindowConfig),
    ) -> WmResult<()> {
        let mut change = self.state(stack)?.config.clone();
        edit(&mut change);
        self.core().set_window_config(stack, self.id, &change, flags)
    }

    // ========== Configuration ==========

    pub fn config(&self, stack: &StackState) -> WmResult<WindowConfig> {
        Ok(self.state(stack)?.config.clone())
    }

    pub fn insets(&self, stack: &mut StackState) -> WmResult<Insets> {
        self.state(stack)?;
        self.core().get_insets(stack, self.id)
    }

    pub fn move_by(&self, stack: &mut StackState, dx: i32, dy: i32) -> WmResult<()> {
        let bounds = self.state(stack)?.config.bounds;
        match (bounds.x.checked_add(dx), bounds.y.checked_add(dy)) {
            (Some(x), Some(y)) => self.move_to(stack, x, y),
            _ => Err(WmError::invalid("window geometry out of range")),
        }
    }

    /// Move to `(x, y)` in inset-inclusive coordinates; bound windows follow
    pub fn move_to(&self, stack: &mut StackState, x: i32, y: i32) -> WmResult<()> {
        let bounds = self.state(stack)?.config.bounds;
        if (bounds.x, bounds.y) == (x, y) {
            return Ok(());
        }
        self.place(stack, self.id, x, y)?;
        self.move_bound(stack)
    }

    fn place(&self, stack: &mut StackState, id: WindowId, x: i32, y: i32) -> WmResult<()> {
        let Some(current) = stack.window(id).map(|w| w.config.clone()) else {
            return Ok(());
        };
        let change = WindowConfig {
            bounds: Rect::new(x, y, current.bounds.w, current.bounds.h),
            ..current
        };
        self.core().set_window_config(stack, id, &change, ConfigFlags::POSITION)?;
        stack.post_event(WindowEvent::position(id, x, y));
        Ok(())
    }

    /// Reposition every window bound, directly or through others, to this one
    fn move_bound(&self, stack: &mut StackState) -> WmResult<()> {
        let mut pending = vec![self.id];
        let mut seen = vec![self.id];
        while let Some(parent) = pending.pop() {
            let Some(state) = stack.window(parent) else {
                continue;
            };
            let origin = state.config.bounds;
            let bound = state.bound.clone();
            for binding in bound {
                if seen.contains(&binding.window) {
                    continue;
                }
                seen.push(binding.window);
                self.place(stack, binding.window, origin.x + binding.x, origin.y + binding.y)?;
                pending.push(binding.window);
            }
        }
        Ok(())
    }

    /// Resize in inset-inclusive units; the surface keeps the client size
    pub fn resize(&self, stack: &mut StackState, width: i32, height: i32) -> WmResult<()> {
        let bounds = self.state(stack)?.config.bounds;
        if (bounds.w, bounds.h) == (width, height) {
            return Ok(());
        }
        self.set_bounds(stack, Rect::new(bounds.x, bounds.y, width, height))
    }

    pub fn set_bounds(&self, stack: &mut StackState, bounds: Rect) -> WmResult<()> {
        let current = self.state(stack)?.config.bounds;
        if bounds.w < 1 || bounds.h < 1 {
            return Err(WmError::invalid(format!("window size {}x{}", bounds.w, bounds.h)));
        }

        let mut flags = ConfigFlags::empty();
        if (current.x, current.y) != (bounds.x, bounds.y) {
            flags |= ConfigFlags::POSITION;
        }
        let mut previous_surface = None;
        if (current.w, current.h) != (bounds.w, bounds.h) {
            flags |= ConfigFlags::SIZE;
            let insets = self.core().get_insets(stack, self.id)?;
            let (w, h) = client_size(&bounds, &insets);
            previous_surface = self.state(stack)?.surface.as_ref().map(|s| s.size());
            self.resize_surface(stack, w, h)?;
        }
        if flags.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.configure(stack, flags, |c| c.bounds = bounds) {
            // The backend kept the old bounds, so the surface goes back too
            if let Some((w, h)) = previous_surface {
                if let Err(restore) = self.resize_surface(stack, w as i32, h as i32) {
                    tracing::warn!(window = %self.id, error = %restore, "failed to restore surface size");
                }
            }
            return Err(e);
        }
        if flags.contains(ConfigFlags::POSITION) {
            stack.post_event(WindowEvent::position(self.id, bounds.x, bounds.y));
        }
        if flags.contains(ConfigFlags::SIZE) {
            stack.post_event(WindowEvent::size(self.id, bounds.w, bounds.h));
        }
        if flags.contains(ConfigFlags::POSITION) {
            self.move_bound(stack)?;
        }
        Ok(())
    }

    /// Reallocate the surface; input-only windows have none
    pub fn resize_surface(&self, stack: &mut StackState, width: i32, height: i32) -> WmResult<()> {
        let state = self.state(stack)?;
        let Some(surface) = state.surface.clone() else {
            return if self.caps.contains(WindowCaps::INPUTONLY) {
                Ok(())
            } else {
                Err(WmError::Unsupported("window has no surface".into()))
            };
        };
        if width < 1 || height < 1 {
            return Err(WmError::invalid(format!("surface size {width}x{height}")));
        }
        if surface.size() == (width as u32, height as u32) {
            return Ok(());
        }
        surface.resize(width as u32, height as u32)
    }

    pub fn set_opacity(&self, stack: &mut StackState, opacity: u8) -> WmResult<()> {
        if self.state(stack)?.config.opacity == opacity {
            return Ok(());
        }
        self.configure(stack, ConfigFlags::OPACITY, |c| c.opacity = opacity)
    }

    pub fn set_options(&self, stack: &mut StackState, options: WindowOptions) -> WmResult<()> {
        self.configure(stack, ConfigFlags::OPTIONS, |c| c.options = options)
    }

    pub fn set_color_key(&self, stack: &mut StackState, color_key: u32) -> WmResult<()> {
        if self.state(stack)?.config.color_key == color_key {
            return Ok(());
        }
        self.configure(stack, ConfigFlags::COLOR_KEY, |c| c.color_key = color_key)
    }

    pub fn set_opaque_region(&self, stack: &mut StackState, region: Region) -> WmResult<()> {
        if !region.is_valid() {
            return Err(WmError::invalid(format!("inverted opaque region {region:?}")));
        }
        self.configure(stack, ConfigFlags::OPAQUE, |c| c.opaque = region)
    }

    pub fn set_stacking_class(&self, stack: &mut StackState, stacking: StackingClass) -> WmResult<()> {
        if self.state(stack)?.config.stacking == stacking {
            return Ok(());
        }
        self.configure(stack, ConfigFlags::STACKING, |c| c.stacking = stacking)
    }

    pub fn set_key_selection(&self, stack: &mut StackState, selection: KeySelection) -> WmResult<()> {
        let selection = match selection {
            KeySelection::List(keys) if keys.is_empty() => {
                return Err(WmError::invalid("empty key selection list"));
            }
            KeySelection::List(mut keys) => {
                keys.sort_unstable();
                keys.dedup();
                KeySelection::List(keys)
            }
            other => other,
        };
        self.configure(stack, ConfigFlags::KEY_SELECTION, |c| c.key_selection = selection)
    }

    /// Event types delivered to attached event buffers
    pub fn set_events(&self, stack: &mut StackState, events: WindowEventType) -> WmResult<()> {
        if self.state(stack)?.config.events == events {
            return Ok(());
        }
        self.configure(stack, ConfigFlags::EVENTS, |c| c.events = events)
    }

    pub fn set_src_geometry(&self, stack: &mut StackState, geometry: WindowGeometry) -> WmResult<()> {
        geometry.validate()?;
        self.configure(stack, ConfigFlags::SRC_GEOMETRY, |c| c.src_geometry = geometry)
    }

    pub fn set_dst_geometry(&self, stack: &mut StackState, geometry: WindowGeometry) -> WmResult<()> {
        geometry.validate()?;
        self.configure(stack, ConfigFlags::DST_GEOMETRY, |c| c.dst_geometry = geometry)
    }

    pub fn set_rotation(&self, stack: &mut StackState, degrees: i32) -> WmResult<()> {
        let rotation = degrees.rem_euclid(360);
        if self.state(stack)?.config.rotation == rotation {
            return Ok(());
        }
        self.configure(stack, ConfigFlags::ROTATION, |c| c.rotation = rotation)
    }

    // ========== Stacking ==========

    pub fn restack(&self, stack: &mut StackState, restack: Restack) -> WmResult<()> {
        self.state(stack)?;
        if let Restack::Atop(relative) | Restack::Below(relative) = restack {
            if relative == self.id {
                return Err(WmError::invalid("window restacked relative to itself"));
            }
            if stack.window(relative).is_none() {
                return Err(WmError::ItemNotFound(format!("window {relative} not in stack")));
            }
        }
        self.core().restack_window(stack, self.id, restack)
    }

    pub fn raise(&self, stack: &mut StackState) -> WmResult<()> {
        self.restack(stack, Restack::Raise)
    }

    pub fn lower(&self, stack: &mut StackState) -> WmResult<()> {
        self.restack(stack, Restack::Lower)
    }

    pub fn raise_to_top(&self, stack: &mut StackState) -> WmResult<()> {
        self.restack(stack, Restack::ToTop)
    }

    pub fn lower_to_bottom(&self, stack: &mut StackState) -> WmResult<()> {
        self.restack(stack, Restack::ToBottom)
    }

    pub fn put_atop(&self, stack: &mut StackState, lower: &Window) -> WmResult<()> {
        self.same_stack(lower)?;
        self.restack(stack, Restack::Atop(lower.id))
    }

    pub fn put_below(&self, stack: &mut StackState, upper: &Window) -> WmResult<()> {
        self.same_stack(upper)?;
        self.restack(stack, Restack::Below(upper.id))
    }

    fn same_stack(&self, other: &Window) -> WmResult<()> {
        if other.stack.id() != self.stack.id() {
            return Err(WmError::invalid("windows belong to different stacks"));
        }
        if other.is_destroyed() {
            return Err(WmError::Destroyed);
        }
        Ok(())
    }

    // ========== Input ==========

    pub fn grab(&self, stack: &mut StackState, grab: Grab) -> WmResult<()> {
        self.state(stack)?;
        self.core().grab(stack, self.id, grab)
    }

    pub fn ungrab(&self, stack: &mut StackState, grab: Grab) -> WmResult<()> {
        self.state(stack)?;
        self.core().ungrab(stack, self.id, grab)
    }

    pub fn request_focus(&self, stack: &mut StackState) -> WmResult<()> {
        self.state(stack)?;
        self.core().request_focus(stack, self.id)
    }

    // ========== Properties ==========

    /// Returns the value the key had before
    pub fn set_property(
        &self,
        stack: &mut StackState,
        key: &str,
        value: PropertyValue,
    ) -> WmResult<Option<PropertyValue>> {
        self.state(stack)?;
        self.core().set_window_property(stack, self.id, key, value)
    }

    pub fn property(&self, stack: &mut StackState, key: &str) -> WmResult<PropertyValue> {
        self.state(stack)?;
        self.core().get_window_property(stack, self.id, key)
    }

    pub fn remove_property(&self, stack: &mut StackState, key: &str) -> WmResult<PropertyValue> {
        self.state(stack)?;
        self.core().remove_window_property(stack, self.id, key)
    }

    // ========== Binding ==========

    /// Keep `source` at offset `(x, y)` from this window
    pub fn bind(&self, stack: &mut StackState, source: &Window, x: i32, y: i32) -> WmResult<()> {
        self.same_stack(source)?;
        if source.id == self.id {
            return Err(WmError::invalid("window bound to itself"));
        }
        let origin = self.state(stack)?.config.bounds;
        source.state(stack)?;

        // Refuse cycles: walk up from this window
        let mut ancestor = Some(self.id);
        while let Some(id) = ancestor {
            if id == source.id {
                return Err(WmError::invalid(format!("binding {} would form a cycle", source.id)));
            }
            ancestor = stack.window(id).and_then(|w| w.bound_to);
        }

        if let Some(previous) = stack.window(source.id).and_then(|w| w.bound_to) {
            Self::unlink(stack, previous, source.id);
        }
        if let Some(state) = stack.window_mut(self.id) {
            state.bound.push(Binding {
                window: source.id,
                x,
                y,
            });
        }
        if let Some(state) = stack.window_mut(source.id) {
            state.bound_to = Some(self.id);
        }

        self.place(stack, source.id, origin.x + x, origin.y + y)?;
        source.move_bound(stack)
    }

    pub fn unbind(&self, stack: &mut StackState, source: &Window) -> WmResult<()> {
        self.same_stack(source)?;
        self.state(stack)?;
        let bound_here = stack.window(source.id).and_then(|w| w.bound_to) == Some(self.id);
        if !bound_here {
            return Err(WmError::ItemNotFound(format!("window {} not bound to {}", source.id, self.id)));
        }
        Self::unlink(stack, self.id, source.id);
        Ok(())
    }

    fn unlink(stack: &mut StackState, parent: WindowId, child: WindowId) {
        if let Some(state) = stack.window_mut(parent) {
            state.bound.retain(|b| b.window != child);
        }
        if let Some(state) = stack.window_mut(child) {
            state.bound_to = None;
        }
    }

    // ========== Events & surface ==========

    /// Deliver `event` to this window's listeners
    pub fn post_event(&self, stack: &StackState, mut event: WindowEvent) -> WmResult<()> {
        self.state(stack)?;
        event.window = self.id;
        stack.post_event(event);
        Ok(())
    }

    pub fn update(&self, stack: &mut StackState, region: Option<Region>, flags: FlipFlags) -> WmResult<()> {
        if let Some(region) = region {
            if !region.is_valid() {
                return Err(WmError::InvalidArea);
            }
        }
        self.state(stack)?;
        self.core().update_window(stack, self.id, region, flags)
    }

    pub fn surface(&self, stack: &StackState) -> WmResult<Option<Arc<CoreSurface>>> {
        Ok(self.state(stack)?.surface.clone())
    }

    pub(crate) fn attach_events(&self, sink: Sender<WindowEvent>, filtered: bool) -> WmResult<SubscriptionId> {
        if self.is_destroyed() {
            return Err(WmError::Destroyed);
        }
        Ok(self.events.attach(sink, filtered))
    }

    pub(crate) fn detach_events(&self, subscription: SubscriptionId) {
        self.events.detach(subscription);
    }

    // ========== Lifetime ==========

    /// Remove the window from its stack; later calls do nothing
    pub fn destroy(&self, stack: &mut StackState) {
        assert_eq!(stack.id(), self.stack.id(), "window {} used with a foreign stack", self.id);
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(state) = stack.window(self.id) {
            let bound: Vec<WindowId> = state.bound.iter().map(|b| b.window).collect();
            let parent = state.bound_to;
            for child in bound {
                Self::unlink(stack, self.id, child);
            }
            if let Some(parent) = parent {
                Self::unlink(stack, parent, self.id);
            }

            if stack.is_valid() {
                if let Err(e) = self.core().remove_window(stack, self.id) {
                    tracing::warn!(window = %self.id, error = %e, "backend failed to remove window");
                }
            } else {
                self.core().discard_window_data(stack, self.id);
            }
            stack.remove_window_state(self.id);
        }

        self.events
            .post(&WindowEvent::new(WindowEventType::DESTROYED, self.id), WindowEventType::ALL);
        tracing::debug!(window = %self.id, "window destroyed");
    }

    pub fn ref_window(&self) -> WmResult<()> {
        if self.is_destroyed() {
            return Err(WmError::Destroyed);
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one reference, destroying the window with the last one
    ///
    /// Takes the stack lock, so it must not be called while holding it.
    pub fn unref(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "window {} unreferenced too often", self.id);
        if previous == 1 {
            let mut stack = self.stack.lock();
            self.destroy(&mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::module::ModuleRegistry;
    use crate::session::Session;
    use std::sync::mpsc;
    use surface::PoolRegistry;

    fn session() -> Session {
        Session::create(0, Config::default(), Arc::new(PoolRegistry::new()), ModuleRegistry::builtin()).unwrap()
    }

    fn input_only(x: i32, y: i32, w: i32, h: i32) -> WindowDescription {
        WindowDescription::new(x, y, w, h).with_caps(WindowCaps::INPUTONLY | WindowCaps::NODECORATION)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let a = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        let b = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        assert_eq!(a.id(), WindowId(1));
        assert_eq!(b.id(), WindowId(2));
    }

    #[test]
    fn zero_size_is_rejected() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let result = Window::create(&stack, &input_only(0, 0, 0, 10));
        assert!(matches!(result, Err(WmError::InvalidArgument(_))));
        assert_eq!(stack.lock().window_count(), 0);
    }

    #[test]
    fn bound_window_follows_its_parent() {
        let session = session();
        let stack = session.create_context(200, 200).unwrap().stack().unwrap();
        let parent = Window::create(&stack, &input_only(10, 10, 50, 50)).unwrap();
        let child = Window::create(&stack, &input_only(0, 0, 5, 5)).unwrap();

        let mut state = stack.lock();
        parent.bind(&mut state, &child, 4, 6).unwrap();
        assert_eq!(state.window(child.id()).unwrap().config().bounds, Rect::new(14, 16, 5, 5));

        parent.move_to(&mut state, 100, 100).unwrap();
        assert_eq!(state.window(child.id()).unwrap().config().bounds, Rect::new(104, 106, 5, 5));

        parent.unbind(&mut state, &child).unwrap();
        parent.move_to(&mut state, 0, 0).unwrap();
        assert_eq!(state.window(child.id()).unwrap().config().bounds, Rect::new(104, 106, 5, 5));
    }

    #[test]
    fn binding_cycles_are_refused() {
        let session = session();
        let stack = session.create_context(200, 200).unwrap().stack().unwrap();
        let a = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        let b = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();

        let mut state = stack.lock();
        a.bind(&mut state, &b, 1, 1).unwrap();
        assert!(matches!(b.bind(&mut state, &a, 1, 1), Err(WmError::InvalidArgument(_))));
    }

    #[test]
    fn destroy_is_idempotent_and_posts_once() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let window = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        let (tx, rx) = mpsc::channel();
        window.attach_events(tx, false).unwrap();

        let mut state = stack.lock();
        window.destroy(&mut state);
        window.destroy(&mut state);
        drop(state);

        let destroyed = rx.try_iter().filter(|e| e.kind == WindowEventType::DESTROYED).count();
        assert_eq!(destroyed, 1);
        assert!(window.ref_window().is_err());
        assert_eq!(stack.lock().window_count(), 0);
    }

    #[test]
    fn last_unref_destroys() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let window = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        window.ref_window().unwrap();

        window.unref();
        assert!(!window.is_destroyed());
        window.unref();
        assert!(window.is_destroyed());
    }

    #[test]
    fn rotation_is_normalized() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let window = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        let mut state = stack.lock();
        window.set_rotation(&mut state, -90).unwrap();
        assert_eq!(window.config(&state).unwrap().rotation, 270);
        window.set_rotation(&mut state, 720).unwrap();
        assert_eq!(window.config(&state).unwrap().rotation, 0);
    }

    #[test]
    fn closed_stack_reports_destroyed() {
        let session = session();
        let stack = session.create_context(100, 100).unwrap().stack().unwrap();
        let window = Window::create(&stack, &input_only(0, 0, 10, 10)).unwrap();
        stack.close(false).unwrap();

        let mut state = stack.lock();
        assert_eq!(window.move_to(&mut state, 5, 5), Err(WmError::Destroyed));
    }
}
