//! Stacking window manager
//!
//! Windows are kept in three stacking classes and ordered by a z value
//! inside their class. Input goes to the focused window (keys) or the
//! window under the cursor (pointer), unless a window holds a grab.
//!
//! Shared state lives in the blocks the core allocates:
//!
//! - stack header: focused, entered, keyboard grab and pointer grab window
//!   ids plus the active flag, one `u32` each
//! - window record: window id, stacking class rank (`u32` each) and z
//!   (`i64`); the id stays zero until the window is added
//!
//! Properties, key grabs and pressed keys are kept per process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fusion::{ShmBlock, ShmPool};
use surface::FlipFlags;

use crate::backend::{BackendData, WmBackend, WmInfo, WmVersion};
use crate::config::StackingConfig;
use crate::error::{WmError, WmResult};
use crate::stack::StackState;
use crate::types::{
    ConfigFlags, CursorUpdateFlags, Grab, InputEvent, Insets, PropertyValue, Region, Restack, StackId, WindowCaps,
    WindowConfig, WindowEvent, WindowEventType, WindowId, WindowOptions,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Header {
    focused: WindowId,
    entered: WindowId,
    keyboard_grab: WindowId,
    pointer_grab: WindowId,
    active: bool,
}

impl Header {
    const SIZE: usize = 20;

    fn load(shm: &ShmPool, block: ShmBlock) -> WmResult<Self> {
        Ok(Self {
            focused: WindowId(shm.read_u32(block, 0)?),
            entered: WindowId(shm.read_u32(block, 4)?),
            keyboard_grab: WindowId(shm.read_u32(block, 8)?),
            pointer_grab: WindowId(shm.read_u32(block, 12)?),
            active: shm.read_u32(block, 16)? != 0,
        })
    }

    fn store(&self, shm: &ShmPool, block: ShmBlock) -> WmResult<()> {
        shm.write_u32(block, 0, self.focused.0)?;
        shm.write_u32(block, 4, self.entered.0)?;
        shm.write_u32(block, 8, self.keyboard_grab.0)?;
        shm.write_u32(block, 12, self.pointer_grab.0)?;
        shm.write_u32(block, 16, u32::from(self.active))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    id: WindowId,
    class: u32,
    z: i64,
}

impl Record {
    const SIZE: usize = 16;

    fn load(shm: &ShmPool, block: ShmBlock) -> WmResult<Self> {
        Ok(Self {
            id: WindowId(shm.read_u32(block, 0)?),
            class: shm.read_u32(block, 4)?,
            z: shm.read_i64(block, 8)?,
        })
    }

    fn store(&self, shm: &ShmPool, block: ShmBlock) -> WmResult<()> {
        shm.write_u32(block, 0, self.id.0)?;
        shm.write_u32(block, 4, self.class)?;
        shm.write_i64(block, 8, self.z)?;
        Ok(())
    }
}

/// Per-process bookkeeping of one stack
#[derive(Debug, Default)]
struct StackLocal {
    properties: HashMap<WindowId, HashMap<String, PropertyValue>>,
    key_grabs: HashMap<(u32, u32), WindowId>,
    unselected_keys: Option<WindowId>,
    /// Window that received the key press, by symbol
    pressed: HashMap<u32, WindowId>,
}

impl StackLocal {
    fn forget(&mut self, window: WindowId) {
        self.properties.remove(&window);
        self.key_grabs.retain(|_, w| *w != window);
        self.pressed.retain(|_, w| *w != window);
        if self.unselected_keys == Some(window) {
            self.unselected_keys = None;
        }
    }
}

#[derive(Debug)]
pub struct StackingBackend {
    config: StackingConfig,
    stacks: Mutex<HashMap<StackId, StackLocal>>,
}

fn header_block(stack_data: Option<ShmBlock>) -> WmResult<ShmBlock> {
    stack_data.ok_or_else(|| WmError::Failure("stack has no window manager data".into()))
}

fn record_block(window_data: Option<ShmBlock>) -> WmResult<ShmBlock> {
    window_data.ok_or_else(|| WmError::Failure("window has no window manager data".into()))
}

/// Added windows from bottom to top
fn order(shm: &ShmPool, stack: &StackState) -> WmResult<Vec<Record>> {
    let mut records = Vec::with_capacity(stack.window_count());
    for window in stack.windows() {
        let Some(block) = window.window_data() else {
            continue;
        };
        let record = Record::load(shm, block)?;
        if record.id != WindowId::NONE {
            records.push(record);
        }
    }
    records.sort_by_key(|r| (r.class, r.z));
    Ok(records)
}

fn set_z(shm: &ShmPool, stack: &StackState, window: WindowId, z: i64) -> WmResult<()> {
    let block = record_block(stack.window(window).and_then(|w| w.window_data()))?;
    let mut record = Record::load(shm, block)?;
    record.z = z;
    record.store(shm, block)
}

/// Topmost z of a class plus one
fn next_z(records: &[Record], class: u32) -> i64 {
    records
        .iter()
        .filter(|r| r.class == class)
        .map(|r| r.z + 1)
        .max()
        .unwrap_or(0)
}

fn focusable(stack: &StackState, window: WindowId) -> bool {
    stack
        .window(window)
        .is_some_and(|w| !w.config().options.contains(WindowOptions::GHOST))
}

/// Topmost window taking pointer input at `(x, y)`
fn hit(shm: &ShmPool, stack: &StackState, x: i32, y: i32) -> WmResult<Option<WindowId>> {
    for record in order(shm, stack)?.iter().rev() {
        let Some(window) = stack.window(record.id) else {
            continue;
        };
        let config = window.config();
        if config.options.contains(WindowOptions::GHOST) {
            continue;
        }
        if config.opacity == 0 && !window.caps().contains(WindowCaps::INPUTONLY) {
            continue;
        }
        if config.bounds.contains(x, y) {
            return Ok(Some(record.id));
        }
    }
    Ok(None)
}

fn set_focus(stack: &StackState, header: &mut Header, window: WindowId) {
    if header.focused == window {
        return;
    }
    if header.focused != WindowId::NONE {
        stack.post_event(WindowEvent::new(WindowEventType::LOSTFOCUS, header.focused));
    }
    header.focused = window;
    if window != WindowId::NONE {
        stack.post_event(WindowEvent::new(WindowEventType::GOTFOCUS, window));
    }
}

fn pointer_event(kind: WindowEventType, window: WindowId, x: i32, y: i32) -> WindowEvent {
    WindowEvent {
        x,
        y,
        ..WindowEvent::new(kind, window)
    }
}

fn key_event(kind: WindowEventType, window: WindowId, symbol: u32, modifiers: u32) -> WindowEvent {
    WindowEvent {
        key_symbol: symbol,
        modifiers,
        ..WindowEvent::new(kind, window)
    }
}

impl StackingBackend {
    pub const NAME: &'static str = "stacking";

    pub fn new(config: &StackingConfig) -> Self {
        Self {
            config: config.clone(),
            stacks: Mutex::new(HashMap::new()),
        }
    }

    fn stacks(&self) -> MutexGuard<'_, HashMap<StackId, StackLocal>> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_local<R>(&self, stack: StackId, f: impl FnOnce(&mut StackLocal) -> R) -> R {
        let mut stacks = self.stacks();
        f(stacks.entry(stack).or_default())
    }

    /// Adjust the attached process count kept in the shared block
    fn count_process(data: &BackendData, delta: i64) -> WmResult<u32> {
        let Some(block) = data.shared() else {
            return Ok(0);
        };
        let count = i64::from(data.shm().read_u32(block, 0)?) + delta;
        let count = u32::try_from(count.max(0)).unwrap_or(0);
        data.shm().write_u32(block, 0, count)?;
        Ok(count)
    }

    fn key_target(stack: &StackState, header: &Header, local: &StackLocal, symbol: u32, modifiers: u32) -> WindowId {
        if let Some(&window) = local.key_grabs.get(&(symbol, modifiers)) {
            return window;
        }
        if header.keyboard_grab != WindowId::NONE {
            return header.keyboard_grab;
        }
        let selected = stack
            .window(header.focused)
            .is_some_and(|w| w.config().key_selection.selects(symbol));
        if selected {
            header.focused
        } else {
            local.unselected_keys.unwrap_or(WindowId::NONE)
        }
    }

    fn track_enter(stack: &StackState, header: &mut Header, under: WindowId, x: i32, y: i32) {
        if header.entered == under {
            return;
        }
        if header.entered != WindowId::NONE {
            stack.post_event(pointer_event(WindowEventType::LEAVE, header.entered, x, y));
        }
        header.entered = under;
        if under != WindowId::NONE {
            stack.post_event(pointer_event(WindowEventType::ENTER, under, x, y));
        }
    }

    fn restack_in_class(shm: &ShmPool, stack: &StackState, window: WindowId, restack: Restack) -> WmResult<()> {
        let records = order(shm, stack)?;
        let Some(own) = records.iter().find(|r| r.id == window).copied() else {
            return Err(WmError::ItemNotFound(format!("window {window} not added")));
        };
        let mut class: Vec<WindowId> = records.iter().filter(|r| r.class == own.class).map(|r| r.id).collect();
        let Some(position) = class.iter().position(|&id| id == window) else {
            return Err(WmError::ItemNotFound(format!("window {window} not added")));
        };
        class.remove(position);

        let target = match restack {
            Restack::Raise => (position + 1).min(class.len()),
            Restack::Lower => position.saturating_sub(1),
            Restack::ToTop => class.len(),
            Restack::ToBottom => 0,
            Restack::Atop(relative) | Restack::Below(relative) => {
                let Some(at) = class.iter().position(|&id| id == relative) else {
                    return Err(WmError::Unsupported(format!(
                        "window {relative} is in another stacking class"
                    )));
                };
                if matches!(restack, Restack::Atop(_)) {
                    at + 1
                } else {
                    at
                }
            }
        };
        class.insert(target, window);

        for (z, id) in class.into_iter().enumerate() {
            set_z(shm, stack, id, z as i64)?;
        }
        tracing::trace!(window = %window, ?restack, "restacked");
        Ok(())
    }
}

impl WmBackend for StackingBackend {
    fn info(&self) -> WmInfo {
        WmInfo {
            name: "Stacking".into(),
            vendor: "stackfb".into(),
            version: WmVersion {
                major: 1,
                minor: 0,
                binary: 1,
            },
            wm_data_size: 0,
            wm_shared_size: 4,
            stack_data_size: Header::SIZE,
            window_data_size: Record::SIZE,
        }
    }

    fn initialize(&self, data: &BackendData) -> WmResult<()> {
        Self::count_process(data, 1)?;
        Ok(())
    }

    fn join(&self, data: &BackendData) -> WmResult<()> {
        let processes = Self::count_process(data, 1)?;
        tracing::debug!(processes, "stacking window manager joined");
        Ok(())
    }

    fn shutdown(&self, _emergency: bool, _data: &BackendData) -> WmResult<()> {
        self.stacks().clear();
        Ok(())
    }

    fn leave(&self, _emergency: bool, data: &BackendData) -> WmResult<()> {
        Self::count_process(data, -1)?;
        self.stacks().clear();
        Ok(())
    }

    fn suspend(&self, _data: &BackendData) -> WmResult<()> {
        Ok(())
    }

    fn resume(&self, _data: &BackendData) -> WmResult<()> {
        Ok(())
    }

    fn post_init(&self, _data: &BackendData) -> WmResult<()> {
        Ok(())
    }

    fn init_stack(&self, stack: &mut StackState, data: &BackendData, stack_data: Option<ShmBlock>) -> WmResult<()> {
        let block = header_block(stack_data)?;
        let header = Header {
            active: true,
            ..Header::default()
        };
        header.store(data.shm(), block)?;
        self.stacks().insert(stack.id(), StackLocal::default());
        Ok(())
    }

    fn close_stack(&self, stack: &mut StackState, _data: &BackendData, _stack_data: Option<ShmBlock>) -> WmResult<()> {
        self.stacks().remove(&stack.id());
        Ok(())
    }

    fn set_active(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        active: bool,
    ) -> WmResult<()> {
        let block = header_block(stack_data)?;
        let mut header = Header::load(data.shm(), block)?;
        if header.active == active {
            return Ok(());
        }
        if !active {
            self.flush_keys(stack, data, stack_data)?;
        }
        header.active = active;
        header.store(data.shm(), block)
    }

    fn resize_stack(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        width: i32,
        height: i32,
    ) -> WmResult<()> {
        let cursor = stack.cursor_mut();
        cursor.x = cursor.x.clamp(0, (width - 1).max(0));
        cursor.y = cursor.y.clamp(0, (height - 1).max(0));
        Ok(())
    }

    fn process_input(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        event: &InputEvent,
    ) -> WmResult<()> {
        let shm = data.shm();
        let block = header_block(stack_data)?;
        let mut header = Header::load(shm, block)?;
        if !header.active {
            tracing::trace!(?event, "input on inactive stack dropped");
            return Ok(());
        }

        match *event {
            InputEvent::KeyPress { symbol, modifiers } => {
                let target = self.with_local(stack.id(), |local| {
                    let target = Self::key_target(stack, &header, local, symbol, modifiers);
                    if target != WindowId::NONE {
                        local.pressed.insert(symbol, target);
                    }
                    target
                });
                if target != WindowId::NONE {
                    stack.post_event(key_event(WindowEventType::KEYDOWN, target, symbol, modifiers));
                }
            }
            InputEvent::KeyRelease { symbol, modifiers } => {
                let target = self.with_local(stack.id(), |local| match local.pressed.remove(&symbol) {
                    Some(target) => target,
                    None => Self::key_target(stack, &header, local, symbol, modifiers),
                });
                if target != WindowId::NONE {
                    stack.post_event(key_event(WindowEventType::KEYUP, target, symbol, modifiers));
                }
            }
            InputEvent::Motion { x, y } => {
                let (width, height) = stack.size();
                let x = x.clamp(0, (width - 1).max(0));
                let y = y.clamp(0, (height - 1).max(0));
                stack.cursor_mut().x = x;
                stack.cursor_mut().y = y;

                let under = hit(shm, stack, x, y)?.unwrap_or(WindowId::NONE);
                Self::track_enter(stack, &mut header, under, x, y);
                let target = if header.pointer_grab != WindowId::NONE {
                    header.pointer_grab
                } else {
                    under
                };
                if target != WindowId::NONE {
                    stack.post_event(pointer_event(WindowEventType::MOTION, target, x, y));
                }
            }
            InputEvent::ButtonPress { button } | InputEvent::ButtonRelease { button } => {
                let (x, y) = (stack.cursor().x, stack.cursor().y);
                let under = hit(shm, stack, x, y)?.unwrap_or(WindowId::NONE);
                let pressed = matches!(event, InputEvent::ButtonPress { .. });

                let target = if header.pointer_grab != WindowId::NONE {
                    header.pointer_grab
                } else {
                    under
                };
                if pressed && header.pointer_grab == WindowId::NONE && self.config.focus_on_click {
                    if target != WindowId::NONE && target != header.focused && focusable(stack, target) {
                        set_focus(stack, &mut header, target);
                        let keep = stack
                            .window(target)
                            .is_some_and(|w| w.config().options.contains(WindowOptions::KEEP_STACKING));
                        if !keep {
                            Self::restack_in_class(shm, stack, target, Restack::ToTop)?;
                        }
                    }
                }
                if target != WindowId::NONE {
                    let kind = if pressed {
                        WindowEventType::BUTTONDOWN
                    } else {
                        WindowEventType::BUTTONUP
                    };
                    stack.post_event(WindowEvent {
                        button,
                        ..pointer_event(kind, target, x, y)
                    });
                }
            }
            InputEvent::Wheel { delta } => {
                let target = if header.pointer_grab != WindowId::NONE {
                    header.pointer_grab
                } else {
                    header.entered
                };
                if target != WindowId::NONE {
                    let (x, y) = (stack.cursor().x, stack.cursor().y);
                    stack.post_event(WindowEvent {
                        wheel: delta,
                        ..pointer_event(WindowEventType::WHEEL, target, x, y)
                    });
                }
            }
        }

        header.store(shm, block)
    }

    fn flush_keys(&self, stack: &mut StackState, _data: &BackendData, _stack_data: Option<ShmBlock>) -> WmResult<()> {
        let pressed = self.with_local(stack.id(), |local| std::mem::take(&mut local.pressed));
        for (symbol, window) in pressed {
            stack.post_event(key_event(WindowEventType::KEYUP, window, symbol, 0));
        }
        Ok(())
    }

    fn window_at(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        _stack_data: Option<ShmBlock>,
        x: i32,
        y: i32,
    ) -> WmResult<Option<WindowId>> {
        hit(data.shm(), stack, x, y)
    }

    fn window_lookup(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        id: WindowId,
    ) -> WmResult<Option<WindowId>> {
        Ok(stack.window(id).map(|w| w.id()))
    }

    fn enum_windows(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        _stack_data: Option<ShmBlock>,
        visit: &mut dyn FnMut(WindowId) -> bool,
    ) -> WmResult<()> {
        for record in order(data.shm(), stack)?.iter().rev() {
            if !visit(record.id) {
                break;
            }
        }
        Ok(())
    }

    fn get_insets(&self, stack: &mut StackState, window: WindowId) -> WmResult<Insets> {
        let Some(window) = stack.window(window) else {
            return Err(WmError::ItemNotFound(format!("window {window}")));
        };
        if window.caps().intersects(WindowCaps::NODECORATION | WindowCaps::INPUTONLY) {
            return Ok(Insets::default());
        }
        Ok(self.config.insets)
    }

    fn preconfigure_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        record_block(window_data)?;
        tracing::trace!(window = %window, "preconfigured");
        Ok(())
    }

    fn add_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        let shm = data.shm();
        let block = record_block(window_data)?;
        let class = stack
            .window(window)
            .map(|w| w.config().stacking.rank())
            .unwrap_or_default();
        let records = order(shm, stack)?;
        Record {
            id: window,
            class,
            z: next_z(&records, class),
        }
        .store(shm, block)?;

        let Some(header_block) = stack.stack_data() else {
            return Ok(());
        };
        let mut header = Header::load(shm, header_block)?;
        if header.focused == WindowId::NONE && focusable(stack, window) {
            set_focus(stack, &mut header, window);
            header.store(shm, header_block)?;
        }
        Ok(())
    }

    fn remove_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        let shm = data.shm();
        if let Some(block) = window_data {
            // Take the window out of the order before picking a new focus
            shm.write_u32(block, 0, WindowId::NONE.0)?;
        }
        self.with_local(stack.id(), |local| local.forget(window));

        let Some(header_block) = stack.stack_data() else {
            return Ok(());
        };
        let mut header = Header::load(shm, header_block)?;
        if header.entered == window {
            header.entered = WindowId::NONE;
        }
        if header.keyboard_grab == window {
            header.keyboard_grab = WindowId::NONE;
        }
        if header.pointer_grab == window {
            header.pointer_grab = WindowId::NONE;
        }
        if header.focused == window {
            header.focused = WindowId::NONE;
            let next = order(shm, stack)?
                .iter()
                .rev()
                .map(|r| r.id)
                .find(|&id| focusable(stack, id));
            if let Some(next) = next {
                set_focus(stack, &mut header, next);
            }
        }
        header.store(shm, header_block)
    }

    fn set_window_property(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
        value: PropertyValue,
    ) -> WmResult<Option<PropertyValue>> {
        Ok(self.with_local(stack.id(), |local| {
            local
                .properties
                .entry(window)
                .or_default()
                .insert(key.to_string(), value)
        }))
    }

    fn get_window_property(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue> {
        self.with_local(stack.id(), |local| {
            local
                .properties
                .get(&window)
                .and_then(|p| p.get(key))
                .cloned()
                .ok_or_else(|| WmError::ItemNotFound(format!("property {key:?}")))
        })
    }

    fn remove_window_property(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue> {
        self.with_local(stack.id(), |local| {
            local
                .properties
                .get_mut(&window)
                .and_then(|p| p.remove(key))
                .ok_or_else(|| WmError::ItemNotFound(format!("property {key:?}")))
        })
    }

    fn set_window_config(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        config: &WindowConfig,
        flags: ConfigFlags,
    ) -> WmResult<()> {
        if !flags.contains(ConfigFlags::STACKING) {
            return Ok(());
        }
        let shm = data.shm();
        let block = record_block(window_data)?;
        let mut record = Record::load(shm, block)?;
        let class = config.stacking.rank();
        if record.id == WindowId::NONE || record.class == class {
            return Ok(());
        }
        // A window changing class enters the new one on top
        let records = order(shm, stack)?;
        record.class = class;
        record.z = next_z(&records, class);
        record.store(shm, block)
    }

    fn restack_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        restack: Restack,
    ) -> WmResult<()> {
        Self::restack_in_class(data.shm(), stack, window, restack)
    }

    fn grab(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()> {
        let shm = data.shm();
        let block = header_block(stack.stack_data())?;
        let mut header = Header::load(shm, block)?;
        let taken = |holder: WindowId| holder != WindowId::NONE && holder != window;

        match grab {
            Grab::Keyboard => {
                if taken(header.keyboard_grab) {
                    return Err(WmError::LimitExceeded("keyboard already grabbed".into()));
                }
                header.keyboard_grab = window;
            }
            Grab::Pointer => {
                if taken(header.pointer_grab) {
                    return Err(WmError::LimitExceeded("pointer already grabbed".into()));
                }
                header.pointer_grab = window;
            }
            Grab::Key { symbol, modifiers } => {
                return self.with_local(stack.id(), |local| {
                    let holder = local.key_grabs.entry((symbol, modifiers)).or_insert(window);
                    if *holder != window {
                        return Err(WmError::LimitExceeded(format!("key {symbol:#x} already grabbed")));
                    }
                    Ok(())
                });
            }
            Grab::UnselectedKeys => {
                return self.with_local(stack.id(), |local| {
                    if local.unselected_keys.is_some_and(taken) {
                        return Err(WmError::LimitExceeded("unselected keys already grabbed".into()));
                    }
                    local.unselected_keys = Some(window);
                    Ok(())
                });
            }
        }
        header.store(shm, block)
    }

    fn ungrab(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()> {
        let shm = data.shm();
        let block = header_block(stack.stack_data())?;
        let mut header = Header::load(shm, block)?;

        match grab {
            Grab::Keyboard => {
                if header.keyboard_grab == window {
                    header.keyboard_grab = WindowId::NONE;
                }
            }
            Grab::Pointer => {
                if header.pointer_grab == window {
                    header.pointer_grab = WindowId::NONE;
                }
            }
            Grab::Key { symbol, modifiers } => {
                return self.with_local(stack.id(), |local| {
                    if local.key_grabs.get(&(symbol, modifiers)) != Some(&window) {
                        return Err(WmError::ItemNotFound(format!("key {symbol:#x} not grabbed")));
                    }
                    local.key_grabs.remove(&(symbol, modifiers));
                    Ok(())
                });
            }
            Grab::UnselectedKeys => {
                self.with_local(stack.id(), |local| {
                    if local.unselected_keys == Some(window) {
                        local.unselected_keys = None;
                    }
                });
                return Ok(());
            }
        }
        header.store(shm, block)
    }

    fn request_focus(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        if !focusable(stack, window) {
            return Err(WmError::Unsupported("window cannot take focus".into()));
        }
        let shm = data.shm();
        let block = header_block(stack.stack_data())?;
        let mut header = Header::load(shm, block)?;
        set_focus(stack, &mut header, window);
        header.store(shm, block)
    }

    fn update_stack(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        region: Option<Region>,
        flags: FlipFlags,
    ) -> WmResult<()> {
        tracing::trace!(?region, ?flags, "stack update");
        Ok(())
    }

    fn update_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        region: Option<Region>,
        flags: FlipFlags,
    ) -> WmResult<()> {
        tracing::trace!(window = %window, ?region, ?flags, "window update");
        Ok(())
    }

    fn update_cursor(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        flags: CursorUpdateFlags,
    ) -> WmResult<()> {
        let cursor = stack.cursor();
        tracing::trace!(?flags, x = cursor.x, y = cursor.y, opacity = cursor.opacity, "cursor update");
        Ok(())
    }
}
