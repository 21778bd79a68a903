//! Recording window manager backend
//!
//! `MockBackend` keeps a journal of every call the core makes, with the
//! arguments that matter for assertions. It implements just enough window
//! management to be usable: a flat top-to-bottom order, fixed insets and a
//! property map. Individual operations can be told to fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fusion::ShmBlock;
use surface::FlipFlags;
use wm::backend::{BackendData, WmBackend, WmInfo, WmVersion};
use wm::error::{WmError, WmResult};
use wm::module::ModuleRegistry;
use wm::stack::StackState;
use wm::types::{
    ConfigFlags, CursorUpdateFlags, Grab, InputEvent, Insets, PropertyValue, Region, Restack, StackId, WindowConfig,
    WindowId,
};

/// Module name the mock registers under
pub const MOCK_MODULE: &str = "mock";

/// One backend call
///
/// Shared blocks are recorded by their length, `None` when the core passed
/// no block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Initialize { shared: Option<usize>, local: usize },
    Join { shared: Option<usize>, local: usize },
    Shutdown { emergency: bool },
    Leave { emergency: bool },
    Suspend,
    Resume,
    PostInit,
    InitStack { stack: StackId, stack_data: Option<usize> },
    CloseStack { stack: StackId },
    SetActive { stack: StackId, active: bool },
    ResizeStack { stack: StackId, width: i32, height: i32 },
    ProcessInput { stack: StackId, event: InputEvent },
    FlushKeys { stack: StackId },
    WindowAt { stack: StackId, x: i32, y: i32 },
    WindowLookup { stack: StackId, id: WindowId },
    EnumWindows { stack: StackId },
    GetInsets { window: WindowId },
    PreconfigureWindow { window: WindowId, window_data: Option<usize> },
    AddWindow { window: WindowId, window_data: Option<usize> },
    RemoveWindow { window: WindowId, window_data: Option<usize> },
    SetProperty { window: WindowId, key: String },
    GetProperty { window: WindowId, key: String },
    RemoveProperty { window: WindowId, key: String },
    SetWindowConfig { window: WindowId, flags: ConfigFlags },
    RestackWindow { window: WindowId, restack: Restack },
    Grab { window: WindowId, grab: Grab },
    Ungrab { window: WindowId, grab: Grab },
    RequestFocus { window: WindowId },
    UpdateStack { stack: StackId },
    UpdateWindow { window: WindowId },
    UpdateCursor { stack: StackId, flags: CursorUpdateFlags },
}

/// Operations the mock can be told to reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Initialize,
    Join,
    InitStack,
    PreconfigureWindow,
    AddWindow,
    RemoveWindow,
    SetWindowConfig,
    RestackWindow,
    Grab,
    RequestFocus,
}

#[derive(Debug, Clone)]
pub struct MockSettings {
    pub info: WmInfo,
    pub insets: Insets,
    pub rejects: HashMap<MockOp, WmError>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            info: WmInfo {
                name: "Mock".into(),
                vendor: "test-harness".into(),
                version: WmVersion {
                    major: 0,
                    minor: 1,
                    binary: 1,
                },
                ..WmInfo::default()
            },
            insets: Insets::default(),
            rejects: HashMap::new(),
        }
    }
}

impl MockSettings {
    /// Shared block sizes as `(wm_shared, wm_data, stack_data, window_data)`
    pub fn with_sizes(mut self, wm_shared: usize, wm_data: usize, stack_data: usize, window_data: usize) -> Self {
        self.info.wm_shared_size = wm_shared;
        self.info.wm_data_size = wm_data;
        self.info.stack_data_size = stack_data;
        self.info.window_data_size = window_data;
        self
    }

    pub fn with_binary_version(mut self, binary: u32) -> Self {
        self.info.version.binary = binary;
        self
    }

    pub fn with_insets(mut self, insets: Insets) -> Self {
        self.insets = insets;
        self
    }

    pub fn rejecting(mut self, op: MockOp, error: WmError) -> Self {
        self.rejects.insert(op, error);
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BackendCall>,
    /// Top to bottom
    order: Vec<WindowId>,
    properties: HashMap<(WindowId, String), PropertyValue>,
}

#[derive(Debug)]
pub struct MockBackend {
    settings: MockSettings,
    state: Mutex<MockState>,
}

fn block_len(block: Option<ShmBlock>) -> Option<usize> {
    block.map(|b| b.len())
}

impl MockBackend {
    pub fn new(settings: MockSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            state: Mutex::new(MockState::default()),
        })
    }

    /// A registry whose only module hands out this backend
    pub fn registry(self: &Arc<Self>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        let backend = self.clone();
        registry.register(MOCK_MODULE, move |_| backend.clone());
        registry
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) {
        tracing::trace!(?call, "mock backend call");
        self.state().calls.push(call);
    }

    fn check(&self, op: MockOp) -> WmResult<()> {
        match self.settings.rejects.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.state().calls.iter().filter(|&call| pred(call)).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Windows the mock knows, top to bottom
    pub fn order(&self) -> Vec<WindowId> {
        self.state().order.clone()
    }
}

impl WmBackend for MockBackend {
    fn info(&self) -> WmInfo {
        self.settings.info.clone()
    }

    fn initialize(&self, data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Initialize {
            shared: block_len(data.shared()),
            local: data.local().len(),
        });
        self.check(MockOp::Initialize)
    }

    fn join(&self, data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Join {
            shared: block_len(data.shared()),
            local: data.local().len(),
        });
        self.check(MockOp::Join)
    }

    fn shutdown(&self, emergency: bool, _data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Shutdown { emergency });
        Ok(())
    }

    fn leave(&self, emergency: bool, _data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Leave { emergency });
        Ok(())
    }

    fn suspend(&self, _data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Suspend);
        Ok(())
    }

    fn resume(&self, _data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::Resume);
        Ok(())
    }

    fn post_init(&self, _data: &BackendData) -> WmResult<()> {
        self.record(BackendCall::PostInit);
        Ok(())
    }

    fn init_stack(&self, stack: &mut StackState, _data: &BackendData, stack_data: Option<ShmBlock>) -> WmResult<()> {
        self.record(BackendCall::InitStack {
            stack: stack.id(),
            stack_data: block_len(stack_data),
        });
        self.check(MockOp::InitStack)
    }

    fn close_stack(&self, stack: &mut StackState, _data: &BackendData, _stack_data: Option<ShmBlock>) -> WmResult<()> {
        self.record(BackendCall::CloseStack { stack: stack.id() });
        Ok(())
    }

    fn set_active(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        active: bool,
    ) -> WmResult<()> {
        self.record(BackendCall::SetActive {
            stack: stack.id(),
            active,
        });
        Ok(())
    }

    fn resize_stack(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        width: i32,
        height: i32,
    ) -> WmResult<()> {
        self.record(BackendCall::ResizeStack {
            stack: stack.id(),
            width,
            height,
        });
        Ok(())
    }

    fn process_input(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        event: &InputEvent,
    ) -> WmResult<()> {
        self.record(BackendCall::ProcessInput {
            stack: stack.id(),
            event: *event,
        });
        Ok(())
    }

    fn flush_keys(&self, stack: &mut StackState, _data: &BackendData, _stack_data: Option<ShmBlock>) -> WmResult<()> {
        self.record(BackendCall::FlushKeys { stack: stack.id() });
        Ok(())
    }

    fn window_at(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        x: i32,
        y: i32,
    ) -> WmResult<Option<WindowId>> {
        self.record(BackendCall::WindowAt { stack: stack.id(), x, y });
        let order = self.order();
        Ok(order.into_iter().find(|id| {
            stack
                .window(*id)
                .is_some_and(|w| w.config().bounds.contains(x, y))
        }))
    }

    fn window_lookup(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        id: WindowId,
    ) -> WmResult<Option<WindowId>> {
        self.record(BackendCall::WindowLookup { stack: stack.id(), id });
        Ok(self.state().order.contains(&id).then_some(id))
    }

    fn enum_windows(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        visit: &mut dyn FnMut(WindowId) -> bool,
    ) -> WmResult<()> {
        self.record(BackendCall::EnumWindows { stack: stack.id() });
        for id in self.order() {
            if !visit(id) {
                break;
            }
        }
        Ok(())
    }

    fn get_insets(&self, _stack: &mut StackState, window: WindowId) -> WmResult<Insets> {
        self.record(BackendCall::GetInsets { window });
        Ok(self.settings.insets)
    }

    fn preconfigure_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        self.record(BackendCall::PreconfigureWindow {
            window,
            window_data: block_len(window_data),
        });
        self.check(MockOp::PreconfigureWindow)
    }

    fn add_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        self.record(BackendCall::AddWindow {
            window,
            window_data: block_len(window_data),
        });
        self.check(MockOp::AddWindow)?;
        self.state().order.insert(0, window);
        Ok(())
    }

    fn remove_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        self.record(BackendCall::RemoveWindow {
            window,
            window_data: block_len(window_data),
        });
        let mut state = self.state();
        state.order.retain(|id| *id != window);
        state.properties.retain(|(id, _), _| *id != window);
        drop(state);
        self.check(MockOp::RemoveWindow)
    }

    fn set_window_property(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
        value: PropertyValue,
    ) -> WmResult<Option<PropertyValue>> {
        self.record(BackendCall::SetProperty {
            window,
            key: key.to_string(),
        });
        Ok(self.state().properties.insert((window, key.to_string()), value))
    }

    fn get_window_property(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue> {
        self.record(BackendCall::GetProperty {
            window,
            key: key.to_string(),
        });
        self.state()
            .properties
            .get(&(window, key.to_string()))
            .cloned()
            .ok_or_else(|| WmError::ItemNotFound(format!("property {key}")))
    }

    fn remove_window_property(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue> {
        self.record(BackendCall::RemoveProperty {
            window,
            key: key.to_string(),
        });
        self.state()
            .properties
            .remove(&(window, key.to_string()))
            .ok_or_else(|| WmError::ItemNotFound(format!("property {key}")))
    }

    fn set_window_config(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        _config: &WindowConfig,
        flags: ConfigFlags,
    ) -> WmResult<()> {
        self.record(BackendCall::SetWindowConfig { window, flags });
        self.check(MockOp::SetWindowConfig)
    }

    fn restack_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        restack: Restack,
    ) -> WmResult<()> {
        self.record(BackendCall::RestackWindow { window, restack });
        self.check(MockOp::RestackWindow)?;

        let mut state = self.state();
        let Some(from) = state.order.iter().position(|id| *id == window) else {
            return Err(WmError::ItemNotFound(format!("window {}", window.0)));
        };
        state.order.remove(from);
        let to = match restack {
            Restack::ToTop => 0,
            Restack::ToBottom => state.order.len(),
            Restack::Raise => from.saturating_sub(1),
            Restack::Lower => (from + 1).min(state.order.len()),
            Restack::Atop(other) | Restack::Below(other) => {
                let Some(at) = state.order.iter().position(|id| *id == other) else {
                    state.order.insert(from, window);
                    return Err(WmError::ItemNotFound(format!("window {}", other.0)));
                };
                if matches!(restack, Restack::Atop(_)) {
                    at
                } else {
                    at + 1
                }
            }
        };
        state.order.insert(to, window);
        Ok(())
    }

    fn grab(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()> {
        self.record(BackendCall::Grab { window, grab });
        self.check(MockOp::Grab)
    }

    fn ungrab(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()> {
        self.record(BackendCall::Ungrab { window, grab });
        Ok(())
    }

    fn request_focus(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
    ) -> WmResult<()> {
        self.record(BackendCall::RequestFocus { window });
        self.check(MockOp::RequestFocus)
    }

    fn update_stack(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        _region: Option<Region>,
        _flags: FlipFlags,
    ) -> WmResult<()> {
        self.record(BackendCall::UpdateStack { stack: stack.id() });
        Ok(())
    }

    fn update_window(
        &self,
        _stack: &mut StackState,
        _data: &BackendData,
        window: WindowId,
        _window_data: Option<ShmBlock>,
        _region: Option<Region>,
        _flags: FlipFlags,
    ) -> WmResult<()> {
        self.record(BackendCall::UpdateWindow { window });
        Ok(())
    }

    fn update_cursor(
        &self,
        stack: &mut StackState,
        _data: &BackendData,
        _stack_data: Option<ShmBlock>,
        flags: CursorUpdateFlags,
    ) -> WmResult<()> {
        self.record(BackendCall::UpdateCursor {
            stack: stack.id(),
            flags,
        });
        Ok(())
    }
}
