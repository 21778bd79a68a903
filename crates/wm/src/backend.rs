//! The window manager backend contract
//!
//! A backend implements window placement, stacking order, focus and input
//! routing. The core calls it for every stack and window operation and
//! hands it the backend-global data blocks together with the opaque
//! per-stack or per-window block it asked for in `WmInfo`.
//!
//! Stack-level and window-level methods receive the locked `StackState`;
//! the core never calls them without holding the stack lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fusion::{ShmBlock, ShmPool};
use serde::Serialize;
use surface::FlipFlags;

use crate::error::{WmError, WmResult};
use crate::stack::StackState;
use crate::types::{
    ConfigFlags, CursorUpdateFlags, Grab, InputEvent, Insets, PropertyValue, Region, Restack, WindowConfig, WindowId,
};

/// Version of the core/backend data layout. A joining process must run the
/// same version as the session it joins.
pub const WM_ABI_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WmVersion {
    pub major: u32,
    pub minor: u32,
    /// Layout version of the backend's shared blocks
    pub binary: u32,
}

/// What a backend reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WmInfo {
    pub name: String,
    pub vendor: String,
    pub version: WmVersion,

    /// Process-local backend data
    pub wm_data_size: usize,
    /// Backend data shared by every process of the session
    pub wm_shared_size: usize,
    /// Shared block allocated for every stack
    pub stack_data_size: usize,
    /// Shared block allocated for every window
    pub window_data_size: usize,
}

/// Backend-global data: the local blob of this process and the shared
/// block of the session
pub struct BackendData {
    shm: Arc<ShmPool>,
    shared: Option<ShmBlock>,
    local: Mutex<Vec<u8>>,
}

impl std::fmt::Debug for BackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendData")
            .field("shared", &self.shared)
            .field("local", &self.local().len())
            .finish()
    }
}

impl BackendData {
    /// Zero-filled local data of `local_size` bytes next to the shared block
    pub(crate) fn new(shm: Arc<ShmPool>, shared: Option<ShmBlock>, local_size: usize) -> WmResult<Self> {
        let mut local = Vec::new();
        local
            .try_reserve_exact(local_size)
            .map_err(|_| WmError::NoSystemMemory)?;
        local.resize(local_size, 0);
        Ok(Self {
            shm,
            shared,
            local: Mutex::new(local),
        })
    }

    pub fn shm(&self) -> &ShmPool {
        &self.shm
    }

    pub fn shared(&self) -> Option<ShmBlock> {
        self.shared
    }

    pub fn local(&self) -> MutexGuard<'_, Vec<u8>> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A window manager implementation
///
/// Errors are returned verbatim to the caller of the core.
pub trait WmBackend: Send + Sync {
    fn info(&self) -> WmInfo;

    /// First process: set up the shared block
    fn initialize(&self, data: &BackendData) -> WmResult<()>;

    /// Later process: attach to the shared block
    fn join(&self, data: &BackendData) -> WmResult<()>;

    /// Last process leaves the session
    fn shutdown(&self, emergency: bool, data: &BackendData) -> WmResult<()>;

    /// Non-last process leaves the session
    fn leave(&self, emergency: bool, data: &BackendData) -> WmResult<()>;

    fn suspend(&self, data: &BackendData) -> WmResult<()>;

    fn resume(&self, data: &BackendData) -> WmResult<()>;

    /// Every core part of the session is up
    fn post_init(&self, data: &BackendData) -> WmResult<()>;

    fn init_stack(&self, stack: &mut StackState, data: &BackendData, stack_data: Option<ShmBlock>) -> WmResult<()>;

    fn close_stack(&self, stack: &mut StackState, data: &BackendData, stack_data: Option<ShmBlock>) -> WmResult<()>;

    fn set_active(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        active: bool,
    ) -> WmResult<()>;

    fn resize_stack(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        width: i32,
        height: i32,
    ) -> WmResult<()>;

    fn process_input(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        event: &InputEvent,
    ) -> WmResult<()>;

    /// Release every key still held down
    fn flush_keys(&self, stack: &mut StackState, data: &BackendData, stack_data: Option<ShmBlock>) -> WmResult<()>;

    /// Topmost window that takes pointer input at `(x, y)`
    fn window_at(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        x: i32,
        y: i32,
    ) -> WmResult<Option<WindowId>>;

    fn window_lookup(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        id: WindowId,
    ) -> WmResult<Option<WindowId>>;

    /// Visit windows from top to bottom until `visit` returns false
    fn enum_windows(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        visit: &mut dyn FnMut(WindowId) -> bool,
    ) -> WmResult<()>;

    fn get_insets(&self, stack: &mut StackState, window: WindowId) -> WmResult<Insets>;

    /// The window exists but is not shown yet; the backend may adjust its
    /// configuration
    fn preconfigure_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()>;

    fn add_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()>;

    fn remove_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()>;

    /// Store a property, returning the value it replaces
    fn set_window_property(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        key: &str,
        value: PropertyValue,
    ) -> WmResult<Option<PropertyValue>>;

    fn get_window_property(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue>;

    fn remove_window_property(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue>;

    /// Apply the fields of `config` selected by `flags`
    fn set_window_config(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        config: &WindowConfig,
        flags: ConfigFlags,
    ) -> WmResult<()>;

    fn restack_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        restack: Restack,
    ) -> WmResult<()>;

    fn grab(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()>;

    fn ungrab(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        grab: Grab,
    ) -> WmResult<()>;

    fn request_focus(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
    ) -> WmResult<()>;

    fn update_stack(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        region: Option<Region>,
        flags: FlipFlags,
    ) -> WmResult<()>;

    fn update_window(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        window: WindowId,
        window_data: Option<ShmBlock>,
        region: Option<Region>,
        flags: FlipFlags,
    ) -> WmResult<()>;

    fn update_cursor(
        &self,
        stack: &mut StackState,
        data: &BackendData,
        stack_data: Option<ShmBlock>,
        flags: CursorUpdateFlags,
    ) -> WmResult<()>;
}
