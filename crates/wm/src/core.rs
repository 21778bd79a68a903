//! Window manager core
//!
//! Loads one backend per session and forwards every stack and window
//! operation to it together with the backend's data blocks. The core owns
//! those blocks: it allocates them before telling the backend and frees
//! them when the backend is done, unwinding on failure so no partial state
//! outlives a failed call.
//!
//! Using the core before `initialize`/`join` or after `shutdown`/`leave`
//! is a programming error and panics, as does passing a closed stack or a
//! window that is not in the stack.

use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use fusion::{ShmBlock, ShmPool};
use surface::FlipFlags;

use crate::backend::{BackendData, WmBackend, WmInfo, WM_ABI_VERSION};
use crate::config::Config;
use crate::error::{WmError, WmResult};
use crate::module::ModuleRegistry;
use crate::session::{SessionShared, WmShared};
use crate::stack::{StackState, WindowStack};
use crate::types::{
    ConfigFlags, CursorUpdateFlags, Grab, InputEvent, Insets, PropertyValue, Region, Restack, WindowConfig, WindowId,
};

/// This process's half of the window manager
struct WmLocal {
    module: String,
    backend: Arc<dyn WmBackend>,
    /// Copy of the session's backend info
    info: WmInfo,
    data: BackendData,
}

pub struct WmCore {
    session: Arc<SessionShared>,
    modules: ModuleRegistry,
    config: Config,
    local: RwLock<Option<WmLocal>>,
}

impl std::fmt::Debug for WmCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WmCore")
            .field("module", &self.module_name())
            .finish_non_exhaustive()
    }
}

fn free_block(shm: &ShmPool, block: ShmBlock, what: &'static str) {
    if let Err(e) = shm.free(block) {
        tracing::warn!(what, offset = block.offset(), error = %e, "failed to free shared block");
    }
}

/// Zero-filled shared block, none for zero sizes
fn alloc_block(shm: &ShmPool, size: usize) -> WmResult<Option<ShmBlock>> {
    if size == 0 {
        return Ok(None);
    }
    shm.calloc(size).map(Some).map_err(|e| {
        tracing::warn!(size, error = %e, "out of shared memory");
        WmError::NoSharedMemory
    })
}

fn assert_valid(stack: &StackState) {
    assert!(stack.is_valid(), "window stack {:?} used while not initialized", stack.id());
}

fn assert_window(stack: &StackState, window: WindowId) -> Option<ShmBlock> {
    assert_valid(stack);
    match stack.window(window) {
        Some(state) => state.window_data(),
        None => panic!("window {window} is not in stack {:?}", stack.id()),
    }
}

fn set_window_data(stack: &mut StackState, window: WindowId, block: Option<ShmBlock>) {
    if let Some(state) = stack.window_mut(window) {
        state.window_data = block;
    }
}

impl WmCore {
    pub fn new(session: Arc<SessionShared>, modules: ModuleRegistry, config: Config) -> Self {
        Self {
            session,
            modules,
            config,
            local: RwLock::new(None),
        }
    }

    pub fn session(&self) -> &Arc<SessionShared> {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.local.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Name of the loaded module
    pub fn module_name(&self) -> Option<String> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|local| local.module.clone())
    }

    fn local_mut(&self) -> RwLockWriteGuard<'_, Option<WmLocal>> {
        self.local.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<R>(&self, f: impl FnOnce(&WmLocal) -> R) -> R {
        let local = self.local.read().unwrap_or_else(PoisonError::into_inner);
        let Some(local) = local.as_ref() else {
            panic!("window manager core used before initialize or after shutdown");
        };
        assert!(self.session.wm().is_some(), "session has no window manager record");
        f(local)
    }

    fn shm(&self) -> &ShmPool {
        self.session.shm()
    }

    // ========== Lifecycle ==========

    /// Load the configured backend and set up the session's window manager
    pub fn initialize(&self) -> WmResult<()> {
        let mut local = self.local_mut();
        assert!(local.is_none(), "window manager core initialized twice");
        let mut wm = self.session.wm_mut();
        assert!(wm.is_none(), "session already has a window manager");

        let module = self.modules.find(self.config.wm.as_deref())?;
        let backend = module.instantiate(&self.config);
        let info = backend.info();
        tracing::info!(
            name = %info.name,
            major = info.version.major,
            minor = info.version.minor,
            vendor = %info.vendor,
            "window manager loaded"
        );

        let shm = self.session.shm();
        let name = shm.strdup(module.name()).map_err(|e| {
            tracing::warn!(error = %e, "out of shared memory");
            WmError::NoSharedMemory
        })?;

        let shared = match alloc_block(shm, info.wm_shared_size) {
            Ok(shared) => shared,
            Err(e) => {
                free_block(shm, name, "module name");
                return Err(e);
            }
        };

        let unwind = |shared: Option<ShmBlock>| {
            if let Some(block) = shared {
                free_block(shm, block, "shared window manager data");
            }
            free_block(shm, name, "module name");
        };

        let data = match BackendData::new(shm.clone(), shared, info.wm_data_size) {
            Ok(data) => data,
            Err(e) => {
                unwind(shared);
                return Err(e);
            }
        };

        if let Err(e) = backend.initialize(&data) {
            tracing::error!(error = %e, "could not initialize window manager");
            drop(data);
            unwind(shared);
            return Err(e);
        }

        *wm = Some(WmShared {
            abi: WM_ABI_VERSION,
            name,
            info: info.clone(),
            data: shared,
            stacks: Vec::new(),
        });
        *local = Some(WmLocal {
            module: module.name().to_string(),
            backend,
            info,
            data,
        });
        Ok(())
    }

    /// Attach to the window manager of a running session
    pub fn join(&self) -> WmResult<()> {
        let mut local = self.local_mut();
        assert!(local.is_none(), "window manager core joined twice");
        let wm = self.session.wm();
        let Some(wm) = wm.as_ref() else {
            panic!("joining a session without a window manager");
        };

        if wm.abi != WM_ABI_VERSION {
            tracing::error!(session = wm.abi, ours = WM_ABI_VERSION, "window manager ABI mismatch");
            return Err(WmError::VersionMismatch {
                expected: wm.abi,
                found: WM_ABI_VERSION,
            });
        }

        let name = self.shm().read_string(wm.name)?;
        let module = self.modules.find(Some(&name))?;
        let backend = module.instantiate(&self.config);
        let info = backend.info();

        if info.version.binary != wm.info.version.binary {
            tracing::error!(
                session = wm.info.version.binary,
                module = info.version.binary,
                "window manager binary version mismatch"
            );
            return Err(WmError::VersionMismatch {
                expected: wm.info.version.binary,
                found: info.version.binary,
            });
        }

        let data = BackendData::new(self.session.shm().clone(), wm.data, wm.info.wm_data_size)?;
        if let Err(e) = backend.join(&data) {
            tracing::error!(error = %e, "could not join window manager");
            return Err(e);
        }

        tracing::info!(module = %name, "joined window manager");
        *local = Some(WmLocal {
            module: name,
            backend,
            info: wm.info.clone(),
            data,
        });
        Ok(())
    }

    /// Last process: shut the backend down and free the shared data
    pub fn shutdown(&self, emergency: bool) -> WmResult<()> {
        let mut local = self.local_mut();
        let Some(local) = local.take() else {
            panic!("window manager core shut down while not initialized");
        };
        let mut wm = self.session.wm_mut();
        let Some(wm) = wm.take() else {
            panic!("session has no window manager record");
        };

        let result = local.backend.shutdown(emergency, &local.data);
        drop(local);

        if !wm.stacks.is_empty() {
            tracing::warn!(stacks = wm.stacks.len(), "window manager shut down with open stacks");
        }
        if let Some(block) = wm.data {
            free_block(self.shm(), block, "shared window manager data");
        }
        free_block(self.shm(), wm.name, "module name");

        tracing::info!(emergency, "window manager shut down");
        result
    }

    /// Non-last process: detach, keeping the shared data
    pub fn leave(&self, emergency: bool) -> WmResult<()> {
        let mut local = self.local_mut();
        let Some(local) = local.take() else {
            panic!("window manager core left while not initialized");
        };
        let result = local.backend.leave(emergency, &local.data);
        tracing::info!(emergency, "left window manager");
        result
    }

    pub fn suspend(&self) -> WmResult<()> {
        self.with(|l| l.backend.suspend(&l.data))
    }

    pub fn resume(&self) -> WmResult<()> {
        self.with(|l| l.backend.resume(&l.data))
    }

    pub fn post_init(&self) -> WmResult<()> {
        self.with(|l| l.backend.post_init(&l.data))
    }

    pub fn get_info(&self) -> WmInfo {
        match self.session.wm().as_ref() {
            Some(wm) => wm.info.clone(),
            None => panic!("session has no window manager record"),
        }
    }

    /// Close every registered stack and cut it loose from its context
    pub fn close_all_stacks(&self) {
        let stacks = match self.session.wm_mut().as_mut() {
            Some(wm) => std::mem::take(&mut wm.stacks),
            None => panic!("session has no window manager record"),
        };

        for stack in stacks {
            stack.detach_context();
            let mut state = stack.lock();
            if !state.is_valid() {
                continue;
            }
            let stack_data = state.stack_data();
            if let Err(e) = self.with(|l| l.backend.close_stack(&mut state, &l.data, stack_data)) {
                tracing::warn!(stack = stack.id().0, error = %e, "backend failed to close stack");
            }
            if let Some(block) = stack_data {
                free_block(self.shm(), block, "stack data");
                state.set_stack_data(None);
            }
            state.set_valid(false);
            tracing::info!(stack = stack.id().0, "stack closed");
        }
    }

    // ========== Stacks ==========

    /// Allocate the stack's shared block, initialize it in the backend and
    /// register the stack with the session
    pub fn init_stack(&self, stack: &Arc<WindowStack>) -> WmResult<()> {
        {
            let mut state = stack.lock();
            assert!(!state.is_valid(), "stack {:?} initialized twice", state.id());

            let stack_data = self.with(|l| -> WmResult<Option<ShmBlock>> {
                let block = alloc_block(self.shm(), l.info.stack_data_size)?;
                state.set_valid(true);
                if let Err(e) = l.backend.init_stack(&mut state, &l.data, block) {
                    state.set_valid(false);
                    if let Some(block) = block {
                        free_block(self.shm(), block, "stack data");
                    }
                    return Err(e);
                }
                Ok(block)
            })?;
            state.set_stack_data(stack_data);
        }

        match self.session.wm_mut().as_mut() {
            Some(wm) => wm.stacks.push(stack.clone()),
            None => panic!("session has no window manager record"),
        }
        tracing::debug!(stack = stack.id().0, "stack initialized");
        Ok(())
    }

    /// Close a stack in the backend and unregister it; only a final close
    /// frees the shared block
    pub fn close_stack(&self, stack: &Arc<WindowStack>, final_close: bool) -> WmResult<()> {
        let result = {
            let mut state = stack.lock();
            assert_valid(&state);
            let stack_data = state.stack_data();
            let result = self.with(|l| l.backend.close_stack(&mut state, &l.data, stack_data));
            if final_close {
                if let Some(block) = stack_data {
                    free_block(self.shm(), block, "stack data");
                    state.set_stack_data(None);
                }
            }
            state.set_valid(false);
            result
        };

        if let Some(wm) = self.session.wm_mut().as_mut() {
            wm.stacks.retain(|s| s.id() != stack.id());
        }
        tracing::info!(stack = stack.id().0, final_close, "stack closed");
        result
    }

    /// Stacks registered with the session
    pub fn stacks(&self) -> Vec<Arc<WindowStack>> {
        self.session.wm().as_ref().map(|wm| wm.stacks.clone()).unwrap_or_default()
    }

    pub fn set_active(&self, stack: &mut StackState, active: bool) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.set_active(stack, &l.data, stack_data, active))
    }

    pub fn resize_stack(&self, stack: &mut StackState, width: i32, height: i32) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.resize_stack(stack, &l.data, stack_data, width, height))
    }

    pub fn process_input(&self, stack: &mut StackState, event: &InputEvent) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.process_input(stack, &l.data, stack_data, event))
    }

    pub fn flush_keys(&self, stack: &mut StackState) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.flush_keys(stack, &l.data, stack_data))
    }

    pub fn window_at(&self, stack: &mut StackState, x: i32, y: i32) -> WmResult<Option<WindowId>> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.window_at(stack, &l.data, stack_data, x, y))
    }

    pub fn window_lookup(&self, stack: &mut StackState, id: WindowId) -> WmResult<Option<WindowId>> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.window_lookup(stack, &l.data, stack_data, id))
    }

    pub fn enum_windows(&self, stack: &mut StackState, visit: &mut dyn FnMut(WindowId) -> bool) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.enum_windows(stack, &l.data, stack_data, visit))
    }

    pub fn update_stack(&self, stack: &mut StackState, region: Option<Region>, flags: FlipFlags) -> WmResult<()> {
        assert_valid(stack);
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.update_stack(stack, &l.data, stack_data, region, flags))
    }

    /// Skipped entirely when cursor updates are disabled by configuration
    pub fn update_cursor(&self, stack: &mut StackState, flags: CursorUpdateFlags) -> WmResult<()> {
        assert_valid(stack);
        if self.config.no_cursor_updates {
            return Ok(());
        }
        let stack_data = stack.stack_data();
        self.with(|l| l.backend.update_cursor(stack, &l.data, stack_data, flags))
    }

    // ========== Windows ==========

    pub fn get_insets(&self, stack: &mut StackState, window: WindowId) -> WmResult<Insets> {
        assert_window(stack, window);
        self.with(|l| l.backend.get_insets(stack, window))
    }

    /// Allocate the window's shared block and announce the window; on
    /// rejection the block is freed again
    pub fn preconfigure_window(&self, stack: &mut StackState, window: WindowId) -> WmResult<()> {
        assert_window(stack, window);
        self.with(|l| {
            let block = alloc_block(self.shm(), l.info.window_data_size)?;
            set_window_data(stack, window, block);

            if let Err(e) = l.backend.preconfigure_window(stack, &l.data, window, block) {
                if let Some(block) = block {
                    free_block(self.shm(), block, "window data");
                    set_window_data(stack, window, None);
                }
                return Err(e);
            }
            tracing::debug!(window = %window, "window preconfigured");
            Ok(())
        })
    }

    pub fn add_window(&self, stack: &mut StackState, window: WindowId) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| {
            if let Err(e) = l.backend.add_window(stack, &l.data, window, window_data) {
                self.discard_window_data(stack, window);
                return Err(e);
            }
            tracing::debug!(window = %window, "window added");
            Ok(())
        })
    }

    /// Remove the window from the backend; its shared block is freed even
    /// when the backend fails
    pub fn remove_window(&self, stack: &mut StackState, window: WindowId) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        let result = self.with(|l| l.backend.remove_window(stack, &l.data, window, window_data));
        self.discard_window_data(stack, window);
        tracing::debug!(window = %window, ok = result.is_ok(), "window removed");
        result
    }

    /// Free the window's shared block without telling the backend
    pub(crate) fn discard_window_data(&self, stack: &mut StackState, window: WindowId) {
        let block = stack.window(window).and_then(|w| w.window_data());
        if let Some(block) = block {
            free_block(self.shm(), block, "window data");
            set_window_data(stack, window, None);
        }
    }

    pub fn set_window_property(
        &self,
        stack: &mut StackState,
        window: WindowId,
        key: &str,
        value: PropertyValue,
    ) -> WmResult<Option<PropertyValue>> {
        assert_window(stack, window);
        self.with(|l| l.backend.set_window_property(stack, &l.data, window, key, value))
    }

    pub fn get_window_property(&self, stack: &mut StackState, window: WindowId, key: &str) -> WmResult<PropertyValue> {
        assert_window(stack, window);
        self.with(|l| l.backend.get_window_property(stack, &l.data, window, key))
    }

    pub fn remove_window_property(
        &self,
        stack: &mut StackState,
        window: WindowId,
        key: &str,
    ) -> WmResult<PropertyValue> {
        assert_window(stack, window);
        self.with(|l| l.backend.remove_window_property(stack, &l.data, window, key))
    }

    pub fn set_window_config(
        &self,
        stack: &mut StackState,
        window: WindowId,
        config: &WindowConfig,
        flags: ConfigFlags,
    ) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| l.backend.set_window_config(stack, &l.data, window, window_data, config, flags))?;
        // The backend sees the old configuration, the change lands after it accepted
        if let Some(state) = stack.window_mut(window) {
            state.config.apply(config, flags);
        }
        Ok(())
    }

    pub fn restack_window(&self, stack: &mut StackState, window: WindowId, restack: Restack) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        if let Restack::Atop(relative) | Restack::Below(relative) = restack {
            assert_window(stack, relative);
        }
        self.with(|l| l.backend.restack_window(stack, &l.data, window, window_data, restack))
    }

    pub fn grab(&self, stack: &mut StackState, window: WindowId, grab: Grab) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| l.backend.grab(stack, &l.data, window, window_data, grab))
    }

    pub fn ungrab(&self, stack: &mut StackState, window: WindowId, grab: Grab) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| l.backend.ungrab(stack, &l.data, window, window_data, grab))
    }

    pub fn request_focus(&self, stack: &mut StackState, window: WindowId) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| l.backend.request_focus(stack, &l.data, window, window_data))
    }

    pub fn update_window(
        &self,
        stack: &mut StackState,
        window: WindowId,
        region: Option<Region>,
        flags: FlipFlags,
    ) -> WmResult<()> {
        let window_data = assert_window(stack, window);
        self.with(|l| l.backend.update_window(stack, &l.data, window, window_data, region, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::stack::LayerContext;
    use crate::types::WindowDescription;
    use crate::window::Window;
    use surface::PoolRegistry;

    fn session() -> Session {
        Session::create(0, Config::default(), Arc::new(PoolRegistry::new()), ModuleRegistry::builtin()).unwrap()
    }

    #[test]
    fn initialize_stores_module_name_in_shared_memory() {
        let session = session();
        let wm = session.shared().wm();
        let wm = wm.as_ref().unwrap();
        assert_eq!(session.shared().shm().read_string(wm.name).unwrap(), "stacking");
        assert_eq!(wm.abi, WM_ABI_VERSION);
    }

    #[test]
    fn unknown_module_fails_initialize_without_leaks() {
        let config = Config {
            wm: Some("tiling".into()),
            ..Config::default()
        };
        let result = Session::create(0, config, Arc::new(PoolRegistry::new()), ModuleRegistry::builtin());
        assert!(matches!(result, Err(WmError::ModuleNotFound(_))));
    }

    #[test]
    fn join_rejects_abi_skew() {
        let session = session();
        session.shared().wm_mut().as_mut().unwrap().abi = WM_ABI_VERSION + 1;

        let result = Session::join(session.shared(), Config::default(), ModuleRegistry::builtin());
        assert!(matches!(result, Err(WmError::VersionMismatch { .. })));
    }

    #[test]
    fn shutdown_frees_everything() {
        let session = session();
        let shm = session.shared().shm().clone();
        let context = session.create_context(64, 64).unwrap();
        let stack = context.stack().unwrap();
        let window = Window::create(&stack, &WindowDescription::new(0, 0, 8, 8).with_caps(crate::types::WindowCaps::INPUTONLY)).unwrap();
        window.unref();
        stack.close(true).unwrap();

        session.shutdown(false).unwrap();
        assert_eq!(shm.stats().live_blocks, 0);
    }

    #[test]
    fn close_all_stacks_detaches_contexts() {
        let session = session();
        let context: Arc<LayerContext> = session.create_context(32, 32).unwrap();
        let stack = context.stack().unwrap();

        session.core().close_all_stacks();

        assert!(context.stack().is_none());
        assert!(!stack.lock().is_valid());
        assert!(stack.lock().stack_data().is_none());
        assert!(session.core().stacks().is_empty());
    }

    #[test]
    #[should_panic(expected = "before initialize or after shutdown")]
    fn use_after_leave_panics() {
        let session = session();
        let context = session.create_context(16, 16).unwrap();
        let stack = context.stack().unwrap();
        session.core().leave(false).unwrap();
        let _ = stack.set_active(true);
    }
}
