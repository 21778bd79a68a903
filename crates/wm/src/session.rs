//! Session context
//!
//! `SessionShared` is what every attached process sees: the shared memory
//! pool, the window manager's shared record, the surface pools and the id
//! counters. `Session` is one process's attachment: its fusion world and
//! its window manager core.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fusion::{FusionCall, ShmBlock, ShmPool, World, WorldShared};
use surface::{PixelFormat, PoolRegistry};

use crate::backend::WmInfo;
use crate::config::Config;
use crate::core::WmCore;
use crate::error::WmResult;
use crate::module::ModuleRegistry;
use crate::stack::{LayerContext, WindowStack};
use crate::types::{StackId, WindowId};

/// The window manager's record in the session
#[derive(Debug)]
pub(crate) struct WmShared {
    pub(crate) abi: u32,
    /// Module name, stored in the shared pool
    pub(crate) name: ShmBlock,
    pub(crate) info: WmInfo,
    pub(crate) data: Option<ShmBlock>,
    pub(crate) stacks: Vec<Arc<WindowStack>>,
}

pub struct SessionShared {
    index: u32,
    shm: Arc<ShmPool>,
    world: Arc<WorldShared>,
    pools: Arc<PoolRegistry>,
    pixel_format: PixelFormat,
    wm: RwLock<Option<WmShared>>,
    next_window_id: AtomicU32,
    next_stack_id: AtomicU32,
    attached: AtomicU32,
}

impl std::fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionShared")
            .field("index", &self.index)
            .field("shm", &self.shm)
            .field("attached", &self.attached.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionShared {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn shm(&self) -> &Arc<ShmPool> {
        &self.shm
    }

    pub fn world(&self) -> &Arc<WorldShared> {
        &self.world
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Default pixel format of window surfaces
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Processes currently attached
    pub fn attached(&self) -> u32 {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn wm(&self) -> RwLockReadGuard<'_, Option<WmShared>> {
        self.wm.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wm_mut(&self) -> RwLockWriteGuard<'_, Option<WmShared>> {
        self.wm.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_window_id(&self) -> WindowId {
        WindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_stack_id(&self) -> StackId {
        StackId(self.next_stack_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// One process attached to a session
pub struct Session {
    shared: Arc<SessionShared>,
    world: World,
    core: Arc<WmCore>,
    config: Config,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("shared", &self.shared)
            .field("world", &self.world)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create session `index` and initialize its window manager
    pub fn create(index: u32, config: Config, pools: Arc<PoolRegistry>, modules: ModuleRegistry) -> WmResult<Self> {
        let world = World::create(&config.world_config(index))?;
        let shared = Arc::new(SessionShared {
            index,
            shm: Arc::new(ShmPool::new(format!("stackfb-{index}"), config.shm_pool_size)),
            world: world.shared().clone(),
            pools,
            pixel_format: config.pixel_format,
            wm: RwLock::new(None),
            next_window_id: AtomicU32::new(1),
            next_stack_id: AtomicU32::new(1),
            attached: AtomicU32::new(0),
        });

        let core = Arc::new(WmCore::new(shared.clone(), modules, config.clone()));
        core.initialize()?;
        shared.attached.fetch_add(1, Ordering::AcqRel);

        tracing::info!(index, fusion_id = world.id().0, "session created");
        Ok(Self {
            shared,
            world,
            core,
            config,
        })
    }

    /// Attach this process to a running session
    pub fn join(shared: &Arc<SessionShared>, config: Config, modules: ModuleRegistry) -> WmResult<Self> {
        let world = World::join(shared.world())?;
        let core = Arc::new(WmCore::new(shared.clone(), modules, config.clone()));
        core.join()?;
        shared.attached.fetch_add(1, Ordering::AcqRel);

        tracing::info!(index = shared.index, fusion_id = world.id().0, "joined session");
        Ok(Self {
            shared: shared.clone(),
            world,
            core,
            config,
        })
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn core(&self) -> &Arc<WmCore> {
        &self.core
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A layer context with its own window stack
    pub fn create_context(&self, width: i32, height: i32) -> WmResult<Arc<LayerContext>> {
        LayerContext::create(&self.core, width, height)
    }

    /// Register a call owned by this process
    pub fn register_call(
        &self,
        handler: impl fusion::CallHandler + 'static,
    ) -> WmResult<FusionCall> {
        Ok(self.world.register_call(handler)?)
    }

    /// Tear the session down; only the last attached process does this
    ///
    /// An emergency shutdown closes every stack first.
    pub fn shutdown(self, emergency: bool) -> WmResult<()> {
        if emergency {
            self.core.close_all_stacks();
        }
        let result = self.core.shutdown(emergency);
        self.shared.pools.shutdown(true);
        self.shared.attached.fetch_sub(1, Ordering::AcqRel);
        self.world.exit();
        tracing::info!(index = self.shared.index, emergency, "session shut down");
        result
    }

    /// Detach this process, leaving the session running
    pub fn leave(self, emergency: bool) -> WmResult<()> {
        let result = self.core.leave(emergency);
        self.shared.attached.fetch_sub(1, Ordering::AcqRel);
        self.world.exit();
        tracing::info!(index = self.shared.index, emergency, "left session");
        result
    }
}
