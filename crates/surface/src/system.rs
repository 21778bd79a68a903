//! System memory pool

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SurfaceError, SurfaceResult};
use crate::manager::SurfaceManager;
use crate::pool::{AccessFlags, BufferLock, BufferRequest, Placement, PoolCaps, PoolDescription, PoolPriority, SurfacePool};
use crate::surface::SurfaceTypes;

pub const SYSTEM_POOL_NAME: &str = "System Memory";

/// Heap memory shared by the attached processes
pub struct SystemShared {
    memory: Box<[u8]>,
    manager: SurfaceManager,
    description: PoolDescription,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for SystemShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemShared")
            .field("size", &self.memory.len())
            .field("manager", &self.manager)
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Lower priority pool serving everything except layer buffers
#[derive(Debug)]
pub struct SystemPool {
    shared: Arc<SystemShared>,
    attached: AtomicBool,
}

impl SystemPool {
    pub fn init(size: usize) -> SurfaceResult<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| SurfaceError::NoSystemMemory(size))?;
        memory.resize(size, 0);

        let description = PoolDescription {
            name: SYSTEM_POOL_NAME.to_string(),
            caps: PoolCaps::VIRTUAL,
            cpu: AccessFlags::READ | AccessFlags::WRITE | AccessFlags::SHARED,
            gpu: AccessFlags::empty(),
            layers: AccessFlags::empty(),
            types: SurfaceTypes::WINDOW
                | SurfaceTypes::CURSOR
                | SurfaceTypes::FONT
                | SurfaceTypes::SHARED
                | SurfaceTypes::INTERNAL,
            priority: PoolPriority::Low,
            size,
        };

        tracing::info!(size, "system memory pool initialized");

        Ok(Self {
            shared: Arc::new(SystemShared {
                memory: memory.into_boxed_slice(),
                manager: SurfaceManager::new(size, 8, 4),
                description,
                destroyed: AtomicBool::new(false),
            }),
            attached: AtomicBool::new(true),
        })
    }

    pub fn join(shared: &Arc<SystemShared>) -> SurfaceResult<Self> {
        if shared.destroyed.load(Ordering::Acquire) {
            return Err(SurfaceError::Detached(shared.description.name.clone()));
        }
        Ok(Self {
            shared: shared.clone(),
            attached: AtomicBool::new(true),
        })
    }

    pub fn shared(&self) -> &Arc<SystemShared> {
        &self.shared
    }

    pub fn manager(&self) -> &SurfaceManager {
        &self.shared.manager
    }

    fn check(&self) -> SurfaceResult<()> {
        if !self.attached.load(Ordering::Acquire) || self.shared.destroyed.load(Ordering::Acquire) {
            return Err(SurfaceError::Detached(self.shared.description.name.clone()));
        }
        Ok(())
    }

    fn refuse_layers(request: &BufferRequest) -> SurfaceResult<()> {
        if request.is_layer() {
            return Err(SurfaceError::Unsupported("layer buffers need video memory".into()));
        }
        Ok(())
    }
}

impl SurfacePool for SystemPool {
    fn description(&self) -> &PoolDescription {
        &self.shared.description
    }

    fn test_config(&self, request: &BufferRequest) -> SurfaceResult<()> {
        self.check()?;
        Self::refuse_layers(request)?;
        self.shared.manager.test_allocate(&request.config)
    }

    fn allocate_buffer(&self, request: &BufferRequest) -> SurfaceResult<Placement> {
        self.check()?;
        Self::refuse_layers(request)?;
        let (id, chunk) = self.shared.manager.allocate(&request.config)?;
        Ok(Placement {
            offset: chunk.offset,
            pitch: chunk.pitch,
            size: chunk.length,
            chunk: Some(id),
        })
    }

    fn deallocate_buffer(&self, placement: &Placement) -> SurfaceResult<()> {
        self.check()?;
        let id = placement.chunk.ok_or(SurfaceError::UnknownChunk)?;
        self.shared.manager.deallocate(id)
    }

    fn lock(&self, placement: &Placement) -> SurfaceResult<BufferLock> {
        self.check()?;
        Ok(BufferLock {
            addr: self.shared.memory.as_ptr() as usize + placement.offset,
            phys: 0,
            pitch: placement.pitch,
            offset: placement.offset,
        })
    }

    fn destroy(&self) -> SurfaceResult<()> {
        self.check()?;
        self.shared.manager.reset();
        self.shared.destroyed.store(true, Ordering::Release);
        self.attached.store(false, Ordering::Release);
        tracing::info!("system memory pool destroyed");
        Ok(())
    }

    fn leave(&self) -> SurfaceResult<()> {
        self.check()?;
        self.attached.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;
    use crate::surface::{ResourceId, SurfaceConfig};

    fn request(types: SurfaceTypes) -> BufferRequest {
        BufferRequest {
            config: SurfaceConfig::new(32, 32, PixelFormat::Argb),
            types,
            resource_id: ResourceId::NONE,
            index: 0,
        }
    }

    #[test]
    fn refuses_layer_buffers() {
        let pool = SystemPool::init(64 * 1024).unwrap();
        assert!(matches!(
            pool.test_config(&request(SurfaceTypes::LAYER)),
            Err(SurfaceError::Unsupported(_))
        ));
        assert!(matches!(
            pool.allocate_buffer(&request(SurfaceTypes::LAYER)),
            Err(SurfaceError::Unsupported(_))
        ));
    }

    #[test]
    fn window_buffer_lock_has_no_physical_address() {
        let pool = SystemPool::init(64 * 1024).unwrap();
        let placement = pool.allocate_buffer(&request(SurfaceTypes::WINDOW)).unwrap();
        let lock = pool.lock(&placement).unwrap();
        assert_eq!(lock.phys, 0);
        assert_eq!(lock.pitch, 128);
        assert_ne!(lock.addr, 0);
    }
}
