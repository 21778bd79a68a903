//! Surfaces shared between windows, cursors and client interfaces

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use surface::{BufferLock, PixelFormat, PoolId, PoolRegistry, ResourceId, Surface, SurfaceConfig, SurfaceTypes};

use crate::error::{WmError, WmResult};

/// A surface with interior locking; its buffers go back to their pools
/// when the last `Arc` is dropped
#[derive(Debug)]
pub struct CoreSurface {
    surface: Mutex<Surface>,
}

impl CoreSurface {
    pub fn new(
        registry: &Arc<PoolRegistry>,
        config: SurfaceConfig,
        types: SurfaceTypes,
        resource_id: ResourceId,
    ) -> WmResult<Arc<Self>> {
        let surface = Surface::new(registry, config, types, resource_id)?;
        Ok(Arc::new(Self {
            surface: Mutex::new(surface),
        }))
    }

    pub fn new_in_pool(
        registry: &Arc<PoolRegistry>,
        pool: PoolId,
        config: SurfaceConfig,
        types: SurfaceTypes,
    ) -> WmResult<Arc<Self>> {
        let surface = Surface::new_in_pool(registry, pool, config, types)?;
        Ok(Arc::new(Self {
            surface: Mutex::new(surface),
        }))
    }

    fn inner(&self) -> MutexGuard<'_, Surface> {
        self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> SurfaceConfig {
        *self.inner().config()
    }

    pub fn size(&self) -> (u32, u32) {
        self.inner().size()
    }

    pub fn format(&self) -> PixelFormat {
        self.inner().format()
    }

    pub fn buffer_count(&self) -> usize {
        self.inner().buffers().len()
    }

    pub fn lock(&self, index: usize) -> WmResult<BufferLock> {
        Ok(self.inner().lock(index)?)
    }

    pub fn unlock(&self, index: usize, lock: &BufferLock) -> WmResult<()> {
        Ok(self.inner().unlock(index, lock)?)
    }

    /// Reallocate at a new size, keeping the format
    pub fn resize(&self, width: u32, height: u32) -> WmResult<()> {
        if width == 0 || height == 0 {
            return Err(WmError::invalid("zero sized surface"));
        }
        let mut surface = self.inner();
        let format = surface.format();
        Ok(surface.reformat(width, height, format)?)
    }
}
