//! Surface descriptions and surfaces

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{SurfaceError, SurfaceResult};
use crate::format::PixelFormat;
use crate::pool::{Allocation, BufferLock, BufferRequest, PoolId};
use crate::registry::PoolRegistry;

bitflags! {
    /// Surface capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SurfaceCaps: u32 {
        const PRIMARY = 0x0001;
        const SYSTEMONLY = 0x0002;
        const VIDEOONLY = 0x0004;
        const DOUBLE = 0x0010;
        const INTERLACED = 0x0040;
        const TRIPLE = 0x0200;
        const PREMULTIPLIED = 0x1000;
        const SHARED = 0x4000;

        const FLIPPING = Self::DOUBLE.bits() | Self::TRIPLE.bits();
    }
}

bitflags! {
    /// What a surface is used for; pools declare which types they serve
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SurfaceTypes: u32 {
        const LAYER = 0x01;
        const WINDOW = 0x02;
        const CURSOR = 0x04;
        const FONT = 0x08;
        const SHARED = 0x10;
        const INTERNAL = 0x100;
        const EXTERNAL = 0x200;
    }
}

bitflags! {
    /// Flags for flipping a surface onto the display
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FlipFlags: u32 {
        const WAIT = 0x01;
        const BLIT = 0x02;
        const ONSYNC = 0x04;
        const WAITFORSYNC = Self::WAIT.bits() | Self::ONSYNC.bits();
    }
}

/// Layer or owner a surface belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl ResourceId {
    /// The primary display layer
    pub const PRIMARY_LAYER: ResourceId = ResourceId(0);
    pub const NONE: ResourceId = ResourceId(u32::MAX);
}

/// Logical pixel buffer description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub caps: SurfaceCaps,
}

impl SurfaceConfig {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            caps: SurfaceCaps::empty(),
        }
    }

    pub fn with_caps(mut self, caps: SurfaceCaps) -> Self {
        self.caps = caps;
        self
    }

    /// 1 for single, 2 for double, 3 for triple buffered surfaces
    pub fn buffer_count(&self) -> usize {
        if self.caps.contains(SurfaceCaps::TRIPLE) {
            3
        } else if self.caps.contains(SurfaceCaps::DOUBLE) {
            2
        } else {
            1
        }
    }
}

/// A surface and the allocations backing its buffers
///
/// Buffers are released through the registry on `reformat` and on drop.
pub struct Surface {
    registry: Arc<PoolRegistry>,
    config: SurfaceConfig,
    types: SurfaceTypes,
    resource_id: ResourceId,
    /// Restricts allocation to one pool
    pool: Option<PoolId>,
    buffers: Vec<Allocation>,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("config", &self.config)
            .field("types", &self.types)
            .field("resource_id", &self.resource_id)
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl Surface {
    /// Create a surface, negotiating a pool for every buffer
    pub fn new(
        registry: &Arc<PoolRegistry>,
        config: SurfaceConfig,
        types: SurfaceTypes,
        resource_id: ResourceId,
    ) -> SurfaceResult<Self> {
        Self::build(registry, config, types, resource_id, None)
    }

    /// Create a surface whose buffers all live in `pool`
    pub fn new_in_pool(
        registry: &Arc<PoolRegistry>,
        pool: PoolId,
        config: SurfaceConfig,
        types: SurfaceTypes,
    ) -> SurfaceResult<Self> {
        Self::build(registry, config, types, ResourceId::NONE, Some(pool))
    }

    fn build(
        registry: &Arc<PoolRegistry>,
        config: SurfaceConfig,
        types: SurfaceTypes,
        resource_id: ResourceId,
        pool: Option<PoolId>,
    ) -> SurfaceResult<Self> {
        let mut surface = Self {
            registry: registry.clone(),
            config,
            types,
            resource_id,
            pool,
            buffers: Vec::new(),
        };
        surface.allocate_buffers()?;
        Ok(surface)
    }

    fn allocate_buffers(&mut self) -> SurfaceResult<()> {
        debug_assert!(self.buffers.is_empty());
        for index in 0..self.config.buffer_count() {
            let request = BufferRequest {
                config: self.config,
                types: self.types,
                resource_id: self.resource_id,
                index,
            };
            let result = match self.pool {
                Some(pool) => self.registry.allocate_in(pool, &request),
                None => self.registry.allocate(&request),
            };
            match result {
                Ok(allocation) => self.buffers.push(allocation),
                Err(e) => {
                    self.release_buffers();
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            width = self.config.width,
            height = self.config.height,
            format = %self.config.format,
            buffers = self.buffers.len(),
            "surface allocated"
        );
        Ok(())
    }

    fn release_buffers(&mut self) {
        for allocation in self.buffers.drain(..) {
            if let Err(e) = self.registry.deallocate(&allocation) {
                tracing::warn!(pool = ?allocation.pool, error = %e, "failed to release surface buffer");
            }
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn types(&self) -> SurfaceTypes {
        self.types
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.config.format
    }

    pub fn buffers(&self) -> &[Allocation] {
        &self.buffers
    }

    /// Change size or format, reallocating every buffer
    ///
    /// On failure the surface keeps no buffers.
    pub fn reformat(&mut self, width: u32, height: u32, format: PixelFormat) -> SurfaceResult<()> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidArgument("zero sized surface"));
        }
        self.release_buffers();
        self.config.width = width;
        self.config.height = height;
        self.config.format = format;
        self.allocate_buffers()
    }

    /// Translate buffer `index` into CPU and physical addresses
    pub fn lock(&self, index: usize) -> SurfaceResult<BufferLock> {
        let allocation = self
            .buffers
            .get(index)
            .ok_or(SurfaceError::InvalidArgument("no such buffer"))?;
        self.registry.lock(allocation)
    }

    pub fn unlock(&self, index: usize, lock: &BufferLock) -> SurfaceResult<()> {
        let allocation = self
            .buffers
            .get(index)
            .ok_or(SurfaceError::InvalidArgument("no such buffer"))?;
        self.registry.unlock(allocation, lock)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.release_buffers();
    }
}
