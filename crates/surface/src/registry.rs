//! Pool negotiation
//!
//! Pools are kept in priority order. A buffer goes to the first pool that
//! serves its surface types, passes `test_config` and then allocates.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{SurfaceError, SurfaceResult};
use crate::pool::{Allocation, BufferLock, BufferRequest, PoolDescription, PoolId, SurfacePool};

struct Entry {
    id: PoolId,
    pool: Arc<dyn SurfacePool>,
}

#[derive(Default)]
pub struct PoolRegistry {
    /// Highest priority first; equal priorities keep registration order
    pools: RwLock<Vec<Entry>>,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.descriptions()).finish()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pool: Arc<dyn SurfacePool>) -> PoolId {
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        let id = PoolId(pools.len() as u32);
        tracing::info!(
            pool = %pool.description().name,
            id = id.0,
            priority = ?pool.description().priority,
            "registered surface pool"
        );
        pools.push(Entry { id, pool });
        pools.sort_by(|a, b| b.pool.description().priority.cmp(&a.pool.description().priority));
        id
    }

    pub fn pool(&self, id: PoolId) -> Option<Arc<dyn SurfacePool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.pool.clone())
    }

    /// Look a pool up by its description name, ignoring case
    pub fn pool_by_name(&self, name: &str) -> Option<(PoolId, Arc<dyn SurfacePool>)> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.pool.description().name.eq_ignore_ascii_case(name))
            .map(|entry| (entry.id, entry.pool.clone()))
    }

    /// Descriptions in negotiation order
    pub fn descriptions(&self) -> Vec<(PoolId, PoolDescription)> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| (entry.id, entry.pool.description().clone()))
            .collect()
    }

    fn candidates(&self, request: &BufferRequest) -> Vec<(PoolId, Arc<dyn SurfacePool>)> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.pool.description().types.contains(request.types))
            .map(|entry| (entry.id, entry.pool.clone()))
            .collect()
    }

    fn try_pool(id: PoolId, pool: &dyn SurfacePool, request: &BufferRequest) -> SurfaceResult<Allocation> {
        pool.test_config(request)?;
        let placement = pool.allocate_buffer(request)?;
        tracing::debug!(
            pool = %pool.description().name,
            index = request.index,
            offset = placement.offset,
            size = placement.size,
            "buffer allocated"
        );
        Ok(Allocation { pool: id, placement })
    }

    /// Allocate from the first pool that accepts the buffer
    ///
    /// When every candidate fails, the error of the highest priority one
    /// is returned.
    pub fn allocate(&self, request: &BufferRequest) -> SurfaceResult<Allocation> {
        let candidates = self.candidates(request);
        if candidates.is_empty() {
            return Err(SurfaceError::Unsupported(format!(
                "no pool serves surface types {:?}",
                request.types
            )));
        }

        let mut first_error = None;
        for (id, pool) in candidates {
            match Self::try_pool(id, pool.as_ref(), request) {
                Ok(allocation) => return Ok(allocation),
                Err(e) => {
                    tracing::debug!(pool = %pool.description().name, error = %e, "pool declined buffer");
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(SurfaceError::Unsupported("no pool accepted the buffer".into())))
    }

    /// Allocate from one specific pool
    pub fn allocate_in(&self, id: PoolId, request: &BufferRequest) -> SurfaceResult<Allocation> {
        let pool = self.pool(id).ok_or_else(|| SurfaceError::UnknownPool(format!("#{}", id.0)))?;
        Self::try_pool(id, pool.as_ref(), request)
    }

    fn owner(&self, allocation: &Allocation) -> SurfaceResult<Arc<dyn SurfacePool>> {
        self.pool(allocation.pool)
            .ok_or_else(|| SurfaceError::UnknownPool(format!("#{}", allocation.pool.0)))
    }

    pub fn deallocate(&self, allocation: &Allocation) -> SurfaceResult<()> {
        self.owner(allocation)?.deallocate_buffer(&allocation.placement)
    }

    pub fn lock(&self, allocation: &Allocation) -> SurfaceResult<BufferLock> {
        self.owner(allocation)?.lock(&allocation.placement)
    }

    pub fn unlock(&self, allocation: &Allocation, lock: &BufferLock) -> SurfaceResult<()> {
        self.owner(allocation)?.unlock(&allocation.placement, lock)
    }

    /// Destroy every pool (last process) or leave them all
    pub fn shutdown(&self, destroy: bool) {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        for entry in pools.iter() {
            let result = if destroy {
                entry.pool.destroy()
            } else {
                entry.pool.leave()
            };
            if let Err(e) = result {
                tracing::warn!(pool = %entry.pool.description().name, error = %e, "pool teardown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MemoryFramebuffer, VideoMode};
    use crate::fbdev::FbdevPool;
    use crate::format::PixelFormat;
    use crate::surface::{ResourceId, Surface, SurfaceCaps, SurfaceConfig, SurfaceTypes};
    use crate::system::SystemPool;

    struct Fixture {
        registry: Arc<PoolRegistry>,
        fbdev: Arc<FbdevPool>,
        system: Arc<SystemPool>,
    }

    fn fixture(fb_size: usize, system_size: usize) -> Fixture {
        let fb = Arc::new(MemoryFramebuffer::new(fb_size, 0, vec![VideoMode::new(64, 32, 0)]).unwrap());
        let fbdev = Arc::new(FbdevPool::init(fb).unwrap());
        let system = Arc::new(SystemPool::init(system_size).unwrap());
        let registry = Arc::new(PoolRegistry::new());
        // Registered low priority first; negotiation must still try video memory first
        registry.register(system.clone());
        registry.register(fbdev.clone());
        Fixture { registry, fbdev, system }
    }

    fn window_request(width: u32, height: u32) -> BufferRequest {
        BufferRequest {
            config: SurfaceConfig::new(width, height, PixelFormat::Argb),
            types: SurfaceTypes::WINDOW,
            resource_id: ResourceId::NONE,
            index: 0,
        }
    }

    #[test]
    fn pools_are_ordered_by_priority() {
        let fx = fixture(64 * 1024, 64 * 1024);
        let names: Vec<String> = fx.registry.descriptions().into_iter().map(|(_, d)| d.name).collect();
        assert_eq!(names, ["Frame Buffer Memory", "System Memory"]);
    }

    #[test]
    fn falls_back_to_system_memory_when_video_memory_is_full() {
        let fx = fixture(1536, 64 * 1024);
        let first = fx.registry.allocate(&window_request(16, 16)).unwrap();
        let second = fx.registry.allocate(&window_request(16, 16)).unwrap();

        assert_eq!(fx.registry.pool(first.pool).unwrap().description().name, "Frame Buffer Memory");
        assert_eq!(fx.registry.pool(second.pool).unwrap().description().name, "System Memory");
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 1);
        assert_eq!(fx.system.manager().stats().used_chunks, 1);
    }

    #[test]
    fn exhausted_everywhere_reports_out_of_space() {
        let fx = fixture(1024, 1024);
        let result = fx.registry.allocate(&window_request(64, 64));
        assert!(matches!(result, Err(SurfaceError::OutOfSpace { .. })));
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        let fx = fixture(4096, 4096);
        let (id, pool) = fx.registry.pool_by_name("system memory").unwrap();
        assert_eq!(pool.description().name, "System Memory");
        assert!(fx.registry.pool(id).is_some());
        assert!(fx.registry.pool_by_name("texture memory").is_none());
    }

    #[test]
    fn surface_releases_buffers_on_drop() {
        let fx = fixture(64 * 1024, 64 * 1024);
        let config = SurfaceConfig::new(16, 16, PixelFormat::Argb).with_caps(SurfaceCaps::TRIPLE);
        let surface = Surface::new(&fx.registry, config, SurfaceTypes::WINDOW, ResourceId::NONE).unwrap();
        assert_eq!(surface.buffers().len(), 3);
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 3);

        drop(surface);
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 0);
    }

    #[test]
    fn reformat_replaces_buffers() {
        let fx = fixture(64 * 1024, 64 * 1024);
        let config = SurfaceConfig::new(16, 16, PixelFormat::Argb);
        let mut surface = Surface::new(&fx.registry, config, SurfaceTypes::WINDOW, ResourceId::NONE).unwrap();
        surface.reformat(32, 8, PixelFormat::Rgb16).unwrap();

        assert_eq!(surface.size(), (32, 8));
        assert_eq!(surface.buffers()[0].pitch, 64);
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 1);
    }

    #[test]
    fn failed_surface_keeps_no_buffers() {
        let fx = fixture(4096, 1024);
        // Two 2 KiB buffers fill video memory, the third fits nowhere
        let config = SurfaceConfig::new(32, 16, PixelFormat::Argb).with_caps(SurfaceCaps::TRIPLE);
        let result = Surface::new(&fx.registry, config, SurfaceTypes::WINDOW, ResourceId::NONE);

        assert!(matches!(result, Err(SurfaceError::OutOfSpace { .. })));
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 0);
        assert_eq!(fx.system.manager().stats().used_chunks, 0);
    }

    #[test]
    fn primary_layer_surface_sets_mode() {
        let fx = fixture(64 * 1024, 4096);
        let config = SurfaceConfig::new(64, 32, PixelFormat::Rgb16).with_caps(SurfaceCaps::DOUBLE);
        let surface = Surface::new(&fx.registry, config, SurfaceTypes::LAYER, ResourceId::PRIMARY_LAYER).unwrap();

        let buffers = surface.buffers();
        assert_eq!(buffers[0].offset, 0);
        assert_eq!(buffers[1].offset, 32 * 128);
        assert_eq!(fx.fbdev.manager().stats().used_chunks, 0);
    }
}
