//! Framebuffer memory pool
//!
//! Buffers of the primary layer sit at fixed offsets computed from the
//! display mode: `index * height * line_length`. Every other buffer is a
//! chunk from the pool's `SurfaceManager`, which spans the whole
//! framebuffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{FramebufferDevice, VideoMode};
use crate::error::{SurfaceError, SurfaceResult};
use crate::manager::SurfaceManager;
use crate::pool::{AccessFlags, BufferLock, BufferRequest, Placement, PoolCaps, PoolDescription, PoolPriority, SurfacePool};
use crate::surface::{FlipFlags, ResourceId, SurfaceCaps, SurfaceTypes};

pub const FBDEV_POOL_NAME: &str = "Frame Buffer Memory";

/// Byte offset alignment of chunks in video memory
const FBDEV_OFFSET_ALIGN: usize = 16;
/// Pitch alignment of chunks in video memory
const FBDEV_PITCH_ALIGN: u32 = 8;

/// Pool state every attached process sees
#[derive(Debug)]
pub struct FbdevShared {
    manager: SurfaceManager,
    description: PoolDescription,
    destroyed: AtomicBool,
}

pub struct FbdevPool {
    shared: Arc<FbdevShared>,
    device: Arc<dyn FramebufferDevice>,
    attached: AtomicBool,
}

impl std::fmt::Debug for FbdevPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbdevPool")
            .field("shared", &self.shared)
            .field("attached", &self.attached.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Highest priority mode of the given resolution; the first listed wins ties
pub fn find_mode(modes: &[VideoMode], width: u32, height: u32) -> Option<VideoMode> {
    modes
        .iter()
        .filter(|mode| mode.xres == width && mode.yres == height)
        .fold(None, |best: Option<&VideoMode>, mode| match best {
            Some(best) if best.priority >= mode.priority => Some(best),
            _ => Some(mode),
        })
        .copied()
}

impl FbdevPool {
    /// Create the pool over the device's whole memory
    pub fn init(device: Arc<dyn FramebufferDevice>) -> SurfaceResult<Self> {
        let memory = device.memory();
        let manager = SurfaceManager::new(memory.size, FBDEV_OFFSET_ALIGN, FBDEV_PITCH_ALIGN);

        let description = PoolDescription {
            name: FBDEV_POOL_NAME.to_string(),
            caps: PoolCaps::PHYSICAL | PoolCaps::VIRTUAL,
            cpu: AccessFlags::READ | AccessFlags::WRITE | AccessFlags::SHARED,
            gpu: AccessFlags::READ | AccessFlags::WRITE | AccessFlags::SHARED,
            layers: AccessFlags::READ,
            types: SurfaceTypes::LAYER
                | SurfaceTypes::WINDOW
                | SurfaceTypes::CURSOR
                | SurfaceTypes::FONT
                | SurfaceTypes::SHARED
                | SurfaceTypes::EXTERNAL,
            priority: PoolPriority::Default,
            size: memory.size,
        };

        tracing::info!(size = memory.size, phys = memory.phys, "framebuffer pool initialized");

        Ok(Self {
            shared: Arc::new(FbdevShared {
                manager,
                description,
                destroyed: AtomicBool::new(false),
            }),
            device,
            attached: AtomicBool::new(true),
        })
    }

    /// Attach another process to an existing pool
    pub fn join(shared: &Arc<FbdevShared>, device: Arc<dyn FramebufferDevice>) -> SurfaceResult<Self> {
        if shared.destroyed.load(Ordering::Acquire) {
            return Err(SurfaceError::Detached(shared.description.name.clone()));
        }
        tracing::info!("joined framebuffer pool");
        Ok(Self {
            shared: shared.clone(),
            device,
            attached: AtomicBool::new(true),
        })
    }

    pub fn shared(&self) -> &Arc<FbdevShared> {
        &self.shared
    }

    pub fn manager(&self) -> &SurfaceManager {
        &self.shared.manager
    }

    pub fn device(&self) -> &Arc<dyn FramebufferDevice> {
        &self.device
    }

    /// Flip the display to a locked buffer
    pub fn pan_display(&self, lock: &BufferLock, flags: FlipFlags, x: u32, y: u32) -> SurfaceResult<()> {
        self.check()?;
        tracing::trace!(offset = lock.offset, x, y, ?flags, "pan display");
        self.device.pan_display(lock, flags, x, y)
    }

    fn check(&self) -> SurfaceResult<()> {
        if !self.attached.load(Ordering::Acquire) || self.shared.destroyed.load(Ordering::Acquire) {
            return Err(SurfaceError::Detached(self.shared.description.name.clone()));
        }
        Ok(())
    }

    fn is_primary_layer(request: &BufferRequest) -> bool {
        request.is_layer() && request.resource_id == ResourceId::PRIMARY_LAYER
    }

    fn place_primary(&self, request: &BufferRequest) -> SurfaceResult<Placement> {
        let config = &request.config;
        let index = request.index;
        let flipping = config.caps.intersects(SurfaceCaps::FLIPPING);

        // The buffer written last by a mode change triggers the mode set
        if (flipping && index == 1) || (!flipping && index == 0) {
            let mode = find_mode(&self.device.modes(), config.width, config.height).ok_or_else(|| {
                SurfaceError::Unsupported(format!("no video mode for {}x{}", config.width, config.height))
            })?;
            tracing::info!(
                width = config.width,
                height = config.height,
                format = %config.format,
                priority = mode.priority,
                "setting video mode"
            );
            self.device.set_mode(&mode, config)?;
        }

        let pitch = self.device.memory().line_length;
        let size = config.height as usize * pitch as usize;
        let offset = index * size;

        tracing::info!(
            width = config.width,
            height = config.height,
            index,
            offset,
            pitch,
            "placed primary layer buffer"
        );

        Ok(Placement {
            offset,
            pitch,
            size,
            chunk: None,
        })
    }
}

impl SurfacePool for FbdevPool {
    fn description(&self) -> &PoolDescription {
        &self.shared.description
    }

    fn test_config(&self, request: &BufferRequest) -> SurfaceResult<()> {
        self.check()?;
        if request.is_layer() {
            return Ok(());
        }
        self.shared.manager.test_allocate(&request.config)
    }

    fn allocate_buffer(&self, request: &BufferRequest) -> SurfaceResult<Placement> {
        self.check()?;
        if Self::is_primary_layer(request) {
            return self.place_primary(request);
        }

        let (id, chunk) = self.shared.manager.allocate(&request.config)?;
        tracing::debug!(offset = chunk.offset, pitch = chunk.pitch, size = chunk.length, "framebuffer chunk allocated");
        Ok(Placement {
            offset: chunk.offset,
            pitch: chunk.pitch,
            size: chunk.length,
            chunk: Some(id),
        })
    }

    fn deallocate_buffer(&self, placement: &Placement) -> SurfaceResult<()> {
        self.check()?;
        match placement.chunk {
            Some(id) => self.shared.manager.deallocate(id),
            // Fixed placements go away with the mode or the pool
            None => Ok(()),
        }
    }

    fn lock(&self, placement: &Placement) -> SurfaceResult<BufferLock> {
        self.check()?;
        let memory = self.device.memory();
        Ok(BufferLock {
            addr: memory.base + placement.offset,
            phys: memory.phys + placement.offset as u64,
            pitch: placement.pitch,
            offset: placement.offset,
        })
    }

    fn destroy(&self) -> SurfaceResult<()> {
        self.check()?;
        self.shared.manager.reset();
        self.shared.destroyed.store(true, Ordering::Release);
        self.attached.store(false, Ordering::Release);
        tracing::info!("framebuffer pool destroyed");
        Ok(())
    }

    fn leave(&self) -> SurfaceResult<()> {
        self.check()?;
        self.attached.store(false, Ordering::Release);
        tracing::info!("left framebuffer pool");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryFramebuffer;
    use crate::format::PixelFormat;
    use crate::surface::SurfaceConfig;

    fn pool(modes: Vec<VideoMode>) -> (Arc<MemoryFramebuffer>, FbdevPool) {
        let fb = Arc::new(MemoryFramebuffer::new(4 << 20, 0x1000_0000, modes).unwrap());
        let pool = FbdevPool::init(fb.clone()).unwrap();
        (fb, pool)
    }

    fn primary(width: u32, height: u32, caps: SurfaceCaps, index: usize) -> BufferRequest {
        BufferRequest {
            config: SurfaceConfig::new(width, height, PixelFormat::Rgb16).with_caps(caps),
            types: SurfaceTypes::LAYER,
            resource_id: ResourceId::PRIMARY_LAYER,
            index,
        }
    }

    fn window(width: u32, height: u32) -> BufferRequest {
        BufferRequest {
            config: SurfaceConfig::new(width, height, PixelFormat::Argb),
            types: SurfaceTypes::WINDOW,
            resource_id: ResourceId::NONE,
            index: 0,
        }
    }

    #[test]
    fn find_mode_prefers_priority_then_order() {
        let modes = [
            VideoMode::new(640, 480, 1),
            VideoMode { refresh: 75, ..VideoMode::new(640, 480, 3) },
            VideoMode { refresh: 50, ..VideoMode::new(640, 480, 3) },
            VideoMode::new(800, 600, 9),
        ];
        let mode = find_mode(&modes, 640, 480).unwrap();
        assert_eq!((mode.priority, mode.refresh), (3, 75));
        assert!(find_mode(&modes, 1024, 768).is_none());
    }

    #[test]
    fn single_buffered_primary_sets_mode_on_index_zero() {
        let (fb, pool) = pool(vec![VideoMode::new(640, 480, 0)]);
        let placement = pool.allocate_buffer(&primary(640, 480, SurfaceCaps::empty(), 0)).unwrap();

        assert!(fb.current_mode().is_some());
        assert_eq!(placement.pitch, 1280);
        assert_eq!(placement.offset, 0);
        assert_eq!(placement.chunk, None);
        assert_eq!(pool.manager().stats().used_chunks, 0);
    }

    #[test]
    fn flipping_primary_sets_mode_on_index_one() {
        let (fb, pool) = pool(vec![VideoMode::new(640, 480, 0)]);
        let front = pool.allocate_buffer(&primary(640, 480, SurfaceCaps::DOUBLE, 0)).unwrap();
        assert!(fb.current_mode().is_none(), "index 0 of a flipping surface must not set the mode");

        let back = pool.allocate_buffer(&primary(640, 480, SurfaceCaps::DOUBLE, 1)).unwrap();
        assert!(fb.current_mode().is_some());
        assert_eq!(back.offset, 480 * back.pitch as usize);
        assert_eq!(front.chunk, None);
    }

    #[test]
    fn primary_without_matching_mode_is_unsupported() {
        let (fb, pool) = pool(vec![VideoMode::new(640, 480, 0), VideoMode::new(1024, 768, 0)]);
        let result = pool.allocate_buffer(&primary(800, 480, SurfaceCaps::empty(), 0));

        assert!(matches!(result, Err(SurfaceError::Unsupported(_))));
        assert!(fb.current_mode().is_none());
        assert_eq!(pool.manager().stats().used_chunks, 0);
    }

    #[test]
    fn layer_buffers_pass_test_config() {
        let (_fb, pool) = pool(vec![]);
        assert!(pool.test_config(&primary(8192, 8192, SurfaceCaps::empty(), 0)).is_ok());
        assert!(matches!(
            pool.test_config(&window(8192, 8192)),
            Err(SurfaceError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn window_buffers_use_chunks() {
        let (_fb, pool) = pool(vec![]);
        let placement = pool.allocate_buffer(&window(100, 10)).unwrap();
        assert!(placement.chunk.is_some());
        assert_eq!(placement.pitch, 400);
        assert_eq!(pool.manager().stats().used_chunks, 1);

        pool.deallocate_buffer(&placement).unwrap();
        assert_eq!(pool.manager().stats().used_chunks, 0);
    }

    #[test]
    fn lock_adds_offset_to_bases() {
        let (fb, pool) = pool(vec![]);
        pool.allocate_buffer(&window(16, 16)).unwrap();
        let placement = pool.allocate_buffer(&window(16, 16)).unwrap();
        let lock = pool.lock(&placement).unwrap();

        let memory = fb.memory();
        assert_eq!(lock.addr, memory.base + placement.offset);
        assert_eq!(lock.phys, memory.phys + placement.offset as u64);
        assert_eq!(lock.pitch, placement.pitch);
    }

    #[test]
    fn joined_pool_shares_the_manager() {
        let (fb, pool) = pool(vec![]);
        let other = FbdevPool::join(pool.shared(), fb.clone()).unwrap();
        other.allocate_buffer(&window(16, 16)).unwrap();
        assert_eq!(pool.manager().stats().used_chunks, 1);

        other.leave().unwrap();
        assert!(matches!(other.allocate_buffer(&window(1, 1)), Err(SurfaceError::Detached(_))));
        assert!(pool.allocate_buffer(&window(1, 1)).is_ok());

        pool.destroy().unwrap();
        assert!(matches!(FbdevPool::join(pool.shared(), fb), Err(SurfaceError::Detached(_))));
    }
}
