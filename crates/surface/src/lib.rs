//! Surface memory: pools, the chunk allocator and surfaces
//!
//! A surface is a logical pixel buffer description. Each of its buffers is
//! backed by an allocation in one surface pool. The pool decides where the
//! bytes live:
//!
//! - `FbdevPool` places the primary layer buffers at fixed offsets derived
//!   from the display mode and hands everything else to its
//!   `SurfaceManager`
//! - `SystemPool` serves non-layer buffers from process memory
//!
//! `PoolRegistry` negotiates which pool serves a buffer.

pub mod device;
pub mod error;
pub mod fbdev;
pub mod format;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod surface;
pub mod system;

pub use device::{FramebufferDevice, FramebufferMemory, MemoryFramebuffer, VideoMode};
pub use error::{SurfaceError, SurfaceResult};
pub use fbdev::FbdevPool;
pub use format::PixelFormat;
pub use manager::{Chunk, ChunkId, ManagerStats, SurfaceManager};
pub use pool::{
    AccessFlags, Allocation, BufferLock, BufferRequest, Placement, PoolCaps, PoolDescription, PoolId, PoolPriority,
    SurfacePool,
};
pub use registry::PoolRegistry;
pub use surface::{FlipFlags, ResourceId, Surface, SurfaceCaps, SurfaceConfig, SurfaceTypes};
pub use system::SystemPool;
