//! The surface pool contract

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::SurfaceResult;
use crate::manager::ChunkId;
use crate::surface::{ResourceId, SurfaceConfig, SurfaceTypes};

/// Index of a pool in its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u32);

bitflags! {
    /// How a pool's memory can be addressed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct PoolCaps: u32 {
        const PHYSICAL = 0x1;
        const VIRTUAL = 0x2;
    }
}

bitflags! {
    /// Access granted to one accessor (CPU, GPU, display layers)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const SHARED = 0x4;
    }
}

/// Negotiation order; higher priority pools are asked first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPriority {
    Lowest,
    Low,
    #[default]
    Default,
    High,
    Highest,
}

/// What a pool publishes when it is initialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDescription {
    pub name: String,
    pub caps: PoolCaps,
    pub cpu: AccessFlags,
    pub gpu: AccessFlags,
    pub layers: AccessFlags,
    pub types: SurfaceTypes,
    pub priority: PoolPriority,
    pub size: usize,
}

/// One buffer of a surface, as presented to a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub config: SurfaceConfig,
    pub types: SurfaceTypes,
    pub resource_id: ResourceId,
    /// Position of the buffer within its surface
    pub index: usize,
}

impl BufferRequest {
    pub fn is_layer(&self) -> bool {
        self.types.contains(SurfaceTypes::LAYER)
    }
}

/// Where a pool placed one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub offset: usize,
    pub pitch: u32,
    pub size: usize,
    /// Set for chunk allocations; fixed placements have none
    #[serde(skip)]
    pub chunk: Option<ChunkId>,
}

/// A placement together with the pool that holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub pool: PoolId,
    #[serde(flatten)]
    pub placement: Placement,
}

impl std::ops::Deref for Allocation {
    type Target = Placement;

    fn deref(&self) -> &Placement {
        &self.placement
    }
}

/// Addresses of a locked buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferLock {
    /// CPU-visible address
    pub addr: usize,
    /// Physical address, 0 for pools without physical addressing
    pub phys: u64,
    pub pitch: u32,
    pub offset: usize,
}

/// A memory domain surfaces can be allocated from
///
/// The pool is created by `init` in the first process and attached to by
/// `join` in later ones (constructors of the concrete types). `destroy`
/// tears the pool down for everyone, `leave` detaches only the caller.
pub trait SurfacePool: Send + Sync {
    fn description(&self) -> &PoolDescription;

    /// Whether `allocate_buffer` would succeed, without committing anything
    fn test_config(&self, request: &BufferRequest) -> SurfaceResult<()>;

    fn allocate_buffer(&self, request: &BufferRequest) -> SurfaceResult<Placement>;

    fn deallocate_buffer(&self, placement: &Placement) -> SurfaceResult<()>;

    fn lock(&self, placement: &Placement) -> SurfaceResult<BufferLock>;

    /// Locking only translates addresses, so this is a hook with nothing to undo
    fn unlock(&self, _placement: &Placement, _lock: &BufferLock) -> SurfaceResult<()> {
        Ok(())
    }

    fn destroy(&self) -> SurfaceResult<()>;

    fn leave(&self) -> SurfaceResult<()>;
}
