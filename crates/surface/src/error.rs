use thiserror::Error;

/// Errors raised by surface pools and the allocation manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("invalid surface request: {0}")]
    InvalidArgument(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The manager has no free extent large enough
    #[error("out of surface memory: requested {requested} bytes, largest free extent {available}")]
    OutOfSpace { requested: usize, available: usize },

    #[error("failed to reserve {0} bytes of system memory")]
    NoSystemMemory(usize),

    #[error("unknown surface pool '{0}'")]
    UnknownPool(String),

    /// Chunk id not handed out by this manager, or already returned
    #[error("unknown chunk")]
    UnknownChunk,

    /// The pool was destroyed or this process has left it
    #[error("surface pool '{0}' is detached")]
    Detached(String),

    #[error("framebuffer device: {0}")]
    Device(String),
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;
