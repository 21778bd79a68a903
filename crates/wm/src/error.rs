//! Window manager error taxonomy
//!
//! Every fallible operation of the core, the window model and the client
//! interface returns `WmResult`. Errors coming from the lower crates keep
//! their kind when converted.

use fusion::{FusionError, ShmError};
use surface::SurfaceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WmError {
    /// Malformed geometry, missing argument or out-of-range size
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Region with inverted corners
    #[error("invalid area")]
    InvalidArea,

    /// The object has been torn down
    #[error("object destroyed")]
    Destroyed,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("out of shared memory")]
    NoSharedMemory,

    #[error("out of system memory")]
    NoSystemMemory,

    /// ABI or binary version skew between the session and a backend
    #[error("version mismatch: session has {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("no window manager module matches '{0}'")]
    ModuleNotFound(String),

    #[error("out of surface memory")]
    OutOfSpace,

    /// Transport failure in the call channel, not retryable
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Absent property, unknown window or unknown pool
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("not implemented: {0}")]
    Unimplemented(String),

    /// Generic failure reported by a backend
    #[error("failure: {0}")]
    Failure(String),
}

pub type WmResult<T> = Result<T, WmError>;

impl WmError {
    pub fn invalid(what: impl Into<String>) -> Self {
        WmError::InvalidArgument(what.into())
    }
}

impl From<SurfaceError> for WmError {
    fn from(e: SurfaceError) -> Self {
        match e {
            SurfaceError::InvalidArgument(what) => WmError::InvalidArgument(what.to_string()),
            SurfaceError::Unsupported(what) => WmError::Unsupported(what),
            SurfaceError::OutOfSpace { .. } => WmError::OutOfSpace,
            SurfaceError::NoSystemMemory(_) => WmError::NoSystemMemory,
            SurfaceError::UnknownPool(name) => WmError::ItemNotFound(format!("surface pool {name}")),
            SurfaceError::UnknownChunk => WmError::InvalidArgument("unknown chunk".into()),
            SurfaceError::Detached(_) => WmError::Destroyed,
            SurfaceError::Device(what) => WmError::IoFailure(what),
        }
    }
}

impl From<FusionError> for WmError {
    fn from(e: FusionError) -> Self {
        match e {
            FusionError::InvalidArgument => WmError::InvalidArgument("invalid call".into()),
            FusionError::Destroyed | FusionError::NoContext => WmError::Destroyed,
            FusionError::Unimplemented(kind) => WmError::Unimplemented(format!("{} transport", kind.as_str())),
            other => WmError::IoFailure(other.to_string()),
        }
    }
}

impl From<ShmError> for WmError {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::OutOfMemory { .. } => WmError::NoSharedMemory,
            other => WmError::InvalidArgument(other.to_string()),
        }
    }
}

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must not be zero")]
    ZeroSize { field: &'static str },

    #[error("stacking inset {side} is negative ({value})")]
    NegativeInset { side: &'static str, value: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_errors_keep_their_kind() {
        let e: WmError = SurfaceError::OutOfSpace {
            requested: 10,
            available: 2,
        }
        .into();
        assert_eq!(e, WmError::OutOfSpace);

        let e: WmError = SurfaceError::Unsupported("no mode".into()).into();
        assert!(matches!(e, WmError::Unsupported(_)));

        let e: WmError = SurfaceError::Detached("System Memory".into()).into();
        assert_eq!(e, WmError::Destroyed);
    }

    #[test]
    fn shm_exhaustion_is_no_shared_memory() {
        let e: WmError = ShmError::OutOfMemory {
            requested: 64,
            available: 0,
        }
        .into();
        assert_eq!(e, WmError::NoSharedMemory);
    }

    #[test]
    fn fusion_transport_failures_are_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let e: WmError = FusionError::Io(io).into();
        assert!(matches!(e, WmError::IoFailure(_)));
        assert_eq!(WmError::from(FusionError::Destroyed), WmError::Destroyed);
    }
}
