//! Call channel errors

use std::io;

use thiserror::Error;

use crate::transport::TransportKind;

/// Errors raised by the call channel
#[derive(Debug, Error)]
pub enum FusionError {
    /// Unknown or invalid call identifier
    #[error("invalid call")]
    InvalidArgument,

    /// The call was destroyed, or its owner has exited
    #[error("call destroyed")]
    Destroyed,

    /// The caller that a retained call should reply to has gone away
    #[error("caller withdrawn")]
    NoContext,

    /// Operation not available on this transport
    #[error("not implemented by the {0:?} transport")]
    Unimplemented(TransportKind),

    /// Transport failure that must not be retried
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Malformed message on the wire
    #[error("malformed wire message: {0}")]
    Codec(#[from] serde_json::Error),

    /// Wire message exceeds the datagram limit
    #[error("wire message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The dispatcher event loop could not be started
    #[error("dispatcher failure: {0}")]
    Dispatcher(String),
}

/// Result alias for call channel operations
pub type FusionResult<T> = Result<T, FusionError>;
