//! Call transports
//!
//! A transport moves an invocation from the caller's world to the world
//! that registered the call, and the reply back. Which one a session uses
//! is fixed when the master world is created.

mod direct;
mod kernel;
mod socket;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::{CallHandler, CallId, ExecFlags, FusionCall};
use crate::error::FusionResult;
use crate::world::{FusionId, WorldShared};

pub(crate) use direct::DirectTransport;
pub(crate) use kernel::{KernelBroker, KernelTransport};
pub(crate) use socket::SocketTransport;

/// How calls reach their owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One process; every call runs in the caller
    #[default]
    Single,
    /// A broker that queues invocations to the owner's dispatcher
    Kernel,
    /// Unix datagram sockets, one per world plus one per pending invocation
    Socket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Kernel => "kernel",
            Self::Socket => "socket",
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "kernel" => Ok(Self::Kernel),
            "socket" => Ok(Self::Socket),
            other => Err(format!("unknown transport '{other}' (expected single, kernel or socket)")),
        }
    }
}

/// One world's end of a transport
pub(crate) trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Make `handler` reachable under a new call id
    fn register(&self, owner: FusionId, handler: Arc<dyn CallHandler>) -> FusionResult<CallId>;

    /// Deliver an invocation to the call's owner
    ///
    /// Returns `None` for one-way invocations.
    fn execute(
        &self,
        caller: FusionId,
        call: &FusionCall,
        flags: ExecFlags,
        arg: i32,
        ptr: u64,
    ) -> FusionResult<Option<i32>>;

    /// Reply to a retained invocation
    fn call_return(&self, call: &FusionCall, serial: u32, value: i32) -> FusionResult<()>;

    /// Withdraw the call; pending invocations fail with `Destroyed`
    fn destroy(&self, call: &FusionCall) -> FusionResult<()>;

    /// The world is exiting
    fn detach(&self);

    /// Invocations handed to the transport by this world
    fn messages_sent(&self) -> u64;
}

/// Build the transport end for world `id`
pub(crate) fn connect(shared: &Arc<WorldShared>, id: FusionId) -> FusionResult<Box<dyn Transport>> {
    Ok(match shared.kind() {
        TransportKind::Single => Box::new(DirectTransport::new(shared.clone())),
        TransportKind::Kernel => Box::new(KernelTransport::connect(shared.clone(), id)?),
        TransportKind::Socket => Box::new(SocketTransport::connect(shared.clone(), id)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transport_names() {
        assert_eq!("single".parse::<TransportKind>().unwrap(), TransportKind::Single);
        assert_eq!("Kernel".parse::<TransportKind>().unwrap(), TransportKind::Kernel);
        assert_eq!("SOCKET".parse::<TransportKind>().unwrap(), TransportKind::Socket);
        assert!("pipe".parse::<TransportKind>().is_err());
    }

    #[test]
    fn transport_serde_is_lowercase() {
        let json = serde_json::to_string(&TransportKind::Kernel).unwrap();
        assert_eq!(json, "\"kernel\"");
    }
}
