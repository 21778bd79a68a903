//! Cross-process calls
//!
//! A `FusionCall` is a registered handler with a session-unique id and the
//! identity of the world that registered it. Executing a call either runs
//! the handler right away (same world, `NO_DIRECT` unset) or hands the
//! invocation to the transport, which delivers it to the owner and blocks
//! until the owner replies or the call is destroyed.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::transport::TransportKind;
use crate::world::{FusionId, World};

/// Session-unique call identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl fmt::LowerHex for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

bitflags! {
    /// Flags for `FusionCall::execute`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecFlags: u32 {
        /// Always go through the transport, even when the caller owns the call
        const NO_DIRECT = 0x1;
        /// Do not wait for a reply
        const ONEWAY = 0x2;
    }
}

/// Arguments of one invocation, as seen by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Identity of the calling world
    pub caller: FusionId,
    /// Integer argument
    pub arg: i32,
    /// Opaque argument, usually an offset into shared memory
    pub ptr: u64,
    /// Invocation serial, needed to reply to a retained call
    pub serial: u32,
}

/// What the handler wants done with the invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// Reply now with this value
    Return(i32),
    /// Keep the invocation open; reply later with `FusionCall::call_return`
    Retain,
}

/// A call handler
pub trait CallHandler: Send + Sync {
    fn handle(&self, ctx: &CallContext) -> HandlerResult;
}

impl<F> CallHandler for F
where
    F: Fn(&CallContext) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &CallContext) -> HandlerResult {
        self(ctx)
    }
}

/// Handler slot shared by every copy of a call; emptied on destroy
#[derive(Default)]
pub(crate) struct CallSlot {
    handler: RwLock<Option<Arc<dyn CallHandler>>>,
}

impl CallSlot {
    fn new(handler: Arc<dyn CallHandler>) -> Self {
        Self {
            handler: RwLock::new(Some(handler)),
        }
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn CallHandler>> {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn clear(&self) -> Option<Arc<dyn CallHandler>> {
        self.handler.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// A registered call
///
/// Cloning a call yields another handle to the same registration, the way
/// every process of a session sees the same call id.
#[derive(Clone)]
pub struct FusionCall {
    id: CallId,
    owner: FusionId,
    slot: Arc<CallSlot>,
}

impl fmt::Debug for FusionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusionCall")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl FusionCall {
    /// Register `handler` in `world`
    pub fn register(world: &World, handler: impl CallHandler + 'static) -> FusionResult<Self> {
        let handler: Arc<dyn CallHandler> = Arc::new(handler);
        let id = world.transport().register(world.id(), handler.clone())?;

        tracing::info!(call = id.0, owner = world.id().0, transport = ?world.transport_kind(), "registered call");

        Ok(Self {
            id,
            owner: world.id(),
            slot: Arc::new(CallSlot::new(handler)),
        })
    }

    /// Call identifier
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Identity of the registering world
    pub fn owner(&self) -> FusionId {
        self.owner
    }

    /// Same handle addressing another call id
    #[cfg(test)]
    pub(crate) fn with_id(&self, id: CallId) -> Self {
        Self { id, ..self.clone() }
    }

    /// Whether `destroy` has been called on any copy of this call
    pub fn is_destroyed(&self) -> bool {
        self.slot.handler().is_none()
    }

    /// Execute the call from `world`
    ///
    /// Returns the handler's value. One-way calls return 0 as soon as the
    /// message is handed to the transport.
    pub fn execute(&self, world: &World, flags: ExecFlags, arg: i32, ptr: u64) -> FusionResult<i32> {
        let Some(handler) = self.slot.handler() else {
            return Err(FusionError::Destroyed);
        };

        let direct = world.transport_kind() == TransportKind::Single
            || (!flags.contains(ExecFlags::NO_DIRECT) && self.owner == world.id());

        if direct {
            let ctx = CallContext {
                caller: world.id(),
                arg,
                ptr,
                serial: 0,
            };
            return Ok(match handler.handle(&ctx) {
                HandlerResult::Return(value) => value,
                HandlerResult::Retain => {
                    tracing::warn!(call = self.id.0, "local call handler retained the call, need NO_DIRECT");
                    0
                }
            });
        }

        let value = world.transport().execute(world.id(), self, flags, arg, ptr)?;
        Ok(value.unwrap_or(0))
    }

    /// Reply to a retained invocation
    pub fn call_return(&self, world: &World, serial: u32, value: i32) -> FusionResult<()> {
        world.transport().call_return(self, serial, value)
    }

    /// Destroy the call
    ///
    /// Every copy of the call observes the destruction; invocations still
    /// waiting for a reply fail with `Destroyed`.
    pub fn destroy(&self, world: &World) -> FusionResult<()> {
        if self.is_destroyed() {
            return Err(FusionError::Destroyed);
        }
        tracing::info!(call = self.id.0, "destroying call");
        world.transport().destroy(self)?;
        self.slot.clear();
        Ok(())
    }

    pub(crate) fn slot(&self) -> &Arc<CallSlot> {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn single_world() -> World {
        World::create(&WorldConfig::default()).unwrap()
    }

    #[test]
    fn local_execute_returns_handler_value() {
        let world = single_world();
        let call = FusionCall::register(&world, |ctx: &CallContext| HandlerResult::Return(ctx.arg * 2)).unwrap();

        assert_eq!(call.execute(&world, ExecFlags::empty(), 21, 0).unwrap(), 42);
        assert_eq!(world.messages_sent(), 0);
    }

    #[test]
    fn handler_sees_caller_identity() {
        let world = single_world();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_handler = seen.clone();
        let call = FusionCall::register(&world, move |ctx: &CallContext| {
            seen_in_handler.store(ctx.caller.0 as u32, Ordering::SeqCst);
            HandlerResult::Return(0)
        })
        .unwrap();

        call.execute(&world, ExecFlags::empty(), 0, 0).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst) as u64, world.id().0);
    }

    #[test]
    fn destroyed_call_fails_execute() {
        let world = single_world();
        let call = FusionCall::register(&world, |_: &CallContext| HandlerResult::Return(1)).unwrap();
        let copy = call.clone();

        call.destroy(&world).unwrap();
        assert!(copy.is_destroyed());
        assert!(matches!(copy.execute(&world, ExecFlags::empty(), 0, 0), Err(FusionError::Destroyed)));
        assert!(matches!(copy.destroy(&world), Err(FusionError::Destroyed)));
    }

    #[test]
    fn retained_local_call_yields_zero() {
        let world = single_world();
        let call = FusionCall::register(&world, |_: &CallContext| HandlerResult::Retain).unwrap();
        assert_eq!(call.execute(&world, ExecFlags::empty(), 5, 0).unwrap(), 0);
    }

    #[test]
    fn call_return_unimplemented_on_single_transport() {
        let world = single_world();
        let call = FusionCall::register(&world, |_: &CallContext| HandlerResult::Retain).unwrap();
        assert!(matches!(
            call.call_return(&world, 0, 1),
            Err(FusionError::Unimplemented(TransportKind::Single))
        ));
    }

    #[test]
    fn call_ids_are_unique() {
        let world = single_world();
        let a = FusionCall::register(&world, |_: &CallContext| HandlerResult::Return(0)).unwrap();
        let b = FusionCall::register(&world, |_: &CallContext| HandlerResult::Return(0)).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
