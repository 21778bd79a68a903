//! Single-process transport
//!
//! Every world of a single-process session is the owner of every call, so
//! `FusionCall::execute` never reaches this type for a live call. It only
//! hands out call ids.

use std::sync::Arc;

use crate::call::{CallHandler, CallId, ExecFlags, FusionCall, HandlerResult};
use crate::error::{FusionError, FusionResult};
use crate::transport::{Transport, TransportKind};
use crate::world::{FusionId, WorldShared};

pub(crate) struct DirectTransport {
    shared: Arc<WorldShared>,
}

impl DirectTransport {
    pub(crate) fn new(shared: Arc<WorldShared>) -> Self {
        Self { shared }
    }
}

impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Single
    }

    fn register(&self, _owner: FusionId, _handler: Arc<dyn CallHandler>) -> FusionResult<CallId> {
        Ok(self.shared.next_call_id())
    }

    fn execute(
        &self,
        caller: FusionId,
        call: &FusionCall,
        _flags: ExecFlags,
        arg: i32,
        ptr: u64,
    ) -> FusionResult<Option<i32>> {
        let handler = call.slot().handler().ok_or(FusionError::Destroyed)?;
        let ctx = crate::call::CallContext {
            caller,
            arg,
            ptr,
            serial: 0,
        };
        Ok(match handler.handle(&ctx) {
            HandlerResult::Return(value) => Some(value),
            HandlerResult::Retain => Some(0),
        })
    }

    fn call_return(&self, _call: &FusionCall, _serial: u32, _value: i32) -> FusionResult<()> {
        Err(FusionError::Unimplemented(TransportKind::Single))
    }

    fn destroy(&self, _call: &FusionCall) -> FusionResult<()> {
        Ok(())
    }

    fn detach(&self) {}

    fn messages_sent(&self) -> u64 {
        0
    }
}
