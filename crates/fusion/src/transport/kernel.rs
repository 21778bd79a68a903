//! Broker transport
//!
//! The broker stands in for a kernel device shared by every world of the
//! session. It keeps the call table, queues each invocation to the owner
//! world's dispatcher and parks the caller until the owner replies.
//! Invocations of one call are serialized: the caller holds the call's
//! execution lock for the whole round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use crate::call::{CallContext, CallHandler, CallId, ExecFlags, FusionCall, HandlerResult};
use crate::dispatch::Dispatcher;
use crate::error::{FusionError, FusionResult};
use crate::transport::{Transport, TransportKind};
use crate::wire::ONEWAY_SERIAL;
use crate::world::{FusionId, WorldShared};

/// An invocation queued to the owner's dispatcher
pub(crate) struct Delivery {
    call_id: CallId,
    handler: Arc<dyn CallHandler>,
    ctx: CallContext,
}

enum Reply {
    Value(i32),
    Destroyed,
}

#[derive(Default)]
struct KernelCallState {
    destroyed: bool,
    next_serial: u32,
    pending: HashMap<u32, mpsc::Sender<Reply>>,
}

struct KernelCall {
    owner: FusionId,
    handler: Arc<dyn CallHandler>,
    exec: Mutex<()>,
    state: Mutex<KernelCallState>,
}

impl KernelCall {
    fn state(&self) -> std::sync::MutexGuard<'_, KernelCallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn withdraw(&self) {
        let mut state = self.state();
        state.destroyed = true;
        for (serial, waiter) in state.pending.drain() {
            tracing::debug!(serial, "failing pending invocation of destroyed call");
            let _ = waiter.send(Reply::Destroyed);
        }
    }
}

/// Session-wide call table
#[derive(Default)]
pub(crate) struct KernelBroker {
    calls: Mutex<HashMap<CallId, Arc<KernelCall>>>,
    inboxes: Mutex<HashMap<FusionId, calloop::channel::Sender<Delivery>>>,
}

impl KernelBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn call(&self, id: CallId) -> Option<Arc<KernelCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    fn attach(&self, world: FusionId, inbox: calloop::channel::Sender<Delivery>) {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(world, inbox);
    }

    fn inbox(&self, world: FusionId) -> Option<calloop::channel::Sender<Delivery>> {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&world)
            .cloned()
    }

    fn insert(&self, id: CallId, owner: FusionId, handler: Arc<dyn CallHandler>) {
        let call = Arc::new(KernelCall {
            owner,
            handler,
            exec: Mutex::new(()),
            state: Mutex::new(KernelCallState::default()),
        });
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).insert(id, call);
    }

    fn execute(&self, caller: FusionId, id: CallId, flags: ExecFlags, arg: i32, ptr: u64) -> FusionResult<Option<i32>> {
        let call = self.call(id).ok_or(FusionError::InvalidArgument)?;
        let oneway = flags.contains(ExecFlags::ONEWAY);

        let _exec = if oneway {
            None
        } else {
            Some(call.exec.lock().unwrap_or_else(PoisonError::into_inner))
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        let serial = {
            let mut state = call.state();
            if state.destroyed {
                return Err(FusionError::Destroyed);
            }
            if oneway {
                ONEWAY_SERIAL
            } else {
                let serial = state.next_serial;
                state.next_serial = match serial.wrapping_add(1) {
                    ONEWAY_SERIAL => 0,
                    next => next,
                };
                state.pending.insert(serial, reply_tx);
                serial
            }
        };

        let delivery = Delivery {
            call_id: id,
            handler: call.handler.clone(),
            ctx: CallContext {
                caller,
                arg,
                ptr,
                serial,
            },
        };

        let sent = match self.inbox(call.owner) {
            Some(inbox) => inbox.send(delivery).is_ok(),
            None => false,
        };
        if !sent {
            call.state().pending.remove(&serial);
            tracing::debug!(call = id.0, owner = call.owner.0, "owner of call is gone");
            return Err(FusionError::Destroyed);
        }

        if oneway {
            return Ok(None);
        }

        match reply_rx.recv() {
            Ok(Reply::Value(value)) => Ok(Some(value)),
            Ok(Reply::Destroyed) | Err(_) => Err(FusionError::Destroyed),
        }
    }

    fn reply(&self, id: CallId, serial: u32, value: i32) -> FusionResult<()> {
        let call = self.call(id).ok_or(FusionError::Destroyed)?;
        let waiter = {
            let mut state = call.state();
            if state.destroyed {
                return Err(FusionError::Destroyed);
            }
            state.pending.remove(&serial).ok_or(FusionError::NoContext)?
        };
        waiter.send(Reply::Value(value)).map_err(|_| FusionError::NoContext)
    }

    /// Destroyed calls stay in the table so late callers see `Destroyed`
    fn destroy(&self, id: CallId) -> FusionResult<()> {
        let call = self.call(id).ok_or(FusionError::InvalidArgument)?;
        if call.state().destroyed {
            return Err(FusionError::Destroyed);
        }
        call.withdraw();
        Ok(())
    }

    fn detach(&self, world: FusionId) {
        self.inboxes.lock().unwrap_or_else(PoisonError::into_inner).remove(&world);

        let owned: Vec<Arc<KernelCall>> = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|call| call.owner == world)
            .cloned()
            .collect();
        if !owned.is_empty() {
            tracing::info!(world = world.0, calls = owned.len(), "withdrawing calls of exiting world");
        }
        for call in owned {
            call.withdraw();
        }
    }

    fn deliver(&self, delivery: Delivery) {
        let Delivery { call_id, handler, ctx } = delivery;
        match handler.handle(&ctx) {
            HandlerResult::Return(value) => {
                if ctx.serial == ONEWAY_SERIAL {
                    return;
                }
                if let Err(e) = self.reply(call_id, ctx.serial, value) {
                    tracing::debug!(call = call_id.0, serial = ctx.serial, error = %e, "reply dropped");
                }
            }
            HandlerResult::Retain => {
                tracing::trace!(call = call_id.0, serial = ctx.serial, "invocation retained");
            }
        }
    }
}

/// One world's attachment to the broker
pub(crate) struct KernelTransport {
    id: FusionId,
    shared: Arc<WorldShared>,
    broker: Arc<KernelBroker>,
    sent: AtomicU64,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl KernelTransport {
    pub(crate) fn connect(shared: Arc<WorldShared>, id: FusionId) -> FusionResult<Self> {
        let broker = shared.broker().cloned().ok_or(FusionError::Unimplemented(TransportKind::Kernel))?;

        let (inbox, deliveries) = calloop::channel::channel::<Delivery>();
        let loop_broker = broker.clone();
        let dispatcher = Dispatcher::spawn(format!("fusion-{:x}", id.0), move |handle| {
            handle
                .insert_source(deliveries, move |event, _, _| {
                    if let calloop::channel::Event::Msg(delivery) = event {
                        loop_broker.deliver(delivery);
                    }
                })
                .map_err(|e| FusionError::Dispatcher(e.error.to_string()))?;
            Ok(())
        })?;

        broker.attach(id, inbox);
        tracing::debug!(world = id.0, "attached to call broker");

        Ok(Self {
            id,
            shared,
            broker,
            sent: AtomicU64::new(0),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }
}

impl Transport for KernelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Kernel
    }

    fn register(&self, owner: FusionId, handler: Arc<dyn CallHandler>) -> FusionResult<CallId> {
        let id = self.shared.next_call_id();
        self.broker.insert(id, owner, handler);
        Ok(id)
    }

    fn execute(
        &self,
        caller: FusionId,
        call: &FusionCall,
        flags: ExecFlags,
        arg: i32,
        ptr: u64,
    ) -> FusionResult<Option<i32>> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.broker.execute(caller, call.id(), flags, arg, ptr)
    }

    fn call_return(&self, call: &FusionCall, serial: u32, value: i32) -> FusionResult<()> {
        self.broker.reply(call.id(), serial, value)
    }

    fn destroy(&self, call: &FusionCall) -> FusionResult<()> {
        self.broker.destroy(call.id())
    }

    fn detach(&self) {
        self.broker.detach(self.id);
        if let Some(mut dispatcher) = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            dispatcher.stop();
        }
    }

    fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}
