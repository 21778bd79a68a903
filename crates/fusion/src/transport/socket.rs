//! Unix datagram transport
//!
//! Every world binds `<world dir>/<fusion id in hex>`. A caller binds a
//! rendezvous socket `call.<call id>.<serial>` (both hex), sends the
//! invocation to the owner and waits on the rendezvous socket. The waiting
//! side polls for the owner's socket so a vanished owner fails the call
//! instead of hanging it.

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use calloop::generic::Generic;
use calloop::{Interest, Mode, PostAction};

use crate::call::{CallContext, CallHandler, CallId, ExecFlags, FusionCall, HandlerResult};
use crate::dispatch::Dispatcher;
use crate::error::{FusionError, FusionResult};
use crate::transport::{Transport, TransportKind};
use crate::wire::{WireMessage, MAX_WIRE_MESSAGE_SIZE, ONEWAY_SERIAL};
use crate::world::{FusionId, WorldShared};

/// Highest rendezvous serial tried before giving up
const MAX_RENDEZVOUS_SERIAL: u32 = 0xff_ffff;

/// How often a waiting caller checks that the owner still exists
const OWNER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn owner_socket_path(dir: &Path, owner: FusionId) -> PathBuf {
    dir.join(format!("{:x}", owner.0))
}

pub(crate) fn rendezvous_path(dir: &Path, call: CallId, serial: u32) -> PathBuf {
    dir.join(format!("call.{call:x}.{serial:x}"))
}

/// Calls owned by this world, and the invocations it has retained
#[derive(Default)]
struct Registry {
    handlers: HashMap<CallId, Arc<dyn CallHandler>>,
    retained: HashSet<(CallId, u32)>,
    /// Calls this world owned and has since destroyed
    destroyed: HashSet<CallId>,
}

/// Removes a socket path when dropped
struct Unlink(PathBuf);

impl Drop for Unlink {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = ?self.0, error = %e, "failed to remove socket");
            }
        }
    }
}

fn is_gone(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}

fn send_message(socket: &UnixDatagram, path: &Path, msg: &WireMessage) -> FusionResult<()> {
    let bytes = msg.encode()?;
    socket.send_to(&bytes, path)?;
    Ok(())
}

pub(crate) struct SocketTransport {
    id: FusionId,
    shared: Arc<WorldShared>,
    dir: PathBuf,
    registry: Arc<Mutex<Registry>>,
    /// Unbound socket for replies and one-way invocations
    sender: UnixDatagram,
    sent: AtomicU64,
    dispatcher: Mutex<Option<Dispatcher>>,
    owner_socket: Mutex<Option<Unlink>>,
}

impl SocketTransport {
    pub(crate) fn connect(shared: Arc<WorldShared>, id: FusionId) -> FusionResult<Self> {
        let dir = shared.world_dir().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let path = owner_socket_path(&dir, id);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::warn!(?path, "removed stale world socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let socket = UnixDatagram::bind(&path)?;
        socket.set_nonblocking(true)?;
        let owner_socket = Unlink(path.clone());

        let registry = Arc::new(Mutex::new(Registry::default()));
        let loop_registry = registry.clone();
        let loop_dir = dir.clone();

        let dispatcher = Dispatcher::spawn(format!("fusion-{:x}", id.0), move |handle| {
            handle
                .insert_source(Generic::new(socket, Interest::READ, Mode::Level), move |_, socket, _| {
                    let mut buf = [0u8; MAX_WIRE_MESSAGE_SIZE];
                    loop {
                        match socket.recv(&mut buf) {
                            Ok(len) => serve(socket, &loop_dir, &loop_registry, &buf[..len]),
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(e) => {
                                tracing::warn!(error = %e, "world socket receive failed");
                                break;
                            }
                        }
                    }
                    Ok(PostAction::Continue)
                })
                .map_err(|e| FusionError::Dispatcher(e.error.to_string()))?;
            Ok(())
        })?;

        tracing::info!(?path, world = id.0, "world socket bound");

        Ok(Self {
            id,
            shared,
            dir,
            registry,
            sender: UnixDatagram::unbound()?,
            sent: AtomicU64::new(0),
            dispatcher: Mutex::new(Some(dispatcher)),
            owner_socket: Mutex::new(Some(owner_socket)),
        })
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the first free rendezvous socket for `call`
    fn bind_rendezvous(&self, call: CallId) -> FusionResult<(UnixDatagram, u32, Unlink)> {
        for serial in 0..=MAX_RENDEZVOUS_SERIAL {
            let path = rendezvous_path(&self.dir, call, serial);
            match UnixDatagram::bind(&path) {
                Ok(socket) => return Ok((socket, serial, Unlink(path))),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(FusionError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no free rendezvous socket for call {call:x}"),
        )))
    }
}

/// Handle one datagram received on the world socket
fn serve(socket: &UnixDatagram, dir: &Path, registry: &Mutex<Registry>, bytes: &[u8]) {
    let msg = match WireMessage::decode(bytes) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed datagram");
            return;
        }
    };

    let (caller, call_id, arg, ptr, serial) = match msg {
        WireMessage::Call {
            caller,
            call_id,
            arg,
            ptr,
            serial,
        } => (caller, call_id, arg, ptr, serial),
        other => {
            tracing::warn!(?other, "unexpected message on world socket");
            return;
        }
    };

    // Marked retained up front so a reply or destroy issued from inside
    // the handler finds the invocation
    let (handler, destroyed) = {
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let handler = registry.handlers.get(&call_id).cloned();
        if handler.is_some() && serial != ONEWAY_SERIAL {
            registry.retained.insert((call_id, serial));
        }
        (handler, registry.destroyed.contains(&call_id))
    };

    let reply = match handler {
        None if destroyed => WireMessage::Destroyed { call_id, serial },
        None => {
            tracing::debug!(call = call_id.0, caller = caller.0, "call id was never registered here");
            WireMessage::Unknown { call_id, serial }
        }
        Some(handler) => {
            let ctx = CallContext {
                caller,
                arg,
                ptr,
                serial,
            };
            match handler.handle(&ctx) {
                HandlerResult::Return(value) => {
                    let pending = registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retained
                        .remove(&(call_id, serial));
                    if !pending {
                        // Answered or destroyed while the handler ran
                        return;
                    }
                    WireMessage::Return { call_id, serial, value }
                }
                HandlerResult::Retain => return,
            }
        }
    };

    if serial == ONEWAY_SERIAL {
        return;
    }
    if let Err(e) = send_message(socket, &rendezvous_path(dir, call_id, serial), &reply) {
        tracing::debug!(call = call_id.0, serial, error = %e, "caller went away before reply");
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn register(&self, _owner: FusionId, handler: Arc<dyn CallHandler>) -> FusionResult<CallId> {
        let id = self.shared.next_call_id();
        self.registry().handlers.insert(id, handler);
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
        let owner_path = owner_socket_path(&self.dir, call.owner());
        let to_owner = |socket: &UnixDatagram, serial: u32| {
            let msg = WireMessage::Call {
                caller,
                call_id: call.id(),
                arg,
                ptr,
                serial,
            };
            match send_message(socket, &owner_path, &msg) {
                Err(FusionError::Io(e)) if is_gone(&e) => Err(FusionError::Destroyed),
                other => other,
            }
        };

        self.sent.fetch_add(1, Ordering::Relaxed);

        if flags.contains(ExecFlags::ONEWAY) {
            to_owner(&self.sender, ONEWAY_SERIAL)?;
            return Ok(None);
        }

        let (socket, serial, _unlink) = self.bind_rendezvous(call.id())?;
        to_owner(&socket, serial)?;

        socket.set_read_timeout(Some(OWNER_POLL_INTERVAL))?;
        let mut buf = [0u8; MAX_WIRE_MESSAGE_SIZE];
        loop {
            match socket.recv(&mut buf) {
                Ok(len) => match WireMessage::decode(&buf[..len])? {
                    WireMessage::Return { value, .. } => return Ok(Some(value)),
                    WireMessage::Destroyed { .. } => return Err(FusionError::Destroyed),
                    WireMessage::Unknown { .. } => return Err(FusionError::InvalidArgument),
                    other => tracing::warn!(?other, "unexpected message on rendezvous socket"),
                },
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if !owner_path.exists() {
                        tracing::debug!(call = call.id().0, "owner exited while call was pending");
                        return Err(FusionError::Destroyed);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn call_return(&self, call: &FusionCall, serial: u32, value: i32) -> FusionResult<()> {
        {
            let mut registry = self.registry();
            if !registry.handlers.contains_key(&call.id()) {
                return Err(FusionError::Destroyed);
            }
            if !registry.retained.remove(&(call.id(), serial)) {
                return Err(FusionError::NoContext);
            }
        }
        let msg = WireMessage::Return {
            call_id: call.id(),
            serial,
            value,
        };
        match send_message(&self.sender, &rendezvous_path(&self.dir, call.id(), serial), &msg) {
            Err(FusionError::Io(e)) if is_gone(&e) => Err(FusionError::NoContext),
            other => other,
        }
    }

    fn destroy(&self, call: &FusionCall) -> FusionResult<()> {
        if call.owner() != self.id {
            return Err(FusionError::InvalidArgument);
        }
        let retained: Vec<u32> = {
            let mut registry = self.registry();
            if registry.handlers.remove(&call.id()).is_some() {
                registry.destroyed.insert(call.id());
            }
            let serials = registry
                .retained
                .iter()
                .filter(|(id, _)| *id == call.id())
                .map(|(_, serial)| *serial)
                .collect::<Vec<_>>();
            for serial in &serials {
                registry.retained.remove(&(call.id(), *serial));
            }
            serials
        };
        for serial in retained {
            let msg = WireMessage::Destroyed {
                call_id: call.id(),
                serial,
            };
            let _ = send_message(&self.sender, &rendezvous_path(&self.dir, call.id(), serial), &msg);
        }
        Ok(())
    }

    fn detach(&self) {
        if let Some(mut dispatcher) = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            dispatcher.stop();
        }
        // Dropping the guard unlinks the world socket, failing pending callers
        self.owner_socket.lock().unwrap_or_else(PoisonError::into_inner).take();

        let retained: Vec<(CallId, u32)> = {
            let mut registry = self.registry();
            let owned: Vec<CallId> = registry.handlers.drain().map(|(id, _)| id).collect();
            registry.destroyed.extend(owned);
            registry.retained.drain().collect()
        };
        for (call_id, serial) in retained {
            let msg = WireMessage::Destroyed { call_id, serial };
            let _ = send_message(&self.sender, &rendezvous_path(&self.dir, call_id, serial), &msg);
        }
        tracing::info!(world = self.id.0, "left socket transport");
    }

    fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}
