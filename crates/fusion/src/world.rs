//! Worlds: one process's attachment to a session
//!
//! The master world creates the session state; every other participant
//! joins it and receives a fresh fusion id. In a real deployment the
//! `WorldShared` part lives in memory mapped by every process. Here it is
//! shared by `Arc`, and each `World` stands for one process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::{CallHandler, CallId, FusionCall};
use crate::error::FusionResult;
use crate::transport::{self, KernelBroker, Transport, TransportKind};

/// Identity of a world within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FusionId(pub u64);

impl FusionId {
    /// The world that created the session
    pub const MASTER: FusionId = FusionId(1);
}

/// Parameters for creating a session
#[derive(Debug, Clone, Default)]
pub struct WorldConfig {
    /// Session index, distinguishes concurrent sessions of one user
    pub index: u32,
    pub transport: TransportKind,
    /// Base directory for world sockets; defaults to the user's runtime dir
    pub socket_dir: Option<PathBuf>,
}

/// Session state visible to every world
pub struct WorldShared {
    index: u32,
    kind: TransportKind,
    next_fusion_id: AtomicU64,
    next_call_id: AtomicU32,
    broker: Option<Arc<KernelBroker>>,
    world_dir: PathBuf,
}

impl std::fmt::Debug for WorldShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldShared")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("world_dir", &self.world_dir)
            .finish_non_exhaustive()
    }
}

/// Runtime directory for sockets: `/run/user/<uid>` when present
fn default_socket_dir() -> PathBuf {
    let uid = rustix::process::getuid().as_raw();
    let run_dir = PathBuf::from(format!("/run/user/{uid}"));
    if run_dir.is_dir() {
        run_dir
    } else {
        std::env::temp_dir()
    }
}

impl WorldShared {
    fn new(config: &WorldConfig) -> Self {
        let base = config.socket_dir.clone().unwrap_or_else(default_socket_dir);
        Self {
            index: config.index,
            kind: config.transport,
            next_fusion_id: AtomicU64::new(FusionId::MASTER.0 + 1),
            next_call_id: AtomicU32::new(1),
            broker: (config.transport == TransportKind::Kernel).then(|| Arc::new(KernelBroker::new())),
            world_dir: base.join(format!(".fusion-{}", config.index)),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Directory holding the session's sockets
    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }

    pub(crate) fn next_call_id(&self) -> CallId {
        CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed))
    }

    fn next_fusion_id(&self) -> FusionId {
        FusionId(self.next_fusion_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn broker(&self) -> Option<&Arc<KernelBroker>> {
        self.broker.as_ref()
    }
}

/// One participant of a session
pub struct World {
    id: FusionId,
    shared: Arc<WorldShared>,
    transport: Box<dyn Transport>,
    exited: AtomicBool,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl World {
    /// Create a new session and attach to it as master
    pub fn create(config: &WorldConfig) -> FusionResult<Self> {
        let shared = Arc::new(WorldShared::new(config));
        tracing::info!(index = config.index, transport = ?config.transport, "creating fusion world");
        Self::attach(shared, FusionId::MASTER)
    }

    /// Join an existing session
    pub fn join(shared: &Arc<WorldShared>) -> FusionResult<Self> {
        let id = shared.next_fusion_id();
        tracing::info!(index = shared.index, world = id.0, "joining fusion world");
        Self::attach(shared.clone(), id)
    }

    fn attach(shared: Arc<WorldShared>, id: FusionId) -> FusionResult<Self> {
        let transport = transport::connect(&shared, id)?;
        Ok(Self {
            id,
            shared,
            transport,
            exited: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> FusionId {
        self.id
    }

    pub fn is_master(&self) -> bool {
        self.id == FusionId::MASTER
    }

    pub fn shared(&self) -> &Arc<WorldShared> {
        &self.shared
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Register a call owned by this world
    pub fn register_call(&self, handler: impl CallHandler + 'static) -> FusionResult<FusionCall> {
        FusionCall::register(self, handler)
    }

    /// Invocations this world handed to its transport
    pub fn messages_sent(&self) -> u64 {
        self.transport.messages_sent()
    }

    /// Leave the session; calls owned by this world stop answering
    pub fn exit(&self) {
        if self.exited.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(world = self.id.0, "exiting fusion world");
        self.transport.detach();
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallContext, ExecFlags, HandlerResult};
    use crate::error::FusionError;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn session(kind: TransportKind, dir: &Path) -> World {
        World::create(&WorldConfig {
            index: 0,
            transport: kind,
            socket_dir: Some(dir.to_path_buf()),
        })
        .unwrap()
    }

    fn doubler(ctx: &CallContext) -> HandlerResult {
        HandlerResult::Return(ctx.arg * 2)
    }

    #[test]
    fn master_and_joined_ids() {
        let master = World::create(&WorldConfig::default()).unwrap();
        let slave = World::join(master.shared()).unwrap();
        assert!(master.is_master());
        assert_eq!(master.id(), FusionId::MASTER);
        assert_ne!(slave.id(), master.id());
        assert!(!slave.is_master());
    }

    #[test]
    fn world_dir_embeds_index() {
        let tmp = tempfile::tempdir().unwrap();
        let world = World::create(&WorldConfig {
            index: 3,
            transport: TransportKind::Single,
            socket_dir: Some(tmp.path().to_path_buf()),
        })
        .unwrap();
        assert_eq!(world.shared().world_dir(), tmp.path().join(".fusion-3"));
    }

    fn remote_roundtrip(kind: TransportKind) {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(kind, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let call = master.register_call(doubler).unwrap();
        assert_eq!(call.execute(&slave, ExecFlags::empty(), 21, 0).unwrap(), 42);
        assert_eq!(slave.messages_sent(), 1);

        // Owner short-circuits unless told otherwise
        assert_eq!(call.execute(&master, ExecFlags::empty(), 1, 0).unwrap(), 2);
        assert_eq!(master.messages_sent(), 0);
        assert_eq!(call.execute(&master, ExecFlags::NO_DIRECT, 2, 0).unwrap(), 4);
        assert_eq!(master.messages_sent(), 1);
    }

    #[test]
    fn kernel_roundtrip() {
        remote_roundtrip(TransportKind::Kernel);
    }

    #[test]
    fn socket_roundtrip() {
        remote_roundtrip(TransportKind::Socket);
    }

    fn unknown_id_is_invalid(kind: TransportKind) {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(kind, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let call = master.register_call(doubler).unwrap();
        let stray = call.with_id(CallId(call.id().0 + 9999));
        assert!(matches!(
            stray.execute(&slave, ExecFlags::empty(), 1, 0),
            Err(FusionError::InvalidArgument)
        ));

        // A destroyed id stays known and reports Destroyed instead
        let other = master.register_call(doubler).unwrap();
        call.destroy(&master).unwrap();
        let retired = other.with_id(call.id());
        assert!(matches!(
            retired.execute(&slave, ExecFlags::empty(), 1, 0),
            Err(FusionError::Destroyed)
        ));
        assert_eq!(other.execute(&slave, ExecFlags::empty(), 4, 0).unwrap(), 8);
    }

    #[test]
    fn kernel_unknown_id_is_invalid() {
        unknown_id_is_invalid(TransportKind::Kernel);
    }

    #[test]
    fn socket_unknown_id_is_invalid() {
        unknown_id_is_invalid(TransportKind::Socket);
    }

    fn retained_reply(kind: TransportKind) {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(kind, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let (serial_tx, serial_rx) = mpsc::channel();
        let serial_tx = std::sync::Mutex::new(serial_tx);
        let call = master
            .register_call(move |ctx: &CallContext| {
                let _ = serial_tx.lock().unwrap().send(ctx.serial);
                HandlerResult::Retain
            })
            .unwrap();

        let remote = call.clone();
        let caller = thread::spawn(move || remote.execute(&slave, ExecFlags::empty(), 0, 0));

        let serial = serial_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        call.call_return(&master, serial, 99).unwrap();
        assert_eq!(caller.join().unwrap().unwrap(), 99);

        // The invocation is answered; a second reply has nobody to go to
        assert!(matches!(call.call_return(&master, serial, 1), Err(FusionError::NoContext)));
    }

    #[test]
    fn kernel_retained_reply() {
        retained_reply(TransportKind::Kernel);
    }

    #[test]
    fn socket_retained_reply() {
        retained_reply(TransportKind::Socket);
    }

    fn destroy_fails_pending(kind: TransportKind) {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(kind, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = std::sync::Mutex::new(entered_tx);
        let call = master
            .register_call(move |_: &CallContext| {
                let _ = entered_tx.lock().unwrap().send(());
                HandlerResult::Retain
            })
            .unwrap();

        let remote = call.clone();
        let caller = thread::spawn(move || remote.execute(&slave, ExecFlags::empty(), 0, 0));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        call.destroy(&master).unwrap();
        assert!(matches!(caller.join().unwrap(), Err(FusionError::Destroyed)));
    }

    #[test]
    fn kernel_destroy_fails_pending() {
        destroy_fails_pending(TransportKind::Kernel);
    }

    #[test]
    fn socket_destroy_fails_pending() {
        destroy_fails_pending(TransportKind::Socket);
    }

    fn owner_exit_fails_calls(kind: TransportKind) {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(kind, tmp.path());
        let owner = World::join(master.shared()).unwrap();

        let call = owner.register_call(doubler).unwrap();
        assert_eq!(call.execute(&master, ExecFlags::empty(), 5, 0).unwrap(), 10);

        owner.exit();
        assert!(matches!(
            call.execute(&master, ExecFlags::empty(), 5, 0),
            Err(FusionError::Destroyed)
        ));
    }

    #[test]
    fn kernel_owner_exit_fails_calls() {
        owner_exit_fails_calls(TransportKind::Kernel);
    }

    #[test]
    fn socket_owner_exit_fails_calls() {
        owner_exit_fails_calls(TransportKind::Socket);
    }

    #[test]
    fn oneway_call_reaches_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(TransportKind::Kernel, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let (seen_tx, seen_rx) = mpsc::channel();
        let seen_tx = std::sync::Mutex::new(seen_tx);
        let call = master
            .register_call(move |ctx: &CallContext| {
                let _ = seen_tx.lock().unwrap().send(ctx.arg);
                HandlerResult::Return(0)
            })
            .unwrap();

        assert_eq!(call.execute(&slave, ExecFlags::ONEWAY, 7, 0).unwrap(), 0);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn socket_destroy_requires_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let master = session(TransportKind::Socket, tmp.path());
        let slave = World::join(master.shared()).unwrap();

        let call = master.register_call(doubler).unwrap();
        assert!(matches!(call.destroy(&slave), Err(FusionError::InvalidArgument)));
        assert!(!call.is_destroyed());
        call.destroy(&master).unwrap();
    }
}
