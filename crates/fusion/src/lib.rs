//! Fusion: the plumbing shared by cooperating processes
//!
//! This crate provides the two primitives the window manager core builds on:
//!
//! - `shm`: a shared memory pool addressed by offsets, so blocks stay valid
//!   in every process that maps the pool
//! - `call`: synchronous calls into a handler that may live in another
//!   process, routed through one of three transports
//!
//! A `World` is one process's attachment to a session. It owns the fusion
//! identity used to decide whether a call can short-circuit locally.

mod dispatch;
pub mod call;
pub mod error;
pub mod shm;
pub mod transport;
pub mod wire;
pub mod world;

pub use call::{CallContext, CallHandler, CallId, ExecFlags, FusionCall, HandlerResult};
pub use error::{FusionError, FusionResult};
pub use shm::{ShmBlock, ShmError, ShmPool, ShmResult, ShmStats};
pub use transport::TransportKind;
pub use world::{FusionId, World, WorldConfig, WorldShared};
