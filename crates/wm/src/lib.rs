//! Window manager core
//!
//! The pieces, from the bottom up:
//!
//! - `backend`: the contract a window manager implementation fulfils, and
//!   `backends::stacking`, the built-in one
//! - `core`: loads one backend per session and forwards every stack and
//!   window operation to it, owning the backend's shared data blocks
//! - `stack` and `window`: the window stacks of the display layers and the
//!   session-wide, reference counted windows in them
//! - `interface`: reference counted client handles on windows and
//!   surfaces, with inset-free client geometry
//!
//! A `Session` ties a process to the shared state: the shared memory pool,
//! the surface pools and the fusion world used for cross-process calls.

pub mod backend;
pub mod backends;
pub mod config;
pub mod core;
pub mod core_surface;
pub mod error;
pub mod events;
pub mod interface;
pub mod module;
pub mod session;
pub mod stack;
pub mod types;
pub mod window;

pub use backend::{BackendData, WmBackend, WmInfo, WmVersion, WM_ABI_VERSION};
pub use config::{Config, StackingConfig};
pub use crate::core::WmCore;
pub use core_surface::CoreSurface;
pub use error::{ConfigError, WmError, WmResult};
pub use events::EventBuffer;
pub use interface::{ClientSession, ISurface, IWindow, MAX_WINDOW_SIZE};
pub use module::{ModuleRegistry, WmModule};
pub use session::{Session, SessionShared};
pub use stack::{LayerContext, StackState, WindowStack};
pub use window::Window;
