//! Test harness for the window manager stack
//!
//! Provides a recording backend and device so integration tests can check
//! exactly what the core asked for.
//!
//! # Modules
//!
//! - `mock`: window manager backend that journals every call
//! - `framebuffer`: framebuffer device that journals mode sets and pans
//! - `fixtures`: sessions and pool registries for common scenarios
//! - `assertions`: common test assertions

pub mod assertions;
pub mod fixtures;
pub mod framebuffer;
pub mod mock;

pub use fixtures::{HarnessError, MockSession};
pub use framebuffer::{DeviceCall, RecordingFramebuffer};
pub use mock::{BackendCall, MockBackend, MockOp, MockSettings, MOCK_MODULE};
