//! Built-in window manager backends

pub mod stacking;
