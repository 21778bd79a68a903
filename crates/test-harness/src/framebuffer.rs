//! Framebuffer device that records what the pools ask of it

use std::sync::{Mutex, MutexGuard, PoisonError};

use surface::{
    BufferLock, FlipFlags, FramebufferDevice, FramebufferMemory, MemoryFramebuffer, SurfaceConfig, SurfaceResult,
    VideoMode,
};

/// A device request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    SetMode { xres: u32, yres: u32 },
    Pan { offset: usize, x: u32, y: u32 },
}

/// In-memory framebuffer with a journal of mode sets and pans
#[derive(Debug)]
pub struct RecordingFramebuffer {
    inner: MemoryFramebuffer,
    calls: Mutex<Vec<DeviceCall>>,
}

impl RecordingFramebuffer {
    pub fn new(size: usize, modes: Vec<VideoMode>) -> SurfaceResult<Self> {
        Ok(Self {
            inner: MemoryFramebuffer::new(size, 0xd000_0000, modes)?,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn journal(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.journal().clone()
    }

    /// Mode sets that reached the device, successful or not
    pub fn mode_sets(&self) -> Vec<(u32, u32)> {
        self.journal()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::SetMode { xres, yres } => Some((*xres, *yres)),
                DeviceCall::Pan { .. } => None,
            })
            .collect()
    }

    pub fn current_mode(&self) -> Option<VideoMode> {
        self.inner.current_mode().map(|(mode, _)| mode)
    }
}

impl FramebufferDevice for RecordingFramebuffer {
    fn memory(&self) -> FramebufferMemory {
        self.inner.memory()
    }

    fn modes(&self) -> Vec<VideoMode> {
        self.inner.modes()
    }

    fn set_mode(&self, mode: &VideoMode, config: &SurfaceConfig) -> SurfaceResult<()> {
        self.journal().push(DeviceCall::SetMode {
            xres: mode.xres,
            yres: mode.yres,
        });
        self.inner.set_mode(mode, config)
    }

    fn pan_display(&self, lock: &BufferLock, flags: FlipFlags, x: u32, y: u32) -> SurfaceResult<()> {
        self.journal().push(DeviceCall::Pan {
            offset: lock.offset,
            x,
            y,
        });
        self.inner.pan_display(lock, flags, x, y)
    }
}
