//! Framebuffer device contract
//!
//! The pools consume only what a framebuffer driver exposes: the memory
//! descriptor, the mode table, a mode-set and a pan for flipping.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{SurfaceError, SurfaceResult};
use crate::pool::BufferLock;
use crate::surface::{FlipFlags, SurfaceConfig};

/// Backing store of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FramebufferMemory {
    /// CPU-visible base address of the mapping
    pub base: usize,
    /// Physical base address
    pub phys: u64,
    pub size: usize,
    /// Bytes per line in the current mode
    pub line_length: u32,
}

/// An entry of the mode table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub xres: u32,
    pub yres: u32,
    #[serde(default)]
    pub refresh: u32,
    /// Among modes of equal resolution the highest priority wins
    #[serde(default)]
    pub priority: i32,
}

impl VideoMode {
    pub fn new(xres: u32, yres: u32, priority: i32) -> Self {
        Self {
            xres,
            yres,
            refresh: 60,
            priority,
        }
    }
}

pub trait FramebufferDevice: Send + Sync {
    fn memory(&self) -> FramebufferMemory;

    fn modes(&self) -> Vec<VideoMode>;

    /// Switch the display to `mode` with the layout of `config`
    fn set_mode(&self, mode: &VideoMode, config: &SurfaceConfig) -> SurfaceResult<()>;

    /// Show the buffer at `lock`, scrolled to `(x, y)`
    fn pan_display(&self, lock: &BufferLock, flags: FlipFlags, x: u32, y: u32) -> SurfaceResult<()>;
}

#[derive(Debug)]
struct MemoryFramebufferState {
    line_length: u32,
    current: Option<(VideoMode, SurfaceConfig)>,
    panned_offset: usize,
}

/// A framebuffer backed by process memory
///
/// Stands in for a display driver: mode sets update the line length and
/// the current mode, pans record the displayed offset.
pub struct MemoryFramebuffer {
    memory: Box<[u8]>,
    phys: u64,
    modes: Vec<VideoMode>,
    state: Mutex<MemoryFramebufferState>,
}

impl std::fmt::Debug for MemoryFramebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFramebuffer")
            .field("size", &self.memory.len())
            .field("phys", &self.phys)
            .field("modes", &self.modes)
            .finish_non_exhaustive()
    }
}

impl MemoryFramebuffer {
    /// `size` bytes of zeroed memory reported at physical address `phys`
    pub fn new(size: usize, phys: u64, modes: Vec<VideoMode>) -> SurfaceResult<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| SurfaceError::NoSystemMemory(size))?;
        memory.resize(size, 0);

        let line_length = modes.first().map_or(0, |mode| mode.xres * 4);
        Ok(Self {
            memory: memory.into_boxed_slice(),
            phys,
            modes,
            state: Mutex::new(MemoryFramebufferState {
                line_length,
                current: None,
                panned_offset: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, MemoryFramebufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last mode set, with the surface layout it was set for
    pub fn current_mode(&self) -> Option<(VideoMode, SurfaceConfig)> {
        self.state().current
    }

    /// Offset of the buffer last panned to
    pub fn panned_offset(&self) -> usize {
        self.state().panned_offset
    }
}

impl FramebufferDevice for MemoryFramebuffer {
    fn memory(&self) -> FramebufferMemory {
        FramebufferMemory {
            base: self.memory.as_ptr() as usize,
            phys: self.phys,
            size: self.memory.len(),
            line_length: self.state().line_length,
        }
    }

    fn modes(&self) -> Vec<VideoMode> {
        self.modes.clone()
    }

    fn set_mode(&self, mode: &VideoMode, config: &SurfaceConfig) -> SurfaceResult<()> {
        let line_length = mode
            .xres
            .checked_mul(config.format.bytes_per_pixel())
            .ok_or(SurfaceError::InvalidArgument("mode too wide"))?;
        let needed = line_length as usize * mode.yres as usize * config.buffer_count();
        if needed > self.memory.len() {
            return Err(SurfaceError::Unsupported(format!(
                "{}x{} {} needs {needed} bytes, framebuffer has {}",
                mode.xres,
                mode.yres,
                config.format,
                self.memory.len()
            )));
        }

        let mut state = self.state();
        state.line_length = line_length;
        state.current = Some((*mode, *config));
        state.panned_offset = 0;
        Ok(())
    }

    fn pan_display(&self, lock: &BufferLock, _flags: FlipFlags, x: u32, y: u32) -> SurfaceResult<()> {
        let mut state = self.state();
        let offset = lock.offset + y as usize * lock.pitch as usize + x as usize;
        if offset >= self.memory.len() {
            return Err(SurfaceError::Device(format!("pan offset {offset} outside framebuffer")));
        }
        state.panned_offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    #[test]
    fn mode_set_updates_line_length() {
        let fb = MemoryFramebuffer::new(1 << 20, 0x8000_0000, vec![VideoMode::new(640, 480, 0)]).unwrap();
        let config = SurfaceConfig::new(640, 480, PixelFormat::Rgb16);
        fb.set_mode(&VideoMode::new(640, 480, 0), &config).unwrap();

        assert_eq!(fb.memory().line_length, 1280);
        assert_eq!(fb.current_mode().map(|(mode, _)| mode.xres), Some(640));
    }

    #[test]
    fn mode_larger_than_memory_is_unsupported() {
        let fb = MemoryFramebuffer::new(1024, 0, vec![]).unwrap();
        let config = SurfaceConfig::new(640, 480, PixelFormat::Argb);
        assert!(matches!(
            fb.set_mode(&VideoMode::new(640, 480, 0), &config),
            Err(SurfaceError::Unsupported(_))
        ));
        assert!(fb.current_mode().is_none());
    }
}
