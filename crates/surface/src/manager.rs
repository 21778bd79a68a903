//! Chunk allocation manager
//!
//! Tracks free extents of one contiguous memory region and hands out
//! chunks with first-fit placement. Freed chunks are merged with adjacent
//! free extents, so the region never needs a defragmentation pass.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use slotmap::{new_key_type, SlotMap};

use crate::error::{SurfaceError, SurfaceResult};
use crate::surface::SurfaceConfig;

new_key_type! {
    /// Handle to a chunk owned by a `SurfaceManager`
    pub struct ChunkId;
}

/// An extent of the managed region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub offset: usize,
    pub length: usize,
    pub pitch: u32,
}

/// Allocator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ManagerStats {
    pub length: usize,
    pub free: usize,
    pub largest_free: usize,
    pub free_extents: usize,
    pub used_chunks: usize,
}

struct ManagerState {
    /// offset -> length, never adjacent
    free: BTreeMap<usize, usize>,
    chunks: SlotMap<ChunkId, Chunk>,
}

pub struct SurfaceManager {
    length: usize,
    offset_align: usize,
    pitch_align: u32,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for SurfaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceManager")
            .field("length", &self.length)
            .field("offset_align", &self.offset_align)
            .field("pitch_align", &self.pitch_align)
            .field("stats", &self.stats())
            .finish()
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl SurfaceManager {
    /// Manage `length` bytes; alignments of 0 are treated as 1
    pub fn new(length: usize, offset_align: usize, pitch_align: u32) -> Self {
        let mut free = BTreeMap::new();
        if length > 0 {
            free.insert(0, length);
        }
        Self {
            length,
            offset_align: offset_align.max(1),
            pitch_align: pitch_align.max(1),
            state: Mutex::new(ManagerState {
                free,
                chunks: SlotMap::with_key(),
            }),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pitch and length a buffer of `config` needs in this region
    pub fn buffer_size(&self, config: &SurfaceConfig) -> SurfaceResult<(u32, usize)> {
        if config.width == 0 || config.height == 0 {
            return Err(SurfaceError::InvalidArgument("zero sized buffer"));
        }
        let min_pitch = config
            .width
            .checked_mul(config.format.bytes_per_pixel())
            .ok_or(SurfaceError::InvalidArgument("buffer too wide"))?;
        let pitch = align_up(min_pitch as usize, self.pitch_align as usize) as u32;
        let lines = config.format.plane_lines(config.height) as usize;
        let length = (pitch as usize)
            .checked_mul(lines)
            .ok_or(SurfaceError::InvalidArgument("buffer too large"))?;
        Ok((pitch, length))
    }

    fn find(&self, state: &ManagerState, length: usize) -> Option<(usize, usize, usize)> {
        state.free.iter().find_map(|(&offset, &len)| {
            let start = align_up(offset, self.offset_align);
            let end = start.checked_add(length)?;
            (end <= offset + len).then_some((offset, len, start))
        })
    }

    fn largest_free(state: &ManagerState) -> usize {
        state.free.values().copied().max().unwrap_or(0)
    }

    /// Check whether a buffer of `config` would fit right now
    pub fn test_allocate(&self, config: &SurfaceConfig) -> SurfaceResult<()> {
        let (_, length) = self.buffer_size(config)?;
        let state = self.state();
        match self.find(&state, length) {
            Some(_) => Ok(()),
            None => Err(SurfaceError::OutOfSpace {
                requested: length,
                available: Self::largest_free(&state),
            }),
        }
    }

    /// Allocate a chunk for a buffer of `config`
    pub fn allocate(&self, config: &SurfaceConfig) -> SurfaceResult<(ChunkId, Chunk)> {
        let (pitch, length) = self.buffer_size(config)?;
        let mut state = self.state();

        let Some((extent, extent_len, start)) = self.find(&state, length) else {
            let available = Self::largest_free(&state);
            tracing::debug!(requested = length, available, "surface manager out of space");
            return Err(SurfaceError::OutOfSpace {
                requested: length,
                available,
            });
        };

        state.free.remove(&extent);
        if start > extent {
            state.free.insert(extent, start - extent);
        }
        let end = start + length;
        let extent_end = extent + extent_len;
        if extent_end > end {
            state.free.insert(end, extent_end - end);
        }

        let chunk = Chunk {
            offset: start,
            length,
            pitch,
        };
        let id = state.chunks.insert(chunk);
        tracing::trace!(offset = start, length, pitch, "allocated chunk");
        Ok((id, chunk))
    }

    /// Return a chunk; its extent merges with free neighbours
    pub fn deallocate(&self, id: ChunkId) -> SurfaceResult<()> {
        let mut state = self.state();
        let chunk = state.chunks.remove(id).ok_or(SurfaceError::UnknownChunk)?;

        let mut offset = chunk.offset;
        let mut length = chunk.length;

        let before = state
            .free
            .range(..offset)
            .next_back()
            .map(|(&off, &len)| (off, len));
        if let Some((prev, prev_len)) = before {
            if prev + prev_len == offset {
                state.free.remove(&prev);
                offset = prev;
                length += prev_len;
            }
        }
        if let Some(next_len) = state.free.get(&(offset + length)).copied() {
            state.free.remove(&(offset + length));
            length += next_len;
        }
        state.free.insert(offset, length);

        tracing::trace!(offset = chunk.offset, length = chunk.length, "released chunk");
        Ok(())
    }

    pub fn chunk(&self, id: ChunkId) -> Option<Chunk> {
        self.state().chunks.get(id).copied()
    }

    /// Drop every chunk; the whole region becomes free
    pub fn reset(&self) {
        let mut state = self.state();
        state.chunks.clear();
        state.free.clear();
        if self.length > 0 {
            state.free.insert(0, self.length);
        }
    }

    pub fn stats(&self) -> ManagerStats {
        let state = self.state();
        ManagerStats {
            length: self.length,
            free: state.free.values().sum(),
            largest_free: Self::largest_free(&state),
            free_extents: state.free.len(),
            used_chunks: state.chunks.len(),
        }
    }
}
