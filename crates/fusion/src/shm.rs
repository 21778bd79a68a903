//! Shared memory pool
//!
//! A fixed-capacity byte arena. Allocations are handed out as `ShmBlock`
//! values (offset + length) instead of pointers: an offset means the same
//! thing in every process that maps the pool, a pointer does not.
//!
//! Blocks are zero-filled on allocation (calloc semantics) and placed
//! first-fit on 8-byte boundaries.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allocation granularity inside the arena
const SHM_ALIGN: u64 = 8;

/// Shared memory errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShmError {
    /// Not enough contiguous space left in the pool
    #[error("out of shared memory: requested {requested} bytes, {available} free")]
    OutOfMemory { requested: usize, available: usize },

    /// Zero-sized allocations are never valid
    #[error("zero-sized shared allocation")]
    ZeroSize,

    /// The block is not (or no longer) allocated
    #[error("no shared block at offset {offset}")]
    UnknownBlock { offset: u64 },

    /// Access outside the block boundaries
    #[error("access of {len} bytes at {at} exceeds block of {size} bytes")]
    OutOfBounds { at: usize, len: usize, size: usize },
}

/// Result alias for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

/// Handle to an allocation inside a `ShmPool`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShmBlock {
    offset: u64,
    len: usize,
}

impl ShmBlock {
    /// Offset of the block from the start of the pool
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the block in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is empty (never true for live blocks)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Usage statistics of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShmStats {
    /// Total capacity in bytes
    pub capacity: usize,
    /// Bytes currently allocated (excluding alignment padding)
    pub in_use: usize,
    /// Number of live blocks
    pub live_blocks: usize,
    /// Allocations performed since creation
    pub total_allocations: u64,
    /// Frees performed since creation
    pub total_frees: u64,
}

struct ShmInner {
    bytes: Vec<u8>,
    /// Live blocks: offset -> length
    blocks: BTreeMap<u64, usize>,
    total_allocations: u64,
    total_frees: u64,
}

impl ShmInner {
    fn check(&self, block: ShmBlock, at: usize, len: usize) -> ShmResult<std::ops::Range<usize>> {
        match self.blocks.get(&block.offset) {
            Some(&size) if size == block.len => {}
            _ => return Err(ShmError::UnknownBlock { offset: block.offset }),
        }
        if at.checked_add(len).map_or(true, |end| end > block.len) {
            return Err(ShmError::OutOfBounds { at, len, size: block.len });
        }
        let start = block.offset as usize + at;
        Ok(start..start + len)
    }

    /// Find the first gap that fits `len` bytes
    fn find_gap(&self, len: usize) -> Option<u64> {
        let mut cursor = 0u64;
        for (&offset, &size) in &self.blocks {
            if offset - cursor >= len as u64 {
                return Some(cursor);
            }
            cursor = align_up(offset + size as u64);
        }
        let capacity = self.bytes.len() as u64;
        (capacity.saturating_sub(cursor) >= len as u64).then_some(cursor)
    }

    fn largest_gap(&self) -> usize {
        let mut cursor = 0u64;
        let mut largest = 0u64;
        for (&offset, &size) in &self.blocks {
            largest = largest.max(offset - cursor);
            cursor = align_up(offset + size as u64);
        }
        largest.max((self.bytes.len() as u64).saturating_sub(cursor)) as usize
    }
}

fn align_up(value: u64) -> u64 {
    (value + SHM_ALIGN - 1) & !(SHM_ALIGN - 1)
}

/// A named shared memory pool
pub struct ShmPool {
    name: String,
    inner: Mutex<ShmInner>,
}

impl std::fmt::Debug for ShmPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmPool")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ShmPool {
    /// Create a pool with a fixed capacity in bytes
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        tracing::debug!(%name, capacity, "created shared memory pool");
        Self {
            name,
            inner: Mutex::new(ShmInner {
                bytes: vec![0; capacity],
                blocks: BTreeMap::new(),
                total_allocations: 0,
                total_frees: 0,
            }),
        }
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn inner(&self) -> MutexGuard<'_, ShmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a zero-filled block
    pub fn calloc(&self, len: usize) -> ShmResult<ShmBlock> {
        if len == 0 {
            return Err(ShmError::ZeroSize);
        }

        let mut inner = self.inner();
        let Some(offset) = inner.find_gap(len) else {
            let available = inner.largest_gap();
            tracing::warn!(pool = %self.name, requested = len, available, "out of shared memory");
            return Err(ShmError::OutOfMemory { requested: len, available });
        };

        let start = offset as usize;
        inner.bytes[start..start + len].fill(0);
        inner.blocks.insert(offset, len);
        inner.total_allocations += 1;

        tracing::trace!(pool = %self.name, offset, len, "shared calloc");
        Ok(ShmBlock { offset, len })
    }

    /// Release a block
    pub fn free(&self, block: ShmBlock) -> ShmResult<()> {
        let mut inner = self.inner();
        match inner.blocks.get(&block.offset) {
            Some(&len) if len == block.len => {
                inner.blocks.remove(&block.offset);
                inner.total_frees += 1;
                tracing::trace!(pool = %self.name, offset = block.offset, len, "shared free");
                Ok(())
            }
            _ => Err(ShmError::UnknownBlock { offset: block.offset }),
        }
    }

    /// Copy a string into a new block (no terminator)
    pub fn strdup(&self, s: &str) -> ShmResult<ShmBlock> {
        let block = self.calloc(s.len().max(1))?;
        if !s.is_empty() {
            self.write(block, 0, s.as_bytes())?;
        }
        Ok(block)
    }

    /// Read back a string stored by `strdup`
    pub fn read_string(&self, block: ShmBlock) -> ShmResult<String> {
        let mut buf = vec![0; block.len];
        self.read(block, 0, &mut buf)?;
        while buf.last() == Some(&0) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read bytes from a block
    pub fn read(&self, block: ShmBlock, at: usize, buf: &mut [u8]) -> ShmResult<()> {
        let inner = self.inner();
        let range = inner.check(block, at, buf.len())?;
        buf.copy_from_slice(&inner.bytes[range]);
        Ok(())
    }

    /// Write bytes into a block
    pub fn write(&self, block: ShmBlock, at: usize, data: &[u8]) -> ShmResult<()> {
        let mut inner = self.inner();
        let range = inner.check(block, at, data.len())?;
        inner.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Read a little-endian `u32` field
    pub fn read_u32(&self, block: ShmBlock, at: usize) -> ShmResult<u32> {
        let mut buf = [0; 4];
        self.read(block, at, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write a little-endian `u32` field
    pub fn write_u32(&self, block: ShmBlock, at: usize, value: u32) -> ShmResult<()> {
        self.write(block, at, &value.to_le_bytes())
    }

    /// Read a little-endian `i64` field
    pub fn read_i64(&self, block: ShmBlock, at: usize) -> ShmResult<i64> {
        let mut buf = [0; 8];
        self.read(block, at, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Write a little-endian `i64` field
    pub fn write_i64(&self, block: ShmBlock, at: usize, value: i64) -> ShmResult<()> {
        self.write(block, at, &value.to_le_bytes())
    }

    /// Whether the block is currently allocated
    pub fn contains(&self, block: ShmBlock) -> bool {
        self.inner().blocks.get(&block.offset) == Some(&block.len)
    }

    /// Live blocks in address order
    pub fn live_blocks(&self) -> Vec<ShmBlock> {
        self.inner()
            .blocks
            .iter()
            .map(|(&offset, &len)| ShmBlock { offset, len })
            .collect()
    }

    /// Usage statistics
    pub fn stats(&self) -> ShmStats {
        let inner = self.inner();
        ShmStats {
            capacity: inner.bytes.len(),
            in_use: inner.blocks.values().sum(),
            live_blocks: inner.blocks.len(),
            total_allocations: inner.total_allocations,
            total_frees: inner.total_frees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calloc_returns_zeroed_blocks() {
        let pool = ShmPool::new("test", 256);
        let block = pool.calloc(16).unwrap();
        pool.write(block, 0, &[0xff; 16]).unwrap();
        pool.free(block).unwrap();

        let again = pool.calloc(16).unwrap();
        assert_eq!(again.offset(), block.offset(), "first fit should reuse the freed gap");
        let mut buf = [1u8; 16];
        pool.read(again, 0, &mut buf).unwrap();
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn blocks_are_aligned_and_disjoint() {
        let pool = ShmPool::new("test", 256);
        let a = pool.calloc(3).unwrap();
        let b = pool.calloc(5).unwrap();
        assert_eq!(a.offset() % SHM_ALIGN, 0);
        assert_eq!(b.offset() % SHM_ALIGN, 0);
        assert!(b.offset() >= a.offset() + a.len() as u64);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let pool = ShmPool::new("test", 64);
        let _a = pool.calloc(48).unwrap();
        let err = pool.calloc(32).unwrap_err();
        assert_eq!(err, ShmError::OutOfMemory { requested: 32, available: 16 });
    }

    #[test]
    fn zero_sized_allocation_is_rejected() {
        let pool = ShmPool::new("test", 64);
        assert_eq!(pool.calloc(0), Err(ShmError::ZeroSize));
    }

    #[test]
    fn double_free_is_detected() {
        let pool = ShmPool::new("test", 64);
        let block = pool.calloc(8).unwrap();
        pool.free(block).unwrap();
        assert_eq!(pool.free(block), Err(ShmError::UnknownBlock { offset: block.offset() }));
    }

    #[test]
    fn access_past_block_end_is_rejected() {
        let pool = ShmPool::new("test", 64);
        let block = pool.calloc(8).unwrap();
        assert!(matches!(pool.write_u32(block, 6, 1), Err(ShmError::OutOfBounds { .. })));
        assert!(pool.write_u32(block, 4, 7).is_ok());
        assert_eq!(pool.read_u32(block, 4).unwrap(), 7);
    }

    #[test]
    fn strdup_roundtrip() {
        let pool = ShmPool::new("test", 64);
        let block = pool.strdup("stacking").unwrap();
        assert_eq!(block.len(), 8);
        assert_eq!(pool.read_string(block).unwrap(), "stacking");
    }

    #[test]
    fn stats_track_allocations() {
        let pool = ShmPool::new("test", 128);
        let a = pool.calloc(10).unwrap();
        let _b = pool.calloc(20).unwrap();
        pool.free(a).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.capacity, 128);
        assert_eq!(stats.in_use, 20);
        assert_eq!(stats.live_blocks, 1);
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.total_frees, 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Live blocks never overlap and the byte count matches them
            #[test]
            fn live_blocks_stay_disjoint(
                ops in prop::collection::vec((1usize..96, any::<bool>()), 1..64),
            ) {
                let pool = ShmPool::new("props", 1024);
                let mut live: Vec<ShmBlock> = Vec::new();

                for (len, free_first) in ops {
                    if free_first && !live.is_empty() {
                        let block = live.remove(len % live.len());
                        prop_assert!(pool.free(block).is_ok());
                    }
                    if let Ok(block) = pool.calloc(len) {
                        prop_assert_eq!(block.offset() % SHM_ALIGN, 0);
                        live.push(block);
                    }
                }

                let blocks = pool.live_blocks();
                for pair in blocks.windows(2) {
                    prop_assert!(pair[0].offset() + pair[0].len() as u64 <= pair[1].offset());
                }
                let stats = pool.stats();
                prop_assert_eq!(stats.live_blocks, live.len());
                prop_assert_eq!(stats.in_use, live.iter().map(|b| b.len()).sum::<usize>());
            }
        }
    }
}
