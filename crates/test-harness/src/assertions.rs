//! Test assertions for backend journals and shared memory

use fusion::{ShmBlock, ShmPool};
use wm::WindowStack;
use wm::types::WindowId;

use crate::mock::{BackendCall, MockBackend};

/// Assert that exactly one recorded call matches `pred`
pub fn assert_called_once(backend: &MockBackend, what: &str, pred: impl Fn(&BackendCall) -> bool) {
    let count = backend.count(pred);
    assert_eq!(
        count, 1,
        "expected exactly one {what} call, got {count}; journal: {:?}",
        backend.calls()
    );
}

/// Assert that no recorded call matches `pred`
pub fn assert_not_called(backend: &MockBackend, what: &str, pred: impl Fn(&BackendCall) -> bool) {
    let count = backend.count(pred);
    assert_eq!(count, 0, "expected no {what} call, got {count}; journal: {:?}", backend.calls());
}

/// Assert that the backend saw no call at all since the journal was cleared
pub fn assert_backend_untouched(backend: &MockBackend) {
    let calls = backend.calls();
    assert!(calls.is_empty(), "backend should not have been called, journal: {calls:?}");
}

/// Sizes of the blocks live in `after` but not in `before`, in allocation order
pub fn new_block_sizes(before: &[ShmBlock], after: &[ShmBlock]) -> Vec<usize> {
    let mut fresh: Vec<ShmBlock> = after.iter().filter(|b| !before.contains(b)).copied().collect();
    fresh.sort_by_key(|b| b.offset());
    fresh.iter().map(|b| b.len()).collect()
}

/// Assert that every block of the pool has been freed
pub fn assert_shm_clean(shm: &ShmPool) {
    let live = shm.live_blocks();
    assert!(live.is_empty(), "shared memory pool '{}' still holds {live:?}", shm.name());
}

/// Assert the window order of a stack, top to bottom
pub fn assert_stack_order(stack: &WindowStack, expected: &[WindowId]) {
    let order = stack.windows().unwrap_or_else(|e| panic!("enumerating windows failed: {e}"));
    assert_eq!(order, expected, "stack {} order mismatch", stack.id().0);
}
