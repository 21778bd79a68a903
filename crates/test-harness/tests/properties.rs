//! Property-based tests for window manager invariants
//!
//! These tests verify that invariants hold for arbitrary inputs and
//! arbitrary sequences of operations.

use proptest::prelude::*;
use surface::{ChunkId, PixelFormat, SurfaceConfig, SurfaceError, SurfaceManager};
use test_harness::fixtures::MockSession;
use test_harness::{BackendCall, MockSettings};
use wm::types::{Insets, WindowCaps, WindowDescription};
use wm::{IWindow, WmError, MAX_WINDOW_SIZE};

/// 16x8 ARGB: 64 byte pitch, 512 byte chunks
const SLOT: u32 = 16;
const SLOT_BYTES: usize = 16 * 4 * 8;

fn slot_config() -> SurfaceConfig {
    SurfaceConfig::new(SLOT, 8, PixelFormat::Argb)
}

fn input_window(fx: &MockSession) -> std::sync::Arc<IWindow> {
    fx.client()
        .create_window(&WindowDescription::new(0, 0, 32, 32).with_caps(WindowCaps::INPUTONLY))
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Allocation succeeds whenever the outstanding chunks leave room
    #[test]
    fn allocation_fits_until_capacity(
        slots in 1usize..16,
        ops in prop::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..64),
    ) {
        let manager = SurfaceManager::new(slots * SLOT_BYTES, 16, 8);
        let mut live: Vec<ChunkId> = Vec::new();

        for (allocate, pick) in ops {
            if allocate || live.is_empty() {
                let before: Vec<_> = live.iter().map(|id| manager.chunk(*id)).collect();
                let result = manager.allocate(&slot_config());
                if live.len() < slots {
                    let (id, chunk) = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
                    prop_assert_eq!(chunk.length, SLOT_BYTES);
                    live.push(id);
                } else {
                    prop_assert!(
                        matches!(result, Err(SurfaceError::OutOfSpace { .. })),
                        "full manager must refuse, got {:?}", result
                    );
                    let after: Vec<_> = live.iter().map(|id| manager.chunk(*id)).collect();
                    prop_assert_eq!(before, after, "refused allocation touched live chunks");
                }
            } else {
                let id = live.swap_remove(pick.index(live.len()));
                prop_assert!(manager.deallocate(id).is_ok());
            }
            prop_assert_eq!(manager.stats().used_chunks, live.len());
        }
    }

    /// A request larger than the free space fails and changes nothing
    #[test]
    fn oversized_request_is_refused(used in 0usize..8, extra in 1u32..8) {
        let manager = SurfaceManager::new(8 * SLOT_BYTES, 16, 8);
        for _ in 0..used {
            manager.allocate(&slot_config()).map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let free_slots = 8 - used as u32;
        let stats = manager.stats();

        let request = SurfaceConfig::new(SLOT, 8 * (free_slots + extra), PixelFormat::Argb);
        let result = manager.allocate(&request);
        prop_assert!(matches!(result, Err(SurfaceError::OutOfSpace { .. })), "got {:?}", result);
        prop_assert_eq!(manager.stats(), stats);
    }

    /// Client sizes outside [1, 4096] fail before reaching the backend
    #[test]
    fn resize_bounds_are_checked(width in -8i32..4200, height in -8i32..4200) {
        let fx = MockSession::new(MockSettings::default()).unwrap();
        let window = input_window(&fx);
        fx.backend.clear_calls();

        let valid = (1..=MAX_WINDOW_SIZE).contains(&width) && (1..=MAX_WINDOW_SIZE).contains(&height);
        let result = window.resize(width, height);
        if valid {
            prop_assert!(result.is_ok(), "{}x{} should resize: {:?}", width, height, result);
        } else {
            prop_assert!(matches!(result, Err(WmError::InvalidArgument(_))), "got {:?}", result);
            prop_assert!(fx.backend.calls().is_empty(), "backend saw {:?}", fx.backend.calls());
        }
    }

    /// Opaque regions are accepted exactly when their corners are ordered
    #[test]
    fn opaque_region_validation(
        x1 in -64i32..64, y1 in -64i32..64,
        x2 in -64i32..64, y2 in -64i32..64,
    ) {
        let fx = MockSession::new(MockSettings::default()).unwrap();
        let window = input_window(&fx);

        let result = window.set_opaque_region(x1, y1, x2, y2);
        if x1 <= x2 && y1 <= y2 {
            prop_assert!(result.is_ok(), "got {:?}", result);
        } else {
            prop_assert!(matches!(result, Err(WmError::InvalidArgument(_))), "got {:?}", result);
        }
    }

    /// MoveTo followed by GetPosition returns the requested position
    #[test]
    fn move_to_round_trips(
        l in 0i32..16, t in 0i32..16, r in 0i32..16, b in 0i32..16,
        x in -2000i32..2000, y in -2000i32..2000,
    ) {
        let fx = MockSession::new(MockSettings::default().with_insets(Insets::new(l, t, r, b))).unwrap();
        let window = input_window(&fx);

        window.move_to(x, y).unwrap();
        prop_assert_eq!(window.position().unwrap(), (x, y));
        prop_assert_eq!(window.size().unwrap(), (32, 32));
    }

    /// The window is removed exactly once, with the last release
    #[test]
    fn last_release_tears_down(extra_refs in 0usize..16) {
        let fx = MockSession::new(MockSettings::default()).unwrap();
        let window = input_window(&fx);
        let removals = || fx.backend.count(|c| matches!(c, BackendCall::RemoveWindow { .. }));

        for _ in 0..extra_refs {
            window.add_ref().unwrap();
        }
        for _ in 0..extra_refs {
            window.release().unwrap();
            prop_assert_eq!(removals(), 0);
        }
        window.release().unwrap();
        prop_assert_eq!(removals(), 1);
        prop_assert!(window.release().is_err());
        prop_assert_eq!(removals(), 1);
    }
}
