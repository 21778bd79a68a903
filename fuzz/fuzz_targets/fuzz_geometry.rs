#![no_main]
//! Fuzz target for window geometry validation
//!
//! Validation must never panic, including on NaN and infinite fractions,
//! and an accepted location must stay inside the unit square.

use libfuzzer_sys::fuzz_target;

use wm::types::WindowGeometry;

fuzz_target!(|data: &[u8]| {
    if let Ok(geometry) = serde_json::from_slice::<WindowGeometry>(data) {
        let _ = geometry.validate();
    }
    if data.len() >= 16 {
        let field = |i: usize| f32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let location = WindowGeometry::Location {
            x: field(0),
            y: field(4),
            w: field(8),
            h: field(12),
        };
        if location.validate().is_ok() {
            if let WindowGeometry::Location { x, y, w, h } = location {
                assert!(x + w <= 1.0 && y + h <= 1.0);
            }
        }
    }
});
