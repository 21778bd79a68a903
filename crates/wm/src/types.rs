//! Window and stack vocabulary shared by the core, the backends and the
//! client interface

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use surface::{PixelFormat, SurfaceCaps};

use crate::error::{WmError, WmResult};

/// Session-unique window id, starting at 1 and never reused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl WindowId {
    /// Stored in shared records to mean "no window"
    pub const NONE: WindowId = WindowId(0);
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackId(pub u32);

/// Rectangle in stack coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.w && y < self.y + self.h
    }
}

/// Inclusive corner coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_valid(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }

    pub fn of_rect(rect: &Rect) -> Self {
        Self::new(rect.x, rect.y, rect.x + rect.w - 1, rect.y + rect.h - 1)
    }
}

/// Border thickness a backend adds around the client area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insets {
    pub l: i32,
    pub t: i32,
    pub r: i32,
    pub b: i32,
}

impl Insets {
    pub fn new(l: i32, t: i32, r: i32, b: i32) -> Self {
        Self { l, t, r, b }
    }

    /// Client origin shifted into inset-inclusive coordinates
    pub fn outer_origin(&self, x: i32, y: i32) -> Option<(i32, i32)> {
        Some((x.checked_add(self.l)?, y.checked_add(self.t)?))
    }

    /// Client rectangle grown by the insets, `None` if it leaves the `i32` range
    pub fn outer(&self, rect: Rect) -> Option<Rect> {
        let (x, y) = self.outer_origin(rect.x, rect.y)?;
        Some(Rect::new(
            x,
            y,
            rect.w.checked_add(self.l)?.checked_add(self.r)?,
            rect.h.checked_add(self.t)?.checked_add(self.b)?,
        ))
    }
}

bitflags! {
    /// Capabilities fixed at window creation
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WindowCaps: u32 {
        const ALPHACHANNEL = 0x0001;
        const DOUBLEBUFFER = 0x0002;
        /// No surface, receives input only
        const INPUTONLY    = 0x0004;
        const NODECORATION = 0x0008;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WindowOptions: u32 {
        const COLORKEYING    = 0x0001;
        const ALPHACHANNEL   = 0x0002;
        const OPAQUE_REGION  = 0x0004;
        const SHAPED         = 0x0008;
        const KEEP_POSITION  = 0x0010;
        const KEEP_SIZE      = 0x0020;
        const KEEP_STACKING  = 0x0040;
        /// Never focused, never hit by the pointer
        const GHOST          = 0x1000;
        const INDESTRUCTIBLE = 0x2000;
        const SCALE          = 0x10000;
    }
}

/// Coarse stacking layer; windows of a higher class are always above
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackingClass {
    #[default]
    Middle,
    Upper,
    Lower,
}

impl StackingClass {
    /// Position of the class from bottom to top
    pub fn rank(self) -> u32 {
        match self {
            StackingClass::Lower => 0,
            StackingClass::Middle => 1,
            StackingClass::Upper => 2,
        }
    }

    pub fn from_rank(rank: u32) -> Option<Self> {
        match rank {
            0 => Some(StackingClass::Lower),
            1 => Some(StackingClass::Middle),
            2 => Some(StackingClass::Upper),
            _ => None,
        }
    }
}

/// Source or destination geometry of a window's content
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WindowGeometry {
    #[default]
    Default,
    /// Follow the geometry of the parent window
    Follow,
    Rectangle(Rect),
    /// Fractions of the window size
    Location { x: f32, y: f32, w: f32, h: f32 },
}

impl WindowGeometry {
    /// Rectangles need a non-negative origin and a positive extent;
    /// locations need every field in range and must stay inside the unit
    /// square.
    pub fn validate(&self) -> WmResult<()> {
        match *self {
            WindowGeometry::Default | WindowGeometry::Follow => Ok(()),
            WindowGeometry::Rectangle(rect) => {
                if rect.x < 0 || rect.y < 0 || rect.w < 1 || rect.h < 1 {
                    return Err(WmError::invalid("geometry rectangle"));
                }
                Ok(())
            }
            WindowGeometry::Location { x, y, w, h } => {
                let in_range = x >= 0.0 && y >= 0.0 && w > 0.0 && h > 0.0 && w <= 1.0 && h <= 1.0;
                if !in_range || x + w > 1.0 || y + h > 1.0 {
                    return Err(WmError::invalid("geometry location"));
                }
                Ok(())
            }
        }
    }
}

/// Which keys a window receives when focused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySelection {
    #[default]
    All,
    None,
    /// Only these key symbols, kept sorted
    List(Vec<u32>),
}

impl KeySelection {
    pub fn selects(&self, symbol: u32) -> bool {
        match self {
            KeySelection::All => true,
            KeySelection::None => false,
            KeySelection::List(keys) => keys.binary_search(&symbol).is_ok(),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WindowEventType: u32 {
        const POSITION   = 0x0000_0001;
        const SIZE       = 0x0000_0002;
        const CLOSE      = 0x0000_0004;
        const DESTROYED  = 0x0000_0008;
        const GOTFOCUS   = 0x0000_0010;
        const LOSTFOCUS  = 0x0000_0020;
        const KEYDOWN    = 0x0000_0100;
        const KEYUP      = 0x0000_0200;
        const BUTTONDOWN = 0x0001_0000;
        const BUTTONUP   = 0x0002_0000;
        const MOTION     = 0x0004_0000;
        const ENTER      = 0x0008_0000;
        const LEAVE      = 0x0010_0000;
        const WHEEL      = 0x0020_0000;

        const ALL = Self::POSITION.bits() | Self::SIZE.bits() | Self::CLOSE.bits()
            | Self::DESTROYED.bits() | Self::GOTFOCUS.bits() | Self::LOSTFOCUS.bits()
            | Self::KEYDOWN.bits() | Self::KEYUP.bits() | Self::BUTTONDOWN.bits()
            | Self::BUTTONUP.bits() | Self::MOTION.bits() | Self::ENTER.bits()
            | Self::LEAVE.bits() | Self::WHEEL.bits();
    }
}

/// An event delivered to a window's listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowEvent {
    /// One type bit, or POSITION and SIZE together for the initial
    /// configuration of a window
    pub kind: WindowEventType,
    pub window: WindowId,
    /// Position for POSITION and pointer events, in stack coordinates
    pub x: i32,
    pub y: i32,
    /// Size for SIZE
    pub w: i32,
    pub h: i32,
    pub key_symbol: u32,
    pub modifiers: u32,
    pub button: u32,
    pub wheel: i32,
}

impl WindowEvent {
    pub fn new(kind: WindowEventType, window: WindowId) -> Self {
        Self {
            kind,
            window,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            key_symbol: 0,
            modifiers: 0,
            button: 0,
            wheel: 0,
        }
    }

    pub fn position(window: WindowId, x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            ..Self::new(WindowEventType::POSITION, window)
        }
    }

    pub fn size(window: WindowId, w: i32, h: i32) -> Self {
        Self {
            w,
            h,
            ..Self::new(WindowEventType::SIZE, window)
        }
    }
}

/// Decoded input handed to a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyPress { symbol: u32, modifiers: u32 },
    KeyRelease { symbol: u32, modifiers: u32 },
    ButtonPress { button: u32 },
    ButtonRelease { button: u32 },
    Motion { x: i32, y: i32 },
    Wheel { delta: i32 },
}

bitflags! {
    /// Which fields of a `WindowConfig` a change carries
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ConfigFlags: u32 {
        const POSITION      = 0x0001;
        const SIZE          = 0x0002;
        const OPACITY       = 0x0004;
        const STACKING      = 0x0008;
        const OPTIONS       = 0x0010;
        const EVENTS        = 0x0020;
        const COLOR_KEY     = 0x0040;
        const OPAQUE        = 0x0080;
        const KEY_SELECTION = 0x0100;
        const SRC_GEOMETRY  = 0x0200;
        const DST_GEOMETRY  = 0x0400;
        const ROTATION      = 0x0800;
    }
}

/// Mutable window configuration; bounds include the insets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowConfig {
    pub bounds: Rect,
    pub opacity: u8,
    pub stacking: StackingClass,
    pub options: WindowOptions,
    /// Events delivered to attached event buffers
    pub events: WindowEventType,
    pub color_key: u32,
    pub opaque: Region,
    pub key_selection: KeySelection,
    pub src_geometry: WindowGeometry,
    pub dst_geometry: WindowGeometry,
    /// Degrees in `[0, 360)`
    pub rotation: i32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            bounds: Rect::default(),
            opacity: 0,
            stacking: StackingClass::Middle,
            options: WindowOptions::empty(),
            events: WindowEventType::ALL,
            color_key: 0,
            opaque: Region::default(),
            key_selection: KeySelection::All,
            src_geometry: WindowGeometry::Default,
            dst_geometry: WindowGeometry::Default,
            rotation: 0,
        }
    }
}

impl WindowConfig {
    /// Copy the fields selected by `flags` from `change`
    pub fn apply(&mut self, change: &WindowConfig, flags: ConfigFlags) {
        if flags.contains(ConfigFlags::POSITION) {
            self.bounds.x = change.bounds.x;
            self.bounds.y = change.bounds.y;
        }
        if flags.contains(ConfigFlags::SIZE) {
            self.bounds.w = change.bounds.w;
            self.bounds.h = change.bounds.h;
        }
        if flags.contains(ConfigFlags::OPACITY) {
            self.opacity = change.opacity;
        }
        if flags.contains(ConfigFlags::STACKING) {
            self.stacking = change.stacking;
        }
        if flags.contains(ConfigFlags::OPTIONS) {
            self.options = change.options;
        }
        if flags.contains(ConfigFlags::EVENTS) {
            self.events = change.events;
        }
        if flags.contains(ConfigFlags::COLOR_KEY) {
            self.color_key = change.color_key;
        }
        if flags.contains(ConfigFlags::OPAQUE) {
            self.opaque = change.opaque;
        }
        if flags.contains(ConfigFlags::KEY_SELECTION) {
            self.key_selection = change.key_selection.clone();
        }
        if flags.contains(ConfigFlags::SRC_GEOMETRY) {
            self.src_geometry = change.src_geometry;
        }
        if flags.contains(ConfigFlags::DST_GEOMETRY) {
            self.dst_geometry = change.dst_geometry;
        }
        if flags.contains(ConfigFlags::ROTATION) {
            self.rotation = change.rotation;
        }
    }
}

/// Where a restack moves a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restack {
    /// One step up within its class
    Raise,
    /// One step down within its class
    Lower,
    ToTop,
    ToBottom,
    /// Directly above the given window
    Atop(WindowId),
    /// Directly below the given window
    Below(WindowId),
}

/// Input a window can claim exclusively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Grab {
    Keyboard,
    Pointer,
    Key { symbol: u32, modifiers: u32 },
    /// Keys not selected by the focused window
    UnselectedKeys,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CursorUpdateFlags: u32 {
        const ENABLE   = 0x01;
        const DISABLE  = 0x02;
        const POSITION = 0x04;
        const SIZE     = 0x08;
        const SHAPE    = 0x10;
        const OPACITY  = 0x20;
    }
}

/// Opaque value of a window property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyValue(pub Vec<u8>);

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(bytes: Vec<u8>) -> Self {
        PropertyValue(bytes)
    }
}

/// Requested properties of a new window, in client coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDescription {
    pub caps: WindowCaps,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Defaults to the session pixel format
    pub pixel_format: Option<PixelFormat>,
    pub surface_caps: SurfaceCaps,
    pub options: WindowOptions,
    pub stacking: StackingClass,
}

impl WindowDescription {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            caps: WindowCaps::empty(),
            x,
            y,
            width,
            height,
            pixel_format: None,
            surface_caps: SurfaceCaps::empty(),
            options: WindowOptions::empty(),
            stacking: StackingClass::Middle,
        }
    }

    pub fn with_caps(mut self, caps: WindowCaps) -> Self {
        self.caps = caps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_geometry_bounds() {
        assert!(WindowGeometry::Rectangle(Rect::new(0, 0, 1, 1)).validate().is_ok());
        assert!(WindowGeometry::Rectangle(Rect::new(-1, 0, 10, 10)).validate().is_err());
        assert!(WindowGeometry::Rectangle(Rect::new(0, 0, 0, 10)).validate().is_err());
    }

    #[test]
    fn location_geometry_stays_in_unit_square() {
        let ok = WindowGeometry::Location {
            x: 0.5,
            y: 0.0,
            w: 0.5,
            h: 1.0,
        };
        assert!(ok.validate().is_ok());

        let spills = WindowGeometry::Location {
            x: 0.6,
            y: 0.0,
            w: 0.5,
            h: 0.5,
        };
        assert!(spills.validate().is_err());

        let empty = WindowGeometry::Location {
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.5,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn key_list_selection() {
        let selection = KeySelection::List(vec![10, 20, 30]);
        assert!(selection.selects(20));
        assert!(!selection.selects(25));
        assert!(!KeySelection::None.selects(20));
    }

    #[test]
    fn apply_copies_only_flagged_fields() {
        let mut config = WindowConfig::default();
        let change = WindowConfig {
            bounds: Rect::new(5, 6, 7, 8),
            opacity: 0x80,
            ..WindowConfig::default()
        };
        config.apply(&change, ConfigFlags::POSITION | ConfigFlags::OPACITY);

        assert_eq!(config.bounds, Rect::new(5, 6, 0, 0));
        assert_eq!(config.opacity, 0x80);
    }

    #[test]
    fn stacking_rank_roundtrip() {
        for class in [StackingClass::Lower, StackingClass::Middle, StackingClass::Upper] {
            assert_eq!(StackingClass::from_rank(class.rank()), Some(class));
        }
        assert_eq!(StackingClass::from_rank(7), None);
    }
}
