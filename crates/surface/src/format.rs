//! Pixel formats

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel formats understood by the pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    #[default]
    Argb,
    Rgb32,
    Rgb24,
    Rgb16,
    Argb1555,
    Argb4444,
    A8,
    Lut8,
    Yuy2,
    Uyvy,
    I420,
    Yv12,
    Nv12,
    Nv16,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 14] = [
        Self::Argb,
        Self::Rgb32,
        Self::Rgb24,
        Self::Rgb16,
        Self::Argb1555,
        Self::Argb4444,
        Self::A8,
        Self::Lut8,
        Self::Yuy2,
        Self::Uyvy,
        Self::I420,
        Self::Yv12,
        Self::Nv12,
        Self::Nv16,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Argb => "ARGB",
            Self::Rgb32 => "RGB32",
            Self::Rgb24 => "RGB24",
            Self::Rgb16 => "RGB16",
            Self::Argb1555 => "ARGB1555",
            Self::Argb4444 => "ARGB4444",
            Self::A8 => "A8",
            Self::Lut8 => "LUT8",
            Self::Yuy2 => "YUY2",
            Self::Uyvy => "UYVY",
            Self::I420 => "I420",
            Self::Yv12 => "YV12",
            Self::Nv12 => "NV12",
            Self::Nv16 => "NV16",
        }
    }

    /// Bytes per pixel of the first plane
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Argb | Self::Rgb32 => 4,
            Self::Rgb24 => 3,
            Self::Rgb16 | Self::Argb1555 | Self::Argb4444 | Self::Yuy2 | Self::Uyvy => 2,
            Self::A8 | Self::Lut8 | Self::I420 | Self::Yv12 | Self::Nv12 | Self::Nv16 => 1,
        }
    }

    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Rgb16 => 16,
            Self::Argb1555 => 15,
            Self::Argb4444 => 12,
            other => other.bytes_per_pixel() * 8,
        }
    }

    /// Lines of storage needed for `height` lines of pixels, counting the
    /// extra chroma planes of planar formats
    pub fn plane_lines(&self, height: u32) -> u32 {
        match self {
            Self::I420 | Self::Yv12 | Self::Nv12 => height + height.div_ceil(2),
            Self::Nv16 => height * 2,
            _ => height,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Lut8)
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::Argb | Self::Argb1555 | Self::Argb4444 | Self::A8)
    }

    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            Self::Yuy2 | Self::Uyvy | Self::I420 | Self::Yv12 | Self::Nv12 | Self::Nv16
        )
    }

    /// Pack an RGB triple into this format's pixel layout
    ///
    /// Used for color keys. Formats without RGB channels pack to 0.
    pub fn pack_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        let (r, g, b) = (r as u32, g as u32, b as u32);
        match self {
            Self::Argb | Self::Rgb32 | Self::Rgb24 => (r << 16) | (g << 8) | b,
            Self::Rgb16 => ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3),
            Self::Argb1555 => ((r >> 3) << 10) | ((g >> 3) << 5) | (b >> 3),
            Self::Argb4444 => ((r >> 4) << 8) | ((g >> 4) << 4) | (b >> 4),
            _ => 0,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown pixel format '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_formats_need_extra_lines() {
        assert_eq!(PixelFormat::Argb.plane_lines(480), 480);
        assert_eq!(PixelFormat::I420.plane_lines(480), 720);
        assert_eq!(PixelFormat::Nv12.plane_lines(5), 8);
        assert_eq!(PixelFormat::Nv16.plane_lines(480), 960);
    }

    #[test]
    fn rgb16_packing() {
        assert_eq!(PixelFormat::Rgb16.pack_rgb(0xff, 0xff, 0xff), 0xffff);
        assert_eq!(PixelFormat::Rgb16.pack_rgb(0xff, 0, 0), 0xf800);
        assert_eq!(PixelFormat::Argb.pack_rgb(0x12, 0x34, 0x56), 0x123456);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("rgb16".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb16);
        assert_eq!("LUT8".parse::<PixelFormat>().unwrap(), PixelFormat::Lut8);
        assert!("rgb99".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn predicates() {
        assert!(PixelFormat::Lut8.is_indexed());
        assert!(!PixelFormat::Rgb16.is_indexed());
        assert!(PixelFormat::Argb.has_alpha());
        assert!(!PixelFormat::Rgb32.has_alpha());
        assert!(PixelFormat::Uyvy.is_yuv());
    }
}
