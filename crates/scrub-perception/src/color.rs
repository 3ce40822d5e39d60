//! Colour segmentation in HSV space.
//!
//! Pixels are converted to the 8-bit HSV convention used by most vision
//! toolkits:
//!
//! ```text
//! H ∈ [0, 180)   (degrees / 2)
//! S ∈ [0, 255]
//! V ∈ [0, 255]
//! ```
//!
//! and tested against an inclusive [`HsvRange`].  A range whose lower hue is
//! greater than its upper hue wraps through 0, which is how reds are
//! expressed.
//!
//! # Example
//!
//! ```rust
//! use scrub_perception::color::{rgb_to_hsv, Hsv, HsvRange};
//!
//! let green = rgb_to_hsv([0, 255, 0]);
//! assert_eq!(green, Hsv { h: 60, s: 255, v: 255 });
//! assert!(HsvRange::default().contains(green));
//! ```

use scrub_hal::CameraFrame;
use serde::{Deserialize, Serialize};

/// One pixel in 8-bit HSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    /// Parse `"h,s,v"` (whitespace around components is ignored).
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(',').map(|p| p.trim().parse::<u8>());
        let h = parts.next()?.ok()?;
        let s = parts.next()?.ok()?;
        let v = parts.next()?.ok()?;
        if parts.next().is_some() || h >= 180 {
            return None;
        }
        Some(Self { h, s, v })
    }
}

impl std::fmt::Display for Hsv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.h, self.s, self.v)
    }
}

/// Inclusive HSV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: Hsv,
    pub upper: Hsv,
}

impl Default for HsvRange {
    /// Surgical-drape green.
    fn default() -> Self {
        Self {
            lower: Hsv { h: 35, s: 40, v: 40 },
            upper: Hsv { h: 90, s: 255, v: 255 },
        }
    }
}

impl HsvRange {
    pub fn contains(&self, px: Hsv) -> bool {
        let hue_ok = if self.lower.h <= self.upper.h {
            (self.lower.h..=self.upper.h).contains(&px.h)
        } else {
            px.h >= self.lower.h || px.h <= self.upper.h
        };
        hue_ok
            && (self.lower.s..=self.upper.s).contains(&px.s)
            && (self.lower.v..=self.upper.v).contains(&px.v)
    }
}

/// Convert one RGB pixel to 8-bit HSV.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> Hsv {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { 255.0 * delta / max };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    Hsv {
        // 359° rounds to 180, which is outside the 8-bit hue circle.
        h: ((h / 2.0).round() as u16 % 180) as u8,
        s: s.round() as u8,
        v: max as u8,
    }
}

/// Binary foreground mask, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub bits: Vec<bool>,
}

impl Mask {
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }
}

/// Mark every pixel of `frame` whose HSV value falls inside `range`.
///
/// The frame must already have passed [`CameraFrame::validate`].
pub fn segment(frame: &CameraFrame, range: &HsvRange) -> Mask {
    let bits = frame
        .data
        .chunks_exact(3)
        .map(|px| range.contains(rgb_to_hsv([px[0], px[1], px[2]])))
        .collect();
    Mask {
        width: frame.width,
        height: frame.height,
        bits,
    }
}
