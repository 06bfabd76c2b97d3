//! Chroma-key background removal.
//!
//! Pure pixel logic: a baseline goes in, a new buffer comes out. Callers
//! always filter the untouched baseline, never a previous result, so
//! repeated settings changes cannot stack transparency.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inside `sensitivity * FULL_CUTOFF` a pixel is fully transparent.
const FULL_CUTOFF: f64 = 2.5;
/// Between the two cutoffs alpha ramps from 0 to 255.
const FEATHER_CUTOFF: f64 = 3.0;

/// An sRGB key color, written `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Rgb {
    type Err = ChromaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().strip_prefix('#').unwrap_or(s.trim());
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChromaError::InvalidColor(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| ChromaError::InvalidColor(s.to_string()))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = ChromaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaKeySettings {
    pub enabled: bool,
    pub color: Rgb,
    /// Distance scale; 0 disables keying even when enabled.
    pub sensitivity: f64,
}

impl ChromaKeySettings {
    /// Filter `baseline` if enabled, otherwise return an exact copy.
    pub fn apply(&self, baseline: &RgbaImage) -> RgbaImage {
        if self.enabled {
            apply_chroma_key(baseline, self.color, self.sensitivity)
        } else {
            baseline.clone()
        }
    }
}

/// Attenuate alpha by Euclidean RGB distance from `target`.
///
/// `d < 2.5s` → alpha 0; `2.5s ≤ d < 3s` → alpha ramps linearly to 255;
/// `d ≥ 3s` → pixel unchanged.
pub fn apply_chroma_key(baseline: &RgbaImage, target: Rgb, sensitivity: f64) -> RgbaImage {
    let mut out = baseline.clone();
    let full = sensitivity * FULL_CUTOFF;
    let feather = sensitivity * FEATHER_CUTOFF;
    let band = sensitivity * (FEATHER_CUTOFF - FULL_CUTOFF);

    for pixel in out.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let dr = r as f64 - target.r as f64;
        let dg = g as f64 - target.g as f64;
        let db = b as f64 - target.b as f64;
        let distance = (dr * dr + dg * dg + db * db).sqrt();

        if distance < full {
            pixel.0[3] = 0;
        } else if distance < feather {
            pixel.0[3] = (((distance - full) / band) * 255.0).floor() as u8;
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChromaError {
    #[error("'{0}' is not a #rrggbb color")]
    InvalidColor(String),
}
