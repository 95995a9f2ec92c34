//! Color map for displaying speed images
//!
//! Speed values in [-1, 1] are blended between a minus, a zero and a plus
//! color. Alpha is always opaque.

use serde::{Deserialize, Serialize};

/// Built-in color ramps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMapPreset {
    BlueBlackWhite,
    BlackGrayWhite,
    BlueWhiteRed,
    BlackBlackWhite,
}

const BLUE: [u8; 4] = [0, 0, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const GRAY: [u8; 4] = [128, 128, 128, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedColorMap {
    pub minus: [u8; 4],
    pub zero: [u8; 4],
    pub plus: [u8; 4],
}

impl Default for SpeedColorMap {
    fn default() -> Self {
        Self::preset(ColorMapPreset::BlueBlackWhite)
    }
}

impl SpeedColorMap {
    pub fn preset(preset: ColorMapPreset) -> Self {
        let (minus, zero, plus) = match preset {
            ColorMapPreset::BlueBlackWhite => (BLUE, BLACK, WHITE),
            ColorMapPreset::BlackGrayWhite => (BLACK, GRAY, WHITE),
            ColorMapPreset::BlueWhiteRed => (BLUE, WHITE, RED),
            ColorMapPreset::BlackBlackWhite => (BLACK, BLACK, WHITE),
        };
        Self { minus, zero, plus }
    }

    /// Map one speed value to RGBA; values outside [-1, 1] saturate.
    pub fn map(&self, t: f32) -> [u8; 4] {
        let t = if t.is_nan() { 0.0 } else { t.clamp(-1.0, 1.0) };
        let (end, w) = if t > 0.0 { (self.plus, t) } else { (self.minus, -t) };
        let u = 1.0 - w;

        let mut out = [0, 0, 0, 255];
        for c in 0..3 {
            out[c] = (w * end[c] as f32 + u * self.zero[c] as f32) as u8;
        }
        out
    }

    /// Map a slice of speeds to an interleaved RGBA buffer.
    pub fn map_slice(&self, speed: &[f32]) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(speed.len() * 4);
        for &t in speed {
            rgba.extend_from_slice(&self.map(t));
        }
        rgba
    }
}
