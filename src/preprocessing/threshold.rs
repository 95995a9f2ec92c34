//! Smooth binary thresholding (region competition speed)
//!
//! Maps intensity x to a speed in [-1, 1]:
//! y = fl*tanh((x - lower)/s) + fu*tanh((upper - x)/s) + (1 - fl - fu)
//! where fl/fu are 1 when the respective side is enabled and 0 otherwise.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SnakeError};
use crate::volume::Volume;

/// Threshold preprocessing settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSettings {
    pub lower_threshold: f64,
    pub upper_threshold: f64,
    pub smoothness: f64,
    pub lower_enabled: bool,
    pub upper_enabled: bool,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            lower_threshold: 0.0,
            upper_threshold: 0.0,
            smoothness: 1.0,
            lower_enabled: true,
            upper_enabled: true,
        }
    }
}

impl ThresholdSettings {
    /// Defaults derived from the grey range: thresholds at one and two thirds.
    pub fn from_range(min: f64, max: f64) -> Self {
        let range = max - min;
        Self {
            lower_threshold: min + range / 3.0,
            upper_threshold: min + 2.0 * range / 3.0,
            smoothness: 3.0,
            ..Self::default()
        }
    }

    /// Defaults used before any grey image is loaded.
    pub fn without_image() -> Self {
        Self {
            lower_threshold: 40.0,
            upper_threshold: 80.0,
            smoothness: 3.0,
            ..Self::default()
        }
    }

    /// Defaults for a grey volume, from its intensity range.
    pub fn for_volume(grey: &Volume<f32>) -> Self {
        let (min, max) = grey
            .data()
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if min.is_finite() && max.is_finite() {
            Self::from_range(min as f64, max as f64)
        } else {
            Self::without_image()
        }
    }
}

/// Per-voxel smooth threshold functor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothBinaryThreshold {
    lower: f64,
    upper: f64,
    scale: f64,
    factor_lower: f64,
    factor_upper: f64,
    shift: f64,
}

impl SmoothBinaryThreshold {
    /// Build the functor, rejecting settings with both sides disabled or a
    /// non-positive smoothness.
    pub fn new(settings: &ThresholdSettings) -> Result<Self> {
        if !settings.lower_enabled && !settings.upper_enabled {
            return Err(SnakeError::configuration(
                "threshold speed needs the lower or the upper threshold enabled",
            ));
        }
        if !(settings.smoothness > 0.0) || !settings.smoothness.is_finite() {
            return Err(SnakeError::configuration(format!(
                "threshold smoothness must be positive, got {}",
                settings.smoothness
            )));
        }

        let factor_lower = if settings.lower_enabled { 1.0 } else { 0.0 };
        let factor_upper = if settings.upper_enabled { 1.0 } else { 0.0 };

        Ok(Self {
            lower: settings.lower_threshold,
            upper: settings.upper_threshold,
            scale: 1.0 / settings.smoothness,
            factor_lower,
            factor_upper,
            shift: 1.0 - (factor_lower + factor_upper),
        })
    }

    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        let x = x as f64;
        let y_lower = self.factor_lower * ((x - self.lower) * self.scale).tanh();
        let y_upper = self.factor_upper * ((self.upper - x) * self.scale).tanh();
        (y_lower + y_upper + self.shift) as f32
    }

    /// Apply to every value of a slice.
    pub fn apply_slice(&self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| self.apply(x)).collect()
    }

    /// Apply to a whole volume.
    pub fn apply_volume(&self, grey: &Volume<f32>) -> Volume<f32> {
        debug!(voxels = grey.len(), "Computing threshold speed");
        let data = self.apply_slice(grey.data());
        let mut out = Volume::new(grey.dims(), grey.spacing(), 0.0f32);
        out.data_mut().copy_from_slice(&data);
        out
    }
}
