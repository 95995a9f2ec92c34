//! Edge-stopping speed (geodesic snake speed)
//!
//! Gaussian blur, gradient magnitude, then the decreasing remap
//! f(g) = 1 / (1 + (g * steepness)^exponent).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SnakeError};
use crate::utils::{gaussian_smooth_3d, gradient_magnitude};
use crate::volume::Volume;

/// Edge preprocessing settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgePreprocessingSettings {
    /// Gaussian sigma in physical units
    pub gaussian_blur_scale: f64,
    pub remapping_steepness: f64,
    pub remapping_exponent: f64,
}

impl Default for EdgePreprocessingSettings {
    fn default() -> Self {
        Self {
            gaussian_blur_scale: 1.0,
            remapping_steepness: 0.1,
            remapping_exponent: 2.0,
        }
    }
}

impl EdgePreprocessingSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.gaussian_blur_scale >= 0.0) || !self.gaussian_blur_scale.is_finite() {
            return Err(SnakeError::configuration(format!(
                "blur scale must be non-negative, got {}",
                self.gaussian_blur_scale
            )));
        }
        if !(self.remapping_steepness >= 0.0) || !self.remapping_steepness.is_finite() {
            return Err(SnakeError::configuration(format!(
                "remapping steepness must be non-negative, got {}",
                self.remapping_steepness
            )));
        }
        if !(self.remapping_exponent > 0.0) || !self.remapping_exponent.is_finite() {
            return Err(SnakeError::configuration(format!(
                "remapping exponent must be positive, got {}",
                self.remapping_exponent
            )));
        }
        Ok(())
    }

    /// The remapping function applied to a gradient magnitude.
    #[inline]
    pub fn remap(&self, g: f32) -> f32 {
        let x = g as f64 * self.remapping_steepness;
        (1.0 / (1.0 + x.powf(self.remapping_exponent))) as f32
    }
}

/// Compute edge-stopping speed in [0, 1] for a grey volume
///
/// # Arguments
/// * `grey` - Grey intensities with physical spacing
/// * `settings` - Blur scale, steepness, exponent
pub fn edge_speed(grey: &Volume<f32>, settings: &EdgePreprocessingSettings) -> Result<Volume<f32>> {
    settings.validate()?;

    let [nx, ny, nz] = grey.dims();
    let [vsx, vsy, vsz] = grey.spacing();
    let sigma = [
        settings.gaussian_blur_scale / vsx,
        settings.gaussian_blur_scale / vsy,
        settings.gaussian_blur_scale / vsz,
    ];

    debug!(
        sigma_x = sigma[0],
        sigma_y = sigma[1],
        sigma_z = sigma[2],
        "Computing edge speed"
    );

    let smoothed = gaussian_smooth_3d(grey.data(), nx, ny, nz, sigma);
    let grad = gradient_magnitude(&smoothed, nx, ny, nz, vsx, vsy, vsz);
    let speed: Vec<f32> = grad.iter().map(|&g| settings.remap(g)).collect();

    Volume::from_vec(speed, grey.dims(), grey.spacing())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_volume() -> Volume<f32> {
        let (nx, ny, nz) = (12, 6, 6);
        let mut data = vec![0.0f32; nx * ny * nz];
        for k in 0..nz {
            for j in 0..ny {
                for i in 6..nx {
                    data[i + j * nx + k * nx * ny] = 100.0;
                }
            }
        }
        Volume::from_vec(data, [nx, ny, nz], [1.0; 3]).unwrap()
    }

    #[test]
    fn test_flat_region_is_fast_edge_is_slow() {
        let grey = step_volume();
        let speed = edge_speed(&grey, &EdgePreprocessingSettings::default()).unwrap();

        let at_edge = speed.get(5, 3, 3);
        let far = speed.get(0, 3, 3);
        assert!(far > 0.95, "flat region speed {}", far);
        assert!(at_edge < 0.2, "edge speed {}", at_edge);
        assert!(speed.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_remap_monotone_decreasing() {
        let s = EdgePreprocessingSettings::default();
        assert_eq!(s.remap(0.0), 1.0);
        let mut prev = 1.0;
        for g in 1..50 {
            let v = s.remap(g as f32);
            assert!(v < prev);
            prev = v;
        }
    }

    #[test]
    fn test_invalid_settings() {
        let mut s = EdgePreprocessingSettings::default();
        s.remapping_exponent = 0.0;
        assert!(edge_speed(&step_volume(), &s).is_err());
    }
}
