//! Initial level set from bubbles and prior segmentation
//!
//! The seed is a coarse ±1 image, not a distance transform: voxels inside
//! any bubble or already carrying the active label get -1, the rest +1.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SnakeError};
use crate::volume::Volume;

/// Spherical seed region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    /// Voxel index of the centre, relative to the ROI (may lie outside it)
    pub center: [i32; 3],
    /// Radius in physical units
    pub radius: f64,
}

impl Bubble {
    pub fn new(center: [i32; 3], radius: f64) -> Self {
        Self { center, radius }
    }

    /// Bubble from a fractional voxel position, rounded to the nearest voxel.
    pub fn from_voxel_coords(center: [f64; 3], radius: f64) -> Result<Self> {
        let mut voxel = [0i32; 3];
        for (axis, &c) in center.iter().enumerate() {
            let rounded = c.round();
            if !rounded.is_finite() || rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
                return Err(SnakeError::configuration(format!(
                    "bubble centre coordinate {} is {}",
                    axis, c
                )));
            }
            voxel[axis] = rounded as i32;
        }
        Ok(Self::new(voxel, radius))
    }
}

/// Seed level set and the number of voxels it marks as inside
#[derive(Debug, Clone)]
pub struct InitialLevelSet {
    pub phi: Volume<f32>,
    pub inside_voxels: usize,
}

/// Builds the initial level set over an ROI.
#[derive(Debug, Clone)]
pub struct SignedDistanceBuilder {
    dims: [usize; 3],
    spacing: [f64; 3],
    label: u8,
}

impl SignedDistanceBuilder {
    /// # Arguments
    /// * `dims` - ROI dimensions
    /// * `spacing` - Voxel size in physical units
    /// * `label` - Active drawing label; prior voxels with this label seed the snake
    pub fn new(dims: [usize; 3], spacing: [f64; 3], label: u8) -> Self {
        Self { dims, spacing, label }
    }

    /// Build φ₀ from the union of the bubbles and the prior label voxels.
    ///
    /// # Arguments
    /// * `bubbles` - Seed spheres
    /// * `labels` - Prior segmentation restricted to the ROI, if any
    ///
    /// # Returns
    /// The seed image, or `InitializationEmpty` when the union has no voxels.
    pub fn build(&self, bubbles: &[Bubble], labels: Option<&Volume<u8>>) -> Result<InitialLevelSet> {
        let [nx, ny, nz] = self.dims;
        if let Some(labels) = labels {
            if labels.dims() != self.dims {
                return Err(SnakeError::DimensionMismatch {
                    expected: self.dims,
                    actual: labels.dims(),
                });
            }
        }
        for b in bubbles {
            if !b.radius.is_finite() || b.radius < 0.0 {
                return Err(SnakeError::configuration(format!(
                    "bubble radius must be a non-negative number, got {}",
                    b.radius
                )));
            }
        }

        let mut mask = vec![false; nx * ny * nz];
        if let Some(labels) = labels {
            for (m, &l) in mask.iter_mut().zip(labels.data().iter()) {
                *m = l == self.label;
            }
        }

        for b in bubbles {
            self.mark_bubble(&mut mask, b);
        }

        let inside_voxels = mask.iter().filter(|&&m| m).count();
        if inside_voxels == 0 {
            return Err(SnakeError::InitializationEmpty { label: self.label });
        }

        let data: Vec<f32> = mask.iter().map(|&m| if m { -1.0 } else { 1.0 }).collect();
        let phi = Volume::from_vec(data, self.dims, self.spacing)?;

        info!(
            bubbles = bubbles.len(),
            inside = inside_voxels,
            label = self.label,
            "Built initial level set"
        );

        Ok(InitialLevelSet { phi, inside_voxels })
    }

    fn mark_bubble(&self, mask: &mut [bool], bubble: &Bubble) {
        let [nx, ny, _] = self.dims;

        // Bounding box in voxels, clipped to the ROI
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for d in 0..3 {
            let extent = (bubble.radius / self.spacing[d]).ceil() as i64;
            let c = bubble.center[d] as i64;
            let first = (c - extent).max(0);
            let last = (c + extent).min(self.dims[d] as i64 - 1);
            if first > last {
                return;
            }
            lo[d] = first as usize;
            hi[d] = last as usize;
        }

        let r2 = bubble.radius * bubble.radius;
        for k in lo[2]..=hi[2] {
            let dz = (k as f64 - bubble.center[2] as f64) * self.spacing[2];
            for j in lo[1]..=hi[1] {
                let dy = (j as f64 - bubble.center[1] as f64) * self.spacing[1];
                for i in lo[0]..=hi[0] {
                    let dx = (i as f64 - bubble.center[0] as f64) * self.spacing[0];
                    if dx * dx + dy * dy + dz * dz <= r2 {
                        mask[i + j * nx + k * nx * ny] = true;
                    }
                }
            }
        }
    }
}

/// Binary label image of the current snake: `label` where φ ≤ 0, 0 elsewhere.
pub fn snake_mask(phi: &[f32], label: u8) -> Vec<u8> {
    phi.iter().map(|&v| if v <= 0.0 { label } else { 0 }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inside(phi: &Volume<f32>) -> usize {
        phi.data().iter().filter(|&&v| v < 0.0).count()
    }

    #[test]
    fn test_single_bubble_voxel_count() {
        let builder = SignedDistanceBuilder::new([10, 10, 10], [1.0; 3], 1);
        let init = builder.build(&[Bubble::new([5, 5, 5], 2.0)], None).unwrap();
        assert_eq!(init.inside_voxels, 33);
        assert_eq!(inside(&init.phi), 33);
        assert_eq!(init.phi.get(5, 5, 5), -1.0);
        assert_eq!(init.phi.get(5, 5, 8), 1.0);
        assert!(init.phi.data().iter().all(|&v| v == 1.0 || v == -1.0));
    }

    #[test]
    fn test_bubble_centre_rounds_to_nearest_voxel() {
        let b = Bubble::from_voxel_coords([4.6, 5.4, -0.4], 2.0).unwrap();
        assert_eq!(b.center, [5, 5, 0]);
        let b = Bubble::from_voxel_coords([2.5, 7.0, 0.49], 1.0).unwrap();
        assert_eq!(b.center, [3, 7, 0]);
    }

    #[test]
    fn test_bubble_centre_must_be_finite() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e12] {
            let err = Bubble::from_voxel_coords([5.0, bad, 5.0], 2.0).unwrap_err();
            assert!(matches!(err, SnakeError::Configuration(_)), "{}", bad);
        }
    }

    #[test]
    fn test_anisotropic_spacing() {
        let builder = SignedDistanceBuilder::new([10, 10, 10], [1.0, 1.0, 2.0], 1);
        let init = builder.build(&[Bubble::new([5, 5, 5], 2.0)], None).unwrap();
        assert_eq!(init.phi.get(5, 5, 6), -1.0);
        assert_eq!(init.phi.get(5, 5, 7), 1.0);
        assert_eq!(init.phi.get(5, 7, 5), -1.0);
    }

    #[test]
    fn test_union_is_idempotent() {
        let builder = SignedDistanceBuilder::new([12, 12, 12], [1.0; 3], 1);
        let one = builder.build(&[Bubble::new([5, 5, 5], 2.0)], None).unwrap();
        let twice = builder
            .build(&[Bubble::new([5, 5, 5], 2.0), Bubble::new([5, 5, 5], 2.0)], None)
            .unwrap();
        assert_eq!(one.phi, twice.phi);

        let overlap = builder
            .build(&[Bubble::new([5, 5, 5], 2.0), Bubble::new([6, 5, 5], 2.0)], None)
            .unwrap();
        assert!(overlap.inside_voxels > 33 && overlap.inside_voxels < 66);
    }

    #[test]
    fn test_prior_labels_seed_the_snake() {
        let mut labels = Volume::new([8, 8, 8], [1.0; 3], 0u8);
        labels.set(1, 1, 1, 3);
        labels.set(2, 1, 1, 4);
        let builder = SignedDistanceBuilder::new([8, 8, 8], [1.0; 3], 3);
        let init = builder.build(&[], Some(&labels)).unwrap();
        assert_eq!(init.inside_voxels, 1);
        assert_eq!(init.phi.get(1, 1, 1), -1.0);
        assert_eq!(init.phi.get(2, 1, 1), 1.0);
    }

    #[test]
    fn test_outside_bubble_and_empty_initialization() {
        let builder = SignedDistanceBuilder::new([8, 8, 8], [1.0; 3], 2);
        let err = builder.build(&[Bubble::new([40, 40, 40], 3.0)], None).unwrap_err();
        assert!(matches!(err, SnakeError::InitializationEmpty { label: 2 }));

        let err = builder.build(&[], None).unwrap_err();
        assert!(matches!(err, SnakeError::InitializationEmpty { .. }));

        // Partially outside bubbles are clipped
        let init = builder.build(&[Bubble::new([-1, 0, 0], 1.5)], None).unwrap();
        assert!(init.inside_voxels > 0);
        assert_eq!(init.phi.get(0, 0, 0), -1.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let builder = SignedDistanceBuilder::new([8, 8, 8], [1.0; 3], 1);
        assert!(builder.build(&[Bubble::new([4, 4, 4], -1.0)], None).is_err());
        let labels = Volume::new([8, 8, 7], [1.0; 3], 1u8);
        assert!(matches!(
            builder.build(&[], Some(&labels)),
            Err(SnakeError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_snake_mask() {
        assert_eq!(snake_mask(&[-1.0, 0.0, 0.5], 7), vec![7, 7, 0]);
    }
}
