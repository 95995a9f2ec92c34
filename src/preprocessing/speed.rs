//! Speed field computation in edge or threshold mode

use serde::{Deserialize, Serialize};
use tracing::info;

use super::edge::{edge_speed, EdgePreprocessingSettings};
use super::threshold::{SmoothBinaryThreshold, ThresholdSettings};
use crate::error::{Result, SnakeError};
use crate::volume::Volume;

/// How the speed image is derived from grey intensities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum SpeedMode {
    /// Low speed at edges, for edge-stopping snakes
    Edge(EdgePreprocessingSettings),
    /// Positive inside the intensity band, for region competition snakes
    Threshold(ThresholdSettings),
}

/// Computes speed images from grey volumes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFieldComputer {
    mode: SpeedMode,
}

impl SpeedFieldComputer {
    pub fn new(mode: SpeedMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &SpeedMode {
        &self.mode
    }

    /// Compute speed over the whole grey volume.
    pub fn compute(&self, grey: &Volume<f32>) -> Result<Volume<f32>> {
        let dims = grey.dims();
        info!(nx = dims[0], ny = dims[1], nz = dims[2], "Computing speed image");
        match &self.mode {
            SpeedMode::Edge(settings) => edge_speed(grey, settings),
            SpeedMode::Threshold(settings) => {
                Ok(SmoothBinaryThreshold::new(settings)?.apply_volume(grey))
            }
        }
    }

    /// Compute speed for a single slice orthogonal to `axis`.
    ///
    /// Only threshold mode is point-wise; edge mode needs the neighbourhood
    /// and is rejected here.
    ///
    /// # Returns
    /// Slice values with the faster in-plane axis first
    pub fn compute_slice(&self, grey: &Volume<f32>, axis: usize, index: usize) -> Result<Vec<f32>> {
        let settings = match &self.mode {
            SpeedMode::Threshold(settings) => settings,
            SpeedMode::Edge(_) => {
                return Err(SnakeError::configuration(
                    "slice preview is only available in threshold mode",
                ))
            }
        };
        let functor = SmoothBinaryThreshold::new(settings)?;
        let grey_slice = extract_slice(grey, axis, index)?;
        Ok(functor.apply_slice(&grey_slice))
    }
}

/// Copy out the 2D slice at `index` orthogonal to `axis`.
pub fn extract_slice<T: Copy>(vol: &Volume<T>, axis: usize, index: usize) -> Result<Vec<T>> {
    let [nx, ny, nz] = vol.dims();
    if axis > 2 || index >= vol.dims()[axis] {
        return Err(SnakeError::configuration(format!(
            "slice {} on axis {} is outside dimensions {:?}",
            index, axis, vol.dims()
        )));
    }

    let data = vol.data();
    let slice = match axis {
        0 => {
            let mut out = Vec::with_capacity(ny * nz);
            for k in 0..nz {
                for j in 0..ny {
                    out.push(data[index + j * nx + k * nx * ny]);
                }
            }
            out
        }
        1 => {
            let mut out = Vec::with_capacity(nx * nz);
            for k in 0..nz {
                let row = index * nx + k * nx * ny;
                out.extend_from_slice(&data[row..row + nx]);
            }
            out
        }
        _ => {
            let start = index * nx * ny;
            data[start..start + nx * ny].to_vec()
        }
    };
    Ok(slice)
}
