//! Narrow band level set solver
//!
//! φ is re-distanced into unit layers out to the band radius, and every
//! voxel within the inner radius is updated each iteration. The band is
//! rebuilt around the zero crossing only when the front reaches a voxel two
//! or more layers away from where it was at the last rebuild. Rebuilding
//! keeps the values of the active layer.

use tracing::{debug, trace};

use super::{check_time_step, divergence, IterationReport, CONVERGENCE_EPSILON};
use crate::error::Result;
use crate::levelset::function::{GlobalData, LevelSetFunction};
use crate::levelset::layers::{Grid, LayerSet};
use crate::volume::Volume;

/// Layers kept on each side of the zero crossing
pub const BAND_RADIUS: usize = 5;

/// Layers on each side that receive updates
pub const INNER_RADIUS: usize = 3;

/// A sign change in this layer or beyond triggers a rebuild
const REBUILD_LAYER: u8 = 3;

#[derive(Debug, Clone)]
pub struct NarrowBandSolver {
    phi: Vec<f32>,
    grid: Grid,
    /// Updated voxels and their layer at the last rebuild
    nodes: Vec<(usize, u8)>,
    function: LevelSetFunction,
    iterations: usize,
    rebuilds: usize,
}

impl NarrowBandSolver {
    pub fn new(phi0: &Volume<f32>, function: LevelSetFunction) -> Self {
        let mut phi = phi0.data().to_vec();
        let grid = Grid::new(phi0.dims());
        let band = LayerSet::build(&mut phi, grid, BAND_RADIUS);
        Self {
            phi,
            grid,
            nodes: band_nodes(&band),
            function,
            iterations: 0,
            rebuilds: 0,
        }
    }

    pub fn phi(&self) -> &[f32] {
        &self.phi
    }

    pub fn function_mut(&mut self) -> &mut LevelSetFunction {
        &mut self.function
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Band rebuilds since construction.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn iterate(&mut self) -> Result<IterationReport> {
        self.iterations += 1;

        let mut gd = GlobalData::default();
        let updates: Vec<f32> = self
            .nodes
            .iter()
            .map(|&(idx, _)| {
                let (i, j, k) = self.grid.coords(idx);
                self.function.compute_update(&self.phi, i, j, k, &mut gd)
            })
            .collect();

        let dt = self.function.time_step(&gd);
        check_time_step(self.iterations, dt)?;
        if dt == 0.0 {
            return Ok(IterationReport {
                time_step: dt,
                max_change: 0.0,
                updated_voxels: 0,
                converged: true,
            });
        }

        let dt32 = dt as f32;
        let mut max_change = 0.0f32;
        let mut front_escaped = false;
        for (&(idx, layer), &u) in self.nodes.iter().zip(updates.iter()) {
            let change = dt32 * u;
            let old = self.phi[idx];
            let value = old + change;
            if !value.is_finite() {
                return Err(divergence(self.iterations, format!("level set value at voxel {} is {}", idx, value)));
            }
            self.phi[idx] = value;
            max_change = max_change.max(change.abs());
            if layer >= REBUILD_LAYER && (old <= 0.0) != (value <= 0.0) {
                front_escaped = true;
            }
        }

        let updated_voxels = self.nodes.len();
        if front_escaped {
            let band = LayerSet::rebuild(&mut self.phi, self.grid, BAND_RADIUS);
            self.nodes = band_nodes(&band);
            self.rebuilds += 1;
            debug!(iteration = self.iterations, band = self.nodes.len(), "Narrow band rebuilt");
        }

        trace!(iteration = self.iterations, dt, max_change, band = updated_voxels, "Narrow band iteration");

        Ok(IterationReport {
            time_step: dt,
            max_change,
            updated_voxels,
            converged: max_change <= CONVERGENCE_EPSILON,
        })
    }
}

/// Voxels of layers 0..=2·INNER_RADIUS with their layer index.
fn band_nodes(band: &LayerSet) -> Vec<(usize, u8)> {
    band.layers[..=2 * INNER_RADIUS]
        .iter()
        .enumerate()
        .flat_map(|(l, layer)| layer.iter().map(move |&idx| (idx, l as u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levelset::parameters::SnakeParameters;

    fn cube_seed(n: usize, lo: usize, hi: usize) -> Volume<f32> {
        let mut seed = Volume::new([n, n, n], [1.0; 3], 1.0f32);
        for k in lo..=hi {
            for j in lo..=hi {
                for i in lo..=hi {
                    seed.set(i, j, k, -1.0);
                }
            }
        }
        seed
    }

    fn params() -> SnakeParameters {
        SnakeParameters {
            curvature_weight: 0.0,
            propagation_weight: 1.0,
            ..SnakeParameters::default_region()
        }
    }

    #[test]
    fn test_band_values_bounded() {
        let seed = cube_seed(20, 8, 11);
        let speed = Volume::new([20, 20, 20], [1.0; 3], 1.0f32);
        let mut s = NarrowBandSolver::new(&seed, LevelSetFunction::new(&speed, &params()).unwrap());

        let background = (BAND_RADIUS + 1) as f32;
        assert!(s.phi().iter().all(|v| v.abs() <= background));

        let report = s.iterate().unwrap();
        assert!(report.updated_voxels > 0);
        assert!(!report.converged);
        assert!(s.phi().iter().all(|v| v.abs() <= background + 1.0));

        let centre = 10 + 10 * 20 + 10 * 400;
        assert!(s.phi()[centre] < -1.0);
        assert!(s.phi()[0] > 0.0);
    }

    #[test]
    fn test_band_follows_the_front() {
        let seed = cube_seed(24, 10, 13);
        let speed = Volume::new([24, 24, 24], [1.0; 3], 1.0f32);
        let mut s = NarrowBandSolver::new(&seed, LevelSetFunction::new(&speed, &params()).unwrap());

        for _ in 0..60 {
            s.iterate().unwrap();
        }
        assert!(s.rebuilds() > 0);
        // Front has moved several voxels past the seed on every side
        let at = |i: usize, j: usize, k: usize| s.phi()[i + j * 24 + k * 576];
        assert!(at(7, 12, 12) <= 0.0);
        assert!(at(16, 12, 12) <= 0.0);
        assert!(at(0, 0, 0) > 0.0);
    }
}
