//! Legacy snake solver
//!
//! Explicit update with a fixed time step over the interior voxels. Border
//! voxels are linearly extrapolated from the interior after each step and
//! values can be clamped to ±ground. The level set starts clipped to ±ground.

use tracing::trace;

use super::{divergence, IterationReport};
use crate::error::Result;
use crate::levelset::function::{GlobalData, LevelSetFunction};
use crate::levelset::parameters::SnakeParameters;
use crate::utils::{all_finite_f32, clamp_f32};
use crate::volume::Volume;

/// Largest |Δφ| below which the legacy solver reports convergence
pub const LEGACY_EPSILON: f32 = 0.05;

#[derive(Debug, Clone)]
pub struct LegacySolver {
    phi: Vec<f32>,
    dims: [usize; 3],
    updates: Vec<f32>,
    function: LevelSetFunction,
    time_step: f32,
    clamp: bool,
    ground: f32,
    iterations: usize,
}

impl LegacySolver {
    pub fn new(phi0: &Volume<f32>, function: LevelSetFunction, params: &SnakeParameters) -> Self {
        let ground = params.legacy_ground as f32;
        let mut phi = phi0.data().to_vec();
        clamp_f32(&mut phi, -ground, ground);
        Self {
            phi,
            dims: phi0.dims(),
            updates: vec![0.0; phi0.len()],
            function,
            time_step: params.time_step as f32,
            clamp: params.legacy_clamp,
            ground,
            iterations: 0,
        }
    }

    pub fn phi(&self) -> &[f32] {
        &self.phi
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn set_parameters(&mut self, params: &SnakeParameters) {
        self.function.set_parameters(params);
        self.time_step = params.time_step as f32;
        self.clamp = params.legacy_clamp;
        self.ground = params.legacy_ground as f32;
    }

    pub fn iterate(&mut self) -> Result<IterationReport> {
        self.iterations += 1;
        let [nx, ny, nz] = self.dims;
        let dt = self.time_step;

        // Updates are computed from the previous values, then applied
        let mut gd = GlobalData::default();
        let mut max_change = 0.0f32;
        let mut updated = 0usize;
        for k in 1..nz.saturating_sub(1) {
            for j in 1..ny.saturating_sub(1) {
                for i in 1..nx.saturating_sub(1) {
                    let idx = i + j * nx + k * nx * ny;
                    let du = dt * self.function.compute_update(&self.phi, i, j, k, &mut gd);
                    self.updates[idx] = du;
                    max_change = max_change.max(du.abs());
                    updated += 1;
                }
            }
        }
        for k in 1..nz.saturating_sub(1) {
            for j in 1..ny.saturating_sub(1) {
                for i in 1..nx.saturating_sub(1) {
                    let idx = i + j * nx + k * nx * ny;
                    self.phi[idx] += self.updates[idx];
                }
            }
        }

        self.interpolate_border();
        if self.clamp {
            clamp_f32(&mut self.phi, -self.ground, self.ground);
        }
        if !all_finite_f32(&self.phi) {
            return Err(divergence(self.iterations, "level set contains non-finite values"));
        }

        trace!(iteration = self.iterations, max_change, "Legacy iteration");

        Ok(IterationReport {
            time_step: dt as f64,
            max_change,
            updated_voxels: updated,
            converged: max_change <= LEGACY_EPSILON,
        })
    }

    /// Linear extrapolation of the outer faces: u[0] = 2u[1] - u[2].
    fn interpolate_border(&mut self) {
        let [nx, ny, _] = self.dims;
        let strides = [1, nx, nx * ny];
        let dims = self.dims;

        for axis in 0..3 {
            let n = dims[axis];
            if n < 3 {
                continue;
            }
            let s = strides[axis];
            let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
            for q in 0..dims[b] {
                for p in 0..dims[a] {
                    let base = p * strides[a] + q * strides[b];
                    let first = base;
                    let last = base + (n - 1) * s;
                    self.phi[first] = 2.0 * self.phi[first + s] - self.phi[first + 2 * s];
                    self.phi[last] = 2.0 * self.phi[last - s] - self.phi[last - 2 * s];
                }
            }
        }
    }
}
