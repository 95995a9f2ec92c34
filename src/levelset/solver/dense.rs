//! Dense level set solver: every voxel, every iteration

use tracing::trace;

use super::{check_time_step, divergence, IterationReport, CONVERGENCE_EPSILON};
use crate::error::Result;
use crate::levelset::function::{GlobalData, LevelSetFunction};
use crate::utils::{all_finite_f32, axpy_f32, max_abs_f32};
use crate::volume::Volume;

#[derive(Debug, Clone)]
pub struct DenseSolver {
    phi: Vec<f32>,
    dims: [usize; 3],
    updates: Vec<f32>,
    function: LevelSetFunction,
    iterations: usize,
}

impl DenseSolver {
    pub fn new(phi0: &Volume<f32>, function: LevelSetFunction) -> Self {
        Self {
            phi: phi0.data().to_vec(),
            dims: phi0.dims(),
            updates: vec![0.0; phi0.len()],
            function,
            iterations: 0,
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

    pub fn iterate(&mut self) -> Result<IterationReport> {
        self.iterations += 1;
        let [nx, ny, nz] = self.dims;

        let mut gd = GlobalData::default();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let idx = i + j * nx + k * nx * ny;
                    self.updates[idx] = self.function.compute_update(&self.phi, i, j, k, &mut gd);
                }
            }
        }

        let dt = self.function.time_step(&gd);
        check_time_step(self.iterations, dt)?;
        let max_change = (dt as f32) * max_abs_f32(&self.updates);

        if dt > 0.0 {
            axpy_f32(&mut self.phi, dt as f32, &self.updates);
            if !all_finite_f32(&self.phi) {
                return Err(divergence(self.iterations, "level set contains non-finite values"));
            }
        }

        trace!(iteration = self.iterations, dt, max_change, "Dense iteration");

        Ok(IterationReport {
            time_step: dt,
            max_change,
            updated_voxels: self.phi.len(),
            converged: max_change <= CONVERGENCE_EPSILON,
        })
    }
}
