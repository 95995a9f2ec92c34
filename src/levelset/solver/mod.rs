//! Numerical backends for level set evolution
//!
//! - `sparse_field`: active layer with status lists (default)
//! - `narrow_band`: band rebuilt around the zero crossing every iteration
//! - `dense`: every voxel every iteration
//! - `legacy`: historical explicit scheme with fixed time step and clamping

pub mod sparse_field;
pub mod narrow_band;
pub mod dense;
pub mod legacy;

pub use sparse_field::SparseFieldSolver;
pub use narrow_band::NarrowBandSolver;
pub use dense::DenseSolver;
pub use legacy::LegacySolver;

use crate::error::{Result, SnakeError};
use crate::levelset::function::LevelSetFunction;
use crate::levelset::parameters::{SnakeParameters, SolverType};
use crate::volume::Volume;

/// Largest per-voxel change below which sparse, narrow band and dense
/// solvers report convergence
pub const CONVERGENCE_EPSILON: f32 = 1.0e-4;

/// Outcome of a single iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub time_step: f64,
    /// Largest |Δφ| applied in the iteration
    pub max_change: f32,
    /// Voxels updated in the iteration
    pub updated_voxels: usize,
    pub converged: bool,
}

/// Numerical backend, fixed when the driver is initialized
#[derive(Debug, Clone)]
pub enum Solver {
    SparseField(SparseFieldSolver),
    NarrowBand(NarrowBandSolver),
    Dense(DenseSolver),
    Legacy(LegacySolver),
}

impl Solver {
    /// Create the backend selected by `params.solver`, seeded with `phi0`.
    pub fn new(phi0: &Volume<f32>, speed: &Volume<f32>, params: &SnakeParameters) -> Result<Self> {
        phi0.check_same_grid(speed)?;
        if !phi0.data().iter().all(|v| v.is_finite()) {
            return Err(SnakeError::configuration("initial level set contains non-finite values"));
        }

        let function = LevelSetFunction::new(speed, params)?;
        let solver = match params.solver {
            SolverType::SparseField => Solver::SparseField(SparseFieldSolver::new(phi0, function)),
            SolverType::NarrowBand => Solver::NarrowBand(NarrowBandSolver::new(phi0, function)),
            SolverType::Dense => Solver::Dense(DenseSolver::new(phi0, function)),
            SolverType::Legacy => Solver::Legacy(LegacySolver::new(phi0, function, params)),
        };
        Ok(solver)
    }

    pub fn solver_type(&self) -> SolverType {
        match self {
            Solver::SparseField(_) => SolverType::SparseField,
            Solver::NarrowBand(_) => SolverType::NarrowBand,
            Solver::Dense(_) => SolverType::Dense,
            Solver::Legacy(_) => SolverType::Legacy,
        }
    }

    /// Advance one iteration.
    pub fn iterate(&mut self) -> Result<IterationReport> {
        match self {
            Solver::SparseField(s) => s.iterate(),
            Solver::NarrowBand(s) => s.iterate(),
            Solver::Dense(s) => s.iterate(),
            Solver::Legacy(s) => s.iterate(),
        }
    }

    /// Current level set values.
    pub fn phi(&self) -> &[f32] {
        match self {
            Solver::SparseField(s) => s.phi(),
            Solver::NarrowBand(s) => s.phi(),
            Solver::Dense(s) => s.phi(),
            Solver::Legacy(s) => s.phi(),
        }
    }

    /// Apply parameters that do not require a new backend.
    pub fn set_parameters(&mut self, params: &SnakeParameters) {
        match self {
            Solver::SparseField(s) => s.function_mut().set_parameters(params),
            Solver::NarrowBand(s) => s.function_mut().set_parameters(params),
            Solver::Dense(s) => s.function_mut().set_parameters(params),
            Solver::Legacy(s) => s.set_parameters(params),
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            Solver::SparseField(s) => s.iterations(),
            Solver::NarrowBand(s) => s.iterations(),
            Solver::Dense(s) => s.iterations(),
            Solver::Legacy(s) => s.iterations(),
        }
    }
}

/// Error for a non-finite time step or level set value.
pub(crate) fn divergence(iteration: usize, reason: impl Into<String>) -> SnakeError {
    SnakeError::NumericDivergence {
        iteration,
        reason: reason.into(),
    }
}

/// Check a time step is usable.
pub(crate) fn check_time_step(iteration: usize, dt: f64) -> Result<()> {
    if !dt.is_finite() || dt < 0.0 {
        return Err(divergence(iteration, format!("time step {} is not usable", dt)));
    }
    Ok(())
}
