//! Snake evolution parameters
//!
//! The evolution equation is
//!
//! dφ/dt = -wp·Sp·|∇φ| + wc·Sc·κ|∇φ| - wa·Sa·∇speed·∇φ + wl·Sl·Δφ
//!
//! with Sx = speed^exponent_x. The curvature exponent is stored in its
//! user-facing form and shifted by one before use, so -1 (the region
//! snake value) makes curvature speed-independent.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnakeError};

/// Kind of snake, decides which parameter combinations are legal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnakeType {
    /// Geodesic snake on an edge-stopping speed in [0, 1]
    EdgeSnake,
    /// Region competition snake on a threshold speed in [-1, 1]
    RegionSnake,
}

/// Numerical backend used to evolve the level set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverType {
    #[default]
    SparseField,
    NarrowBand,
    Dense,
    Legacy,
}

/// Named parameter presets for edge snakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterPreset {
    Sapiro,
    Schlegel,
    Turello,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnakeParameters {
    pub snake_type: SnakeType,
    pub solver: SolverType,

    pub curvature_weight: f64,
    pub curvature_exponent: i32,
    pub advection_weight: f64,
    pub advection_exponent: i32,
    pub propagation_weight: f64,
    pub propagation_exponent: i32,
    pub laplacian_weight: f64,
    pub laplacian_exponent: i32,

    /// Fixed time step, used when `automatic_time_step` is off and by the legacy solver
    pub time_step: f64,
    pub automatic_time_step: bool,
    /// Multiplier on the automatically selected time step
    pub time_step_factor: f64,

    /// Legacy solver: clamp φ to ±ground after every iteration
    pub legacy_clamp: bool,
    pub legacy_ground: f64,
}

impl Default for SnakeParameters {
    fn default() -> Self {
        Self::default_edge()
    }
}

impl SnakeParameters {
    /// Defaults for edge-stopping snakes.
    pub fn default_edge() -> Self {
        Self {
            snake_type: SnakeType::EdgeSnake,
            solver: SolverType::SparseField,
            curvature_weight: 0.2,
            curvature_exponent: 0,
            advection_weight: 0.0,
            advection_exponent: 0,
            propagation_weight: 1.0,
            propagation_exponent: 1,
            laplacian_weight: 0.0,
            laplacian_exponent: 0,
            time_step: 0.1,
            automatic_time_step: true,
            time_step_factor: 1.0,
            legacy_clamp: true,
            legacy_ground: 5.0,
        }
    }

    /// Defaults for region competition snakes.
    pub fn default_region() -> Self {
        Self {
            snake_type: SnakeType::RegionSnake,
            curvature_exponent: -1,
            ..Self::default_edge()
        }
    }

    /// Defaults for the given snake type.
    pub fn default_for(snake_type: SnakeType) -> Self {
        match snake_type {
            SnakeType::EdgeSnake => Self::default_edge(),
            SnakeType::RegionSnake => Self::default_region(),
        }
    }

    /// Apply a named edge snake preset on top of these parameters.
    pub fn with_preset(mut self, preset: ParameterPreset) -> Self {
        // (curvature w, curvature e, advection e, propagation e, laplacian w, laplacian e)
        let (cw, ce, ae, pe, lw, le) = match preset {
            ParameterPreset::Sapiro => (0.7, 0, 0, 1, 0.0, 0),
            ParameterPreset::Schlegel => (0.7, 1, 1, 2, 1.0, 2),
            ParameterPreset::Turello => (0.7, 0, 1, 2, 0.25, 2),
        };
        self.snake_type = SnakeType::EdgeSnake;
        self.curvature_weight = cw;
        self.curvature_exponent = ce;
        self.advection_exponent = ae;
        self.propagation_exponent = pe;
        self.laplacian_weight = lw;
        self.laplacian_exponent = le;
        self
    }

    /// Curvature exponent as applied to the speed image.
    pub fn effective_curvature_exponent(&self) -> i32 {
        self.curvature_exponent + 1
    }

    /// Whether switching from `self` to `other` needs a new solver.
    pub fn is_solver_affecting_change(&self, other: &SnakeParameters) -> bool {
        self.solver != other.solver
    }

    /// Check the combination is legal for the snake type and solver.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("curvature", self.curvature_weight),
            ("advection", self.advection_weight),
            ("propagation", self.propagation_weight),
            ("laplacian", self.laplacian_weight),
        ];
        for (name, w) in weights {
            if !w.is_finite() {
                return Err(SnakeError::configuration(format!("{} weight is not finite", name)));
            }
        }

        if self.snake_type == SnakeType::RegionSnake {
            if self.advection_weight != 0.0 {
                return Err(SnakeError::configuration(
                    "region competition snakes require advection weight 0",
                ));
            }
            if self.curvature_exponent != -1 {
                return Err(SnakeError::configuration(
                    "region competition snakes require curvature exponent -1",
                ));
            }
            if self.propagation_exponent != 1 {
                return Err(SnakeError::configuration(
                    "region competition snakes require propagation exponent 1",
                ));
            }
            if self.laplacian_exponent != 0 {
                return Err(SnakeError::configuration(
                    "region competition snakes require laplacian exponent 0",
                ));
            }
        }

        let exponents = [
            ("curvature", self.effective_curvature_exponent()),
            ("advection", self.advection_exponent),
            ("propagation", self.propagation_exponent),
            ("laplacian", self.laplacian_exponent),
        ];
        for (name, e) in exponents {
            if e < 0 {
                return Err(SnakeError::configuration(format!(
                    "{} speed exponent {} is negative",
                    name, e
                )));
            }
        }

        let fixed_step = self.solver == SolverType::Legacy || !self.automatic_time_step;
        if fixed_step && !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(SnakeError::configuration(format!(
                "time step must be positive, got {}",
                self.time_step
            )));
        }
        if !(self.time_step_factor > 0.0 && self.time_step_factor.is_finite()) {
            return Err(SnakeError::configuration(format!(
                "time step factor must be positive, got {}",
                self.time_step_factor
            )));
        }
        if self.solver == SolverType::Legacy && !(self.legacy_ground > 0.0 && self.legacy_ground.is_finite()) {
            return Err(SnakeError::configuration(format!(
                "legacy ground must be positive, got {}",
                self.legacy_ground
            )));
        }

        Ok(())
    }
}
