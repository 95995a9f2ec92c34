//! Level set evolution function
//!
//! Computes the update dφ/dt at a voxel from propagation, curvature,
//! advection and Laplacian smoothing terms. Propagation and advection use
//! upwind differences, curvature and Laplacian central differences.
//! Derivatives are scaled by 1/spacing.

use crate::error::{Result, SnakeError};
use crate::levelset::parameters::SnakeParameters;
use crate::utils::central_gradient;
use crate::volume::Volume;

/// Regularizer added to |∇φ|² in the curvature term
const MIN_NORM_SQR: f64 = 1.0e-6;

/// CFL constant for the hyperbolic terms
const WAVE_DT: f64 = 1.0 / 6.0;

/// CFL constant for the parabolic terms
const DIFFUSION_DT: f64 = 1.0 / 6.0;

/// Per-iteration maxima used to pick a stable time step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalData {
    pub max_advection_change: f64,
    pub max_propagation_change: f64,
    pub max_diffusion_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Exponents {
    propagation: i32,
    curvature: i32,
    advection: i32,
    laplacian: i32,
}

impl Exponents {
    fn from_parameters(p: &SnakeParameters) -> Self {
        Self {
            propagation: p.propagation_exponent,
            curvature: p.effective_curvature_exponent(),
            advection: p.advection_exponent,
            laplacian: p.laplacian_exponent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LevelSetFunction {
    dims: [usize; 3],
    scale: [f64; 3],
    speed: Vec<f32>,
    speed_gradient: [Vec<f32>; 3],

    propagation_speed: Vec<f32>,
    curvature_speed: Vec<f32>,
    laplacian_speed: Vec<f32>,
    /// Sa·∇speed
    advection_field: [Vec<f32>; 3],

    exponents: Exponents,
    propagation_weight: f64,
    curvature_weight: f64,
    advection_weight: f64,
    laplacian_weight: f64,

    automatic_time_step: bool,
    time_step: f64,
    time_step_factor: f64,
}

/// speed^e, with speed^0 = 1 everywhere
fn powered(speed: &[f32], exponent: i32) -> Vec<f32> {
    if exponent == 0 {
        vec![1.0; speed.len()]
    } else {
        speed.iter().map(|&s| s.powi(exponent)).collect()
    }
}

impl LevelSetFunction {
    /// Build the function for a speed image.
    pub fn new(speed: &Volume<f32>, params: &SnakeParameters) -> Result<Self> {
        params.validate()?;
        if !speed.data().iter().all(|v| v.is_finite()) {
            return Err(SnakeError::configuration("speed image contains non-finite values"));
        }

        let [nx, ny, nz] = speed.dims();
        let [vsx, vsy, vsz] = speed.spacing();
        let (gx, gy, gz) = central_gradient(speed.data(), nx, ny, nz, vsx, vsy, vsz);

        let exponents = Exponents::from_parameters(params);
        let mut function = Self {
            dims: speed.dims(),
            scale: [1.0 / vsx, 1.0 / vsy, 1.0 / vsz],
            speed: speed.data().to_vec(),
            speed_gradient: [gx, gy, gz],
            propagation_speed: Vec::new(),
            curvature_speed: Vec::new(),
            laplacian_speed: Vec::new(),
            advection_field: [Vec::new(), Vec::new(), Vec::new()],
            exponents,
            propagation_weight: 0.0,
            curvature_weight: 0.0,
            advection_weight: 0.0,
            laplacian_weight: 0.0,
            automatic_time_step: true,
            time_step: 0.0,
            time_step_factor: 1.0,
        };
        function.compute_term_speeds();
        function.set_parameters(params);
        Ok(function)
    }

    fn compute_term_speeds(&mut self) {
        let e = self.exponents;
        self.propagation_speed = powered(&self.speed, e.propagation);
        self.curvature_speed = powered(&self.speed, e.curvature);
        self.laplacian_speed = powered(&self.speed, e.laplacian);

        let advection_speed = powered(&self.speed, e.advection);
        self.advection_field = [0, 1, 2].map(|d| {
            self.speed_gradient[d]
                .iter()
                .zip(advection_speed.iter())
                .map(|(&g, &s)| g * s)
                .collect()
        });
    }

    /// Apply new weights and time step settings; per-term speed images are
    /// recomputed only when an exponent changed.
    pub fn set_parameters(&mut self, params: &SnakeParameters) {
        let exponents = Exponents::from_parameters(params);
        if exponents != self.exponents {
            self.exponents = exponents;
            self.compute_term_speeds();
        }
        self.propagation_weight = params.propagation_weight;
        self.curvature_weight = params.curvature_weight;
        self.advection_weight = params.advection_weight;
        self.laplacian_weight = params.laplacian_weight;
        self.automatic_time_step = params.automatic_time_step;
        self.time_step = params.time_step;
        self.time_step_factor = params.time_step_factor;
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Update dφ/dt at voxel (i, j, k); neighbours outside the grid are clamped.
    pub fn compute_update(&self, phi: &[f32], i: usize, j: usize, k: usize, gd: &mut GlobalData) -> f32 {
        let [nx, ny, nz] = self.dims;
        let at = |i: usize, j: usize, k: usize| phi[i + j * nx + k * nx * ny] as f64;

        let (im, ip) = (i.saturating_sub(1), (i + 1).min(nx - 1));
        let (jm, jp) = (j.saturating_sub(1), (j + 1).min(ny - 1));
        let (km, kp) = (k.saturating_sub(1), (k + 1).min(nz - 1));

        let idx = i + j * nx + k * nx * ny;
        let c = at(i, j, k);
        let [sx, sy, sz] = self.scale;

        // One-sided and central first derivatives
        let fwd = [(at(ip, j, k) - c) * sx, (at(i, jp, k) - c) * sy, (at(i, j, kp) - c) * sz];
        let bwd = [(c - at(im, j, k)) * sx, (c - at(i, jm, k)) * sy, (c - at(i, j, km)) * sz];
        let cen = [0.5 * (fwd[0] + bwd[0]), 0.5 * (fwd[1] + bwd[1]), 0.5 * (fwd[2] + bwd[2])];

        let mut update = 0.0f64;

        // Curvature and Laplacian
        let curvature_coef = self.curvature_weight * self.curvature_speed[idx] as f64;
        let laplacian_coef = self.laplacian_weight * self.laplacian_speed[idx] as f64;
        if curvature_coef != 0.0 || laplacian_coef != 0.0 {
            let uxx = (fwd[0] - bwd[0]) * sx;
            let uyy = (fwd[1] - bwd[1]) * sy;
            let uzz = (fwd[2] - bwd[2]) * sz;

            if curvature_coef != 0.0 {
                let uxy = 0.25 * (at(ip, jp, k) + at(im, jm, k) - at(ip, jm, k) - at(im, jp, k)) * sx * sy;
                let uyz = 0.25 * (at(i, jp, kp) + at(i, jm, km) - at(i, jp, km) - at(i, jm, kp)) * sy * sz;
                let uxz = 0.25 * (at(ip, j, kp) + at(im, j, km) - at(ip, j, km) - at(im, j, kp)) * sx * sz;

                let [ux, uy, uz] = cen;
                let (ux2, uy2, uz2) = (ux * ux, uy * uy, uz * uz);
                let grad_mag_sqr = MIN_NORM_SQR + ux2 + uy2 + uz2;

                let curvature = ((ux2 + uy2) * uzz + (uy2 + uz2) * uxx + (uz2 + ux2) * uyy
                    - 2.0 * (ux * uy * uxy + uy * uz * uyz + uz * ux * uxz))
                    / grad_mag_sqr;
                update += curvature_coef * curvature;
            }

            if laplacian_coef != 0.0 {
                update += laplacian_coef * (uxx + uyy + uzz);
            }

            gd.max_diffusion_change = gd.max_diffusion_change.max(curvature_coef.abs() + laplacian_coef.abs());
        }

        // Advection, upwind on the velocity direction
        if self.advection_weight != 0.0 {
            let mut advection = 0.0;
            for d in 0..3 {
                let v = self.advection_weight * self.advection_field[d][idx] as f64;
                let du = if v > 0.0 { bwd[d] } else { fwd[d] };
                advection += v * du;
                gd.max_advection_change = gd.max_advection_change.max(v.abs());
            }
            update -= advection;
        }

        // Propagation, Godunov upwind gradient magnitude
        let f = self.propagation_weight * self.propagation_speed[idx] as f64;
        if f != 0.0 {
            let mut grad_sqr = 0.0;
            for d in 0..3 {
                let (b, fw) = (bwd[d], fwd[d]);
                grad_sqr += if f > 0.0 {
                    b.max(0.0).powi(2) + fw.min(0.0).powi(2)
                } else {
                    b.min(0.0).powi(2) + fw.max(0.0).powi(2)
                };
            }
            update -= f * grad_sqr.sqrt();
            gd.max_propagation_change = gd.max_propagation_change.max(f.abs());
        }

        update as f32
    }

    /// Time step for one iteration given the maxima seen while computing updates.
    ///
    /// A fixed time step is returned unchanged when automatic selection is off.
    pub fn time_step(&self, gd: &GlobalData) -> f64 {
        if !self.automatic_time_step {
            return self.time_step;
        }

        let wave = gd.max_advection_change + gd.max_propagation_change;
        let dt = if gd.max_diffusion_change > 0.0 {
            if wave > 0.0 {
                (WAVE_DT / wave).min(DIFFUSION_DT / gd.max_diffusion_change)
            } else {
                DIFFUSION_DT / gd.max_diffusion_change
            }
        } else if wave > 0.0 {
            WAVE_DT / wave
        } else {
            0.0
        };

        let max_scale = self.scale.iter().cloned().fold(0.0f64, f64::max);
        dt / max_scale * self.time_step_factor
    }
}
