//! Sparse field level set solver
//!
//! Updates are computed on the active layer only. Voxels whose value leaves
//! [-0.5, 0.5] move to the first inside or outside layer and the change is
//! cascaded outward through the status lists; the outer layers are then
//! recomputed as unit steps from the layer closer to the front.

use tracing::trace;

use super::{check_time_step, divergence, IterationReport, CONVERGENCE_EPSILON};
use crate::error::Result;
use crate::levelset::function::{GlobalData, LevelSetFunction};
use crate::levelset::layers::{
    Grid, LayerSet, LOWER_ACTIVE_THRESHOLD, STATUS_ACTIVE_CHANGING_DOWN, STATUS_ACTIVE_CHANGING_UP,
    STATUS_NULL, UPPER_ACTIVE_THRESHOLD,
};
use crate::volume::Volume;

/// Layers on each side of the active layer
pub const NUMBER_OF_LAYERS: usize = 3;

#[derive(Debug, Clone)]
pub struct SparseFieldSolver {
    phi: Vec<f32>,
    layers: LayerSet,
    function: LevelSetFunction,
    iterations: usize,
}

impl SparseFieldSolver {
    pub fn new(phi0: &Volume<f32>, function: LevelSetFunction) -> Self {
        let mut phi = phi0.data().to_vec();
        let layers = LayerSet::build(&mut phi, Grid::new(phi0.dims()), NUMBER_OF_LAYERS);
        Self {
            phi,
            layers,
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

    pub fn active_voxels(&self) -> usize {
        self.layers.layer_len(0)
    }

    pub fn iterate(&mut self) -> Result<IterationReport> {
        self.iterations += 1;
        self.layers.compact();

        let grid = self.layers.grid();
        let active = std::mem::take(&mut self.layers.layers[0]);

        let mut gd = GlobalData::default();
        let updates: Vec<f32> = active
            .iter()
            .map(|&idx| {
                let (i, j, k) = grid.coords(idx);
                self.function.compute_update(&self.phi, i, j, k, &mut gd)
            })
            .collect();

        let dt = self.function.time_step(&gd);
        check_time_step(self.iterations, dt)?;
        let updated_voxels = active.len();

        if dt == 0.0 || active.is_empty() {
            self.layers.layers[0] = active;
            return Ok(IterationReport {
                time_step: dt,
                max_change: 0.0,
                updated_voxels,
                converged: true,
            });
        }

        let (up, down, max_change) = self.update_active_layer_values(active, &updates, dt as f32)?;
        self.process_status_lists(up, down);
        self.layers.propagate_all_values(&mut self.phi);

        trace!(
            iteration = self.iterations,
            dt,
            max_change,
            active = self.layers.layers[0].len(),
            "Sparse field iteration"
        );

        Ok(IterationReport {
            time_step: dt,
            max_change,
            updated_voxels,
            converged: max_change <= CONVERGENCE_EPSILON,
        })
    }

    /// Apply updates to the active layer; returns the voxels leaving it
    /// upward (outside) and downward (inside) and the largest change.
    fn update_active_layer_values(
        &mut self,
        active: Vec<usize>,
        updates: &[f32],
        dt: f32,
    ) -> Result<(Vec<usize>, Vec<usize>, f32)> {
        let grid = self.layers.grid();
        let mut still_active = Vec::with_capacity(active.len());
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut max_change = 0.0f32;

        for (&idx, &u) in active.iter().zip(updates.iter()) {
            let old = self.phi[idx];
            let new = old + dt * u;
            if !new.is_finite() {
                return Err(divergence(self.iterations, format!("level set value at voxel {} is {}", idx, new)));
            }
            let neighbors = grid.neighbors(idx);

            if new >= UPPER_ACTIVE_THRESHOLD {
                // A neighbour already moving the other way blocks the move
                if neighbors.iter().any(|&nb| self.layers.status[nb] == STATUS_ACTIVE_CHANGING_DOWN) {
                    still_active.push(idx);
                    continue;
                }
                for &nb in &neighbors {
                    if self.layers.status[nb] == 1 {
                        let t = new - 1.0;
                        if self.phi[nb] < LOWER_ACTIVE_THRESHOLD || t.abs() < self.phi[nb].abs() {
                            self.phi[nb] = t;
                        }
                    }
                }
                self.layers.status[idx] = STATUS_ACTIVE_CHANGING_UP;
                up.push(idx);
            } else if new < LOWER_ACTIVE_THRESHOLD {
                if neighbors.iter().any(|&nb| self.layers.status[nb] == STATUS_ACTIVE_CHANGING_UP) {
                    still_active.push(idx);
                    continue;
                }
                for &nb in &neighbors {
                    if self.layers.status[nb] == 2 {
                        let t = new + 1.0;
                        if self.phi[nb] >= UPPER_ACTIVE_THRESHOLD || t.abs() < self.phi[nb].abs() {
                            self.phi[nb] = t;
                        }
                    }
                }
                self.layers.status[idx] = STATUS_ACTIVE_CHANGING_DOWN;
                down.push(idx);
            } else {
                still_active.push(idx);
            }

            max_change = max_change.max((new - old).abs());
            self.phi[idx] = new;
        }

        self.layers.layers[0] = still_active;
        Ok((up, down, max_change))
    }

    /// Cascade layer changes outward from the active layer.
    fn process_status_lists(&mut self, up: Vec<usize>, down: Vec<usize>) {
        let count = self.layers.number_of_layers();

        let mut up_list = self.layers.process_status_list(up, 2, 1);
        let mut down_list = self.layers.process_status_list(down, 1, 2);

        let mut up_to = 0u8;
        let mut down_to = 0u8;
        let mut up_search = 3u8;
        let mut down_search = 4u8;
        while (down_search as usize) < count {
            up_list = self.layers.process_status_list(up_list, up_to, up_search);
            down_list = self.layers.process_status_list(down_list, down_to, down_search);

            up_to = if up_to == 0 { 1 } else { up_to + 2 };
            down_to += 2;
            up_search += 2;
            down_search += 2;
        }

        // Voxels pulled in from outside the band join the outermost layers
        let up_list = self.layers.process_status_list(up_list, up_to, STATUS_NULL);
        let down_list = self.layers.process_status_list(down_list, down_to, STATUS_NULL);
        self.layers.process_outside_list(up_list, (count - 2) as u8);
        self.layers.process_outside_list(down_list, (count - 1) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levelset::parameters::SnakeParameters;

    fn cube_seed(n: usize, lo: usize, hi: usize) -> Volume<f32> {
        let mut phi = Volume::new([n, n, n], [1.0; 3], 1.0f32);
        for k in lo..=hi {
            for j in lo..=hi {
                for i in lo..=hi {
                    phi.set(i, j, k, -1.0);
                }
            }
        }
        phi
    }

    fn solver(seed: &Volume<f32>, propagation: f64) -> SparseFieldSolver {
        let speed = Volume::new(seed.dims(), seed.spacing(), 1.0f32);
        let params = SnakeParameters {
            curvature_weight: 0.0,
            propagation_weight: propagation,
            ..SnakeParameters::default_region()
        };
        SparseFieldSolver::new(seed, LevelSetFunction::new(&speed, &params).unwrap())
    }

    fn assert_layers_consistent(s: &SparseFieldSolver) {
        let status = &s.layers.status;
        for (l, layer) in s.layers.layers.iter().enumerate() {
            for &idx in layer {
                if status[idx] as usize != l {
                    continue;
                }
                let v = s.phi[idx];
                match l {
                    0 => assert!((LOWER_ACTIVE_THRESHOLD..UPPER_ACTIVE_THRESHOLD).contains(&v), "active value {}", v),
                    l if l % 2 == 1 => assert!(v < 0.0, "inside layer {} value {}", l, v),
                    _ => assert!(v > 0.0, "outside layer {} value {}", l, v),
                }
            }
        }
    }

    #[test]
    fn test_initial_front_matches_seed() {
        let seed = cube_seed(12, 4, 7);
        let s = solver(&seed, 1.0);
        for (a, b) in seed.data().iter().zip(s.phi().iter()) {
            assert_eq!(*a <= 0.0, *b <= 0.0);
        }
        assert_eq!(s.active_voxels(), 64 - 8);
        assert_layers_consistent(&s);
    }

    #[test]
    fn test_expansion_grows_monotonically() {
        let seed = cube_seed(14, 5, 8);
        let mut s = solver(&seed, 1.0);
        let mut previous: Vec<bool> = s.phi().iter().map(|&v| v <= 0.0).collect();

        for _ in 0..12 {
            let report = s.iterate().unwrap();
            assert!(!report.converged);
            assert!(report.time_step > 0.0);
            let current: Vec<bool> = s.phi().iter().map(|&v| v <= 0.0).collect();
            for (p, c) in previous.iter().zip(current.iter()) {
                assert!(!p || *c, "an inside voxel moved outside while expanding");
            }
            previous = current;
            assert_layers_consistent(&s);
        }

        let inside = previous.iter().filter(|&&b| b).count();
        assert!(inside > 64);
    }

    #[test]
    fn test_contraction_shrinks_and_vanishes() {
        let seed = cube_seed(10, 4, 5);
        let mut s = solver(&seed, -1.0);
        let mut converged = false;
        for _ in 0..60 {
            let report = s.iterate().unwrap();
            assert_layers_consistent(&s);
            if report.converged {
                converged = true;
                break;
            }
        }
        assert!(converged);
        assert!(s.phi().iter().all(|&v| v > 0.0));
        assert_eq!(s.active_voxels(), 0);
    }
}
