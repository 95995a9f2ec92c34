//! Layered narrow band bookkeeping
//!
//! The band around the zero level set is stored as 2N+1 layers of voxel
//! indices. Layer 0 is the active layer holding values in [-0.5, 0.5].
//! Odd layers are inside (layer 2m-1 sits at -m), even layers outside
//! (layer 2m sits at +m). A status volume records the layer of every voxel.
//! Neighbour lookups past the grid face return the voxel itself, which gives
//! zero-flux boundaries and lets face voxels join the layers.

/// Voxel belongs to no layer
pub const STATUS_NULL: u8 = 255;
/// Voxel is being moved between layers
pub const STATUS_CHANGING: u8 = 254;
pub const STATUS_ACTIVE_CHANGING_UP: u8 = 253;
pub const STATUS_ACTIVE_CHANGING_DOWN: u8 = 252;

/// Active values stay strictly inside these bounds
pub const UPPER_ACTIVE_THRESHOLD: f32 = 0.5;
pub const LOWER_ACTIVE_THRESHOLD: f32 = -0.5;

const MIN_NORM: f32 = 1.0e-6;

/// Flat grid geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub dims: [usize; 3],
}

impl Grid {
    pub fn new(dims: [usize; 3]) -> Self {
        Self { dims }
    }

    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let [nx, ny, _] = self.dims;
        (idx % nx, (idx / nx) % ny, idx / (nx * ny))
    }

    /// Face neighbours as (-x, +x, -y, +y, -z, +z); a neighbour past the
    /// grid face is the voxel itself.
    #[inline]
    pub fn neighbors(&self, idx: usize) -> [usize; 6] {
        let (i, j, k) = self.coords(idx);
        let [nx, ny, nz] = self.dims;
        let sy = nx;
        let sz = nx * ny;
        [
            if i > 0 { idx - 1 } else { idx },
            if i + 1 < nx { idx + 1 } else { idx },
            if j > 0 { idx - sy } else { idx },
            if j + 1 < ny { idx + sy } else { idx },
            if k > 0 { idx - sz } else { idx },
            if k + 1 < nz { idx + sz } else { idx },
        ]
    }
}

#[inline]
fn is_inside(v: f32) -> bool {
    v <= 0.0
}

/// Layer lists plus the status volume
#[derive(Debug, Clone)]
pub struct LayerSet {
    grid: Grid,
    half_width: usize,
    pub layers: Vec<Vec<usize>>,
    pub status: Vec<u8>,
}

impl LayerSet {
    /// Build `half_width` layers on each side of the zero crossing of `phi`
    /// and rewrite `phi` to layer distances, with ±(half_width + 1) outside
    /// the band.
    pub fn build(phi: &mut [f32], grid: Grid, half_width: usize) -> Self {
        Self::build_with(phi, grid, half_width, false)
    }

    /// Like `build`, but active voxels already within the active thresholds
    /// keep their value so sub-voxel front positions survive re-distancing.
    pub fn rebuild(phi: &mut [f32], grid: Grid, half_width: usize) -> Self {
        Self::build_with(phi, grid, half_width, true)
    }

    fn build_with(phi: &mut [f32], grid: Grid, half_width: usize, keep_active: bool) -> Self {
        let n = grid.len();
        let mut set = Self {
            grid,
            half_width,
            layers: vec![Vec::new(); 2 * half_width + 1],
            status: vec![STATUS_NULL; n],
        };

        set.construct_active_layer(phi, keep_active);
        set.construct_first_layers(phi);
        for from in 1..(2 * half_width - 1) {
            set.construct_layer(from as u8, from as u8 + 2);
        }

        let background = set.background();
        for idx in 0..n {
            if set.status[idx] == STATUS_NULL {
                phi[idx] = if is_inside(phi[idx]) { -background } else { background };
            }
        }

        set.propagate_all_values(phi);
        set
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn number_of_layers(&self) -> usize {
        self.layers.len()
    }

    /// Value written to voxels that leave the band
    pub fn background(&self) -> f32 {
        (self.half_width + 1) as f32
    }

    /// Zero crossing voxels: a voxel is active when a face neighbour has the
    /// opposite sign and the voxel is closer to zero (ties go inside).
    fn construct_active_layer(&mut self, phi: &mut [f32], keep_active: bool) {
        let grid = self.grid;
        let mut active = Vec::new();
        for idx in 0..grid.len() {
            let v = phi[idx];
            let crossing = grid.neighbors(idx).iter().any(|&nb| {
                let w = phi[nb];
                is_inside(v) != is_inside(w)
                    && (v.abs() < w.abs() || (v.abs() == w.abs() && is_inside(v)))
            });
            if crossing {
                active.push(idx);
            }
        }

        // Sub-voxel distance estimate φ/|∇φ| using the steeper one-sided difference
        let values: Vec<f32> = active
            .iter()
            .map(|&idx| {
                let c = phi[idx];
                if keep_active && (LOWER_ACTIVE_THRESHOLD..=UPPER_ACTIVE_THRESHOLD).contains(&c) {
                    return c;
                }
                let nb = grid.neighbors(idx);
                let mut length = 0.0f32;
                for axis in 0..3 {
                    let forward = phi[nb[2 * axis + 1]] - c;
                    let backward = c - phi[nb[2 * axis]];
                    let d = if forward.abs() > backward.abs() { forward } else { backward };
                    length += d * d;
                }
                let distance = c / (length.sqrt() + MIN_NORM);
                distance.clamp(LOWER_ACTIVE_THRESHOLD, UPPER_ACTIVE_THRESHOLD)
            })
            .collect();

        for (&idx, &value) in active.iter().zip(values.iter()) {
            phi[idx] = value;
            self.status[idx] = 0;
        }
        self.layers[0] = active;
    }

    fn construct_first_layers(&mut self, phi: &[f32]) {
        let grid = self.grid;
        let active = self.layers[0].clone();
        for idx in active {
            for nb in grid.neighbors(idx) {
                if self.status[nb] == STATUS_NULL {
                    let layer = if is_inside(phi[nb]) { 1 } else { 2 };
                    self.status[nb] = layer;
                    self.layers[layer as usize].push(nb);
                }
            }
        }
    }

    fn construct_layer(&mut self, from: u8, to: u8) {
        let grid = self.grid;
        let nodes = self.layers[from as usize].clone();
        for idx in nodes {
            for nb in grid.neighbors(idx) {
                if self.status[nb] == STATUS_NULL {
                    self.status[nb] = to;
                    self.layers[to as usize].push(nb);
                }
            }
        }
    }

    /// Drop stale and duplicate entries from every layer list.
    pub fn compact(&mut self) {
        for (l, layer) in self.layers.iter_mut().enumerate() {
            let status = &self.status;
            layer.retain(|&idx| status[idx] as usize == l);
            layer.sort_unstable();
            layer.dedup();
        }
    }

    /// Recompute the values of every non-active layer from the layer next
    /// closer to the zero crossing, moving voxels that lost contact with it
    /// one layer outward (or out of the band).
    pub fn propagate_all_values(&mut self, phi: &mut [f32]) {
        self.propagate_layer_values(phi, 0, 1, 3, true);
        self.propagate_layer_values(phi, 0, 2, 4, false);
        let count = self.layers.len();
        for from in 1..count.saturating_sub(2) {
            let to = from + 2;
            self.propagate_layer_values(phi, from, to, to + 2, to % 2 == 1);
        }
    }

    fn propagate_layer_values(&mut self, phi: &mut [f32], from: usize, to: usize, promote: usize, inside: bool) {
        let grid = self.grid;
        let delta = if inside { -1.0 } else { 1.0 };
        let past_end = promote >= self.layers.len();
        let background = self.background();

        let nodes = std::mem::take(&mut self.layers[to]);
        let mut kept = Vec::with_capacity(nodes.len());
        for idx in nodes {
            if self.status[idx] as usize != to {
                continue;
            }

            let mut closest: Option<f32> = None;
            for nb in grid.neighbors(idx) {
                if self.status[nb] as usize == from {
                    let v = phi[nb];
                    closest = Some(match closest {
                        None => v,
                        Some(t) if inside => t.max(v),
                        Some(t) => t.min(v),
                    });
                }
            }

            match closest {
                Some(v) => {
                    phi[idx] = v + delta;
                    kept.push(idx);
                }
                None if past_end => {
                    self.status[idx] = STATUS_NULL;
                    phi[idx] = delta * background;
                }
                None => {
                    self.status[idx] = promote as u8;
                    self.layers[promote].push(idx);
                }
            }
        }
        self.layers[to] = kept;
    }

    /// Move each voxel of `input` into layer `change_to` and collect its
    /// neighbours whose status is `search_for`, marking them as changing.
    pub fn process_status_list(&mut self, input: Vec<usize>, change_to: u8, search_for: u8) -> Vec<usize> {
        let grid = self.grid;
        let mut output = Vec::new();
        for idx in input {
            self.status[idx] = change_to;
            self.layers[change_to as usize].push(idx);
            for nb in grid.neighbors(idx) {
                if self.status[nb] == search_for {
                    self.status[nb] = STATUS_CHANGING;
                    output.push(nb);
                }
            }
        }
        output
    }

    /// Bring voxels from outside the band into layer `change_to`.
    pub fn process_outside_list(&mut self, input: Vec<usize>, change_to: u8) {
        for idx in input {
            self.status[idx] = change_to;
            self.layers[change_to as usize].push(idx);
        }
    }

    /// Live voxels of a layer.
    pub fn layer_len(&self, layer: usize) -> usize {
        self.layers[layer]
            .iter()
            .filter(|&&idx| self.status[idx] as usize == layer)
            .count()
    }
}
