//! Value-typed 3D voxel grids
//!
//! Volumes are stored flat in Fortran order: index = i + j*nx + k*nx*ny.

use crate::error::{Result, SnakeError};

/// A 3D grid of voxels with physical spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Vec<T>,
    dims: [usize; 3],
    spacing: [f64; 3],
}

impl<T: Copy> Volume<T> {
    /// Create a volume filled with `value`.
    pub fn new(dims: [usize; 3], spacing: [f64; 3], value: T) -> Self {
        Self {
            data: vec![value; dims[0] * dims[1] * dims[2]],
            dims,
            spacing,
        }
    }

    /// Wrap existing data, checking its length against `dims`.
    pub fn from_vec(data: Vec<T>, dims: [usize; 3], spacing: [f64; 3]) -> Result<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if data.len() != expected {
            return Err(SnakeError::configuration(format!(
                "volume data has {} voxels, dimensions {:?} need {}",
                data.len(),
                dims,
                expected
            )));
        }
        if spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(SnakeError::configuration(format!(
                "voxel spacing must be positive, got {:?}",
                spacing
            )));
        }
        Ok(Self { data, dims, spacing })
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims[0] + k * self.dims[0] * self.dims[1]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> T {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: T) {
        let idx = self.idx(i, j, k);
        self.data[idx] = value;
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return an error unless `other` has the same dimensions.
    pub fn check_same_grid<U>(&self, other: &Volume<U>) -> Result<()> {
        if self.dims != other.dims {
            return Err(SnakeError::DimensionMismatch {
                expected: self.dims,
                actual: other.dims,
            });
        }
        Ok(())
    }

    /// Copy out the sub-volume covered by `region`.
    pub fn extract(&self, region: &Region) -> Result<Volume<T>> {
        region.check_inside(self.dims)?;
        let [sx, sy, sz] = region.size;
        let [ox, oy, oz] = region.index;
        let mut data = Vec::with_capacity(sx * sy * sz);
        for k in 0..sz {
            for j in 0..sy {
                let row = self.idx(ox, oy + j, oz + k);
                data.extend_from_slice(&self.data[row..row + sx]);
            }
        }
        Ok(Volume {
            data,
            dims: region.size,
            spacing: self.spacing,
        })
    }
}

/// Axis-aligned sub-volume of a larger image: voxel offset and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub index: [usize; 3],
    pub size: [usize; 3],
}

impl Region {
    pub fn new(index: [usize; 3], size: [usize; 3]) -> Self {
        Self { index, size }
    }

    /// Region covering a whole image of the given dimensions.
    pub fn whole(dims: [usize; 3]) -> Self {
        Self { index: [0; 3], size: dims }
    }

    pub fn voxel_count(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Return an error unless the region lies inside an image of `dims`.
    pub fn check_inside(&self, dims: [usize; 3]) -> Result<()> {
        for d in 0..3 {
            if self.index[d] + self.size[d] > dims[d] {
                return Err(SnakeError::configuration(format!(
                    "region {:?}+{:?} exceeds image dimensions {:?}",
                    self.index, self.size, dims
                )));
            }
        }
        Ok(())
    }
}
