//! Separable Gaussian smoothing for 3D volumes

/// Create a normalized 1D Gaussian kernel with radius ceil(3σ)
///
/// # Arguments
/// * `sigma` - Standard deviation in voxels
pub fn make_gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as usize;
    let size = 2 * radius + 1;

    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Anisotropic separable Gaussian smoothing
///
/// Samples outside the volume are dropped and the kernel renormalized,
/// so a constant image stays constant up to the border.
///
/// # Arguments
/// * `data` - Input volume (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Array dimensions
/// * `sigma` - Standard deviation per axis, in voxels (0 skips the axis)
pub fn gaussian_smooth_3d(
    data: &[f32],
    nx: usize, ny: usize, nz: usize,
    sigma: [f64; 3],
) -> Vec<f32> {
    let mut result = data.to_vec();
    let dims = [nx, ny, nz];
    let strides = [1, nx, nx * ny];

    for axis in 0..3 {
        if sigma[axis] <= 0.0 || dims[axis] < 2 {
            continue;
        }
        let kernel = make_gaussian_kernel(sigma[axis]);
        result = convolve_axis(&result, dims, strides[axis], axis, &kernel);
    }

    result
}

/// Apply 1D convolution along one axis
fn convolve_axis(
    data: &[f32],
    dims: [usize; 3],
    stride: usize,
    axis: usize,
    kernel: &[f64],
) -> Vec<f32> {
    let [nx, ny, nz] = dims;
    let len = dims[axis] as isize;
    let radius = ((kernel.len() - 1) / 2) as isize;
    let mut result = vec![0.0f32; data.len()];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = i + j * nx + k * nx * ny;
                let pos = [i, j, k][axis] as isize;

                let mut sum = 0.0f64;
                let mut weight_sum = 0.0f64;
                for (ki, &w) in kernel.iter().enumerate() {
                    let offset = ki as isize - radius;
                    let p = pos + offset;
                    if p >= 0 && p < len {
                        let n_idx = (idx as isize + offset * stride as isize) as usize;
                        sum += data[n_idx] as f64 * w;
                        weight_sum += w;
                    }
                }

                result[idx] = if weight_sum > 0.0 { (sum / weight_sum) as f32 } else { 0.0 };
            }
        }
    }

    result
}
